//! Consensus-wide constants shared across validation.

/// Coinbase transaction outputs can only be spent after this number of new blocks.
pub const COINBASE_MATURITY: i32 = 100;
/// Lock time values below this are block heights, values at or above are unix times.
pub const LOCKTIME_THRESHOLD: u32 = 500_000_000;
/// Sequence number that disables lock time evaluation for an input.
pub const SEQUENCE_FINAL: u32 = 0xffff_ffff;
/// Setting this bit disables the relative lock time of an input (BIP68).
pub const SEQUENCE_LOCKTIME_DISABLE_FLAG: u32 = 1 << 31;
/// When set, the relative lock time is measured in units of 512 seconds.
pub const SEQUENCE_LOCKTIME_TYPE_FLAG: u32 = 1 << 22;
/// Bits of the sequence number that carry the relative lock time value.
pub const SEQUENCE_LOCKTIME_MASK: u32 = 0x0000_ffff;
/// Relative time locks are expressed in 2^9 second units.
pub const SEQUENCE_LOCKTIME_GRANULARITY: u32 = 9;
/// Smallest serialized transaction accepted between HF20181115 and HF20230515.
pub const MIN_TX_SIZE_LEGACY: usize = 100;
/// Smallest serialized transaction accepted after HF20230515.
pub const MIN_TX_SIZE: usize = 65;
/// Maximum signature checks a single transaction may execute (HF20200515).
pub const MAX_TX_SIGCHECKS: u32 = 3_000;
/// Number of trailing blocks whose timestamps form the median time past.
pub const MEDIAN_TIME_SPAN: usize = 11;
