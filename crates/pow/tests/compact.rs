use utxod_pow::difficulty::{
    block_proof, compact_to_u256, hash_to_u256, next_chain_work, u256_to_hash, CompactError,
};
use utxod_pow::U256;

#[test]
fn compact_layout() {
    let value = compact_to_u256(0x207f_ffff).expect("target");
    let bytes = u256_to_hash(value);
    assert_eq!(bytes[31], 0x7f);
    assert_eq!(bytes[30], 0xff);
    assert_eq!(bytes[29], 0xff);
    assert!(bytes[..29].iter().all(|b| *b == 0));
}

#[test]
fn compact_rejects_negative_and_overflow() {
    assert_eq!(compact_to_u256(0x0480_0001), Err(CompactError::Negative));
    assert_eq!(compact_to_u256(0xff12_3456), Err(CompactError::Overflow));
}

#[test]
fn genesis_difficulty_proof() {
    // 0x1d00ffff is difficulty 1: 2^32 + 2^16 + 1 expected hashes.
    let proof = block_proof(0x1d00_ffff).expect("proof");
    assert_eq!(proof, U256::from(0x1_0001_0001u64));
    assert_eq!(block_proof(0).expect("zero target"), U256::zero());
}

#[test]
fn chain_work_accumulates() {
    let first = next_chain_work(U256::zero(), 0x1d00_ffff).expect("work");
    let second = next_chain_work(first, 0x1d00_ffff).expect("work");
    assert_eq!(second, first * 2);
    assert_eq!(hash_to_u256(&u256_to_hash(second)), second);
    assert_eq!(
        next_chain_work(U256::MAX, 0x1d00_ffff),
        Err(CompactError::Overflow)
    );
}
