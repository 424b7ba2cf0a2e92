use utxod_consensus::Hash256;
use utxod_primitives::block::{Block, BlockHeader, HEADER_SIZE};
use utxod_primitives::encoding::{decode, encode, DecodeError};
use utxod_primitives::hash::{bytes_to_hex, hash256_to_hex};
use utxod_primitives::outpoint::OutPoint;
use utxod_primitives::transaction::{Transaction, TxIn, TxOut};

const GENESIS_COINBASE: &str = "01000000010000000000000000000000000000000000000000000000000000000000000000ffffffff4d04ffff001d0104455468652054696d65732030332f4a616e2f32303039204368616e63656c6c6f72206f6e206272696e6b206f66207365636f6e64206261696c6f757420666f722062616e6b73ffffffff0100f2052a01000000434104678afdb0fe5548271967f1a67130b7105cd6a828e03909a67962e0ea1f61deb649f6bc3f4cef38c4f35504e51ec112de5c384df7ba0b8d578a4c702b6bf11d5fac00000000";

fn hex_to_bytes(hex: &str) -> Vec<u8> {
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).expect("hex"))
        .collect()
}

fn seq_hash(start: u8) -> Hash256 {
    std::array::from_fn(|i| start.wrapping_add(i as u8))
}

fn genesis_header(merkle_root: Hash256) -> BlockHeader {
    BlockHeader {
        version: 1,
        prev_block: [0u8; 32],
        merkle_root,
        time: 1_231_006_505,
        bits: 0x1d00_ffff,
        nonce: 2_083_236_893,
    }
}

#[test]
fn genesis_coinbase_txid() {
    let bytes = hex_to_bytes(GENESIS_COINBASE);
    let tx = decode::<Transaction>(&bytes).expect("decode coinbase");

    assert!(tx.is_coinbase());
    assert_eq!(tx.vout.len(), 1);
    assert_eq!(tx.vout[0].value, 50 * 100_000_000);
    assert_eq!(tx.serialized_size(), bytes.len());
    assert_eq!(encode(&tx), bytes);
    assert_eq!(
        hash256_to_hex(&tx.txid()),
        "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b"
    );
}

#[test]
fn genesis_block_round_trip() {
    let coinbase =
        decode::<Transaction>(&hex_to_bytes(GENESIS_COINBASE)).expect("decode coinbase");
    let block = Block {
        header: genesis_header(coinbase.txid()),
        transactions: vec![coinbase],
    };

    assert_eq!(encode(&block.header).len(), HEADER_SIZE);
    assert!(block.header.is_genesis());
    assert_eq!(
        hash256_to_hex(&block.hash()),
        "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f"
    );

    let encoded = encode(&block);
    let decoded = decode::<Block>(&encoded).expect("decode block");
    assert_eq!(decoded.header, block.header);
    assert_eq!(decoded.transactions, block.transactions);
    assert_eq!(decoded.output_count(), 1);
}

#[test]
fn transaction_layout() {
    let tx = Transaction {
        version: 2,
        vin: vec![TxIn {
            prevout: OutPoint::new(seq_hash(0x10), 3),
            script_sig: vec![0x51],
            sequence: 0xffff_fffe,
        }],
        vout: vec![TxOut {
            value: 1_000,
            script_pubkey: vec![0x6a],
        }],
        lock_time: 7,
    };

    let encoded = encode(&tx);
    let mut expected = Vec::new();
    expected.extend_from_slice(&2i32.to_le_bytes());
    expected.push(1);
    expected.extend_from_slice(&seq_hash(0x10));
    expected.extend_from_slice(&3u32.to_le_bytes());
    expected.extend_from_slice(&[1, 0x51]);
    expected.extend_from_slice(&0xffff_fffeu32.to_le_bytes());
    expected.push(1);
    expected.extend_from_slice(&1_000i64.to_le_bytes());
    expected.extend_from_slice(&[1, 0x6a]);
    expected.extend_from_slice(&7u32.to_le_bytes());

    assert_eq!(bytes_to_hex(&encoded), bytes_to_hex(&expected));
    assert!(!tx.is_coinbase());
    assert_eq!(tx.total_output_value(), Some(1_000));
}

#[test]
fn trailing_bytes_are_rejected() {
    let outpoint = OutPoint::new(seq_hash(0x40), 1);
    let mut bytes = encode(&outpoint);
    assert_eq!(decode::<OutPoint>(&bytes), Ok(outpoint));

    bytes.push(0);
    assert_eq!(decode::<OutPoint>(&bytes), Err(DecodeError::TrailingBytes));
}

#[test]
fn truncated_header_is_rejected() {
    let header = encode(&genesis_header(seq_hash(0x01)));
    assert_eq!(
        decode::<BlockHeader>(&header[..HEADER_SIZE - 1]),
        Err(DecodeError::UnexpectedEof)
    );
}

#[test]
fn outpoint_display_uses_hash_order() {
    let mut hash = [0u8; 32];
    hash[31] = 0xab;
    let outpoint = OutPoint::new(hash, 2);
    assert!(outpoint.to_string().starts_with("ab00"));
    assert!(outpoint.to_string().ends_with(":2"));
    assert!(OutPoint::null().is_null());
}
