//! UTXO set logic backed by the storage trait.

use std::collections::{HashMap, HashSet};

use utxod_primitives::block::Block;
use utxod_primitives::encoding::{
    decode, encode, Decodable, DecodeError, Decoder, Encodable, Encoder,
};
use utxod_primitives::outpoint::OutPoint;
use utxod_primitives::transaction::TxOut;
use utxod_storage::{Column, KeyValueStore, StoreError, WriteBatch};

use crate::context::UtxoStore;

pub const OUTPOINT_KEY_LEN: usize = 36;

/// An output together with where it was created.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UtxoEntry {
    pub value: i64,
    pub script_pubkey: Vec<u8>,
    pub height: i32,
    pub is_coinbase: bool,
}

impl UtxoEntry {
    pub fn new(output: &TxOut, height: i32, is_coinbase: bool) -> Self {
        Self {
            value: output.value,
            script_pubkey: output.script_pubkey.clone(),
            height,
            is_coinbase,
        }
    }

    pub fn to_tx_out(&self) -> TxOut {
        TxOut {
            value: self.value,
            script_pubkey: self.script_pubkey.clone(),
        }
    }
}

/// Stored row layout: output, creation height, coinbase flag byte.
impl Encodable for UtxoEntry {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        self.to_tx_out().consensus_encode(encoder);
        encoder.write_i32_le(self.height);
        encoder.write_u8(u8::from(self.is_coinbase));
    }
}

impl Decodable for UtxoEntry {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let output = TxOut::consensus_decode(decoder)?;
        let height = decoder.read_i32_le()?;
        let is_coinbase = match decoder.read_u8()? {
            0 => false,
            1 => true,
            _ => return Err(DecodeError::InvalidData("invalid coinbase flag")),
        };
        Ok(Self::new(&output, height, is_coinbase))
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct OutPointKey([u8; OUTPOINT_KEY_LEN]);

impl OutPointKey {
    pub fn new(outpoint: &OutPoint) -> Self {
        let mut bytes = [0u8; OUTPOINT_KEY_LEN];
        bytes[..32].copy_from_slice(&outpoint.hash);
        bytes[32..].copy_from_slice(&outpoint.index.to_le_bytes());
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_slice()
    }
}

/// Every outpoint `block` creates, coinbase included.
pub(crate) fn created_outpoints(block: &Block) -> HashSet<OutPoint> {
    let mut created = HashSet::with_capacity(block.output_count());
    for tx in &block.transactions {
        let txid = tx.txid();
        created.extend((0..tx.vout.len()).map(|index| OutPoint::new(txid, index as u32)));
    }
    created
}

/// Outputs created by `block` at `height`, in block order.
pub(crate) fn created_outputs(block: &Block, height: i32) -> Vec<(OutPoint, UtxoEntry)> {
    let mut created = Vec::with_capacity(block.output_count());
    for (tx_index, tx) in block.transactions.iter().enumerate() {
        let txid = tx.txid();
        for (index, output) in tx.vout.iter().enumerate() {
            created.push((
                OutPoint::new(txid, index as u32),
                UtxoEntry::new(output, height, tx_index == 0),
            ));
        }
    }
    created
}

pub struct UtxoSet<S> {
    store: S,
}

impl<S> UtxoSet<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S: KeyValueStore> UtxoSet<S> {
    pub fn get(&self, outpoint: &OutPoint) -> Result<Option<UtxoEntry>, StoreError> {
        self.get_in(Column::Utxo, outpoint)
    }

    fn get_in(&self, column: Column, outpoint: &OutPoint) -> Result<Option<UtxoEntry>, StoreError> {
        let key = OutPointKey::new(outpoint);
        match self.store.get(column, key.as_bytes())? {
            Some(bytes) => Ok(Some(decode_entry(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn put(&self, batch: &mut WriteBatch, outpoint: &OutPoint, entry: &UtxoEntry) {
        let key = OutPointKey::new(outpoint);
        batch.put(Column::Utxo, key.as_bytes(), encode(entry));
    }

    pub fn delete(&self, batch: &mut WriteBatch, outpoint: &OutPoint) {
        let key = OutPointKey::new(outpoint);
        batch.delete(Column::Utxo, key.as_bytes());
    }

    /// Stages the effects of connecting `block` at `height`. Spent entries move to
    /// `Column::SpentOutput` so a later disconnect or undo walk can restore them.
    pub fn connect_block(
        &self,
        batch: &mut WriteBatch,
        block: &Block,
        height: i32,
    ) -> Result<(), StoreError> {
        let mut created: HashMap<OutPoint, UtxoEntry> = HashMap::new();
        let mut order = Vec::new();
        for (tx_index, tx) in block.transactions.iter().enumerate() {
            if tx_index > 0 {
                for input in &tx.vin {
                    let entry = match created.remove(&input.prevout) {
                        Some(entry) => entry,
                        None => self.get(&input.prevout)?.ok_or_else(|| {
                            StoreError::Backend(format!(
                                "missing unspent output {}",
                                input.prevout
                            ))
                        })?,
                    };
                    let key = OutPointKey::new(&input.prevout);
                    batch.delete(Column::Utxo, key.as_bytes());
                    batch.put(Column::SpentOutput, key.as_bytes(), encode(&entry));
                }
            }
            let txid = tx.txid();
            for (index, output) in tx.vout.iter().enumerate() {
                let outpoint = OutPoint::new(txid, index as u32);
                created.insert(outpoint.clone(), UtxoEntry::new(output, height, tx_index == 0));
                order.push(outpoint);
            }
        }
        for outpoint in order {
            if let Some(entry) = created.get(&outpoint) {
                self.put(batch, &outpoint, entry);
            }
        }
        Ok(())
    }

    /// Stages the inverse of [`UtxoSet::connect_block`].
    pub fn disconnect_block(
        &self,
        batch: &mut WriteBatch,
        block: &Block,
    ) -> Result<(), StoreError> {
        let created = created_outpoints(block);
        for outpoint in &created {
            self.delete(batch, outpoint);
        }
        for tx in block.transactions.iter().skip(1) {
            for input in &tx.vin {
                let key = OutPointKey::new(&input.prevout);
                batch.delete(Column::SpentOutput, key.as_bytes());
                if created.contains(&input.prevout) {
                    continue;
                }
                let entry = self
                    .get_in(Column::SpentOutput, &input.prevout)?
                    .ok_or_else(|| {
                        StoreError::Backend(format!("missing spent output {}", input.prevout))
                    })?;
                self.put(batch, &input.prevout, &entry);
            }
        }
        Ok(())
    }
}

impl<S: KeyValueStore> UtxoStore for UtxoSet<S> {
    fn unspent_output(&self, outpoint: &OutPoint) -> Result<Option<UtxoEntry>, StoreError> {
        self.get(outpoint)
    }

    fn unspent_outputs(
        &self,
        outpoints: &[OutPoint],
    ) -> Result<Vec<Option<UtxoEntry>>, StoreError> {
        let keys: Vec<OutPointKey> = outpoints.iter().map(OutPointKey::new).collect();
        let key_refs: Vec<&[u8]> = keys.iter().map(OutPointKey::as_bytes).collect();
        self.store
            .multi_get(Column::Utxo, &key_refs)?
            .into_iter()
            .map(|bytes| bytes.map(|bytes| decode_entry(&bytes)).transpose())
            .collect()
    }

    fn find_output(&self, outpoint: &OutPoint) -> Result<Option<UtxoEntry>, StoreError> {
        match self.get(outpoint)? {
            Some(entry) => Ok(Some(entry)),
            None => self.get_in(Column::SpentOutput, outpoint),
        }
    }
}

fn decode_entry(bytes: &[u8]) -> Result<UtxoEntry, StoreError> {
    decode::<UtxoEntry>(bytes).map_err(|err| StoreError::Backend(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_encoding_is_stable() {
        let entry = UtxoEntry {
            value: 5_000_000_000,
            script_pubkey: vec![0x76, 0xa9],
            height: 101,
            is_coinbase: true,
        };
        let bytes = encode(&entry);
        assert_eq!(bytes.len(), 8 + 1 + 2 + 4 + 1);
        assert_eq!(decode::<UtxoEntry>(&bytes), Ok(entry));

        let mut bad_flag = bytes.clone();
        *bad_flag.last_mut().expect("flag") = 2;
        assert_eq!(
            decode::<UtxoEntry>(&bad_flag),
            Err(DecodeError::InvalidData("invalid coinbase flag"))
        );
    }

    #[test]
    fn outpoint_key_layout() {
        let outpoint = OutPoint::new([7u8; 32], 0x0102_0304);
        let key = OutPointKey::new(&outpoint);
        assert_eq!(&key.as_bytes()[..32], &[7u8; 32]);
        assert_eq!(&key.as_bytes()[32..], &[0x04, 0x03, 0x02, 0x01]);
    }
}
