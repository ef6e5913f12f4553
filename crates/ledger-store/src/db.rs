//! redb-backed persistent storage: the block-index table and the coins
//! table (§6). The coins table's `B` singleton key carries the best-block
//! hash and is always written in the same redb write transaction as the
//! coin mutations it follows, giving the atomicity §4.1/§4.3 require.

use std::path::Path;

use redb::{ReadableTable, ReadableTableMetadata, TableDefinition, WriteTransaction};

use ledger_consensus::{Coin, Hash, OutPoint, NULL_HASH};

use crate::error::StoreError;
use crate::keys::{
    decode_block_index, decode_coin, decode_coin_key, decode_file_ref, encode_block_index,
    encode_block_index_key, encode_coin, encode_coin_key, encode_file_ref, BlockIndexEntry,
    FileRef, BEST_BLOCK_KEY,
};

const BLOCK_INDEX_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("block_index");
const COINS_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("coins");
/// `hash -> FileRef` for the undo record the block's connection produced.
/// Kept apart from `block_index`'s own `file_ref` (which points at the raw
/// block bytes) since a block is stored before it has an undo record.
const UNDO_INDEX_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("undo_index");

pub struct Store {
    db: redb::Database,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let db = redb::Database::create(path)?;
        let tx = db.begin_write()?;
        tx.open_table(BLOCK_INDEX_TABLE)?;
        tx.open_table(COINS_TABLE)?;
        tx.open_table(UNDO_INDEX_TABLE)?;
        tx.commit()?;
        Ok(Self { db })
    }

    pub fn begin_write(&self) -> Result<WriteBatch, StoreError> {
        Ok(WriteBatch { tx: self.db.begin_write()? })
    }

    pub fn get_block_index(&self, hash: &Hash) -> Result<Option<BlockIndexEntry>, StoreError> {
        let tx = self.db.begin_read()?;
        let table = tx.open_table(BLOCK_INDEX_TABLE)?;
        match table.get(encode_block_index_key(hash).as_slice())? {
            Some(guard) => Ok(Some(decode_block_index(guard.value())?)),
            None => Ok(None),
        }
    }

    /// Every stored index entry, in no particular order — used to rebuild
    /// the in-memory block-index DAG on startup.
    pub fn iter_block_index(&self) -> Result<Vec<(Hash, BlockIndexEntry)>, StoreError> {
        let tx = self.db.begin_read()?;
        let table = tx.open_table(BLOCK_INDEX_TABLE)?;
        let mut out = Vec::new();
        for result in table.iter()? {
            let (key, value) = result?;
            let key = key.value();
            if key.len() != 33 {
                continue;
            }
            let mut hash: Hash = [0u8; 32];
            hash.copy_from_slice(&key[1..33]);
            out.push((hash, decode_block_index(value.value())?));
        }
        Ok(out)
    }

    pub fn get_undo_ref(&self, hash: &Hash) -> Result<Option<FileRef>, StoreError> {
        let tx = self.db.begin_read()?;
        let table = tx.open_table(UNDO_INDEX_TABLE)?;
        match table.get(encode_block_index_key(hash).as_slice())? {
            Some(guard) => {
                let data = guard.value();
                let mut off = 0usize;
                decode_file_ref(data, &mut off)
            }
            None => Ok(None),
        }
    }

    pub fn get_coin(&self, op: &OutPoint) -> Result<Option<Coin>, StoreError> {
        let tx = self.db.begin_read()?;
        let table = tx.open_table(COINS_TABLE)?;
        match table.get(encode_coin_key(op).as_slice())? {
            Some(guard) => Ok(Some(decode_coin(guard.value())?)),
            None => Ok(None),
        }
    }

    pub fn get_best_block(&self) -> Result<Hash, StoreError> {
        let tx = self.db.begin_read()?;
        let table = tx.open_table(COINS_TABLE)?;
        match table.get(BEST_BLOCK_KEY)? {
            Some(guard) => {
                let bytes = guard.value();
                if bytes.len() != 32 {
                    return Err(StoreError::io("best block marker: wrong length"));
                }
                let mut hash: Hash = [0u8; 32];
                hash.copy_from_slice(bytes);
                Ok(hash)
            }
            None => Ok(NULL_HASH),
        }
    }

    pub fn coin_count(&self) -> Result<u64, StoreError> {
        let tx = self.db.begin_read()?;
        let table = tx.open_table(COINS_TABLE)?;
        // One key (`B`) is the best-block marker, not a coin.
        Ok(table.len()?.saturating_sub(1))
    }

    /// Iterates coin entries in lexicographic key order (the `B` marker,
    /// being a single byte, always sorts first and is skipped).
    pub fn iter_coins<F>(&self, mut f: F) -> Result<(), StoreError>
    where
        F: FnMut(&[u8], &[u8]) -> Result<(), StoreError>,
    {
        let tx = self.db.begin_read()?;
        let table = tx.open_table(COINS_TABLE)?;
        for result in table.iter()? {
            let (key, value) = result?;
            if key.value() == BEST_BLOCK_KEY {
                continue;
            }
            f(key.value(), value.value())?;
        }
        Ok(())
    }
}

pub struct WriteBatch {
    tx: WriteTransaction,
}

impl WriteBatch {
    pub fn put_block_index(&self, hash: &Hash, entry: &BlockIndexEntry) -> Result<(), StoreError> {
        let mut table = self.tx.open_table(BLOCK_INDEX_TABLE)?;
        let value = encode_block_index(entry);
        table.insert(encode_block_index_key(hash).as_slice(), value.as_slice())?;
        Ok(())
    }

    pub fn put_coin(&self, op: &OutPoint, coin: &Coin) -> Result<(), StoreError> {
        let mut table = self.tx.open_table(COINS_TABLE)?;
        let value = encode_coin(coin);
        table.insert(encode_coin_key(op).as_slice(), value.as_slice())?;
        Ok(())
    }

    pub fn delete_coin(&self, op: &OutPoint) -> Result<(), StoreError> {
        let mut table = self.tx.open_table(COINS_TABLE)?;
        table.remove(encode_coin_key(op).as_slice())?;
        Ok(())
    }

    pub fn put_undo_ref(&self, hash: &Hash, r: FileRef) -> Result<(), StoreError> {
        let mut table = self.tx.open_table(UNDO_INDEX_TABLE)?;
        let mut out = Vec::new();
        encode_file_ref(&mut out, &Some(r));
        table.insert(encode_block_index_key(hash).as_slice(), out.as_slice())?;
        Ok(())
    }

    pub fn set_best_block(&self, hash: &Hash) -> Result<(), StoreError> {
        let mut table = self.tx.open_table(COINS_TABLE)?;
        table.insert(BEST_BLOCK_KEY, hash.as_slice())?;
        Ok(())
    }

    pub fn commit(self) -> Result<(), StoreError> {
        Ok(self.tx.commit()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_coin() -> Coin {
        Coin {
            out_value: 5_000_000_000,
            height: 1,
            is_coinbase: true,
            script: vec![0xac],
        }
    }

    #[test]
    fn coin_and_best_block_commit_in_one_batch() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("chain.redb")).unwrap();

        let op = OutPoint { txid: [0x01; 32], index: 0 };
        let coin = sample_coin();
        let tip = [0x02; 32];

        let batch = store.begin_write().unwrap();
        batch.put_coin(&op, &coin).unwrap();
        batch.set_best_block(&tip).unwrap();
        batch.commit().unwrap();

        assert_eq!(store.get_coin(&op).unwrap(), Some(coin));
        assert_eq!(store.get_best_block().unwrap(), tip);
        assert_eq!(store.coin_count().unwrap(), 1);
    }

    #[test]
    fn missing_best_block_is_null_hash() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("chain.redb")).unwrap();
        assert_eq!(store.get_best_block().unwrap(), NULL_HASH);
    }

    #[test]
    fn delete_coin_removes_it() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("chain.redb")).unwrap();
        let op = OutPoint { txid: [0x03; 32], index: 1 };

        let batch = store.begin_write().unwrap();
        batch.put_coin(&op, &sample_coin()).unwrap();
        batch.commit().unwrap();
        assert!(store.get_coin(&op).unwrap().is_some());

        let batch = store.begin_write().unwrap();
        batch.delete_coin(&op).unwrap();
        batch.commit().unwrap();
        assert!(store.get_coin(&op).unwrap().is_none());
    }
}
