//! Canonical byte encoding for KV table keys and values.
//!
//! All integers are little-endian. These layouts are the only contract
//! between what is written to disk today and what a future run of this
//! node reads back; they are not part of the wire protocol.

use ledger_consensus::{
    compact_size_decode, compact_size_encode, BlockHeader, Coin, Hash, OutPoint,
};

use crate::error::StoreError;
use ledger_consensus::ErrorCode;

// ---------------------------------------------------------------------------
// Validity lattice (§4.4): UNKNOWN < HEADER_VALID < TREE_VALID < TRANSACTIONS
// < CHAIN < SCRIPTS. Declared in ascending order so the derived `Ord` gives
// the lattice comparison for free. `failed` is a separate, sticky bit: it is
// not itself a lattice position, it can be set at any status.
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum BlockStatus {
    Unknown = 0,
    HeaderValid = 1,
    TreeValid = 2,
    Transactions = 3,
    Chain = 4,
    Scripts = 5,
}

impl BlockStatus {
    pub fn from_u8(v: u8) -> Result<Self, StoreError> {
        match v {
            0 => Ok(Self::Unknown),
            1 => Ok(Self::HeaderValid),
            2 => Ok(Self::TreeValid),
            3 => Ok(Self::Transactions),
            4 => Ok(Self::Chain),
            5 => Ok(Self::Scripts),
            _ => Err(StoreError::new(ErrorCode::Internal, format!("bad block status byte {v}"))),
        }
    }
}

/// Pointer into a `blkNNNNN.dat`/`revNNNNN.dat` flat file: which file, what
/// byte offset the record's payload starts at, and the payload's length.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileRef {
    pub file_no: u32,
    pub offset: u32,
    pub size: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockIndexEntry {
    pub header: BlockHeader,
    pub height: u32,
    /// Cumulative chain work as a big-endian byte string (arbitrary
    /// precision — a `BigUint` grows unbounded over the chain's lifetime,
    /// unlike the bounded fields above).
    pub chain_work: Vec<u8>,
    pub status: BlockStatus,
    pub failed: bool,
    pub file_ref: Option<FileRef>,
    pub tx_count: u32,
}

pub fn encode_file_ref(out: &mut Vec<u8>, r: &Option<FileRef>) {
    match r {
        None => out.push(0),
        Some(r) => {
            out.push(1);
            out.extend_from_slice(&r.file_no.to_le_bytes());
            out.extend_from_slice(&r.offset.to_le_bytes());
            out.extend_from_slice(&r.size.to_le_bytes());
        }
    }
}

pub fn decode_file_ref(data: &[u8], off: &mut usize) -> Result<Option<FileRef>, StoreError> {
    let tag = *data
        .get(*off)
        .ok_or_else(|| StoreError::io("file_ref: truncated tag"))?;
    *off += 1;
    if tag == 0 {
        return Ok(None);
    }
    let take = |off: &mut usize, n: usize| -> Result<&[u8], StoreError> {
        let slice = data
            .get(*off..*off + n)
            .ok_or_else(|| StoreError::io("file_ref: truncated"))?;
        *off += n;
        Ok(slice)
    };
    let file_no = u32::from_le_bytes(take(off, 4)?.try_into().unwrap());
    let offset = u32::from_le_bytes(take(off, 4)?.try_into().unwrap());
    let size = u32::from_le_bytes(take(off, 4)?.try_into().unwrap());
    Ok(Some(FileRef { file_no, offset, size }))
}

/// `b‖hash → header ‖ height[4] ‖ chain_work_len[compactsize] ‖ chain_work
/// ‖ status[1] ‖ failed[1] ‖ file_ref ‖ tx_count[4]`.
pub fn encode_block_index(entry: &BlockIndexEntry) -> Vec<u8> {
    let mut out = entry.header.encode();
    out.extend_from_slice(&entry.height.to_le_bytes());
    out.extend_from_slice(&compact_size_encode(entry.chain_work.len() as u64));
    out.extend_from_slice(&entry.chain_work);
    out.push(entry.status as u8);
    out.push(entry.failed as u8);
    encode_file_ref(&mut out, &entry.file_ref);
    out.extend_from_slice(&entry.tx_count.to_le_bytes());
    out
}

pub fn decode_block_index(data: &[u8]) -> Result<BlockIndexEntry, StoreError> {
    if data.len() < BlockHeader::SIZE {
        return Err(StoreError::io("block_index: truncated header"));
    }
    let header = BlockHeader::decode(&data[..BlockHeader::SIZE])?;
    let mut off = BlockHeader::SIZE;

    let height = read_u32(data, &mut off)?;
    let (work_len, consumed) =
        compact_size_decode(&data[off..]).map_err(|e| StoreError::io(format!("block_index: chain_work len: {e}")))?;
    off += consumed;
    let work_len = work_len as usize;
    let chain_work = data
        .get(off..off + work_len)
        .ok_or_else(|| StoreError::io("block_index: truncated chain_work"))?
        .to_vec();
    off += work_len;

    let status = BlockStatus::from_u8(*data.get(off).ok_or_else(|| StoreError::io("block_index: truncated status"))?)?;
    off += 1;
    let failed = *data.get(off).ok_or_else(|| StoreError::io("block_index: truncated failed flag"))? != 0;
    off += 1;
    let file_ref = decode_file_ref(data, &mut off)?;
    let tx_count = read_u32(data, &mut off)?;

    Ok(BlockIndexEntry {
        header,
        height,
        chain_work,
        status,
        failed,
        file_ref,
        tx_count,
    })
}

fn read_u32(data: &[u8], off: &mut usize) -> Result<u32, StoreError> {
    let slice = data
        .get(*off..*off + 4)
        .ok_or_else(|| StoreError::io("truncated u32"))?;
    *off += 4;
    Ok(u32::from_le_bytes(slice.try_into().unwrap()))
}

// ---------------------------------------------------------------------------
// Outpoint key: `c` ‖ txid[32] ‖ index_le[4] = 37 bytes.
// ---------------------------------------------------------------------------

pub const COIN_KEY_PREFIX: u8 = b'c';
pub const BEST_BLOCK_KEY: &[u8] = b"B";
pub const BLOCK_INDEX_KEY_PREFIX: u8 = b'b';

pub fn encode_coin_key(op: &OutPoint) -> [u8; 37] {
    let mut buf = [0u8; 37];
    buf[0] = COIN_KEY_PREFIX;
    buf[1..33].copy_from_slice(&op.txid);
    buf[33..37].copy_from_slice(&op.index.to_le_bytes());
    buf
}

pub fn decode_coin_key(data: &[u8]) -> Result<OutPoint, StoreError> {
    if data.len() != 37 || data[0] != COIN_KEY_PREFIX {
        return Err(StoreError::io("coin key: malformed"));
    }
    let mut txid: Hash = [0u8; 32];
    txid.copy_from_slice(&data[1..33]);
    let index = u32::from_le_bytes(data[33..37].try_into().unwrap());
    Ok(OutPoint { txid, index })
}

pub fn encode_block_index_key(hash: &Hash) -> [u8; 33] {
    let mut buf = [0u8; 33];
    buf[0] = BLOCK_INDEX_KEY_PREFIX;
    buf[1..33].copy_from_slice(hash);
    buf
}

// ---------------------------------------------------------------------------
// Coin value: coinbase_flag[1] ‖ height[4] ‖ value[8] ‖ script_len ‖ script
// ---------------------------------------------------------------------------

pub fn encode_coin(coin: &Coin) -> Vec<u8> {
    let mut out = Vec::with_capacity(13 + coin.script.len());
    out.push(coin.is_coinbase as u8);
    out.extend_from_slice(&coin.height.to_le_bytes());
    out.extend_from_slice(&coin.out_value.to_le_bytes());
    out.extend_from_slice(&compact_size_encode(coin.script.len() as u64));
    out.extend_from_slice(&coin.script);
    out
}

pub fn decode_coin(data: &[u8]) -> Result<Coin, StoreError> {
    if data.len() < 13 {
        return Err(StoreError::io("coin: truncated"));
    }
    let is_coinbase = data[0] != 0;
    let height = u32::from_le_bytes(data[1..5].try_into().unwrap());
    let out_value = i64::from_le_bytes(data[5..13].try_into().unwrap());
    let (script_len, consumed) =
        compact_size_decode(&data[13..]).map_err(|e| StoreError::io(format!("coin: script len: {e}")))?;
    let start = 13 + consumed;
    let end = start + script_len as usize;
    let script = data
        .get(start..end)
        .ok_or_else(|| StoreError::io("coin: truncated script"))?
        .to_vec();
    Ok(Coin {
        out_value,
        height,
        is_coinbase,
        script,
    })
}

// ---------------------------------------------------------------------------
// Undo record: the coins a block's connection removed (so disconnect can
// restore them) plus the outpoints it created (so disconnect can delete
// them). `compact_size(n_spent) ‖ [outpoint(36) ‖ coin_len ‖ coin]*
// ‖ compact_size(n_created) ‖ [outpoint(36)]*`.
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UndoRecord {
    pub spent: Vec<(OutPoint, Coin)>,
    pub created: Vec<OutPoint>,
}

fn encode_outpoint_raw(out: &mut Vec<u8>, op: &OutPoint) {
    out.extend_from_slice(&op.txid);
    out.extend_from_slice(&op.index.to_le_bytes());
}

fn decode_outpoint_raw(data: &[u8]) -> Result<OutPoint, StoreError> {
    if data.len() != 36 {
        return Err(StoreError::io("outpoint: expected 36 bytes"));
    }
    let mut txid: Hash = [0u8; 32];
    txid.copy_from_slice(&data[0..32]);
    let index = u32::from_le_bytes(data[32..36].try_into().unwrap());
    Ok(OutPoint { txid, index })
}

pub fn encode_undo_record(record: &UndoRecord) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&compact_size_encode(record.spent.len() as u64));
    for (op, coin) in &record.spent {
        encode_outpoint_raw(&mut out, op);
        let coin_bytes = encode_coin(coin);
        out.extend_from_slice(&compact_size_encode(coin_bytes.len() as u64));
        out.extend_from_slice(&coin_bytes);
    }
    out.extend_from_slice(&compact_size_encode(record.created.len() as u64));
    for op in &record.created {
        encode_outpoint_raw(&mut out, op);
    }
    out
}

pub fn decode_undo_record(data: &[u8]) -> Result<UndoRecord, StoreError> {
    let mut off = 0usize;
    let (n_spent, consumed) =
        compact_size_decode(&data[off..]).map_err(|e| StoreError::io(format!("undo: spent count: {e}")))?;
    off += consumed;

    let mut spent = Vec::with_capacity(n_spent as usize);
    for _ in 0..n_spent {
        let op = decode_outpoint_raw(
            data.get(off..off + 36)
                .ok_or_else(|| StoreError::io("undo: truncated spent outpoint"))?,
        )?;
        off += 36;
        let (coin_len, consumed) =
            compact_size_decode(&data[off..]).map_err(|e| StoreError::io(format!("undo: coin len: {e}")))?;
        off += consumed;
        let coin_len = coin_len as usize;
        let coin = decode_coin(
            data.get(off..off + coin_len)
                .ok_or_else(|| StoreError::io("undo: truncated coin"))?,
        )?;
        off += coin_len;
        spent.push((op, coin));
    }

    let (n_created, consumed) =
        compact_size_decode(&data[off..]).map_err(|e| StoreError::io(format!("undo: created count: {e}")))?;
    off += consumed;
    let mut created = Vec::with_capacity(n_created as usize);
    for _ in 0..n_created {
        let op = decode_outpoint_raw(
            data.get(off..off + 36)
                .ok_or_else(|| StoreError::io("undo: truncated created outpoint"))?,
        )?;
        off += 36;
        created.push(op);
    }

    Ok(UndoRecord { spent, created })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_coin() -> Coin {
        Coin {
            out_value: 5_000_000_000,
            height: 10,
            is_coinbase: true,
            script: vec![0xab; 25],
        }
    }

    #[test]
    fn coin_roundtrip() {
        let coin = sample_coin();
        let encoded = encode_coin(&coin);
        assert_eq!(decode_coin(&encoded).unwrap(), coin);
    }

    #[test]
    fn coin_key_roundtrip() {
        let op = OutPoint { txid: [0x11; 32], index: 7 };
        let key = encode_coin_key(&op);
        assert_eq!(decode_coin_key(&key).unwrap(), op);
    }

    #[test]
    fn block_index_roundtrip() {
        let entry = BlockIndexEntry {
            header: BlockHeader {
                version: 1,
                prev_hash: [1u8; 32],
                merkle_root: [2u8; 32],
                time: 100,
                bits: 0x1d00ffff,
                nonce: 7,
            },
            height: 42,
            chain_work: vec![0x01, 0x02, 0x03],
            status: BlockStatus::Scripts,
            failed: false,
            file_ref: Some(FileRef { file_no: 0, offset: 80, size: 250 }),
            tx_count: 3,
        };
        let encoded = encode_block_index(&entry);
        assert_eq!(decode_block_index(&encoded).unwrap(), entry);
    }

    #[test]
    fn block_index_roundtrip_no_file_ref() {
        let entry = BlockIndexEntry {
            header: BlockHeader {
                version: 1,
                prev_hash: [0u8; 32],
                merkle_root: [0u8; 32],
                time: 0,
                bits: 0x1d00ffff,
                nonce: 0,
            },
            height: 0,
            chain_work: vec![],
            status: BlockStatus::Unknown,
            failed: true,
            file_ref: None,
            tx_count: 0,
        };
        let encoded = encode_block_index(&entry);
        assert_eq!(decode_block_index(&encoded).unwrap(), entry);
    }

    #[test]
    fn undo_record_roundtrip() {
        let record = UndoRecord {
            spent: vec![(OutPoint { txid: [0x22; 32], index: 0 }, sample_coin())],
            created: vec![OutPoint { txid: [0x33; 32], index: 1 }],
        };
        let encoded = encode_undo_record(&record);
        assert_eq!(decode_undo_record(&encoded).unwrap(), record);
    }

    #[test]
    fn validity_lattice_is_monotone() {
        assert!(BlockStatus::Unknown < BlockStatus::HeaderValid);
        assert!(BlockStatus::HeaderValid < BlockStatus::TreeValid);
        assert!(BlockStatus::TreeValid < BlockStatus::Transactions);
        assert!(BlockStatus::Transactions < BlockStatus::Chain);
        assert!(BlockStatus::Chain < BlockStatus::Scripts);
    }
}
