//! Core wire types: hashes, transactions, blocks, coins.

use crate::compactsize::compact_size_encode;
use crate::constants::{MAX_TX_SIZE, TX_WIRE_VERSION};
use crate::error::{ChainError, ErrorCode};
use crate::wire::Cursor;

pub type Hash = [u8; 32];

pub const NULL_HASH: Hash = [0u8; 32];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutPoint {
    pub txid: Hash,
    pub index: u32,
}

impl OutPoint {
    pub fn null() -> Self {
        Self {
            txid: NULL_HASH,
            index: u32::MAX,
        }
    }

    pub fn is_null(&self) -> bool {
        self.txid == NULL_HASH && self.index == u32::MAX
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.txid);
        out.extend_from_slice(&self.index.to_le_bytes());
    }

    fn decode(c: &mut Cursor<'_>) -> Result<Self, ChainError> {
        let txid = c.read_hash32()?;
        let index = c.read_u32le()?;
        Ok(Self { txid, index })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxOut {
    pub value: i64,
    pub script: Vec<u8>,
}

impl TxOut {
    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.value.to_le_bytes());
        out.extend_from_slice(&compact_size_encode(self.script.len() as u64));
        out.extend_from_slice(&self.script);
    }

    fn decode(c: &mut Cursor<'_>) -> Result<Self, ChainError> {
        let value = c.read_i64le()?;
        let script = c.read_compact_bytes()?.to_vec();
        Ok(Self { value, script })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxIn {
    pub prevout: OutPoint,
    pub script_sig: Vec<u8>,
    pub sequence: u32,
}

impl TxIn {
    pub fn is_coinbase(&self) -> bool {
        self.prevout.is_null()
    }

    fn encode(&self, out: &mut Vec<u8>) {
        self.prevout.encode(out);
        out.extend_from_slice(&compact_size_encode(self.script_sig.len() as u64));
        out.extend_from_slice(&self.script_sig);
        out.extend_from_slice(&self.sequence.to_le_bytes());
    }

    fn decode(c: &mut Cursor<'_>) -> Result<Self, ChainError> {
        let prevout = OutPoint::decode(c)?;
        let script_sig = c.read_compact_bytes()?.to_vec();
        let sequence = c.read_u32le()?;
        Ok(Self {
            prevout,
            script_sig,
            sequence,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    pub version: i32,
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
    pub locktime: u32,
}

impl Transaction {
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].is_coinbase()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&compact_size_encode(self.inputs.len() as u64));
        for i in &self.inputs {
            i.encode(&mut out);
        }
        out.extend_from_slice(&compact_size_encode(self.outputs.len() as u64));
        for o in &self.outputs {
            o.encode(&mut out);
        }
        out.extend_from_slice(&self.locktime.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ChainError> {
        let mut c = Cursor::new(bytes);
        let tx = Self::decode_cursor(&mut c)?;
        Ok(tx)
    }

    pub(crate) fn decode_cursor(c: &mut Cursor<'_>) -> Result<Self, ChainError> {
        let version = c.read_i32le()?;
        let in_count = c.read_compact_size()?;
        let mut inputs = Vec::with_capacity(in_count.min(1 << 20) as usize);
        for _ in 0..in_count {
            inputs.push(TxIn::decode(c)?);
        }
        let out_count = c.read_compact_size()?;
        let mut outputs = Vec::with_capacity(out_count.min(1 << 20) as usize);
        for _ in 0..out_count {
            outputs.push(TxOut::decode(c)?);
        }
        let locktime = c.read_u32le()?;
        Ok(Self {
            version,
            inputs,
            outputs,
            locktime,
        })
    }

    /// Context-free structural checks: non-empty input/output lists, size
    /// bound, value bounds, and no duplicate prevouts.
    pub fn check_context_free(&self) -> Result<(), ChainError> {
        if self.inputs.is_empty() {
            return Err(ChainError::new(ErrorCode::BadTx, "tx has no inputs"));
        }
        if self.outputs.is_empty() {
            return Err(ChainError::new(ErrorCode::BadTx, "tx has no outputs"));
        }
        let size = self.encode().len();
        if size > MAX_TX_SIZE {
            return Err(ChainError::new(ErrorCode::BadTx, "tx exceeds MAX_TX_SIZE"));
        }

        let mut total: i64 = 0;
        for o in &self.outputs {
            if o.value < 0 || o.value > crate::constants::MAX_MONEY {
                return Err(ChainError::new(ErrorCode::BadTx, "output value out of range"));
            }
            total = total
                .checked_add(o.value)
                .ok_or_else(|| ChainError::new(ErrorCode::BadTx, "output value overflow"))?;
        }
        if total > crate::constants::MAX_MONEY {
            return Err(ChainError::new(ErrorCode::BadTx, "sum of outputs exceeds MAX_MONEY"));
        }

        if !self.is_coinbase() {
            let mut seen = std::collections::HashSet::with_capacity(self.inputs.len());
            for i in &self.inputs {
                if i.is_coinbase() {
                    return Err(ChainError::new(
                        ErrorCode::BadTx,
                        "null prevout in non-coinbase tx",
                    ));
                }
                if !seen.insert(i.prevout) {
                    return Err(ChainError::new(ErrorCode::BadTx, "duplicate prevout"));
                }
            }
        }

        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Coin {
    pub out_value: i64,
    pub height: u32,
    pub is_coinbase: bool,
    /// The output's locking script, carried so script verification can run
    /// against the coin alone without re-fetching the creating transaction.
    pub script: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    pub version: i32,
    pub prev_hash: Hash,
    pub merkle_root: Hash,
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl BlockHeader {
    pub const SIZE: usize = 80;

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&self.prev_hash);
        out.extend_from_slice(&self.merkle_root);
        out.extend_from_slice(&self.time.to_le_bytes());
        out.extend_from_slice(&self.bits.to_le_bytes());
        out.extend_from_slice(&self.nonce.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ChainError> {
        if bytes.len() != Self::SIZE {
            return Err(ChainError::new(ErrorCode::BadTx, "header: wrong size"));
        }
        let mut c = Cursor::new(bytes);
        Self::decode_cursor(&mut c)
    }

    fn decode_cursor(c: &mut Cursor<'_>) -> Result<Self, ChainError> {
        let version = c.read_i32le()?;
        let prev_hash = c.read_hash32()?;
        let merkle_root = c.read_hash32()?;
        let time = c.read_u32le()?;
        let bits = c.read_u32le()?;
        let nonce = c.read_u32le()?;
        Ok(Self {
            version,
            prev_hash,
            merkle_root,
            time,
            bits,
            nonce,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub txs: Vec<Transaction>,
}

impl Block {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = self.header.encode();
        out.extend_from_slice(&compact_size_encode(self.txs.len() as u64));
        for tx in &self.txs {
            out.extend_from_slice(&tx.encode());
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ChainError> {
        if bytes.len() < BlockHeader::SIZE {
            return Err(ChainError::new(ErrorCode::BadTx, "block: truncated header"));
        }
        let header = BlockHeader::decode(&bytes[..BlockHeader::SIZE])?;
        let mut c = Cursor::new(&bytes[BlockHeader::SIZE..]);
        let tx_count = c.read_compact_size()?;
        let mut txs = Vec::with_capacity(tx_count.min(1 << 20) as usize);
        for _ in 0..tx_count {
            txs.push(Transaction::decode_cursor(&mut c)?);
        }
        Ok(Self { header, txs })
    }

    pub fn check_context_free(&self, max_size: usize) -> Result<(), ChainError> {
        if self.txs.is_empty() {
            return Err(ChainError::new(ErrorCode::BadTx, "block has no transactions"));
        }
        if !self.txs[0].is_coinbase() {
            return Err(ChainError::new(
                ErrorCode::BadCoinbase,
                "first tx is not coinbase",
            ));
        }
        for tx in self.txs.iter().skip(1) {
            if tx.is_coinbase() {
                return Err(ChainError::new(
                    ErrorCode::BadCoinbase,
                    "coinbase outside position 0",
                ));
            }
        }
        if self.encode().len() > max_size {
            return Err(ChainError::new(ErrorCode::BadTx, "block exceeds MAX_BLOCK_SIZE"));
        }
        for tx in &self.txs {
            tx.check_context_free()?;
        }
        Ok(())
    }
}
