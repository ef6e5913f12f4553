//! A small byte-cursor reader shared by every wire decoder.

use crate::compactsize::compact_size_decode;
use crate::error::{ChainError, ErrorCode};

pub(crate) struct Cursor<'a> {
    pub(crate) bytes: &'a [u8],
    pub(crate) pos: usize,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.bytes.len().saturating_sub(self.pos)
    }

    pub(crate) fn read_exact(&mut self, len: usize) -> Result<&'a [u8], ChainError> {
        if self.remaining() < len {
            return Err(ChainError::new(ErrorCode::BadTx, "parse: truncated"));
        }
        let start = self.pos;
        self.pos += len;
        Ok(&self.bytes[start..start + len])
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8, ChainError> {
        Ok(self.read_exact(1)?[0])
    }

    pub(crate) fn read_u32le(&mut self) -> Result<u32, ChainError> {
        let b = self.read_exact(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub(crate) fn read_i32le(&mut self) -> Result<i32, ChainError> {
        Ok(self.read_u32le()? as i32)
    }

    pub(crate) fn read_i64le(&mut self) -> Result<i64, ChainError> {
        let b = self.read_exact(8)?;
        Ok(i64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    pub(crate) fn read_hash32(&mut self) -> Result<[u8; 32], ChainError> {
        let b = self.read_exact(32)?;
        let mut out = [0u8; 32];
        out.copy_from_slice(b);
        Ok(out)
    }

    pub(crate) fn read_compact_size(&mut self) -> Result<u64, ChainError> {
        let (n, consumed) = compact_size_decode(&self.bytes[self.pos..])?;
        self.pos += consumed;
        Ok(n)
    }

    pub(crate) fn read_compact_bytes(&mut self) -> Result<&'a [u8], ChainError> {
        let len = self.read_compact_size()?;
        self.read_exact(len as usize)
    }
}
