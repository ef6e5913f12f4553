//! Append-only flat files for raw blocks and undo records.
//!
//! `blkNNNNN.dat` holds encoded `Block`s; `revNNNNN.dat` holds encoded
//! `UndoRecord`s for the block in the same-numbered `blk` file. Both use the
//! same framing: `magic:4 ‖ size:u32 LE ‖ payload`. Files roll over once they
//! would exceed `MAX_FILE_SIZE`, mirroring how the reference client bounds a
//! single flat file's size.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::StoreError;
use crate::keys::FileRef;

const BLOCK_MAGIC: [u8; 4] = *b"LBLK";
const UNDO_MAGIC: [u8; 4] = *b"LREV";
const MAX_FILE_SIZE: u64 = 128 * 1024 * 1024;

struct FlatFile {
    dir: PathBuf,
    prefix: &'static str,
    magic: [u8; 4],
    current_no: u32,
    current_len: u64,
}

impl FlatFile {
    fn new(dir: &Path, prefix: &'static str, magic: [u8; 4]) -> Result<Self, StoreError> {
        std::fs::create_dir_all(dir)?;
        let mut current_no = 0u32;
        while file_path(dir, prefix, current_no + 1).exists() {
            current_no += 1;
        }
        let current_len = file_path(dir, prefix, current_no)
            .metadata()
            .map(|m| m.len())
            .unwrap_or(0);
        Ok(Self {
            dir: dir.to_path_buf(),
            prefix,
            magic,
            current_no,
            current_len,
        })
    }

    fn path(&self, file_no: u32) -> PathBuf {
        file_path(&self.dir, self.prefix, file_no)
    }

    /// Appends `payload`, rolling to a new file if it would exceed
    /// `MAX_FILE_SIZE`. Returns the `FileRef` the caller should persist in
    /// the block index / undo index.
    fn append(&mut self, payload: &[u8]) -> Result<FileRef, StoreError> {
        let record_len = 4 + 4 + payload.len() as u64;
        if self.current_len > 0 && self.current_len + record_len > MAX_FILE_SIZE {
            self.current_no += 1;
            self.current_len = 0;
        }

        let path = self.path(self.current_no);
        let mut f = OpenOptions::new().create(true).append(true).open(&path)?;
        let offset = self.current_len as u32 + 8;

        f.write_all(&self.magic)?;
        f.write_all(&(payload.len() as u32).to_le_bytes())?;
        f.write_all(payload)?;
        f.sync_data()?;

        self.current_len += record_len;

        Ok(FileRef {
            file_no: self.current_no,
            offset,
            size: payload.len() as u32,
        })
    }

    fn read(&self, r: FileRef) -> Result<Vec<u8>, StoreError> {
        let path = self.path(r.file_no);
        let mut f = File::open(&path)?;
        f.seek(SeekFrom::Start((r.offset - 8) as u64))?;

        let mut magic = [0u8; 4];
        f.read_exact(&mut magic)?;
        if magic != self.magic {
            return Err(StoreError::io(format!(
                "{}{:05}.dat: bad magic at offset {}",
                self.prefix,
                r.file_no,
                r.offset - 8
            )));
        }
        let mut size_bytes = [0u8; 4];
        f.read_exact(&mut size_bytes)?;
        let size = u32::from_le_bytes(size_bytes);
        if size != r.size {
            return Err(StoreError::io(format!(
                "{}{:05}.dat: size mismatch, index says {} file says {}",
                self.prefix, r.file_no, r.size, size
            )));
        }
        let mut buf = vec![0u8; size as usize];
        f.read_exact(&mut buf)?;
        Ok(buf)
    }
}

fn file_path(dir: &Path, prefix: &str, file_no: u32) -> PathBuf {
    dir.join(format!("{prefix}{file_no:05}.dat"))
}

/// Owns both the block and undo flat-file series for one data directory.
pub struct BlockFiles {
    blocks: FlatFile,
    undo: FlatFile,
}

impl BlockFiles {
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        Ok(Self {
            blocks: FlatFile::new(dir, "blk", BLOCK_MAGIC)?,
            undo: FlatFile::new(dir, "rev", UNDO_MAGIC)?,
        })
    }

    pub fn append_block(&mut self, block_bytes: &[u8]) -> Result<FileRef, StoreError> {
        self.blocks.append(block_bytes)
    }

    pub fn read_block(&self, r: FileRef) -> Result<Vec<u8>, StoreError> {
        self.blocks.read(r)
    }

    pub fn append_undo(&mut self, undo_bytes: &[u8]) -> Result<FileRef, StoreError> {
        self.undo.append(undo_bytes)
    }

    pub fn read_undo(&self, r: FileRef) -> Result<Vec<u8>, StoreError> {
        self.undo.read(r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut files = BlockFiles::open(dir.path()).unwrap();

        let a = files.append_block(b"first block bytes").unwrap();
        let b = files.append_block(b"second, longer block bytes here").unwrap();

        assert_eq!(files.read_block(a).unwrap(), b"first block bytes");
        assert_eq!(files.read_block(b).unwrap(), b"second, longer block bytes here");
    }

    #[test]
    fn reopen_resumes_from_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut files = BlockFiles::open(dir.path()).unwrap();
            files.append_block(b"persisted").unwrap();
        }
        let mut files = BlockFiles::open(dir.path()).unwrap();
        let r = files.append_block(b"after reopen").unwrap();
        assert_eq!(files.read_block(r).unwrap(), b"after reopen");
    }
}
