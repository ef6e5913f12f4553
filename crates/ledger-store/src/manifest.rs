//! `MANIFEST.json` — the single atomic anchor for crash recovery (§4.1,
//! §9 "reorganization atomicity"). It is updated only after a block's
//! coin-view writes have committed, so on restart the manifest's tip and
//! the store's `get_best_block()` marker always agree: a crash between
//! the coin-view commit and the manifest write is resolved by re-deriving
//! the manifest from the store the next time `ChainstateManager` opens.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

use ledger_consensus::Hash;

pub const CURRENT_SCHEMA_VERSION: u32 = 1;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Manifest {
    pub schema_version: u32,
    pub tip_hash: String,
    pub tip_height: u32,
    /// Cumulative chain work, decimal string (arbitrary precision).
    pub tip_chain_work: String,
}

impl Manifest {
    pub fn genesis(genesis_hash: &Hash, genesis_work: &BigUint) -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            tip_hash: hex_encode(genesis_hash),
            tip_height: 0,
            tip_chain_work: genesis_work.to_str_radix(10),
        }
    }

    pub fn path_in(data_dir: &Path) -> PathBuf {
        data_dir.join("MANIFEST.json")
    }

    pub fn load(path: &Path) -> Result<Self, String> {
        let data = fs::read_to_string(path).map_err(|e| format!("read manifest: {e}"))?;
        let m: Manifest = serde_json::from_str(&data).map_err(|e| format!("parse manifest: {e}"))?;
        if m.schema_version > CURRENT_SCHEMA_VERSION {
            return Err(format!(
                "manifest schema_version {} newer than supported {CURRENT_SCHEMA_VERSION}",
                m.schema_version
            ));
        }
        Ok(m)
    }

    /// Write-temp, fsync, rename — the manifest itself is never partially
    /// visible to a reader that opens it mid-write.
    pub fn save_atomic(&self, path: &Path) -> Result<(), String> {
        let dir = path.parent().ok_or("manifest path has no parent dir")?;
        let pid = std::process::id();
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let tmp_path = dir.join(format!(".MANIFEST.json.tmp.{pid}.{nanos}"));

        let json = serde_json::to_string_pretty(self).map_err(|e| format!("serialize manifest: {e}"))?;
        let mut f = fs::File::create(&tmp_path).map_err(|e| format!("create manifest tmp: {e}"))?;
        f.write_all(json.as_bytes()).map_err(|e| format!("write manifest tmp: {e}"))?;
        f.sync_all().map_err(|e| format!("fsync manifest tmp: {e}"))?;
        drop(f);

        fs::rename(&tmp_path, path).map_err(|e| format!("rename manifest: {e}"))?;
        if let Ok(dir_f) = fs::File::open(dir) {
            let _ = dir_f.sync_all();
        }
        Ok(())
    }

    pub fn update_tip(&mut self, hash: &Hash, height: u32, chain_work: &BigUint) {
        self.tip_hash = hex_encode(hash);
        self.tip_height = height;
        self.tip_chain_work = chain_work.to_str_radix(10);
    }

    pub fn tip_hash_bytes(&self) -> Result<Hash, String> {
        hex_decode_32(&self.tip_hash)
    }

    pub fn tip_chain_work(&self) -> Result<BigUint, String> {
        BigUint::parse_bytes(self.tip_chain_work.as_bytes(), 10)
            .ok_or_else(|| format!("bad chain_work decimal string: {}", self.tip_chain_work))
    }
}

pub(crate) fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn hex_decode_32(s: &str) -> Result<Hash, String> {
    if s.len() != 64 {
        return Err(format!("expected 64 hex chars, got {}", s.len()));
    }
    let mut out = [0u8; 32];
    for i in 0..32 {
        out[i] = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).map_err(|e| e.to_string())?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_roundtrips() {
        let m = Manifest::genesis(&[0xabu8; 32], &BigUint::from(42u32));
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("MANIFEST.json");
        m.save_atomic(&path).unwrap();
        let loaded = Manifest::load(&path).unwrap();
        assert_eq!(m, loaded);
        assert_eq!(loaded.tip_hash_bytes().unwrap(), [0xabu8; 32]);
        assert_eq!(loaded.tip_chain_work().unwrap(), BigUint::from(42u32));
    }
}
