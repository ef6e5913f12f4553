//! Node configuration (§10.3): a `NodeConfig` loaded from a TOML file, with
//! environment-variable overrides read the same way the teacher binary
//! reads its strict-mode flag — `std::env::var`, not a derive-based env
//! loader.

use std::path::{Path, PathBuf};

use ledger_chainstate::{ChainConfig, MempoolConfig};

#[derive(Clone, serde::Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Arbitrary identifier logged at startup; has no effect on consensus.
    pub chain_id: String,
    pub data_dir: PathBuf,
    pub finality_depth: u32,
    pub mempool_max_bytes: u64,
    pub mempool_initial_min_fee_rate: f64,
    pub mempool_fee_rate_increment: f64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let defaults = MempoolConfig::default();
        Self {
            chain_id: "devnet".to_string(),
            data_dir: PathBuf::from("./data"),
            finality_depth: 100,
            mempool_max_bytes: defaults.max_bytes,
            mempool_initial_min_fee_rate: defaults.initial_min_fee_rate,
            mempool_fee_rate_increment: defaults.fee_rate_increment,
        }
    }
}

impl NodeConfig {
    /// Loads `path` if it exists, else falls back to defaults; either way,
    /// `LEDGER_NODE_*` environment variables take precedence over both.
    pub fn load(path: Option<&Path>) -> Result<Self, String> {
        let mut cfg = match path {
            Some(p) if p.exists() => {
                let text = std::fs::read_to_string(p).map_err(|e| format!("read config: {e}"))?;
                toml::from_str(&text).map_err(|e| format!("parse config: {e}"))?
            }
            Some(p) => return Err(format!("config file not found: {}", p.display())),
            None => Self::default(),
        };
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("LEDGER_NODE_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("LEDGER_NODE_FINALITY_DEPTH") {
            if let Ok(parsed) = v.parse() {
                self.finality_depth = parsed;
            }
        }
        if let Ok(v) = std::env::var("LEDGER_NODE_MEMPOOL_MAX_BYTES") {
            if let Ok(parsed) = v.parse() {
                self.mempool_max_bytes = parsed;
            }
        }
    }

    pub fn chain_config(&self) -> ChainConfig {
        ChainConfig {
            finality_depth: self.finality_depth,
            mempool: MempoolConfig {
                max_bytes: self.mempool_max_bytes,
                initial_min_fee_rate: self.mempool_initial_min_fee_rate,
                fee_rate_increment: self.mempool_fee_rate_increment,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_mempool_defaults() {
        let cfg = NodeConfig::default();
        let mempool_defaults = MempoolConfig::default();
        assert_eq!(cfg.mempool_max_bytes, mempool_defaults.max_bytes);
        assert_eq!(cfg.finality_depth, 100);
    }

    #[test]
    fn loads_toml_and_overrides_unset_fields_stay_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.toml");
        std::fs::write(&path, "chain_id = \"testnet\"\nfinality_depth = 50\n").unwrap();
        let cfg = NodeConfig::load(Some(&path)).unwrap();
        assert_eq!(cfg.chain_id, "testnet");
        assert_eq!(cfg.finality_depth, 50);
        assert_eq!(cfg.mempool_max_bytes, MempoolConfig::default().max_bytes);
    }

    #[test]
    fn missing_config_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.toml");
        assert!(NodeConfig::load(Some(&path)).is_err());
    }
}
