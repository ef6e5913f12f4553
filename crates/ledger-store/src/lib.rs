//! `ledger-store` — persistent storage layer: a redb-backed KV store with
//! canonical byte layouts, append-only block/undo flat files, MANIFEST.json
//! crash recovery, a layered coin-view stack, and the UTXO set digest used
//! by the chain-agreement testable property.
//!
//! Import/reorg orchestration lives one layer up, in `ledger-chainstate`,
//! which drives this crate's `CoinView`/`Store`/`BlockFiles` against
//! `ledger-consensus`.

pub mod blockfiles;
pub mod coinview;
pub mod db;
pub mod error;
pub mod keys;
pub mod manifest;
pub mod utxo_hash;

pub use blockfiles::BlockFiles;
pub use coinview::{CacheCoinView, CoinChanges, CoinView, PersistentCoinView};
pub use db::{Store, WriteBatch};
pub use error::StoreError;
pub use keys::{BlockIndexEntry, BlockStatus, FileRef, UndoRecord};
pub use manifest::Manifest;
pub use utxo_hash::utxo_set_hash;
