//! `ledger-chainstate` — the orchestrator crate: `ChainstateManager` (§4.3,
//! §5), the in-memory block index and validity lattice (§4.2, §4.4), the
//! mempool (§4.7), the block assembler (§4.8), and the event bus (§6).
//!
//! `ledger-consensus` supplies pure validation, `ledger-store` supplies
//! durable storage; this crate ties the two together behind a single
//! coarse chainstate lock.

pub mod assembler;
pub mod block_index;
pub mod chainstate;
pub mod clock;
pub mod events;
pub mod mempool;

pub use assembler::{assemble_block_template, BlockTemplate};
pub use block_index::{BlockIndex, IndexEntry};
pub use chainstate::{ChainConfig, ChainstateManager, CHAIN_DB_FILE_NAME};
pub use clock::{Clock, SystemClock};
pub use events::{Event, EventBus};
pub use mempool::{Mempool, MempoolConfig, MempoolEntry};
