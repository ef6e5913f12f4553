//! Consensus library: wire encoding, primitives, proof-of-work, the script
//! verifier, and block/transaction validation.
//!
//! Pure and deterministic — no I/O, no storage, no threading. Callers
//! (`ledger-store`, `ledger-chainstate`) drive this crate against whatever
//! coin set and clock they own.

mod compactsize;
mod constants;
mod error;
mod fork_choice;
mod merkle;
mod pow;
mod primitives;
mod script;
mod sighash;
mod subsidy;
mod validate;
mod wire;

pub use compactsize::{compact_size_decode, compact_size_encode};
pub use constants::*;
pub use error::{ChainError, ErrorCode};
pub use fork_choice::chain_work_from_bits;
pub use merkle::merkle_root_txids;
pub use pow::{bits_to_target, check_pow, retarget, target_to_bits, work_from_bits, work_from_target, POW_LIMIT};
pub use primitives::{Block, BlockHeader, Coin, Hash, OutPoint, Transaction, TxIn, TxOut, NULL_HASH};
pub use script::{p2pkh_script, p2sh_script, verify_script, ScriptContext};
pub use sighash::{sighash_digest, SighashBase, SighashType};
pub use subsidy::{block_subsidy, HALVING_INTERVAL, INITIAL_SUBSIDY};
pub use validate::{
    check_header_context_free, check_header_contextual, connect_block, connect_tx,
    median_time_past, BlockEffect, ChainContext, CoinLookup, TxEffect,
};
