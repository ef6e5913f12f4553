//! Context-free, contextual, and connect-time transaction/block validation.
//!
//! This module is the consensus core named in §4.3 steps 2-5 of the
//! specification: everything a chainstate implementation needs to decide
//! whether a block may extend the active chain, expressed as pure functions
//! over caller-supplied state. It never touches storage directly; callers
//! (ledger-store, ledger-chainstate) supply coin lookups through
//! [`CoinLookup`] and persist the resulting undo information themselves.

use std::collections::{HashMap, HashSet};

use ledger_crypto::CryptoProvider;

use crate::constants::{
    COINBASE_MATURITY, MAX_BLOCK_SIGOPS, MAX_BLOCK_SIZE, MAX_FUTURE_SKEW, MEDIAN_TIME_SPAN,
};
use crate::error::{ChainError, ErrorCode};
use crate::pow::check_pow;
use crate::primitives::{Block, BlockHeader, Coin, Hash, OutPoint, Transaction};
use crate::script::{verify_script, ScriptContext};

/// Narrow read interface into whatever coin set (mempool, coin-view cache,
/// persistent store) the caller wants this block or transaction validated
/// against. Consensus code only ever reads through this trait; it never
/// mutates it — the caller applies the resulting [`TxEffect`]s.
pub trait CoinLookup {
    fn get_coin(&self, op: &OutPoint) -> Option<Coin>;
}

impl<F: Fn(&OutPoint) -> Option<Coin>> CoinLookup for F {
    fn get_coin(&self, op: &OutPoint) -> Option<Coin> {
        self(op)
    }
}

/// `coins` as of the parent block, shadowed by whatever this block has
/// created so far (see `connect_block`).
struct BlockLocalLookup<'a> {
    base: &'a dyn CoinLookup,
    local: &'a HashMap<OutPoint, Coin>,
}

impl CoinLookup for BlockLocalLookup<'_> {
    fn get_coin(&self, op: &OutPoint) -> Option<Coin> {
        self.local.get(op).cloned().or_else(|| self.base.get_coin(op))
    }
}

/// Ambient facts about where in the chain a block or transaction is being
/// evaluated, supplied by the caller (who owns the block index/active chain).
#[derive(Clone, Debug)]
pub struct ChainContext {
    /// Height the block would occupy (tip height + 1), or the current tip
    /// height for mempool-time transaction checks.
    pub height: u32,
    /// Timestamps of the last `MEDIAN_TIME_SPAN` headers, most recent last.
    pub prev_timestamps: Vec<u32>,
    /// Caller-supplied "now", injectable so validation stays deterministic
    /// under test (§9 design notes: global clock).
    pub adjusted_time: u32,
    /// The `bits` value consensus expects at this height (already
    /// retargeted by the caller via `ledger_consensus::pow`).
    pub expected_bits: u32,
}

/// The net effect of successfully connecting one non-coinbase transaction:
/// the coins it spent (for undo) and the coins it created.
#[derive(Clone, Debug)]
pub struct TxEffect {
    pub spent: Vec<(OutPoint, Coin)>,
    pub created: Vec<(OutPoint, Coin)>,
    pub fee: i64,
}

/// Block-level connect result: coinbase value, total fees, per-tx effects in
/// block order (coinbase first, with an empty `spent`/fee of zero), and the
/// total number of verified sigops (for `MAX_BLOCK_SIGOPS` accounting by the
/// caller across a full chain of blocks, not just this one).
#[derive(Clone, Debug)]
pub struct BlockEffect {
    pub tx_effects: Vec<TxEffect>,
    pub total_fees: i64,
}

/// §4.2 `insert_header`: context-free header checks plus PoW.
pub fn check_header_context_free(
    provider: &dyn CryptoProvider,
    header: &BlockHeader,
) -> Result<(), ChainError> {
    check_pow(provider, header)
}

/// §4.3 step 3: contextual header checks against the chain being extended.
pub fn check_header_contextual(header: &BlockHeader, ctx: &ChainContext) -> Result<(), ChainError> {
    if header.bits != ctx.expected_bits {
        return Err(ChainError::new(ErrorCode::BadPow, "bits do not match expected retarget"));
    }

    if !ctx.prev_timestamps.is_empty() {
        let mtp = median_time_past(&ctx.prev_timestamps);
        if header.time <= mtp {
            return Err(ChainError::new(ErrorCode::BadTime, "time not after median-time-past"));
        }
    }
    let max_future = ctx.adjusted_time.saturating_add(MAX_FUTURE_SKEW);
    if header.time > max_future {
        return Err(ChainError::new(ErrorCode::BadTime, "time too far in the future"));
    }
    Ok(())
}

/// Median of up to the last `MEDIAN_TIME_SPAN` header timestamps.
pub fn median_time_past(prev_timestamps: &[u32]) -> u32 {
    let take = prev_timestamps.len().min(MEDIAN_TIME_SPAN);
    let mut window: Vec<u32> = prev_timestamps[prev_timestamps.len() - take..].to_vec();
    window.sort_unstable();
    window[window.len() / 2]
}

/// §4.3 step 4: locktime/sequence gating for one non-coinbase input.
fn check_locktime_sequence(tx: &Transaction, ctx: &ChainContext) -> Result<(), ChainError> {
    let locktime_active = tx.inputs.iter().any(|i| i.sequence != 0xffff_ffff);
    if locktime_active && tx.locktime != 0 {
        let satisfied = if tx.locktime < 500_000_000 {
            (tx.locktime) <= ctx.height
        } else {
            tx.locktime <= ctx.adjusted_time
        };
        if !satisfied {
            return Err(ChainError::new(ErrorCode::BadTx, "locktime not yet reached"));
        }
    }
    Ok(())
}

/// Connects a single non-coinbase transaction against `coins`: resolves
/// inputs, enforces coinbase maturity and locktime/sequence, verifies every
/// input script, and returns the undo-relevant [`TxEffect`]. Does not mutate
/// `coins`; the caller applies the effect to its own view.
pub fn connect_tx(
    provider: &dyn CryptoProvider,
    tx: &Transaction,
    coins: &dyn CoinLookup,
    ctx: &ChainContext,
) -> Result<TxEffect, ChainError> {
    debug_assert!(!tx.is_coinbase());
    check_locktime_sequence(tx, ctx)?;

    let mut spent = Vec::with_capacity(tx.inputs.len());
    let mut input_sum: i64 = 0;

    for (idx, input) in tx.inputs.iter().enumerate() {
        let coin = coins
            .get_coin(&input.prevout)
            .ok_or_else(|| ChainError::new(ErrorCode::MissingInputs, "prevout not found"))?;

        if coin.is_coinbase {
            let depth = ctx.height.saturating_sub(coin.height);
            if depth < COINBASE_MATURITY {
                return Err(ChainError::new(ErrorCode::PrematureSpend, "coinbase not yet mature"));
            }
        }

        input_sum = input_sum
            .checked_add(coin.out_value)
            .ok_or_else(|| ChainError::new(ErrorCode::BadTx, "input value overflow"))?;

        let script_ctx = ScriptContext {
            tx,
            input_index: idx,
            input_value: coin.out_value,
        };
        verify_script(provider, &script_ctx, &input.script_sig, &coin.script)?;

        spent.push((input.prevout, coin));
    }

    let mut output_sum: i64 = 0;
    for out in &tx.outputs {
        output_sum = output_sum
            .checked_add(out.value)
            .ok_or_else(|| ChainError::new(ErrorCode::BadTx, "output value overflow"))?;
    }
    if output_sum > input_sum {
        return Err(ChainError::new(ErrorCode::BadTx, "outputs exceed inputs"));
    }
    let fee = input_sum - output_sum;

    let txid = tx.txid(provider);
    let created = tx
        .outputs
        .iter()
        .enumerate()
        .map(|(vout, out)| {
            (
                OutPoint { txid, index: vout as u32 },
                Coin {
                    out_value: out.value,
                    height: ctx.height,
                    is_coinbase: false,
                    script: out.script.clone(),
                },
            )
        })
        .collect();

    Ok(TxEffect { spent, created, fee })
}

/// Connects a full block (§4.3 steps 2-5): context-free + contextual header
/// checks, per-tx connection in order, and the coinbase subsidy bound. Script
/// verification for distinct inputs may safely be parallelized by the caller
/// (§4.6); this sequential version is the reference semantics.
pub fn connect_block(
    provider: &dyn CryptoProvider,
    block: &Block,
    coins: &dyn CoinLookup,
    ctx: &ChainContext,
) -> Result<BlockEffect, ChainError> {
    block.check_context_free(MAX_BLOCK_SIZE)?;
    check_header_context_free(provider, &block.header)?;
    check_header_contextual(&block.header, ctx)?;

    let txids: Vec<Hash> = block.txs.iter().map(|tx| tx.txid(provider)).collect();
    let merkle = crate::merkle::merkle_root_txids(provider, &txids)?;
    if merkle != block.header.merkle_root {
        log::debug!("connect_block: merkle root mismatch at height {}", ctx.height);
        return Err(ChainError::new(ErrorCode::BadMerkle, "merkle root mismatch"));
    }

    let mut seen_prevouts: HashSet<OutPoint> = HashSet::new();
    let mut tx_effects = Vec::with_capacity(block.txs.len());
    let mut total_fees: i64 = 0;
    let mut sigops: u64 = 0;

    // Outputs created earlier in this same block are spendable by a later
    // tx in the block (§4.3 step 4 applies each tx to the view in order);
    // `coins` alone only knows about the chain as of the parent block, so a
    // thin overlay resolves same-block parent/child spends without the
    // caller needing to thread a mutable view through this function.
    let mut block_created: HashMap<OutPoint, Coin> = HashMap::new();

    for tx in block.txs.iter().skip(1) {
        for input in &tx.inputs {
            if !seen_prevouts.insert(input.prevout) {
                return Err(ChainError::new(ErrorCode::BadTx, "duplicate prevout within block"));
            }
        }
        let lookup = BlockLocalLookup { base: coins, local: &block_created };
        let effect = connect_tx(provider, tx, &lookup, ctx)?;
        total_fees = total_fees
            .checked_add(effect.fee)
            .ok_or_else(|| ChainError::new(ErrorCode::BadTx, "fee overflow"))?;
        sigops += tx.inputs.len() as u64;
        for (op, coin) in &effect.created {
            block_created.insert(*op, coin.clone());
        }
        tx_effects.push(effect);
    }
    if sigops > MAX_BLOCK_SIGOPS {
        return Err(ChainError::new(ErrorCode::BadSigops, "block exceeds MAX_BLOCK_SIGOPS"));
    }

    let coinbase = &block.txs[0];
    let coinbase_value: i64 = coinbase.outputs.iter().try_fold(0i64, |acc, o| {
        acc.checked_add(o.value)
            .ok_or_else(|| ChainError::new(ErrorCode::BadCoinbase, "coinbase value overflow"))
    })?;
    let subsidy = crate::subsidy::block_subsidy(ctx.height);
    let max_coinbase = subsidy
        .checked_add(total_fees)
        .ok_or_else(|| ChainError::new(ErrorCode::BadCoinbase, "subsidy+fees overflow"))?;
    if coinbase_value > max_coinbase {
        log::debug!(
            "connect_block: coinbase at height {} pays {} > subsidy {} + fees {}",
            ctx.height,
            coinbase_value,
            subsidy,
            total_fees
        );
        return Err(ChainError::new(ErrorCode::BadCoinbase, "coinbase pays more than subsidy+fees"));
    }

    let coinbase_txid = txids[0];
    let coinbase_created = coinbase
        .outputs
        .iter()
        .enumerate()
        .map(|(vout, out)| {
            (
                OutPoint { txid: coinbase_txid, index: vout as u32 },
                Coin {
                    out_value: out.value,
                    height: ctx.height,
                    is_coinbase: true,
                    script: out.script.clone(),
                },
            )
        })
        .collect();
    let mut effects = vec![TxEffect {
        spent: Vec::new(),
        created: coinbase_created,
        fee: 0,
    }];
    effects.extend(tx_effects);

    log::debug!(
        "connect_block: height {} accepted {} txs, fees {}",
        ctx.height,
        effects.len(),
        total_fees
    );
    Ok(BlockEffect {
        tx_effects: effects,
        total_fees,
    })
}

impl Transaction {
    /// `txid`: double-SHA256 of the canonical serialization.
    pub fn txid(&self, provider: &dyn CryptoProvider) -> Hash {
        provider.hash256(&self.encode())
    }
}
