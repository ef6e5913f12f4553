//! Coin view stack (§4.1): a persistent base, stacked under flushable
//! in-memory cache layers used while a block is being connected.
//!
//! Coins in this ledger are never mutated in place — a layer only ever
//! creates one (absent from the parent) or destroys one (present in the
//! parent) — so the cache only needs two of the three flags the design
//! note enumerates: FRESH (created here, not in the parent; removed
//! outright if later spent at this layer) and SPENT (parent has it, this
//! layer hides it). DIRTY never arises because nothing here rewrites a
//! coin's value after creation.

use std::collections::HashMap;

use ledger_consensus::{Coin, Hash, OutPoint};

use crate::db::Store;
use crate::error::StoreError;

/// One outpoint's effect, as produced by `ledger_consensus::connect_tx`/
/// `connect_block` and applied verbatim by the caller.
#[derive(Clone, Debug, Default)]
pub struct CoinChanges {
    pub spent: Vec<OutPoint>,
    pub created: Vec<(OutPoint, Coin)>,
}

impl CoinChanges {
    pub fn is_empty(&self) -> bool {
        self.spent.is_empty() && self.created.is_empty()
    }
}

pub trait CoinView {
    fn get_coin(&self, op: &OutPoint) -> Result<Option<Coin>, StoreError>;

    fn have_coin(&self, op: &OutPoint) -> Result<bool, StoreError> {
        Ok(self.get_coin(op)?.is_some())
    }

    fn get_best_block(&self) -> Result<Hash, StoreError>;

    /// Applies `changes` and advances the best-block pointer to `best`.
    /// On the persistent base this is a single atomic store write; on a
    /// cache layer it only mutates the in-memory overlay.
    fn batch_write(&mut self, changes: CoinChanges, best: Hash) -> Result<(), StoreError>;
}

/// The bottom of the stack: reads and writes go straight through to the
/// redb-backed `Store`.
pub struct PersistentCoinView<'s> {
    store: &'s Store,
}

impl<'s> PersistentCoinView<'s> {
    pub fn new(store: &'s Store) -> Self {
        Self { store }
    }
}

impl CoinView for PersistentCoinView<'_> {
    fn get_coin(&self, op: &OutPoint) -> Result<Option<Coin>, StoreError> {
        self.store.get_coin(op)
    }

    fn get_best_block(&self) -> Result<Hash, StoreError> {
        self.store.get_best_block()
    }

    fn batch_write(&mut self, changes: CoinChanges, best: Hash) -> Result<(), StoreError> {
        let wb = self.store.begin_write()?;
        for op in &changes.spent {
            wb.delete_coin(op)?;
        }
        for (op, coin) in &changes.created {
            wb.put_coin(op, coin)?;
        }
        wb.set_best_block(&best)?;
        wb.commit()
    }
}

enum Overlay {
    Fresh(Coin),
    Spent,
}

/// A flushable cache stacked on a parent `CoinView`. Used both as the
/// long-lived coin cache the chainstate manager keeps between blocks and
/// as the short-lived ephemeral layer opened per connect-block attempt
/// (§4.3 step 1), which is simply discarded on failure instead of flushed.
pub struct CacheCoinView<'p> {
    parent: &'p mut dyn CoinView,
    overlay: HashMap<OutPoint, Overlay>,
    best_block: Hash,
    approx_bytes: usize,
}

impl<'p> CacheCoinView<'p> {
    pub fn new(parent: &'p mut dyn CoinView) -> Result<Self, StoreError> {
        let best_block = parent.get_best_block()?;
        Ok(Self {
            parent,
            overlay: HashMap::new(),
            best_block,
            approx_bytes: 0,
        })
    }

    /// Rough byte cost of the overlay, used to decide when to flush (§4.1
    /// "memory bound").
    pub fn approx_bytes(&self) -> usize {
        self.approx_bytes
    }

    /// Writes every overlaid entry down into the parent and clears the
    /// overlay. The parent absorbs the cache's best-block pointer too.
    pub fn flush(&mut self) -> Result<(), StoreError> {
        let mut changes = CoinChanges::default();
        for (op, entry) in self.overlay.drain() {
            match entry {
                Overlay::Fresh(coin) => changes.created.push((op, coin)),
                Overlay::Spent => changes.spent.push(op),
            }
        }
        self.parent.batch_write(changes, self.best_block)?;
        self.approx_bytes = 0;
        Ok(())
    }

    pub fn flush_if_over(&mut self, threshold: usize) -> Result<(), StoreError> {
        if self.approx_bytes >= threshold {
            self.flush()?;
        }
        Ok(())
    }
}

impl CoinView for CacheCoinView<'_> {
    fn get_coin(&self, op: &OutPoint) -> Result<Option<Coin>, StoreError> {
        match self.overlay.get(op) {
            Some(Overlay::Fresh(coin)) => Ok(Some(coin.clone())),
            Some(Overlay::Spent) => Ok(None),
            None => self.parent.get_coin(op),
        }
    }

    fn get_best_block(&self) -> Result<Hash, StoreError> {
        Ok(self.best_block)
    }

    fn batch_write(&mut self, changes: CoinChanges, best: Hash) -> Result<(), StoreError> {
        for op in changes.spent {
            match self.overlay.remove(&op) {
                // FRESH at this layer and now spent at this layer too:
                // it never existed below, so it simply disappears.
                Some(Overlay::Fresh(_)) | None => {
                    self.overlay.insert(op, Overlay::Spent);
                }
                Some(Overlay::Spent) => {
                    self.overlay.insert(op, Overlay::Spent);
                }
            }
        }
        for (op, coin) in changes.created {
            self.approx_bytes += coin.script.len() + 64;
            self.overlay.insert(op, Overlay::Fresh(coin));
        }
        self.best_block = best;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coin(v: i64) -> Coin {
        Coin { out_value: v, height: 1, is_coinbase: false, script: vec![] }
    }

    #[test]
    fn cache_shadows_parent_until_flush() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("chain.redb")).unwrap();
        let mut base = PersistentCoinView::new(&store);

        let op = OutPoint { txid: [1u8; 32], index: 0 };
        let mut cache = CacheCoinView::new(&mut base).unwrap();
        cache
            .batch_write(
                CoinChanges { spent: vec![], created: vec![(op, coin(10))] },
                [2u8; 32],
            )
            .unwrap();
        assert_eq!(cache.get_coin(&op).unwrap(), Some(coin(10)));
        assert_eq!(store.get_coin(&op).unwrap(), None);

        cache.flush().unwrap();
        assert_eq!(store.get_coin(&op).unwrap(), Some(coin(10)));
        assert_eq!(store.get_best_block().unwrap(), [2u8; 32]);
    }

    #[test]
    fn spending_a_fresh_coin_removes_it_outright() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("chain.redb")).unwrap();
        let mut base = PersistentCoinView::new(&store);
        let mut cache = CacheCoinView::new(&mut base).unwrap();

        let op = OutPoint { txid: [3u8; 32], index: 0 };
        cache
            .batch_write(CoinChanges { spent: vec![], created: vec![(op, coin(5))] }, [0u8; 32])
            .unwrap();
        cache
            .batch_write(CoinChanges { spent: vec![op], created: vec![] }, [0u8; 32])
            .unwrap();
        assert_eq!(cache.get_coin(&op).unwrap(), None);

        cache.flush().unwrap();
        assert_eq!(store.get_coin(&op).unwrap(), None);
        assert_eq!(store.coin_count().unwrap(), 0);
    }

    #[test]
    fn ephemeral_layer_discarded_on_drop_never_touches_parent() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("chain.redb")).unwrap();
        let mut base = PersistentCoinView::new(&store);
        {
            let mut ephemeral = CacheCoinView::new(&mut base).unwrap();
            let op = OutPoint { txid: [4u8; 32], index: 0 };
            ephemeral
                .batch_write(CoinChanges { spent: vec![], created: vec![(op, coin(1))] }, [9u8; 32])
                .unwrap();
            // no flush() — simulates a failed connect_block rolling back.
        }
        assert_eq!(store.get_best_block().unwrap(), ledger_consensus::NULL_HASH);
    }
}
