//! Mempool (§4.7): candidate transactions plus the indices needed for
//! conflict detection, fee-rate ordering, and incremental ancestor/
//! descendant aggregate maintenance.
//!
//! Ancestor/descendant aggregates are defined inclusive of the entry
//! itself (Bitcoin Core's convention): a childless transaction with no
//! in-pool parents has `ancestor_count == descendant_count == 1`.

use std::collections::{HashMap, HashSet};

use ledger_consensus::{
    connect_tx, ChainContext, ChainError, Coin, CoinLookup, ErrorCode, Hash, OutPoint, Transaction,
    MAX_STANDARD_TX_SIZE, MEMPOOL_MAX_ANCESTOR_SIZE, MEMPOOL_MAX_ANCESTORS,
    MEMPOOL_MAX_DESCENDANT_SIZE, MEMPOOL_MAX_DESCENDANTS, MEMPOOL_MAX_RBF_REPLACED,
};
use ledger_crypto::CryptoProvider;

#[derive(Clone, Debug)]
pub struct MempoolEntry {
    pub txid: Hash,
    pub tx: Transaction,
    pub fee: i64,
    pub vsize: u64,
    pub time_added: u64,
    pub ancestor_count: u64,
    pub ancestor_size: u64,
    pub ancestor_fee: i64,
    pub descendant_count: u64,
    pub descendant_size: u64,
    pub descendant_fee: i64,
}

impl MempoolEntry {
    pub fn ancestor_fee_rate(&self) -> f64 {
        self.ancestor_fee as f64 / self.ancestor_size as f64
    }
}

#[derive(Clone)]
pub struct MempoolConfig {
    pub max_bytes: u64,
    pub initial_min_fee_rate: f64,
    /// Added to the evicted package's feerate to form the new floor (§4.7
    /// step 7), so the next submission must clear the bar that eviction
    /// just raised.
    pub fee_rate_increment: f64,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self { max_bytes: 300_000_000, initial_min_fee_rate: 0.0, fee_rate_increment: 1.0 }
    }
}

pub struct Mempool {
    cfg: MempoolConfig,
    entries: HashMap<Hash, MempoolEntry>,
    /// Direct in-pool parents/children, for conflict walks and incremental
    /// aggregate maintenance.
    parents: HashMap<Hash, HashSet<Hash>>,
    children: HashMap<Hash, HashSet<Hash>>,
    /// Full transitive ancestor/descendant closures (excluding self),
    /// bounded by the 25-entry ancestor limit so kept explicit rather than
    /// recomputed by walking `parents`/`children` on every query.
    ancestors: HashMap<Hash, HashSet<Hash>>,
    descendants: HashMap<Hash, HashSet<Hash>>,
    /// `outpoint -> spender`, for conflict/RBF detection (§4.7 step 1).
    by_outpoint: HashMap<OutPoint, Hash>,
    total_bytes: u64,
    min_fee_rate: f64,
}

impl Mempool {
    pub fn new(cfg: MempoolConfig) -> Self {
        let min_fee_rate = cfg.initial_min_fee_rate;
        Self {
            cfg,
            entries: HashMap::new(),
            parents: HashMap::new(),
            children: HashMap::new(),
            ancestors: HashMap::new(),
            descendants: HashMap::new(),
            by_outpoint: HashMap::new(),
            total_bytes: 0,
            min_fee_rate,
        }
    }

    pub fn get(&self, txid: &Hash) -> Option<&MempoolEntry> {
        self.entries.get(txid)
    }

    pub fn contains(&self, txid: &Hash) -> bool {
        self.entries.contains_key(txid)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn min_fee_rate(&self) -> f64 {
        self.min_fee_rate
    }

    /// §4.7 `submit_tx`. `coin_view` supplies coins not themselves produced
    /// by another in-pool transaction; outputs of in-pool ancestors resolve
    /// through the pool itself, forming `coin_view ∪ mempool_outputs`.
    pub fn submit_tx(
        &mut self,
        provider: &dyn CryptoProvider,
        tx: Transaction,
        coin_view: &dyn CoinLookup,
        ctx: &ChainContext,
        now: u64,
    ) -> Result<Hash, ChainError> {
        if tx.is_coinbase() {
            return Err(ChainError::new(ErrorCode::BadTx, "coinbase cannot enter the mempool"));
        }
        let txid = tx.txid(provider);
        if self.entries.contains_key(&txid) {
            return Err(ChainError::new(ErrorCode::Duplicate, "already in mempool"));
        }

        let tx_bytes_len = tx.encode().len();
        if tx_bytes_len > MAX_STANDARD_TX_SIZE {
            return Err(ChainError::new(ErrorCode::PolicyReject, "exceeds standard tx size"));
        }

        // Step 1: conflicts and RBF.
        let direct_conflicts: HashSet<Hash> = tx
            .inputs
            .iter()
            .filter_map(|i| self.by_outpoint.get(&i.prevout).copied())
            .collect();
        let replaced: HashSet<Hash> = if direct_conflicts.is_empty() {
            HashSet::new()
        } else {
            let mut set = HashSet::new();
            for c in &direct_conflicts {
                set.insert(*c);
                if let Some(desc) = self.descendants.get(c) {
                    set.extend(desc.iter().copied());
                }
            }
            if set.len() > MEMPOOL_MAX_RBF_REPLACED {
                return Err(ChainError::new(ErrorCode::PolicyReject, "RBF would replace too many transactions"));
            }
            set
        };

        // Steps 2-3: resolve inputs (coin_view ∪ mempool, minus anything
        // about to be replaced) and run full consensus validation via the
        // same `connect_tx` the chainstate manager uses to connect blocks.
        let lookup = MempoolCoinLookup { pool: self, coin_view, exclude: &replaced };
        let effect = connect_tx(provider, &tx, &lookup, ctx)?;

        // Step 4: policy — dynamic fee-rate floor.
        let vsize = tx_bytes_len as u64;
        let fee_rate = effect.fee as f64 / vsize as f64;
        if fee_rate < self.min_fee_rate {
            return Err(ChainError::new(ErrorCode::PolicyReject, "fee rate below current floor"));
        }

        if !replaced.is_empty() {
            let (replaced_fee, replaced_size) = self.package_totals(&replaced);
            let replaced_rate = replaced_fee as f64 / replaced_size as f64;
            if effect.fee <= replaced_fee || fee_rate <= replaced_rate {
                return Err(ChainError::new(
                    ErrorCode::PolicyReject,
                    "replacement must pay strictly more fee and a higher feerate",
                ));
            }
        }

        // Step 5: ancestor/descendant limits.
        let direct_parents: HashSet<Hash> = tx
            .inputs
            .iter()
            .filter_map(|i| {
                let parent = i.prevout.txid;
                (self.entries.contains_key(&parent) && !replaced.contains(&parent)).then_some(parent)
            })
            .collect();
        let ancestor_set = self.ancestor_closure(&direct_parents);

        let ancestor_count = ancestor_set.len() as u64 + 1;
        if ancestor_count > MEMPOOL_MAX_ANCESTORS as u64 {
            return Err(ChainError::new(ErrorCode::PolicyReject, "too many in-pool ancestors"));
        }
        let (ancestor_fee_sum, ancestor_size_sum) = self.package_totals(&ancestor_set);
        let ancestor_fee = ancestor_fee_sum + effect.fee;
        let ancestor_size = ancestor_size_sum + vsize;
        if ancestor_size > MEMPOOL_MAX_ANCESTOR_SIZE as u64 {
            return Err(ChainError::new(ErrorCode::PolicyReject, "in-pool ancestor set too large"));
        }
        for a in &ancestor_set {
            let entry = &self.entries[a];
            if entry.descendant_count + 1 > MEMPOOL_MAX_DESCENDANTS as u64 {
                return Err(ChainError::new(ErrorCode::PolicyReject, "ancestor would exceed descendant limit"));
            }
            if entry.descendant_size + vsize > MEMPOOL_MAX_DESCENDANT_SIZE as u64 {
                return Err(ChainError::new(ErrorCode::PolicyReject, "ancestor would exceed descendant size limit"));
            }
        }

        // Apply the replacement before inserting the new entry.
        for r in &replaced {
            self.remove_entry(*r);
        }

        // Step 6: insert, then walk ancestors/descendants updating aggregates.
        for p in &direct_parents {
            self.children.entry(*p).or_default().insert(txid);
        }
        self.parents.insert(txid, direct_parents);
        for a in &ancestor_set {
            self.descendants.entry(*a).or_default().insert(txid);
            if let Some(entry) = self.entries.get_mut(a) {
                entry.descendant_count += 1;
                entry.descendant_size += vsize;
                entry.descendant_fee += effect.fee;
            }
        }
        self.ancestors.insert(txid, ancestor_set);
        for input in &tx.inputs {
            self.by_outpoint.insert(input.prevout, txid);
        }
        self.entries.insert(
            txid,
            MempoolEntry {
                txid,
                tx,
                fee: effect.fee,
                vsize,
                time_added: now,
                ancestor_count,
                ancestor_size,
                ancestor_fee,
                descendant_count: 1,
                descendant_size: vsize,
                descendant_fee: effect.fee,
            },
        );
        self.total_bytes += vsize;

        // Step 7: size-pressure eviction.
        self.evict_to_capacity();

        Ok(txid)
    }

    /// Drops the given txids (a connected block's non-coinbase transactions)
    /// without re-validating, updating every remaining ancestor/descendant
    /// aggregate they touched.
    pub fn remove_for_block(&mut self, txids: &[Hash]) {
        for txid in txids {
            if self.entries.contains_key(txid) {
                self.remove_entry(*txid);
            }
        }
    }

    /// Drops any entry whose resolved inputs are no longer available — used
    /// after a block connects to prune transactions the mempool can no
    /// longer prove are spendable.
    pub fn evict_conflicting(&mut self, coin_view: &dyn CoinLookup) -> Vec<Hash> {
        let stale: Vec<Hash> = self
            .entries
            .values()
            .filter(|e| {
                e.tx.inputs.iter().any(|i| {
                    let spent_in_pool = self.by_outpoint.get(&i.prevout).is_some_and(|s| *s != e.txid);
                    !spent_in_pool && coin_view.get_coin(&i.prevout).is_none() && !self.entries.contains_key(&i.prevout.txid)
                })
            })
            .map(|e| e.txid)
            .collect();
        for txid in &stale {
            if self.entries.contains_key(txid) {
                self.remove_entry(*txid);
            }
        }
        stale
    }

    pub fn entries_by_ancestor_fee_rate_desc(&self) -> Vec<&MempoolEntry> {
        let mut v: Vec<&MempoolEntry> = self.entries.values().collect();
        v.sort_by(|a, b| {
            b.ancestor_fee_rate()
                .partial_cmp(&a.ancestor_fee_rate())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.time_added.cmp(&b.time_added))
        });
        v
    }

    pub fn direct_parents(&self, txid: &Hash) -> impl Iterator<Item = &Hash> {
        self.parents.get(txid).into_iter().flatten()
    }

    fn ancestor_closure(&self, direct_parents: &HashSet<Hash>) -> HashSet<Hash> {
        let mut closure = HashSet::new();
        let mut stack: Vec<Hash> = direct_parents.iter().copied().collect();
        while let Some(h) = stack.pop() {
            if closure.insert(h) {
                if let Some(p) = self.parents.get(&h) {
                    stack.extend(p.iter().copied());
                }
            }
        }
        closure
    }

    fn package_totals(&self, txids: &HashSet<Hash>) -> (i64, u64) {
        txids.iter().fold((0i64, 0u64), |(fee, size), t| {
            let e = &self.entries[t];
            (fee + e.fee, size + e.vsize)
        })
    }

    fn descendant_closure_inclusive(&self, txid: &Hash) -> HashSet<Hash> {
        let mut set = HashSet::from([*txid]);
        if let Some(d) = self.descendants.get(txid) {
            set.extend(d.iter().copied());
        }
        set
    }

    fn remove_entry(&mut self, txid: Hash) {
        let Some(entry) = self.entries.remove(&txid) else { return };
        self.total_bytes -= entry.vsize;

        for input in &entry.tx.inputs {
            if self.by_outpoint.get(&input.prevout) == Some(&txid) {
                self.by_outpoint.remove(&input.prevout);
            }
        }

        if let Some(ancestor_set) = self.ancestors.remove(&txid) {
            for a in &ancestor_set {
                self.descendants.entry(*a).or_default().remove(&txid);
                if let Some(e) = self.entries.get_mut(a) {
                    e.descendant_count = e.descendant_count.saturating_sub(1);
                    e.descendant_size = e.descendant_size.saturating_sub(entry.vsize);
                    e.descendant_fee -= entry.fee;
                }
            }
        }
        if let Some(parents) = self.parents.remove(&txid) {
            for p in parents {
                if let Some(kids) = self.children.get_mut(&p) {
                    kids.remove(&txid);
                }
            }
        }
        self.children.remove(&txid);
        self.descendants.remove(&txid);
    }

    /// §4.7 step 7: evict whole descendant packages, worst ancestor
    /// fee-rate first, until the pool is back under `max_bytes`. A
    /// "package" for eviction purposes is a pool-root (no in-pool parent)
    /// plus everything depending on it — evicting the root without its
    /// descendants would leave them unable to resolve their inputs.
    fn evict_to_capacity(&mut self) -> Vec<Hash> {
        let mut removed = Vec::new();
        while self.total_bytes > self.cfg.max_bytes {
            let mut worst: Option<(Hash, f64, HashSet<Hash>)> = None;
            for (txid, parents) in &self.parents {
                if !parents.is_empty() {
                    continue;
                }
                let package = self.descendant_closure_inclusive(txid);
                let (fee, size) = self.package_totals(&package);
                let rate = fee as f64 / size as f64;
                if worst.as_ref().is_none_or(|(_, wr, _)| rate < *wr) {
                    worst = Some((*txid, rate, package));
                }
            }
            let Some((_, rate, package)) = worst else { break };
            for txid in &package {
                self.remove_entry(*txid);
                removed.push(*txid);
            }
            self.min_fee_rate = rate + self.cfg.fee_rate_increment;
        }
        removed
    }
}

/// `coin_view ∪ mempool_outputs`, with `exclude` hiding transactions being
/// replaced by the submission in progress (§4.7 step 1 RBF).
struct MempoolCoinLookup<'a> {
    pool: &'a Mempool,
    coin_view: &'a dyn CoinLookup,
    exclude: &'a HashSet<Hash>,
}

impl CoinLookup for MempoolCoinLookup<'_> {
    fn get_coin(&self, op: &OutPoint) -> Option<Coin> {
        if self.exclude.contains(&op.txid) {
            return None;
        }
        if let Some(spender) = self.pool.by_outpoint.get(op) {
            if !self.exclude.contains(spender) {
                return None;
            }
        }
        if let Some(parent) = self.pool.entries.get(&op.txid) {
            return parent.tx.outputs.get(op.index as usize).map(|o| Coin {
                out_value: o.value,
                height: 0,
                is_coinbase: false,
                script: o.script.clone(),
            });
        }
        self.coin_view.get_coin(op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_consensus::{TxIn, TxOut};
    use ledger_crypto::StdCryptoProvider;
    use std::cell::RefCell;

    struct MapCoins(RefCell<HashMap<OutPoint, Coin>>);
    impl CoinLookup for MapCoins {
        fn get_coin(&self, op: &OutPoint) -> Option<Coin> {
            self.0.borrow().get(op).cloned()
        }
    }

    fn ctx() -> ChainContext {
        ChainContext { height: 101, prev_timestamps: vec![], adjusted_time: 1_700_000_000, expected_bits: 0x207fffff }
    }

    fn spend(prevout: OutPoint, value: i64, fee: i64, salt: u8) -> Transaction {
        Transaction {
            version: 2,
            inputs: vec![TxIn { prevout, script_sig: vec![], sequence: 0xffff_ffff }],
            outputs: vec![TxOut { value: value - fee, script: vec![salt] }],
            locktime: 0,
        }
    }

    #[test]
    fn accepts_a_simple_spend_and_rejects_missing_inputs() {
        let p = StdCryptoProvider;
        let mut pool = Mempool::new(MempoolConfig::default());
        let prevout = OutPoint { txid: [1u8; 32], index: 0 };
        let coins = MapCoins(RefCell::new(HashMap::from([(
            prevout,
            Coin { out_value: 1000, height: 1, is_coinbase: false, script: vec![] },
        )])));
        let tx = spend(prevout, 1000, 100, 1);
        let txid = pool.submit_tx(&p, tx, &coins, &ctx(), 1).unwrap();
        assert!(pool.contains(&txid));
        assert_eq!(pool.get(&txid).unwrap().fee, 100);

        let missing = spend(OutPoint { txid: [9u8; 32], index: 0 }, 500, 10, 2);
        assert!(pool.submit_tx(&p, missing, &coins, &ctx(), 2).is_err());
    }

    #[test]
    fn chained_spend_updates_ancestor_and_descendant_aggregates() {
        let p = StdCryptoProvider;
        let mut pool = Mempool::new(MempoolConfig::default());
        let prevout = OutPoint { txid: [1u8; 32], index: 0 };
        let coins = MapCoins(RefCell::new(HashMap::from([(
            prevout,
            Coin { out_value: 1000, height: 1, is_coinbase: false, script: vec![] },
        )])));
        let tx_a = spend(prevout, 1000, 100, 1);
        let txid_a = pool.submit_tx(&p, tx_a, &coins, &ctx(), 1).unwrap();

        let op_a = OutPoint { txid: txid_a, index: 0 };
        let tx_b = spend(op_a, 900, 50, 2);
        let txid_b = pool.submit_tx(&p, tx_b, &coins, &ctx(), 2).unwrap();

        let entry_a = pool.get(&txid_a).unwrap();
        assert_eq!(entry_a.descendant_count, 2);
        assert_eq!(entry_a.descendant_fee, 150);

        let entry_b = pool.get(&txid_b).unwrap();
        assert_eq!(entry_b.ancestor_count, 2);
        assert_eq!(entry_b.ancestor_fee, 150);
    }

    #[test]
    fn duplicate_submission_is_rejected() {
        let p = StdCryptoProvider;
        let mut pool = Mempool::new(MempoolConfig::default());
        let prevout = OutPoint { txid: [3u8; 32], index: 0 };
        let coins = MapCoins(RefCell::new(HashMap::from([(
            prevout,
            Coin { out_value: 500, height: 1, is_coinbase: false, script: vec![] },
        )])));
        let tx = spend(prevout, 500, 50, 1);
        pool.submit_tx(&p, tx.clone(), &coins, &ctx(), 1).unwrap();
        assert!(pool.submit_tx(&p, tx, &coins, &ctx(), 2).is_err());
    }

    #[test]
    fn eviction_drops_the_lower_package_feerate_first() {
        let p = StdCryptoProvider;
        let mut pool = Mempool::new(MempoolConfig { max_bytes: 1, initial_min_fee_rate: 0.0, fee_rate_increment: 0.0 });

        let op_a = OutPoint { txid: [1u8; 32], index: 0 };
        let op_c = OutPoint { txid: [2u8; 32], index: 0 };
        let coins = MapCoins(RefCell::new(HashMap::from([
            (op_a, Coin { out_value: 1000, height: 1, is_coinbase: false, script: vec![] }),
            (op_c, Coin { out_value: 1000, height: 1, is_coinbase: false, script: vec![] }),
        ])));

        // A: low fee-rate, has a child B that pays a much higher fee-rate;
        // the A+B package still beats C on its own.
        let tx_a = spend(op_a, 1000, 1, 1);
        let txid_a = pool.submit_tx(&p, tx_a, &coins, &ctx(), 1).unwrap();
        let tx_b = spend(OutPoint { txid: txid_a, index: 0 }, 999, 20, 2);
        pool.submit_tx(&p, tx_b, &coins, &ctx(), 2).unwrap();

        let tx_c = spend(op_c, 1000, 10, 3);
        let txid_c = pool.submit_tx(&p, tx_c, &coins, &ctx(), 3).unwrap();

        // Eviction already ran after each submit_tx given max_bytes=1; by
        // this point only the best-feerate package should remain.
        assert!(!pool.contains(&txid_c) || !pool.contains(&txid_a));
    }
}
