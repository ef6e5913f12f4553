//! Block assembler (§4.8): greedy, package-aware selection of mempool
//! entries into a `BlockTemplate`, under the block weight and sigop caps.

use std::collections::HashSet;

use ledger_consensus::{
    block_subsidy, compact_size_encode, merkle_root_txids, BlockHeader, Hash, OutPoint, Transaction,
    TxIn, TxOut, MAX_BLOCK_SIGOPS, MAX_BLOCK_WEIGHT, NULL_HASH,
};
use ledger_crypto::CryptoProvider;

use crate::mempool::Mempool;

pub struct BlockTemplate {
    pub header: BlockHeader,
    pub txs: Vec<Transaction>,
    pub total_fees: i64,
}

/// Very rough sigop estimate: CHECKSIG-family opcodes are assumed once per
/// input plus once per non-`OP_RETURN` output, which over-counts compared
/// to a real script walk but is a safe (conservative) upper bound for the
/// purpose of respecting `MAX_BLOCK_SIGOPS`.
fn estimate_sigops(tx: &Transaction) -> u64 {
    (tx.inputs.len() + tx.outputs.len()) as u64
}

/// §4.8: repeatedly takes the highest ancestor-fee-rate package whose
/// ancestors are not yet included, adds the whole package in topological
/// (ancestor-first) order, and stops once the next package would blow the
/// weight or sigop budget.
pub fn assemble_block_template(
    mempool: &Mempool,
    prev_hash: Hash,
    height: u32,
    coinbase_script_pubkey: Vec<u8>,
    expected_bits: u32,
    time: u32,
) -> BlockTemplate {
    let mut included: HashSet<Hash> = HashSet::new();
    let mut ordered: Vec<Transaction> = Vec::new();
    let mut total_fees: i64 = 0;
    let mut weight_used: u64 = 0;
    let mut sigops_used: u64 = 0;

    for entry in mempool.entries_by_ancestor_fee_rate_desc() {
        if included.contains(&entry.txid) {
            continue;
        }
        let package = topological_package(mempool, &entry.txid, &included);
        if package.is_empty() {
            continue;
        }

        let package_weight: u64 = package.iter().map(|(_, t)| t.encode().len() as u64 * 4).sum();
        let package_sigops: u64 = package.iter().map(|(_, t)| estimate_sigops(t)).sum();
        let package_fee: i64 = package
            .iter()
            .map(|(txid, _)| mempool.get(txid).map(|e| e.fee).unwrap_or(0))
            .sum();

        if weight_used + package_weight > MAX_BLOCK_WEIGHT {
            continue;
        }
        if sigops_used + package_sigops > MAX_BLOCK_SIGOPS {
            continue;
        }

        for (txid, tx) in package {
            included.insert(txid);
            ordered.push(tx);
        }
        weight_used += package_weight;
        sigops_used += package_sigops;
        total_fees += package_fee;
    }

    let subsidy = block_subsidy(height);
    let coinbase = Transaction {
        version: 2,
        inputs: vec![TxIn {
            prevout: OutPoint { txid: NULL_HASH, index: u32::MAX },
            script_sig: bip34_height_push(height),
            sequence: 0xffff_ffff,
        }],
        outputs: vec![TxOut { value: subsidy + total_fees, script: coinbase_script_pubkey }],
        locktime: 0,
    };

    let mut txs = Vec::with_capacity(ordered.len() + 1);
    txs.push(coinbase);
    txs.extend(ordered);

    let provider = ledger_crypto::StdCryptoProvider;
    let txids: Vec<Hash> = txs.iter().map(|t| provider.hash256(&t.encode())).collect();
    let merkle_root = merkle_root_txids(&provider, &txids).unwrap_or(NULL_HASH);

    let header = BlockHeader { version: 1, prev_hash, merkle_root, time, bits: expected_bits, nonce: 0 };

    BlockTemplate { header, txs, total_fees }
}

/// Returns `entry_txid`'s unincluded ancestors (ancestor-first) followed by
/// itself — the whole ancestor package in an order a fresh coin view can
/// apply directly.
fn topological_package(mempool: &Mempool, txid: &Hash, included: &HashSet<Hash>) -> Vec<(Hash, Transaction)> {
    let mut order = Vec::new();
    let mut seen = HashSet::new();
    fn visit(
        mempool: &Mempool,
        txid: Hash,
        included: &HashSet<Hash>,
        seen: &mut HashSet<Hash>,
        order: &mut Vec<(Hash, Transaction)>,
    ) {
        if included.contains(&txid) || !seen.insert(txid) {
            return;
        }
        let parents: Vec<Hash> = mempool.direct_parents(&txid).copied().collect();
        for p in parents {
            visit(mempool, p, included, seen, order);
        }
        if let Some(entry) = mempool.get(&txid) {
            order.push((txid, entry.tx.clone()));
        }
    }
    visit(mempool, *txid, included, &mut seen, &mut order);
    order
}

/// BIP34: push the block height as a minimal-encoded script number at the
/// start of the coinbase `script_sig`.
fn bip34_height_push(height: u32) -> Vec<u8> {
    let mut num = Vec::new();
    let mut h = height as u64;
    if h == 0 {
        num.push(0);
    } else {
        while h > 0 {
            num.push((h & 0xff) as u8);
            h >>= 8;
        }
        if num.last().map(|b| b & 0x80 != 0).unwrap_or(false) {
            num.push(0);
        }
    }
    let mut out = Vec::with_capacity(num.len() + 1 + 8);
    out.push(num.len() as u8);
    out.extend_from_slice(&num);
    out.extend_from_slice(&compact_size_encode(0));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mempool::MempoolConfig;
    use ledger_consensus::{ChainContext, Coin, CoinLookup, OutPoint};
    use ledger_crypto::StdCryptoProvider;
    use std::cell::RefCell;
    use std::collections::HashMap;

    struct MapCoins(RefCell<HashMap<OutPoint, Coin>>);
    impl CoinLookup for MapCoins {
        fn get_coin(&self, op: &OutPoint) -> Option<Coin> {
            self.0.borrow().get(op).cloned()
        }
    }

    fn ctx() -> ChainContext {
        ChainContext { height: 101, prev_timestamps: vec![], adjusted_time: 1_700_000_000, expected_bits: 0x207fffff }
    }

    #[test]
    fn template_always_starts_with_a_coinbase_paying_subsidy_plus_fees() {
        let p = StdCryptoProvider;
        let mut pool = Mempool::new(MempoolConfig::default());
        let prevout = OutPoint { txid: [1u8; 32], index: 0 };
        let coins = MapCoins(RefCell::new(HashMap::from([(
            prevout,
            Coin { out_value: 1000, height: 1, is_coinbase: false, script: vec![] },
        )])));
        let tx = Transaction {
            version: 2,
            inputs: vec![TxIn { prevout, script_sig: vec![], sequence: 0xffff_ffff }],
            outputs: vec![TxOut { value: 900, script: vec![] }],
            locktime: 0,
        };
        pool.submit_tx(&p, tx, &coins, &ctx(), 1).unwrap();

        let template = assemble_block_template(&pool, [0u8; 32], 101, vec![0xac], 0x207fffff, 1_700_000_100);
        assert!(template.txs[0].is_coinbase());
        assert_eq!(template.txs[0].outputs[0].value, block_subsidy(101) + 100);
        assert_eq!(template.total_fees, 100);
        assert_eq!(template.txs.len(), 2);
    }

    #[test]
    fn empty_mempool_yields_coinbase_only_template() {
        let pool = Mempool::new(MempoolConfig::default());
        let template = assemble_block_template(&pool, [0u8; 32], 1, vec![0xac], 0x207fffff, 1_700_000_000);
        assert_eq!(template.txs.len(), 1);
        assert_eq!(template.total_fees, 0);
        assert_eq!(template.txs[0].outputs[0].value, block_subsidy(1));
    }
}
