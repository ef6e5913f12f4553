//! Deterministic devnet genesis block construction.
//!
//! `ChainstateManager::open` always needs a genesis block to hand it, even
//! on a restart where the store already has one — it only consults this
//! argument the first time. Building it the same way on every invocation
//! (same fixed timestamp, same easy `bits`) keeps `ledger-node` honest: a
//! real network would ship a single hardcoded genesis instead.

use ledger_consensus::{
    block_subsidy, check_pow, merkle_root_txids, Block, BlockHeader, OutPoint, Transaction, TxIn,
    TxOut,
};
use ledger_crypto::CryptoProvider;

/// Fixed so every node booting the same `chain_id` derives byte-identical
/// genesis blocks; not meant to resemble a production launch date.
const GENESIS_TIME: u32 = 1_700_000_000;
/// `0x207fffff`: the easiest possible target, so genesis mining terminates
/// in a handful of nonce tries regardless of the host's hashing speed.
const GENESIS_BITS: u32 = 0x207f_ffff;

pub fn devnet_genesis(provider: &dyn CryptoProvider, chain_id: &str) -> Block {
    let coinbase = Transaction {
        version: 2,
        inputs: vec![TxIn {
            prevout: OutPoint::null(),
            script_sig: chain_id.as_bytes().to_vec(),
            sequence: 0xffff_ffff,
        }],
        outputs: vec![TxOut { value: block_subsidy(0), script: chain_id.as_bytes().to_vec() }],
        locktime: 0,
    };
    let txid = coinbase.txid(provider);
    let merkle_root = merkle_root_txids(provider, std::slice::from_ref(&txid))
        .expect("single-tx merkle root never fails");

    let mut header = BlockHeader {
        version: 1,
        prev_hash: ledger_consensus::NULL_HASH,
        merkle_root,
        time: GENESIS_TIME,
        bits: GENESIS_BITS,
        nonce: 0,
    };
    for nonce in 0..1_000_000u32 {
        header.nonce = nonce;
        if check_pow(provider, &header).is_ok() {
            break;
        }
    }

    Block { header, txs: vec![coinbase] }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_crypto::StdCryptoProvider;

    #[test]
    fn devnet_genesis_satisfies_its_own_proof_of_work() {
        let provider = StdCryptoProvider;
        let genesis = devnet_genesis(&provider, "devnet");
        check_pow(&provider, &genesis.header).unwrap();
    }

    #[test]
    fn devnet_genesis_is_deterministic_for_a_fixed_chain_id() {
        let provider = StdCryptoProvider;
        let a = devnet_genesis(&provider, "devnet");
        let b = devnet_genesis(&provider, "devnet");
        assert_eq!(a.header.encode(), b.header.encode());

        let other = devnet_genesis(&provider, "testnet");
        assert_ne!(a.header.encode(), other.header.encode());
    }
}
