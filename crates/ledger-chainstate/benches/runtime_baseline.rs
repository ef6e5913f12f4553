//! Mempool admission throughput: a chain of independent P2PKH spends
//! submitted one after another. Run with `cargo bench -p ledger-chainstate`.

use std::cell::RefCell;
use std::collections::HashMap;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use secp256k1::{Message, PublicKey, SecretKey, SECP256K1};

use ledger_chainstate::{Mempool, MempoolConfig};
use ledger_consensus::{
    p2pkh_script, sighash_digest, ChainContext, Coin, CoinLookup, OutPoint, SighashType,
    Transaction, TxIn, TxOut,
};
use ledger_crypto::{CryptoProvider, StdCryptoProvider};

struct MapCoins(RefCell<HashMap<OutPoint, Coin>>);

impl CoinLookup for MapCoins {
    fn get_coin(&self, op: &OutPoint) -> Option<Coin> {
        self.0.borrow().get(op).cloned()
    }
}

fn ctx() -> ChainContext {
    ChainContext { height: 101, prev_timestamps: vec![], adjusted_time: 1_700_000_000, expected_bits: 0x207fffff }
}

fn signed_spend(p: &StdCryptoProvider, sk: &SecretKey, prevout: OutPoint, value: i64, salt: u8) -> (Transaction, Coin) {
    let pk = PublicKey::from_secret_key(SECP256K1, sk);
    let h160 = p.hash160(&pk.serialize());
    let script_pubkey = p2pkh_script(&h160);
    let coin = Coin { out_value: value, height: 1, is_coinbase: false, script: script_pubkey.clone() };

    let mut tx = Transaction {
        version: 2,
        inputs: vec![TxIn { prevout, script_sig: vec![], sequence: 0xffff_ffff }],
        outputs: vec![TxOut { value: value - 100, script: vec![0xac, salt] }],
        locktime: 0,
    };

    let digest = sighash_digest(p, &tx, 0, &script_pubkey, SighashType::ALL).unwrap();
    let msg = Message::from_digest(digest);
    let sig = SECP256K1.sign_ecdsa(&msg, sk);
    let mut sig_with_type = sig.serialize_der().to_vec();
    sig_with_type.push(SighashType::ALL.to_u32() as u8);

    let mut script_sig = vec![sig_with_type.len() as u8];
    script_sig.extend_from_slice(&sig_with_type);
    let pk_bytes = pk.serialize();
    script_sig.push(pk_bytes.len() as u8);
    script_sig.extend_from_slice(&pk_bytes);
    tx.inputs[0].script_sig = script_sig;

    (tx, coin)
}

fn bench_submit_tx(c: &mut Criterion) {
    let p = StdCryptoProvider;
    let sk = SecretKey::from_slice(&[0x24; 32]).unwrap();

    c.bench_function("mempool/submit_tx_independent_spends", |b| {
        b.iter(|| {
            let mut pool = Mempool::new(MempoolConfig::default());
            let mut coins = HashMap::new();
            let mut txs = Vec::new();
            for i in 0..200u8 {
                let prevout = OutPoint { txid: [i; 32], index: 0 };
                let (tx, coin) = signed_spend(&p, &sk, prevout, 10_000, i);
                coins.insert(prevout, coin);
                txs.push(tx);
            }
            let lookup = MapCoins(RefCell::new(coins));
            for (i, tx) in txs.into_iter().enumerate() {
                pool.submit_tx(&p, black_box(tx), &lookup, &ctx(), i as u64).unwrap();
            }
        })
    });
}

criterion_group!(benches, bench_submit_tx);
criterion_main!(benches);
