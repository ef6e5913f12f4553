//! Thin `ledger-node` binary: loads a `NodeConfig`, initializes logging,
//! opens a `ledger_chainstate::ChainstateManager` rooted at its data
//! directory, and wires `submit-block`/`submit-tx`/`template` onto it.
//!
//! No P2P, no RPC, no wallet — those are out of scope per §1. Commands are
//! dispatched the same way the teacher binary dispatches its subcommands:
//! manual flag parsing, no argument-parsing crate.

mod config;
mod genesis;

use std::path::PathBuf;

use ledger_chainstate::ChainstateManager;
use ledger_consensus::{check_pow, Block, Transaction};
use ledger_crypto::{CryptoProvider, StdCryptoProvider};

use config::NodeConfig;

fn get_flag(args: &[String], flag: &str) -> Result<Option<String>, String> {
    let mut i = 0;
    while i < args.len() {
        if args[i] == flag {
            if i + 1 >= args.len() {
                return Err(format!("missing value for {flag}"));
            }
            return Ok(Some(args[i + 1].clone()));
        }
        i += 1;
    }
    Ok(None)
}

fn flag_present(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

fn usage() {
    eprintln!("usage: ledger-node <command> [args]");
    eprintln!("commands:");
    eprintln!("  tip --data-dir <path> [--config <path>] [--chain-id <id>]");
    eprintln!("  mempool-len --data-dir <path> [--config <path>] [--chain-id <id>]");
    eprintln!("  submit-block --data-dir <path> --block-hex <hex> [--config <path>] [--chain-id <id>]");
    eprintln!("  submit-tx --data-dir <path> --tx-hex <hex> [--config <path>] [--chain-id <id>]");
    eprintln!(
        "  template --data-dir <path> --coinbase-script-hex <hex> [--mine] [--submit] [--config <path>] [--chain-id <id>]"
    );
}

fn load_config(args: &[String]) -> Result<NodeConfig, String> {
    let config_path = get_flag(args, "--config")?.map(PathBuf::from);
    let mut cfg = NodeConfig::load(config_path.as_deref())?;
    if let Some(data_dir) = get_flag(args, "--data-dir")? {
        cfg.data_dir = PathBuf::from(data_dir);
    }
    if let Some(chain_id) = get_flag(args, "--chain-id")? {
        cfg.chain_id = chain_id;
    }
    Ok(cfg)
}

fn open_manager(cfg: &NodeConfig) -> Result<ChainstateManager, String> {
    let provider = StdCryptoProvider;
    let genesis = genesis::devnet_genesis(&provider, &cfg.chain_id);
    ChainstateManager::open(
        &cfg.data_dir,
        cfg.chain_config(),
        Box::new(StdCryptoProvider),
        Box::new(ledger_chainstate::SystemClock),
        &genesis,
    )
    .map_err(|e| e.to_string())
}

fn cmd_tip(args: &[String]) -> Result<(), String> {
    let cfg = load_config(args)?;
    let mgr = open_manager(&cfg)?;
    let (hash, height) = mgr.get_tip();
    println!("{} {}", hex::encode(hash), height);
    Ok(())
}

fn cmd_mempool_len(args: &[String]) -> Result<(), String> {
    let cfg = load_config(args)?;
    let mgr = open_manager(&cfg)?;
    println!("{}", mgr.mempool_len());
    Ok(())
}

fn cmd_submit_block(args: &[String]) -> Result<(), String> {
    let cfg = load_config(args)?;
    let block_hex = get_flag(args, "--block-hex")?.ok_or("missing required flag: --block-hex")?;
    let bytes = hex::decode(&block_hex).map_err(|e| format!("--block-hex: {e}"))?;
    let block = Block::decode(&bytes).map_err(|e| e.to_string())?;
    let mgr = open_manager(&cfg)?;
    mgr.submit_block(block).map_err(|e| e.to_string())?;
    let (hash, height) = mgr.get_tip();
    println!("{} {}", hex::encode(hash), height);
    Ok(())
}

fn cmd_submit_tx(args: &[String]) -> Result<(), String> {
    let cfg = load_config(args)?;
    let tx_hex = get_flag(args, "--tx-hex")?.ok_or("missing required flag: --tx-hex")?;
    let bytes = hex::decode(&tx_hex).map_err(|e| format!("--tx-hex: {e}"))?;
    let tx = Transaction::decode(&bytes).map_err(|e| e.to_string())?;
    let mgr = open_manager(&cfg)?;
    let txid = mgr.submit_tx(tx).map_err(|e| e.to_string())?;
    println!("{}", hex::encode(txid));
    Ok(())
}

fn cmd_template(args: &[String]) -> Result<(), String> {
    let cfg = load_config(args)?;
    let script_hex =
        get_flag(args, "--coinbase-script-hex")?.ok_or("missing required flag: --coinbase-script-hex")?;
    let coinbase_script = hex::decode(&script_hex).map_err(|e| format!("--coinbase-script-hex: {e}"))?;
    let mgr = open_manager(&cfg)?;
    let mut template = mgr.assemble_template(coinbase_script).map_err(|e| e.to_string())?;

    if flag_present(args, "--mine") {
        let provider = StdCryptoProvider;
        let mut mined = false;
        for nonce in 0..u32::MAX {
            template.header.nonce = nonce;
            if check_pow(&provider, &template.header).is_ok() {
                mined = true;
                break;
            }
        }
        if !mined {
            return Err("exhausted nonce space without finding a valid proof of work".to_string());
        }
    }

    let block = Block { header: template.header.clone(), txs: template.txs.clone() };
    println!("{}", hex::encode(block.encode()));
    eprintln!("total_fees={} tx_count={}", template.total_fees, template.txs.len());

    if flag_present(args, "--submit") {
        if !flag_present(args, "--mine") {
            return Err("--submit requires --mine".to_string());
        }
        mgr.submit_block(block).map_err(|e| e.to_string())?;
        let (hash, height) = mgr.get_tip();
        eprintln!("submitted: tip={} height={}", hex::encode(hash), height);
    }
    Ok(())
}

fn dispatch(cmd: &str, args: &[String]) -> i32 {
    let result = match cmd {
        "tip" => cmd_tip(args),
        "mempool-len" => cmd_mempool_len(args),
        "submit-block" => cmd_submit_block(args),
        "submit-tx" => cmd_submit_tx(args),
        "template" => cmd_template(args),
        other => Err(format!("unknown command: {other}")),
    };
    match result {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("error: {e}");
            1
        }
    }
}

fn main() {
    env_logger::init();

    let mut args = std::env::args().skip(1).collect::<Vec<_>>();
    if args.is_empty() {
        usage();
        std::process::exit(2);
    }
    let cmd = args.remove(0);
    let exit_code = dispatch(&cmd, &args);
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
}
