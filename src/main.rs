//! BTC Withdrawal Node
//!
//! Run modes:
//!   btc-withdrawal run [--replay]    - Run this validator against the shared ledger
//!   btc-withdrawal status <id>       - Show the saga state of one withdrawal
//!   btc-withdrawal address           - Show the bridge multisig address
//!   btc-withdrawal keygen            - Generate a new multisig key share
//!
//! While running, transfer commands may be submitted as JSON lines on stdin.

use std::env;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

use btc_withdrawal::bitcoin::{pick_fee_rate, EsploraClient, EsploraNetwork, EsploraWallet};
use btc_withdrawal::common::logging::init_from_config;
use btc_withdrawal::withdrawal::{CurrentFeeRate, SharedFeeRate, StaticFeeRate};
use btc_withdrawal::{
    BridgeConfig, BridgeNode, FactStore, Ledger, MemoryFactStore, MultisigSigner, MultisigWallet,
    Result, SqliteFactStore, TransferCommand, WithdrawalId, WithdrawalTracker,
};

/// Ledger poll interval of the tailing store
const TAIL_INTERVAL: Duration = Duration::from_millis(500);

/// Confirmation target for fee estimates
const FEE_TARGET_BLOCKS: u16 = 6;

/// How often run mode prints withdrawal statistics
const STATS_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage();
        return;
    }

    let result = match args[1].as_str() {
        "run" => cmd_run(&args[2..]).await,
        "status" => cmd_status(&args[2..]).await,
        "address" => cmd_address(),
        "keygen" => {
            cmd_keygen();
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        _ => {
            print_usage();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn print_usage() {
    println!("BTC Withdrawal Node - Federated Bridge Validator");
    println!();
    println!("Usage:");
    println!("  btc-withdrawal run [--replay]      Run the validator (--replay handles the ledger from the start)");
    println!("  btc-withdrawal status <id>         Show the state of a withdrawal");
    println!("  btc-withdrawal address             Show the bridge multisig address");
    println!("  btc-withdrawal keygen              Generate a new multisig key share");
    println!();
    println!("Transfers are read from stdin while running, one JSON object per line:");
    println!("  {{\"source_account\":\"alice@d3\",\"destination_account\":\"btc_withdrawal_service@notary\",");
    println!("   \"amount\":\"40000\",\"description\":\"tb1q...\",\"created_time\":1700000000000}}");
    println!();
    println!("Environment:");
    println!("  BRIDGE_NODE_ID            This validator's ledger identity");
    println!("  BRIDGE_SIGNER_KEY         Hex-encoded secp256k1 key share");
    println!("  BRIDGE_VALIDATOR_PUBKEYS  Comma-separated validator public keys");
    println!("  BRIDGE_NETWORK            mainnet, testnet, signet or regtest");
    println!("  BRIDGE_DB_PATH            Shared SQLite ledger (default: data/ledger.db)");
    println!("  BRIDGE_FEE_RATE           Static fee rate in sat/vB (default: Esplora estimates)");
}

fn open_store(config: &BridgeConfig) -> Result<Arc<dyn FactStore>> {
    if config.db_path == ":memory:" {
        return Ok(Arc::new(MemoryFactStore::new()));
    }
    Ok(Arc::new(SqliteFactStore::new(&config.db_path)?))
}

fn multisig(config: &BridgeConfig) -> Result<MultisigWallet> {
    Ok(MultisigWallet::new(
        &config.validator_pubkeys,
        config.multisig_threshold,
        config.network.bitcoin_network(),
    )?)
}

/// Keep `rate` in line with Esplora's estimate
async fn refresh_fee_rate(client: EsploraClient, rate: CurrentFeeRate, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        match client.get_fee_estimates().await {
            Ok(estimates) => match pick_fee_rate(&estimates, FEE_TARGET_BLOCKS) {
                Some(r) => rate.set(r),
                None => warn!("Esplora returned no usable fee estimate"),
            },
            Err(e) => warn!(error = %e, "Fee estimate refresh failed"),
        }
    }
}

/// Submit every transfer read from stdin
async fn read_transfers(node: Arc<BridgeNode>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => return,
            Err(e) => {
                error!(error = %e, "Could not read stdin");
                return;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<TransferCommand>(&line) {
            Ok(transfer) => match node.submit_transfer(&transfer).await {
                Ok(id) => info!(withdrawal_id = %id, "Transfer submitted"),
                Err(e) => error!(error = %e, "Could not submit transfer"),
            },
            Err(e) => warn!(error = %e, "Ignoring malformed transfer line"),
        }
    }
}

async fn cmd_run(args: &[String]) -> Result<()> {
    let replay = args.iter().any(|a| a == "--replay");

    let config = BridgeConfig::from_env()?;
    if let Err(e) = init_from_config(&config) {
        eprintln!("Warning: {}", e);
    }
    config.print_summary();

    let ledger = Ledger::tailing(open_store(&config)?);
    let client = EsploraClient::new(&config.esplora_url);
    let address = multisig(&config)?.address().to_string();

    let fee_rate: SharedFeeRate = match config.fee_rate {
        Some(rate) => Arc::new(StaticFeeRate(rate)),
        None => {
            let rate = CurrentFeeRate::new();
            tokio::spawn(refresh_fee_rate(
                client.clone(),
                rate.clone(),
                Duration::from_secs(config.fee_refresh_secs),
            ));
            Arc::new(rate)
        }
    };

    let node = Arc::new(BridgeNode::new(
        &config,
        ledger.clone(),
        Arc::new(EsploraWallet::new(client.clone(), address.clone())),
        Arc::new(EsploraNetwork::new(client)),
        fee_rate,
    )?);

    let router = node.start();
    let cursor = if replay { 0 } else { ledger.head().await? };
    let tail = tokio::spawn(async move { ledger.tail(cursor, TAIL_INTERVAL).await });
    tokio::spawn(read_transfers(node.clone()));

    println!();
    println!("Bridge address: {}", address);
    println!("Following the ledger from seq {}", cursor);
    println!("Press Ctrl+C to stop");
    println!();

    let mut stats = tokio::time::interval(STATS_INTERVAL);
    stats.tick().await;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = stats.tick() => info!(target: "bridge::system", "{}", node.stats()),
        }
    }

    info!(target: "bridge::system", "{}", node.stats());
    tail.abort();
    router.abort();
    Ok(())
}

async fn cmd_status(args: &[String]) -> Result<()> {
    let Some(id) = args.first() else {
        println!("Usage: btc-withdrawal status <withdrawal_id>");
        return Ok(());
    };

    let config = BridgeConfig::from_env()?;
    let ledger = Ledger::tailing(open_store(&config)?);
    let tracker = WithdrawalTracker::new(ledger, config.consensus_quorum, config.validator_pubkeys.len());

    println!("{}", tracker.report(&WithdrawalId::new(id.as_str())).await?);
    Ok(())
}

fn cmd_address() -> Result<()> {
    let config = BridgeConfig::from_env()?;
    let wallet = multisig(&config)?;

    println!("=== Bridge Multisig ===");
    println!("Network: {:?}", config.network);
    println!("Policy: {}-of-{}", wallet.threshold(), wallet.pubkeys().len());
    println!("Address: {}", wallet.address());
    println!("Witness Script: {}", hex::encode(wallet.witness_script().as_bytes()));
    Ok(())
}

fn cmd_keygen() {
    let signer = MultisigSigner::generate();

    println!("=== New Multisig Key Share ===");
    println!();
    println!("Secret Key (keep secure!):");
    println!("  {}", signer.secret_hex());
    println!();
    println!("Public Key (add to BRIDGE_VALIDATOR_PUBKEYS on every node):");
    println!("  {}", signer.public_key_hex());
    println!();
    println!("Set environment variable:");
    println!("  export BRIDGE_SIGNER_KEY={}", signer.secret_hex());
}
