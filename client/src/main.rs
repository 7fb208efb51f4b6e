use std::path::PathBuf;

use cfg_if::cfg_if;
use clap::{Parser, Subcommand};
use shared::types::MinerKey;
use tokio::{signal, sync::broadcast};
use tracing::*;

use crate::{
    config::{load_config_file, MinerConfig},
    hasher::Drillx,
    restful::PoolApi,
    session::{Session, SessionConfig},
    thread::CoreThread,
};

mod config;
mod hasher;
mod partition;
mod restful;
mod session;
mod stats;
mod stream;
mod thread;

cfg_if! {
    if #[cfg(feature = "build-version")] {
        include!(concat!(env!("OUT_DIR"), "/version.rs"));
    } else {
        pub const VERSION: &str = "unknown";
        pub const BUILD_TARGET: &str = "unknown";
    }
}

#[derive(Parser, Debug)]
#[command(about, version)]
struct Args {
    #[arg(
        long,
        value_name = "SERVER_URL",
        help = "Pool server url, e.g. https://pool.example.com",
        global = true
    )]
    server: Option<String>,

    #[arg(
        long,
        value_name = "SOLANA_PUBKEY",
        help = "The solana wallet pubkey address for receive rewards",
        global = true
    )]
    wallet: Option<String>,

    #[arg(long, value_name = "CONFIG_FILE", help = "Load settings from a json file", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(about = "Mine with the local cpu (default)")]
    Mine {
        #[arg(long, value_name = "CORES_COUNT", help = "The number of CPU cores to allocate to mining")]
        cores: Option<usize>,

        #[arg(long, value_name = "RECONNECT", help = "The number of reconnect times")]
        reconnect: Option<u32>,
    },
    #[command(about = "Show the wallet's claimable pool balance")]
    Balance,
    #[command(about = "Show the wallet's rewards earned in the pool")]
    Rewards,
    #[command(about = "Show how many miners the pool sees")]
    Pool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    shared::log::init_log("pool_miner=debug");

    info!("VERSION: {VERSION}, TARGET: {BUILD_TARGET}");

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config_file(path)?,
        None => MinerConfig::default(),
    };
    if args.server.is_some() {
        config.server = args.server;
    }
    if args.wallet.is_some() {
        config.wallet = args.wallet;
    }

    let Some(server) = config.server.clone() else {
        anyhow::bail!("pool server url is required (--server or config file)");
    };
    let api = PoolApi::new(&server)?;

    match args.command.unwrap_or(Commands::Mine { cores: None, reconnect: None }) {
        Commands::Mine { cores, reconnect } => {
            if cores.is_some() {
                config.cores = cores;
            }
            if let Some(reconnect) = reconnect {
                config.reconnect = reconnect;
            }
            let pubkey = config.pubkey()?;
            mine(config, api, pubkey).await
        }
        Commands::Balance => {
            let balance = api.miner_balance(&config.pubkey()?).await?;
            info!("balance: {balance} ORE");
            Ok(())
        }
        Commands::Rewards => {
            let rewards = api.miner_rewards(&config.pubkey()?).await?;
            info!("rewards: {rewards} ORE");
            Ok(())
        }
        Commands::Pool => {
            let miners = api.active_miners().await?;
            info!("active miners: {miners}");
            Ok(())
        }
    }
}

async fn mine(config: MinerConfig, api: PoolApi, pubkey: MinerKey) -> anyhow::Result<()> {
    let cores = config.cores.unwrap_or_else(num_cpus::get).max(1);

    info!("Client Starting... Threads: {cores}, Pubkey: {pubkey}");

    let (mut session, mut updates) = Session::new(
        SessionConfig { pubkey, cores, grace: config.grace(), backoff: config.backoff() },
        CoreThread::<Drillx>::new(cores),
    );

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("ctrl+c received. stop mining");
                shutdown_tx.send(()).ok();
            }
            Err(err) => {
                error!("failed to listen for Ctrl+C: {err}");
                // keep the sender alive so mining continues
                std::future::pending::<()>().await;
                drop(shutdown_tx);
            }
        }
    });

    let outcome =
        stream::run(&mut session, &mut updates, &api, config.report_interval(), shutdown_rx).await;

    debug_assert!(!session.is_active());
    if let Some(result) = session.last_submission() {
        info!("last pool difficulty: {}, active miners: {}", result.difficulty, result.active_miners);
    }
    info!("{}", session.stats());
    outcome
}
