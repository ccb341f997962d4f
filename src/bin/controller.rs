//! `kfuzzd`: the fuzzing controller binary. Parses config, wires the
//! engine core to its RPC transport and VM pool, and serves executors
//! until the process is killed.

mod config;

use std::fs;
use std::net::TcpListener;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use config::{Cli, Config, FileConfig};
use fuzzer_core::{Fuzzer, FuzzerConfig, Retryer, RetryerConfig};
use fuzzer_vm::{Dispatcher, VmPool};

/// How often the background thread rewrites the persistent corpus
/// database (§6).
const CORPUS_SAVE_INTERVAL: Duration = Duration::from_secs(30);

fn main() -> Result<()> {
    let cli = Cli::parse();

    let file_config = match &cli.config {
        Some(path) => {
            let text = fs::read_to_string(path).with_context(|| format!("reading config file {}", path.display()))?;
            toml::from_str(&text).with_context(|| format!("parsing config file {}", path.display()))?
        }
        None => FileConfig::default(),
    };
    let config = Config::resolve(file_config, &cli);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!(
        vm_pool_size = config.vm_pool_size,
        rpc_listen_addr = %config.rpc_listen_addr,
        corpus_db_path = %config.corpus_db_path.display(),
        "starting controller"
    );

    let (candidates_tx, candidates_rx) = crossbeam_channel::unbounded();
    let fuzzer_config = FuzzerConfig {
        full_smash_n: config.full_smash_n,
        short_smash_n: config.short_smash_n,
        minimize_runs: config.minimize_runs,
        deflake_runs: config.deflake_runs,
        ..Default::default()
    };
    let fuzzer = Arc::new(Fuzzer::new(fuzzer_config, candidates_rx));

    let (loaded, dropped) = fuzzer_core::corpus::db::load_records(&config.corpus_db_path)
        .with_context(|| format!("loading persistent corpus database at {}", config.corpus_db_path.display()))?;
    if dropped > 0 {
        warn!(dropped, path = %config.corpus_db_path.display(), "dropped malformed corpus database records");
    }
    info!(loaded = loaded.len(), path = %config.corpus_db_path.display(), "loaded persistent corpus database");
    for record in loaded {
        // Re-triaged through the candidate pipeline rather than inserted
        // directly, same as any other external feed (§6).
        let _ = candidates_tx.send(record.program);
    }

    let retryer_config =
        RetryerConfig { budget_normal: config.risky_budget_normal, budget_may_risk: config.risky_budget_may_risk };
    let retryer = Arc::new(Retryer::new(Arc::clone(&fuzzer), retryer_config));
    let dispatcher = Arc::new(Dispatcher::new(retryer));
    let pool = Arc::new(VmPool::new(config.vm_pool_size));

    {
        let fuzzer = Arc::clone(&fuzzer);
        let corpus_db_path = config.corpus_db_path.clone();
        thread::Builder::new()
            .name("corpus-db-writer".to_string())
            .spawn(move || loop {
                thread::sleep(CORPUS_SAVE_INTERVAL);
                if let Err(e) = fuzzer.corpus.save_to_disk(&corpus_db_path) {
                    error!(error = %e, path = %corpus_db_path.display(), "failed to save persistent corpus database");
                }
            })
            .expect("spawn corpus-db-writer thread");
    }

    let listener = TcpListener::bind(&config.rpc_listen_addr)
        .with_context(|| format!("binding RPC listener on {}", config.rpc_listen_addr))?;
    info!(addr = %config.rpc_listen_addr, "listening for executors");

    fuzzer_rpc::serve(listener, move |conn| {
        let dispatcher = Arc::clone(&dispatcher);
        let pool = Arc::clone(&pool);
        let slot = pool.acquire();
        let name = conn.name.clone();
        match dispatcher.run_session(conn, &pool, &slot) {
            Ok(outcome) => {
                if outcome.crashed {
                    error!(vm = %outcome.name, last_request_ids = ?outcome.last_request_ids, "executor session ended in a crash");
                } else {
                    info!(vm = %outcome.name, "executor session ended cleanly");
                }
            }
            Err(e) => error!(vm = %name, error = %e, "executor session failed"),
        }
        pool.release(slot);
    })
    .context("RPC accept loop exited")?;

    Ok(())
}
