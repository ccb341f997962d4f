//! Layered configuration (§2.1): a `serde`/`toml` file overridable by
//! `clap`-derived CLI flags, the same two-layer shape `healer` and
//! `cargo-libafl` expose their fuzzing parameters through.

use std::path::PathBuf;

use clap::Parser;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct FileConfig {
    pub vm_pool_size: Option<usize>,
    pub risky_budget_normal: Option<f64>,
    pub risky_budget_may_risk: Option<f64>,
    pub corpus_db_path: Option<PathBuf>,
    pub rpc_listen_addr: Option<String>,
    pub deflake_runs: Option<usize>,
    pub minimize_runs: Option<usize>,
    pub full_smash_n: Option<usize>,
    pub short_smash_n: Option<usize>,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            vm_pool_size: None,
            risky_budget_normal: None,
            risky_budget_may_risk: None,
            corpus_db_path: None,
            rpc_listen_addr: None,
            deflake_runs: None,
            minimize_runs: None,
            full_smash_n: None,
            short_smash_n: None,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "kfuzzd", about = "Coverage-guided kernel fuzzing controller")]
pub struct Cli {
    /// Path to a TOML config file; fields present here override it.
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub vm_pool_size: Option<usize>,

    #[arg(long)]
    pub risky_budget_normal: Option<f64>,

    #[arg(long)]
    pub risky_budget_may_risk: Option<f64>,

    #[arg(long)]
    pub corpus_db_path: Option<PathBuf>,

    #[arg(long)]
    pub rpc_listen_addr: Option<String>,

    #[arg(long)]
    pub deflake_runs: Option<usize>,

    #[arg(long)]
    pub minimize_runs: Option<usize>,

    #[arg(long)]
    pub full_smash_n: Option<usize>,

    #[arg(long)]
    pub short_smash_n: Option<usize>,
}

/// The fully-resolved engine configuration, every field defaulted (§2.1:
/// "VM pool size, risky-program budget, corpus DB path, RPC listen
/// address, deflake/minimize run counts, choice table regeneration
/// steps").
#[derive(Debug, Clone)]
pub struct Config {
    pub vm_pool_size: usize,
    pub risky_budget_normal: f64,
    pub risky_budget_may_risk: f64,
    pub corpus_db_path: PathBuf,
    pub rpc_listen_addr: String,
    pub deflake_runs: usize,
    pub minimize_runs: usize,
    pub full_smash_n: usize,
    pub short_smash_n: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            vm_pool_size: 4,
            risky_budget_normal: 0.001,
            risky_budget_may_risk: 0.01,
            corpus_db_path: PathBuf::from("corpus.db"),
            rpc_listen_addr: "0.0.0.0:17743".to_string(),
            deflake_runs: 3,
            minimize_runs: 3,
            full_smash_n: 100,
            short_smash_n: 10,
        }
    }
}

impl Config {
    /// File config layered under defaults, then CLI flags layered over
    /// both — a flag set on the command line always wins.
    pub fn resolve(file: FileConfig, cli: &Cli) -> Self {
        let mut cfg = Self::default();
        if let Some(v) = file.vm_pool_size {
            cfg.vm_pool_size = v;
        }
        if let Some(v) = file.risky_budget_normal {
            cfg.risky_budget_normal = v;
        }
        if let Some(v) = file.risky_budget_may_risk {
            cfg.risky_budget_may_risk = v;
        }
        if let Some(v) = file.corpus_db_path {
            cfg.corpus_db_path = v;
        }
        if let Some(v) = file.rpc_listen_addr {
            cfg.rpc_listen_addr = v;
        }
        if let Some(v) = file.deflake_runs {
            cfg.deflake_runs = v;
        }
        if let Some(v) = file.minimize_runs {
            cfg.minimize_runs = v;
        }
        if let Some(v) = file.full_smash_n {
            cfg.full_smash_n = v;
        }
        if let Some(v) = file.short_smash_n {
            cfg.short_smash_n = v;
        }

        if let Some(v) = cli.vm_pool_size {
            cfg.vm_pool_size = v;
        }
        if let Some(v) = cli.risky_budget_normal {
            cfg.risky_budget_normal = v;
        }
        if let Some(v) = cli.risky_budget_may_risk {
            cfg.risky_budget_may_risk = v;
        }
        if let Some(v) = cli.corpus_db_path.clone() {
            cfg.corpus_db_path = v;
        }
        if let Some(v) = cli.rpc_listen_addr.clone() {
            cfg.rpc_listen_addr = v;
        }
        if let Some(v) = cli.deflake_runs {
            cfg.deflake_runs = v;
        }
        if let Some(v) = cli.minimize_runs {
            cfg.minimize_runs = v;
        }
        if let Some(v) = cli.full_smash_n {
            cfg.full_smash_n = v;
        }
        if let Some(v) = cli.short_smash_n {
            cfg.short_smash_n = v;
        }
        cfg
    }
}
