//! Monitor daemon: hosts the cluster-map registry.

use anyhow::{Context, Result};
use clap::Parser;
use monitor::Monitor;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Config file search locations, in precedence order.
const CONFIG_PATHS: &[&str] = &[
    "/etc/driftkv/driftkv.json",
    "driftkv.json",
    "etc/driftkv/driftkv.json",
];

#[derive(Debug, Deserialize)]
#[serde(default)]
struct MonitorConfig {
    monitor_address: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            monitor_address: "127.0.0.1:9100".into(),
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "monitor", about = "DriftKV cluster-map monitor")]
struct Cli {
    /// Configuration file; the default locations are searched when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen address, overriding the config file.
    #[arg(long)]
    listen: Option<String>,

    /// Log filter (tracing env-filter syntax).
    #[arg(long, default_value = "info")]
    log: String,
}

fn load_config(explicit: Option<&Path>) -> Result<MonitorConfig> {
    let path = explicit
        .map(Path::to_path_buf)
        .or_else(|| CONFIG_PATHS.iter().map(PathBuf::from).find(|p| p.is_file()));
    match path {
        Some(p) => {
            let raw = std::fs::read_to_string(&p)
                .with_context(|| format!("reading config {}", p.display()))?;
            serde_json::from_str(&raw).with_context(|| format!("parsing config {}", p.display()))
        }
        None => Ok(MonitorConfig::default()),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cli.log))
        .init();

    let cfg = load_config(cli.config.as_deref())?;
    let listen = cli.listen.unwrap_or(cfg.monitor_address);

    let mon = Monitor::bind(&listen)?;
    mon.run();
    Ok(())
}
