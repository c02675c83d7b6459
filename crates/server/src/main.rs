//! Storage-server daemon: maps the region, registers with the monitor, and
//! services sessions until interrupted.

use anyhow::{Context, Result};
use clap::Parser;
use server::{Server, ServerConfig};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Config file search locations, in precedence order. The file may carry
/// monitor and client keys too; only the server keys are read here.
const CONFIG_PATHS: &[&str] = &[
    "/etc/driftkv/driftkv.json",
    "driftkv.json",
    "etc/driftkv/driftkv.json",
];

#[derive(Parser, Debug)]
#[command(name = "server", about = "DriftKV storage server")]
struct Cli {
    /// Configuration file; the default locations are searched when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Control endpoint, overriding the config file.
    #[arg(long)]
    listen: Option<String>,

    /// Monitor endpoint, overriding the config file.
    #[arg(long)]
    monitor: Option<String>,

    /// Region backing file (fsdax or plain file), overriding the config.
    #[arg(long)]
    region: Option<String>,

    /// Region capacity in slots, overriding the config file.
    #[arg(long)]
    slots: Option<u64>,

    /// Server id to register under (0 = let the monitor assign).
    #[arg(long)]
    id: Option<u32>,

    /// Wipe the region before serving.
    #[arg(long)]
    format: bool,

    /// Log filter (tracing env-filter syntax).
    #[arg(long, default_value = "info")]
    log: String,
}

fn load_config(explicit: Option<&Path>) -> Result<ServerConfig> {
    let path = explicit
        .map(Path::to_path_buf)
        .or_else(|| CONFIG_PATHS.iter().map(PathBuf::from).find(|p| p.is_file()));
    match path {
        Some(p) => {
            let raw = std::fs::read_to_string(&p)
                .with_context(|| format!("reading config {}", p.display()))?;
            serde_json::from_str(&raw).with_context(|| format!("parsing config {}", p.display()))
        }
        None => Ok(ServerConfig::default()),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cli.log))
        .init();

    let mut cfg = load_config(cli.config.as_deref())?;
    if let Some(listen) = cli.listen {
        cfg.listen_addr = listen;
    }
    if let Some(monitor) = cli.monitor {
        cfg.monitor_address = monitor;
    }
    if let Some(region) = cli.region {
        cfg.region_path = region;
    }
    if let Some(slots) = cli.slots {
        cfg.region_slots = slots;
    }
    if let Some(id) = cli.id {
        cfg.id = id;
    }

    let server = Server::create(&cfg, cli.format)?;
    server.run();
    Ok(())
}
