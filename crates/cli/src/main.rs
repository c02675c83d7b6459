//! # CLI — DriftKV interactive shell
//!
//! A REPL over a live cluster. Reads commands from stdin, executes them
//! through a client engine instance, and prints results to stdout. Designed
//! for both interactive poking and scripted testing (pipe commands in).
//!
//! ## Commands
//!
//! ```text
//! PUT key value      Store a value under a key
//! GET key            Look a key up (prints value or "(nil)")
//! MAP                Print the cluster map
//! STATS              Print op counters and cache occupancy
//! EXIT / QUIT        Disconnect cleanly and leave
//! ```
//!
//! ## Example
//!
//! ```text
//! $ cli --monitor 127.0.0.1:9100 --id 1
//! driftkv shell (client 1, 3 server(s))
//! > PUT name Alice
//! OK
//! > GET name
//! Alice
//! > EXIT
//! bye
//! ```

use anyhow::Result;
use clap::Parser;
use engine::{Client, ClientConfig, KvError};
use std::io::{self, BufRead, Write};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "cli", about = "DriftKV interactive shell")]
struct Cli {
    /// Monitor endpoint.
    #[arg(long, default_value = "127.0.0.1:9100")]
    monitor: String,

    /// Globally unique client id.
    #[arg(long, default_value_t = 1)]
    id: u32,

    /// Replication factor.
    #[arg(long, default_value_t = 3)]
    replicas: usize,

    /// Log filter (tracing env-filter syntax).
    #[arg(long, default_value = "warn")]
    log: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cli.log))
        .init();

    let cfg = ClientConfig {
        monitor_address: cli.monitor,
        num_replicas: cli.replicas,
        ..ClientConfig::default()
    };
    let mut client = Client::connect(cli.id, cfg)?;

    println!("driftkv shell (client {})", client.id());
    print!("{}", client.dump_clustermap());
    println!("Commands: PUT key value | GET key | MAP | STATS | EXIT");
    print!("> ");
    io::stdout().flush().ok();

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let mut parts = line.split_whitespace();
        if let Some(cmd) = parts.next() {
            match cmd.to_uppercase().as_str() {
                "PUT" => {
                    if let Some(k) = parts.next() {
                        let v: String = parts.collect::<Vec<&str>>().join(" ");
                        if v.is_empty() {
                            println!("ERR usage: PUT key value");
                        } else {
                            match client.put(k, v.as_bytes()) {
                                Ok(()) => println!("OK"),
                                Err(KvError::NoSpace) => println!("ERR no space for key"),
                                Err(KvError::Busy) => println!("ERR busy, retry"),
                                Err(e) => println!("ERR put failed: {e}"),
                            }
                        }
                    } else {
                        println!("ERR usage: PUT key value");
                    }
                }
                "GET" => {
                    if let Some(k) = parts.next() {
                        match client.get(k) {
                            Ok(Some(v)) => println!("{}", String::from_utf8_lossy(&v)),
                            Ok(None) => println!("(nil)"),
                            Err(KvError::Busy) => println!("ERR busy, retry"),
                            Err(e) => println!("ERR read failed: {e}"),
                        }
                    } else {
                        println!("ERR usage: GET key");
                    }
                }
                "MAP" => print!("{}", client.dump_clustermap()),
                "STATS" => {
                    let s = client.stats();
                    let c = client.cache_stats();
                    println!(
                        "reads={} writes={} cas={} | cached: normal={} abnormal={} collisions={}",
                        s.reads, s.writes, s.cas, c.normal, c.abnormal, c.collisions
                    );
                }
                "EXIT" | "QUIT" => {
                    client.close()?;
                    println!("bye");
                    return Ok(());
                }
                other => println!("ERR unknown command: {other}"),
            }
        }
        print!("> ");
        io::stdout().flush().ok();
    }

    client.close()?;
    Ok(())
}
