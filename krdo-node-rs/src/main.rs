//! KRDO Node Simulator - Rust Implementation
//!
//! Interactive simulator: an in-process cluster of peer nodes running
//! bully election and coordinator-pull clock sync, driven from stdin.

mod console;

use clap::Parser;
use console::{execute, parse, print_help, Command};
use krdo_core::{Cluster, ClusterConfig};
use std::io::{self, BufRead};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// KRDO cluster simulator
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of nodes to start immediately
    #[arg(short, long, default_value = "0")]
    nodes: u32,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Setup logging
    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("KRDO simulator starting (rust)");

    let cluster = Cluster::new(ClusterConfig::default());
    for _ in 0..args.nodes {
        let id = cluster.create_node().await;
        println!("Node {} started...", id);
    }

    // Spawn stdin handler for console commands
    let (command_tx, mut command_rx) = tokio::sync::mpsc::channel::<Command>(16);

    std::thread::spawn(move || {
        print_help();

        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            if let Ok(line) = line {
                if line.trim().is_empty() {
                    continue;
                }
                match parse(&line) {
                    Ok(command) => {
                        if command_tx.blocking_send(command).is_err() {
                            break;
                        }
                    }
                    Err(e) => println!("{}", e),
                }
            }
        }
    });

    // Main command loop
    while let Some(command) = command_rx.recv().await {
        if !execute(&cluster, command).await {
            break;
        }
    }

    Ok(())
}
