//! KRDO Simulation Harness - scripted scenario runner
//!
//! This CLI tool drives the cluster simulation through predefined
//! scenarios without the interactive console:
//! - `list` - Show available scenarios
//! - `run` - Run one scenario and optionally write a JSON report
//! - `suite` - Run all scenarios and write JSON plus JUnit XML reports

mod scenarios;

use clap::{Parser, Subcommand};
use krdo_core::ClusterConfig;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "krdo-sim")]
#[command(about = "Scenario harness for the KRDO cluster simulation")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List available scenarios
    List,

    /// Run one scenario
    Run {
        /// Scenario to run
        #[arg(short, long)]
        scenario: String,

        /// Path to write the JSON report
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Clock tick interval in milliseconds
        #[arg(long, default_value = "20")]
        tick_ms: u64,

        /// Sync timeout in milliseconds
        #[arg(long, default_value = "300")]
        timeout_ms: u64,

        /// Per-tick drift bound
        #[arg(long, default_value = "0.05")]
        drift: f64,
    },

    /// Run the full scenario suite
    Suite {
        /// Output directory for reports
        #[arg(short, long, default_value = "./krdo-results")]
        output_dir: PathBuf,

        /// Clock tick interval in milliseconds
        #[arg(long, default_value = "20")]
        tick_ms: u64,

        /// Sync timeout in milliseconds
        #[arg(long, default_value = "300")]
        timeout_ms: u64,

        /// Per-tick drift bound
        #[arg(long, default_value = "0.05")]
        drift: f64,
    },
}

fn cluster_config(tick_ms: u64, timeout_ms: u64, drift: f64) -> ClusterConfig {
    ClusterConfig {
        tick_interval: Duration::from_millis(tick_ms),
        sync_timeout: Duration::from_millis(timeout_ms),
        drift_rate: drift,
        ..ClusterConfig::accelerated()
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    fmt().with_env_filter(filter).with_target(false).init();

    match cli.command {
        Commands::List => {
            println!("Available scenarios:");
            for name in scenarios::list_scenarios() {
                let config = scenarios::get_scenario(name)?;
                println!("  {:22} {}", config.name, config.description);
            }
        }

        Commands::Run {
            scenario,
            output,
            tick_ms,
            timeout_ms,
            drift,
        } => {
            info!("Running scenario: {}", scenario);

            let config = scenarios::get_scenario(&scenario)?;
            let report =
                scenarios::run_scenario(&config, cluster_config(tick_ms, timeout_ms, drift))
                    .await?;

            println!("\nScenario: {}", report.name);
            println!("  Passed: {}", report.passed);
            println!("  Detail: {}", report.detail);
            println!("  Duration: {} ms", report.duration_ms);

            if let Some(ref output) = output {
                std::fs::write(output, serde_json::to_string_pretty(&report)?)?;
                info!("Report written to: {}", output.display());
            }

            if !report.passed {
                std::process::exit(1);
            }
        }

        Commands::Suite {
            output_dir,
            tick_ms,
            timeout_ms,
            drift,
        } => {
            info!("Running full scenario suite");

            let results =
                scenarios::run_suite(&output_dir, cluster_config(tick_ms, timeout_ms, drift))
                    .await?;

            println!("\nSuite Results:");
            println!("  Total: {}", results.total);
            println!("  Passed: {}", results.passed);
            println!("  Failed: {}", results.failed);

            let suite_path = output_dir.join("suite.json");
            std::fs::write(&suite_path, serde_json::to_string_pretty(&results)?)?;
            info!("Suite summary written to: {}", suite_path.display());

            let junit_path = output_dir.join("junit.xml");
            std::fs::write(&junit_path, results.to_junit_xml())?;
            info!("JUnit XML written to: {}", junit_path.display());

            if results.failed > 0 {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
