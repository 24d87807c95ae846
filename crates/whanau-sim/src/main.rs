//! whanau-sim - run a Whanau DHT network in one process

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use whanau_sim::{Config, SimReport};

#[derive(Parser)]
#[command(name = "whanau-sim")]
#[command(about = "Simulate a Sybil-resistant Whanau DHT", long_about = None)]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a network, run setup and look every key up
    Run {
        /// Number of nodes (overrides config)
        #[arg(short, long)]
        nodes: Option<usize>,

        /// Records per node (overrides config)
        #[arg(short, long)]
        keys_per_node: Option<usize>,

        /// RNG seed (overrides config)
        #[arg(short, long)]
        seed: Option<u64>,

        /// Nodes to take down before setup (overrides config)
        #[arg(short, long)]
        fail: Vec<usize>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the parameters derived for a network
    Params {
        /// Number of nodes (overrides config)
        #[arg(short, long)]
        nodes: Option<usize>,

        /// Records per node (overrides config)
        #[arg(short, long)]
        keys_per_node: Option<usize>,
    },

    /// Print a default config file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    match cli.command {
        Commands::Run { nodes, keys_per_node, seed, fail, json } => {
            override_network(&mut config, nodes, keys_per_node);
            if seed.is_some() {
                config.network.seed = seed;
            }
            if !fail.is_empty() {
                config.network.failed_nodes = fail;
            }
            let report = whanau_sim::run(&config).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
        }
        Commands::Params { nodes, keys_per_node } => {
            override_network(&mut config, nodes, keys_per_node);
            config.validate()?;
            println!("{}", toml::to_string_pretty(&config.whanau_config())?);
        }
        Commands::Init => {
            print!("{}", toml::to_string_pretty(&Config::default())?);
        }
    }

    Ok(())
}

fn override_network(config: &mut Config, nodes: Option<usize>, keys_per_node: Option<usize>) {
    if let Some(nodes) = nodes {
        config.network.nodes = nodes;
    }
    if let Some(keys) = keys_per_node {
        config.network.keys_per_node = keys;
    }
}

fn print_report(report: &SimReport) {
    let p = &report.params;
    println!("Network: {} nodes, {} records", report.nodes, report.records);
    if !report.failed_nodes.is_empty() {
        println!("Failed nodes: {:?}", report.failed_nodes);
    }
    println!(
        "Params: nlayers={} rf={} w={} rd={} rs={} t={}",
        p.nlayers, p.rf, p.w, p.rd, p.rs, p.t
    );
    println!("Setup: {} ms", report.setup_millis);

    let dropped: u64 = report.setups.iter().map(|s| s.dropped_samples).sum();
    let fingers: usize = report.setups.iter().map(|s| s.fingers.iter().sum::<usize>()).sum();
    let successors: usize = report.setups.iter().map(|s| s.successors.iter().sum::<usize>()).sum();
    println!(
        "  {} fingers, {} successor entries, {} dropped samples",
        fingers, successors, dropped
    );
    println!();

    println!(
        "db coverage:        {}/{} ({:.1}%)",
        report.db_coverage.covered,
        report.db_coverage.total,
        report.db_coverage.fraction() * 100.0
    );
    println!(
        "successor coverage: {}/{} ({:.1}%)",
        report.successor_coverage.covered,
        report.successor_coverage.total,
        report.successor_coverage.fraction() * 100.0
    );

    let l = &report.lookups;
    println!(
        "lookups:            {}/{} ({:.1}%), {} not found, {} unreachable, {} wrong",
        l.found,
        l.total,
        l.success_rate() * 100.0,
        l.not_found,
        l.unreachable,
        l.wrong
    );
    println!("RPC calls: {} ({} failed)", report.calls, report.failed_calls);
}
