//! Command log simulation
//!
//! Runs several in-process servers over one in-memory command log and
//! checks that they converge.

use clap::{Parser, Subcommand};

use cmdlog_logging::{CmdlogSubscriberBuilder, LogConfig};
use cmdlog_simulation::scenarios;

#[derive(Parser)]
#[command(
    name = "cmdlog-simulation",
    about = "Servers replaying and tailing a shared command log",
    version
)]
struct Cli {
    /// Enable verbose, human-readable logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit commands round-robin from every node and check agreement
    Converge {
        /// Number of nodes
        #[arg(short, long, default_value = "3")]
        nodes: usize,

        /// Number of commands to submit
        #[arg(short, long, default_value = "100")]
        commands: u64,
    },

    /// Restart a node halfway through and check it rebuilds its state
    Restart {
        /// Number of nodes
        #[arg(short, long, default_value = "3")]
        nodes: usize,

        /// Number of commands to submit
        #[arg(short, long, default_value = "100")]
        commands: u64,
    },

    /// Interrupt a send stuck waiting for its acknowledgment
    Interrupt {
        /// Number of nodes
        #[arg(short, long, default_value = "2")]
        nodes: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = if cli.verbose {
        LogConfig::development()
    } else {
        LogConfig::from_env()
    };
    let _guard = CmdlogSubscriberBuilder::new().with_config(config).init();

    let report = match cli.command {
        Commands::Converge { nodes, commands } => scenarios::run_converge(nodes, commands).await?,
        Commands::Restart { nodes, commands } => scenarios::run_restart(nodes, commands).await?,
        Commands::Interrupt { nodes } => scenarios::run_interrupt(nodes).await?,
    };
    print!("{report}");

    Ok(())
}
