use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

/// CLI configuration parsed from command line arguments and environment variables
#[derive(Parser, Debug)]
#[command(name = "geoharvest")]
#[command(
    author,
    version,
    about = "Unattended harvester for OGC CSW metadata catalogs"
)]
#[command(after_help = "Examples:
  geoharvest harvest                  # Harvest all enabled nodes once
  geoharvest harvest --node geocat    # Harvest one node by id or name
  geoharvest watch                    # Harvest each node on its every_minutes schedule
  geoharvest nodes                    # Show configured nodes and their last run
  geoharvest validate --probe         # Check harvesters.toml and contact each endpoint

Nodes are read from ~/.config/geoharvest/harvesters.toml unless --config is given.")]
pub struct Config {
    /// PostgreSQL database connection URL
    #[arg(long, env = "DATABASE_URL", global = true)]
    pub database_url: Option<String>,

    /// Increase log verbosity (-v debug, -vv trace). RUST_LOG takes precedence.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Custom path to harvesters.toml configuration file
    #[arg(short, long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one harvest of the configured nodes and exit
    #[command(after_help = "Examples:
  geoharvest harvest
  geoharvest harvest --node geocat --page-size 100
  geoharvest harvest --keep-unseen    # Do not remove records missing from the remote")]
    Harvest {
        /// Harvest a single node by id or name
        #[arg(short, long, value_name = "NODE")]
        node: Option<String>,

        /// Records requested per GetRecords page
        #[arg(long, value_name = "N")]
        page_size: Option<u32>,

        /// Skip removal of local records no longer offered by the remote
        #[arg(long)]
        keep_unseen: bool,
    },
    /// Run scheduled harvests until interrupted
    Watch {
        /// Records requested per GetRecords page
        #[arg(long, value_name = "N")]
        page_size: Option<u32>,
    },
    /// List configured nodes with their last harvest result
    Nodes,
    /// Validate the node configuration without harvesting
    Validate {
        /// Also fetch capabilities from every endpoint
        #[arg(long)]
        probe: bool,
    },
}

impl Config {
    /// Log filter directive derived from `--verbose`.
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}
