use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to TOML configuration file.
    #[arg(short, long, default_value = "ampchar.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Characterize one design point and assemble the report.
    Evaluate {
        /// Re-read the previous run's artifacts instead of simulating.
        #[arg(long)]
        no_simulate: bool,

        /// Parameter overrides, e.g. ".param Ibmain=572.25u Cin=32.18p".
        #[arg(short, long)]
        params: Option<String>,

        /// Skip the report and only print the metrics.
        #[arg(long)]
        no_report: bool,
    },

    /// Search the design space, then characterize the best point.
    Optimize {
        /// Continue from the checkpoint file.
        #[arg(long)]
        resume: bool,

        /// Override the number of evaluations.
        #[arg(long)]
        n_calls: Option<usize>,
    },
}
