//! CLI definitions for the crash-consistency exploration engine.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[clap(
    name = "crashcut",
    version,
    about = "Crash-consistency exploration engine for clustered file systems",
    long_about = None
)]
pub struct Cli {
    /// Path to the cluster config file
    #[clap(long, short, default_value = "crashcut.conf")]
    pub config: PathBuf,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Resolve and print the configured cluster (services, pids, type)
    Config,

    /// Run init + workload against the live cluster, then ingest the
    /// resulting traces and take a snapshot
    Record {
        /// Directory to write traces, snapshots, and the ingested dump to
        #[clap(long)]
        out: Option<PathBuf>,
    },

    /// Run the full exploration pipeline against already-recorded traces
    /// and snapshots
    Check {
        /// Directory containing per-server/per-rank trace files
        #[clap(long)]
        traces: PathBuf,

        /// Optional HDF5 object-scan JSON index
        #[clap(long)]
        objmap: Option<PathBuf>,

        /// Maximum reorder size per cut (1 or 2)
        #[clap(long, default_value = "2")]
        max_reorder: usize,

        /// Skip the TSP tour and replay states in enumeration order
        #[clap(long)]
        no_tour: bool,
    },

    /// Restore the most recent snapshot, optionally legal-replaying every
    /// workload prefix as a validation pass
    Restore {
        /// Exhaustively replay every legal prefix of the recorded workload
        #[clap(long)]
        legal_replay: bool,
    },

    /// Print an example cluster config to stdout
    Init,
}
