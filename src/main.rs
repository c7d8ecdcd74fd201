//! crashcut — crash-consistency exploration engine for clustered file
//! systems. Run `crashcut --help` for usage.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod check;
mod cli;
mod color;
mod config;
mod config_cmd;
mod discover;
mod record;
mod report;
mod restore;

use cli::{Cli, Commands};

const EXAMPLE_CONFIG: &str = r#"[global]
services = meta0, storage0, storage1
mount_point = /mnt/pfs
client_name = client
type = beegfs
stripe_size = 131072
parallel = 4
init = ./scripts/init.sh
workload = ./scripts/workload
checker = ./scripts/checker.sh
timeout = 30
trace_dir = traces
result_dir = results
snapshot_dir = snapshots

[meta0]
type = metadata
exec = beegfs-meta
tag = meta0
host = 10.0.0.1
data_path = /data/meta0
data_dirs = meta

[storage0]
type = storage
exec = beegfs-storage
tag = storage0
host = 10.0.0.2
data_path = /data/storage0
data_dirs = chunks

[storage1]
type = storage
exec = beegfs-storage
tag = storage1
host = 10.0.0.3
data_path = /data/storage1
data_dirs = chunks
"#;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("warn".parse()?))
        .init();

    let cli = Cli::parse();

    if matches!(cli.command, Commands::Init) {
        print!("{EXAMPLE_CONFIG}");
        return Ok(());
    }

    if !cli.config.exists() {
        anyhow::bail!(
            "config file '{}' not found — run `crashcut init > {}` to generate an example",
            cli.config.display(),
            cli.config.display()
        );
    }
    let config = config::ClusterConfig::load(&cli.config)?;

    match cli.command {
        Commands::Init => unreachable!("handled above"),
        Commands::Config => config_cmd::run(&config)?,
        Commands::Record { out } => record::run(&config, out)?,
        Commands::Check { traces, objmap, max_reorder, no_tour } => {
            check::run(&config, &traces, objmap, max_reorder, no_tour)?
        }
        Commands::Restore { legal_replay } => restore::run(&config, legal_replay)?,
    }

    Ok(())
}
