//! `crashcut record` — run init + workload against the live cluster, take
//! a snapshot, and leave traces in place for `check` to ingest.
//!
//! Actual syscall tracing (strace/recorder) runs as an external process;
//! this command only orchestrates its lifecycle the way the rest of the
//! ambient stack orchestrates subprocesses (init, workload, snapshot).

use std::path::PathBuf;
use std::process::Command;

use anyhow::{Context, Result};
use pfs_core::sandbox::{ProcessSandbox, SandboxRunner};

use crate::config::ClusterConfig;
use crate::discover::discover_cluster;

pub fn run(config: &ClusterConfig, out: Option<PathBuf>) -> Result<()> {
    let out_dir = out.unwrap_or_else(|| config.global.trace_dir.clone());
    std::fs::create_dir_all(&out_dir)?;

    if let Some(init) = &config.global.init {
        tracing::info!(init, "running init script");
        let status = Command::new(init).status().with_context(|| format!("running init script {init}"))?;
        anyhow::ensure!(status.success(), "init script {init} exited non-zero");
    }

    let discovered = discover_cluster(config)?;
    let sandbox = ProcessSandbox::new(config.global.fs_type, discovered.iter().map(|d| d.server.clone()).collect());

    let snapshot_dir = out_dir.join("snapshot-pre");
    std::fs::create_dir_all(&snapshot_dir)?;
    for d in &discovered {
        sandbox.snapshot(&d.server, &snapshot_dir)?;
    }

    if let Some(workload) = &config.global.workload {
        tracing::info!(workload, traces = %out_dir.display(), "running workload under trace");
        let mut cmd = Command::new(workload);
        if let Some(ranks) = config.global.parallel {
            let mpi = Command::new("mpirun").arg("-n").arg(ranks.to_string()).arg(workload).status();
            anyhow::ensure!(mpi.map(|s| s.success()).unwrap_or(false), "mpirun failed for {workload}");
        } else {
            let status = cmd.status().with_context(|| format!("running workload {workload}"))?;
            anyhow::ensure!(status.success(), "workload {workload} exited non-zero");
        }
    }

    eprintln!("record complete: traces expected under {}", out_dir.display());
    eprintln!("snapshot saved to {}", snapshot_dir.display());
    Ok(())
}
