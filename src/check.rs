//! `crashcut check` — the full exploration pipeline: ingest, graph,
//! causality, frontier enumeration, dedup/prune/tour, replay.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use pfs_core::call::{CallArena, CallId, CallKind};
use pfs_core::causality::Causality;
use pfs_core::dot::write_dot;
use pfs_core::frontier::{FrontierEnumerator, MpiContext};
use pfs_core::graph::ExecGraph;
use pfs_core::ingest::{correlate_send_recv, ingest_kernel_trace, ingest_recorder_trace};
use pfs_core::layout::OpMapping;
use pfs_core::objmap::ObjMapping;
use pfs_core::reduce::{dedup, greedy_tour, prune, PruneOptions};
use pfs_core::replay::{ReplayConfig, ReplayDriver, Verdict};
use pfs_core::sandbox::{ProcessSandbox, SnapshotBlob};
use pfs_core::server::{ProcessTables, ServerRole};
use pfs_core::workload::{MpiWorkload, Workload};

use crate::config::ClusterConfig;
use crate::discover::discover_cluster;
use crate::report::RunSummary;

pub fn run(
    config: &ClusterConfig,
    traces: &Path,
    objmap_path: Option<PathBuf>,
    max_reorder: usize,
    no_tour: bool,
) -> Result<()> {
    let mut discovered = discover_cluster(config)?;
    let servers: Vec<_> = discovered.iter().map(|d| d.server.clone()).collect();

    let mut arena = CallArena::new();
    let mut all_ids = Vec::new();

    for d in discovered.iter_mut() {
        let trace_path = traces.join(format!("{}.trace", d.server.name));
        if !trace_path.exists() {
            tracing::warn!(server = %d.server.name, path = %trace_path.display(), "no trace file, server contributes no calls");
            continue;
        }
        let ids = ingest_kernel_trace(&trace_path, &d.server.name, &mut arena, &mut d.tables)
            .with_context(|| format!("ingesting trace for {}", d.server.name))?;
        all_ids.extend(ids);
    }

    let mpi_workload = if let Some(ranks) = config.global.parallel {
        let mut raw_ranks = Vec::with_capacity(ranks);
        let mut rank_tables = ProcessTables::new();
        for r in 0..ranks {
            let rank_path = traces.join(format!("{r}.rec"));
            if !rank_path.exists() {
                tracing::warn!(rank = r, "no recorder trace for rank, treating as empty");
                raw_ranks.push(Vec::new());
                continue;
            }
            let ids = ingest_recorder_trace(&rank_path, &r.to_string(), &mut arena, &mut rank_tables)?;
            all_ids.extend(ids.clone());
            raw_ranks.push(ids);
        }
        Some(Workload::mpi(raw_ranks, &mut arena)?)
    } else {
        None
    };

    arena.assign_gids();

    let header = config.global.fs_type.frame_header();
    correlate_send_recv(&mut arena, &all_ids, &config.global.client_name, header.magic, header.len);

    tracing::info!(calls = arena.len(), "ingest complete");

    let graph = ExecGraph::build(&arena, &all_ids, &config.global.client_name).reduce(&arena);
    let causality = Causality::build(&arena, &graph);

    let mut enumerator = FrontierEnumerator::new(&arena, &graph, &causality);
    if let Some(Workload::Mpi(mpi)) = &mpi_workload {
        if let Some(mpi_context) = build_mpi_context(mpi, config, &arena)
            .context("building client/server write mapping for MPI-aware causality")?
        {
            enumerator = enumerator.with_mpi_context(mpi_context);
        }
    }
    let states = enumerator.enumerate(max_reorder);
    let states_total = states.len();

    let objmap = objmap_path.as_ref().and_then(|p| ObjMapping::load(p, 0).ok());

    let states = dedup(states);
    let states = prune(states, &arena, objmap.as_ref(), PruneOptions::default());
    let states_explored = states.len();
    tracing::info!(states_total, states_explored, "enumeration complete");

    let result_dir = config.global.result_dir.clone();
    std::fs::create_dir_all(&result_dir)?;

    let highlight = Default::default();
    std::fs::write(result_dir.join("exec_graph.dot"), write_dot(&arena, &graph, &highlight))?;

    let tour: Vec<usize> = if no_tour {
        (0..states.len()).collect()
    } else {
        greedy_tour(&states, &arena)
    };

    let sandbox = ProcessSandbox::new(config.global.fs_type, servers.clone());
    let replay_config = ReplayConfig {
        mount_point: PathBuf::from(&config.global.mount_point),
        checker: config
            .global
            .checker
            .clone()
            .context("global.checker is required for `check`")?,
        checker_timeout: Duration::from_secs(config.global.timeout_secs),
        save_timeout: Duration::from_secs(config.global.timeout_secs),
        output_root: result_dir.clone(),
    };
    let mut driver = ReplayDriver::new(&sandbox, &servers, replay_config);

    let snapshot_dir = config.global.snapshot_dir.clone();
    for server in &servers {
        let blob_path = snapshot_dir.join(format!("{}.tar", server.name));
        if blob_path.exists() {
            driver.seed_snapshot(&server.name, SnapshotBlob(blob_path));
        }
    }

    let results = driver.run_tour(&states, &tour, &arena);

    for r in &results {
        if r.verdict == Verdict::CheckerFailed {
            tracing::warn!(state = r.state_index, victims = ?r.localized_victims, "checker failed");
        }
    }

    let summary = RunSummary::from_results(states_total, states_explored, &results);
    summary.print_table();
    summary.write_json(&result_dir.join("summary.json"))?;

    if summary.checker_failed > 0 {
        tracing::warn!(failures = summary.checker_failed, "vulnerabilities found");
    }

    Ok(())
}

/// Matches every MPI rank's client-side Pwrites against the storage
/// servers' Pwrites under the configured striping, then groups the
/// matched server calls by the barrier group of the client write they
/// realize — the input the MPI-aware causality refinement needs.
fn build_mpi_context<'a>(
    mpi: &'a MpiWorkload,
    config: &ClusterConfig,
    arena: &'a CallArena,
) -> Result<Option<MpiContext<'a>>> {
    let storage_names: Vec<&str> = config
        .services
        .iter()
        .filter(|s| s.role == ServerRole::Storage)
        .map(|s| s.name.as_str())
        .collect();
    if storage_names.is_empty() {
        return Ok(None);
    }

    let mut server_pwrites: Vec<Vec<CallId>> = vec![Vec::new(); storage_names.len()];
    for (id, call) in arena.iter() {
        if !matches!(call.kind, CallKind::Pwrite { .. }) {
            continue;
        }
        if let Some(idx) = storage_names.iter().position(|&n| n == call.server.as_str()) {
            server_pwrites[idx].push(id);
        }
    }
    for pool in &mut server_pwrites {
        pool.sort_by_key(|&id| arena.get(id).gid);
    }

    let client_writes: Vec<CallId> = mpi
        .ranks
        .iter()
        .flat_map(|r| r.calls.iter().copied())
        .filter(|&c| matches!(arena.get(c).kind, CallKind::Pwrite { .. }))
        .collect();
    if client_writes.is_empty() {
        return Ok(None);
    }

    let op_mapping = OpMapping::new(arena, storage_names.len(), config.global.stripe_size, 0, true);
    let matched = op_mapping
        .match_writes(&client_writes, &mut server_pwrites)
        .context("mapping MPI client writes to storage-server writes")?;

    let mut group_writes: HashMap<usize, Vec<CallId>> = HashMap::new();
    for m in &matched {
        if let Some(group) = mpi.group_of(m.client_call) {
            group_writes.entry(group).or_default().extend(m.server_calls.iter().copied());
        }
    }

    Ok(Some(MpiContext { workload: mpi, group_writes }))
}
