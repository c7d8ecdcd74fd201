//! Frontier enumeration (C6): consistent global cuts over the execution
//! graph, plus small reordering variants of each cut.

use std::collections::{BTreeSet, HashMap};

use crate::call::{CallArena, CallId};
use crate::causality::{mpi_extend_dependent_set, Causality};
use crate::crash_state::CrashState;
use crate::graph::ExecGraph;
use crate::workload::MpiWorkload;

/// A per-server "last included call" pick; `None` means nothing from that
/// server is included (the null sentinel).
pub type Frontier = Vec<Option<CallId>>;

/// The MPI-aware causality refinement's inputs (§4.4): the workload's
/// barrier partition, plus for each barrier group the server-side calls
/// that realize its client writes (built by matching client Pwrites
/// against server Pwrites via `OpMapping`).
pub struct MpiContext<'a> {
    pub workload: &'a MpiWorkload,
    pub group_writes: HashMap<usize, Vec<CallId>>,
}

pub struct FrontierEnumerator<'a> {
    arena: &'a CallArena,
    graph: &'a ExecGraph,
    causality: &'a Causality,
    servers: Vec<String>,
    per_server: HashMap<String, Vec<CallId>>,
    mpi: Option<MpiContext<'a>>,
}

impl<'a> FrontierEnumerator<'a> {
    pub fn new(arena: &'a CallArena, graph: &'a ExecGraph, causality: &'a Causality) -> Self {
        let mut per_server: HashMap<String, Vec<CallId>> = HashMap::new();
        for &id in &graph.nodes {
            per_server.entry(arena.get(id).server.clone()).or_default().push(id);
        }
        for v in per_server.values_mut() {
            v.sort_by_key(|&id| arena.get(id).gid);
        }
        let mut servers: Vec<String> = per_server.keys().cloned().collect();
        servers.sort();
        Self { arena, graph, causality, servers, per_server, mpi: None }
    }

    /// Attaches the MPI-aware causality refinement; without this, reorder
    /// variants are computed from HB/PB alone and barrier-group write
    /// correlation never widens the dependent set.
    pub fn with_mpi_context(mut self, mpi: MpiContext<'a>) -> Self {
        self.mpi = Some(mpi);
        self
    }

    /// Enumerates every consistent frontier and, for each, the atomic
    /// state plus k in {1,2} reorder variants.
    pub fn enumerate(&self, max_reorder_k: usize) -> Vec<CrashState> {
        let mut out = Vec::new();
        let choice_counts: Vec<usize> = self
            .servers
            .iter()
            .map(|s| self.per_server[s].len() + 1)
            .collect();

        for combo in CartesianIndices::new(&choice_counts) {
            let frontier: Frontier = combo
                .iter()
                .zip(&self.servers)
                .map(|(&idx, s)| if idx == 0 { None } else { Some(self.per_server[s][idx - 1]) })
                .collect();

            if !self.is_consistent(&frontier) {
                continue;
            }

            let cut = self.cut_for(&frontier);
            if cut.is_empty() {
                continue;
            }
            let pivot = self.pivot_of(&cut);
            out.push(CrashState::atomic(cut.clone(), pivot));

            if let Some(p) = pivot {
                out.extend(self.reorder_variants(&cut, p, max_reorder_k));
            }
        }
        out
    }

    /// A frontier is consistent iff every cross-server edge (u -> v) with
    /// v selected also has u selected.
    fn is_consistent(&self, frontier: &Frontier) -> bool {
        let selected: BTreeSet<CallId> = self.cut_for(frontier);
        for &id in &self.graph.nodes {
            for &succ in self.graph.successors(id) {
                if self.arena.get(id).server == self.arena.get(succ).server {
                    continue;
                }
                if selected.contains(&succ) && !selected.contains(&id) {
                    return false;
                }
            }
        }
        true
    }

    fn cut_for(&self, frontier: &Frontier) -> BTreeSet<CallId> {
        let mut set = BTreeSet::new();
        for (server, last) in self.servers.iter().zip(frontier) {
            let Some(last) = last else { continue };
            let last_gid = self.arena.get(*last).gid;
            for &id in &self.per_server[server] {
                if self.arena.get(id).gid <= last_gid {
                    set.insert(id);
                }
            }
        }
        set
    }

    fn pivot_of(&self, cut: &BTreeSet<CallId>) -> Option<CallId> {
        cut.iter().copied().max_by_key(|&id| self.arena.get(id).gid)
    }

    fn reorder_variants(&self, cut: &BTreeSet<CallId>, pivot: CallId, max_k: usize) -> Vec<CrashState> {
        let mut ordered: Vec<CallId> = cut.iter().copied().collect();
        ordered.sort_by_key(|&id| self.arena.get(id).gid);

        let candidates: Vec<CallId> = ordered
            .iter()
            .copied()
            .filter(|&id| id != pivot && !self.arena.get(id).is_fsync())
            .collect();

        let mut out = Vec::new();
        for k in 1..=max_k.min(2) {
            for combo in k_combinations(&candidates, k) {
                if let Some(state) = self.try_reorder(&ordered, &combo, pivot) {
                    out.push(state);
                }
            }
        }
        out
    }

    fn try_reorder(&self, ordered: &[CallId], victims: &[CallId], pivot: CallId) -> Option<CrashState> {
        let mut dependent = BTreeSet::new();
        let mut mpi_originated = false;
        for &victim in victims {
            let pos = ordered.iter().position(|&c| c == victim)?;
            let tail = &ordered[pos + 1..];
            let mut set = self.causality.persists_before_all(victim, tail, pivot)?;

            if let Some(mpi) = &self.mpi {
                let before = set.len();
                mpi_extend_dependent_set(self.arena, mpi.workload, victim, pivot, &mut set, &mpi.group_writes);
                if set.len() > before {
                    mpi_originated = true;
                }
            }

            dependent.extend(set);
        }
        let calls: BTreeSet<CallId> = ordered.iter().copied().collect();
        Some(CrashState::reordered(calls, dependent, Some(pivot), mpi_originated))
    }
}

fn k_combinations(items: &[CallId], k: usize) -> Vec<Vec<CallId>> {
    if k == 0 || k > items.len() {
        return Vec::new();
    }
    let mut out = Vec::new();
    let mut idx: Vec<usize> = (0..k).collect();
    loop {
        out.push(idx.iter().map(|&i| items[i]).collect());
        let mut i = k;
        loop {
            if i == 0 {
                return out;
            }
            i -= 1;
            if idx[i] != i + items.len() - k {
                break;
            }
            if i == 0 {
                return out;
            }
        }
        idx[i] += 1;
        for j in i + 1..k {
            idx[j] = idx[j - 1] + 1;
        }
    }
}

/// Simple mixed-radix counter producing the Cartesian product of
/// `0..counts[i]` for each dimension, in row-major order.
struct CartesianIndices {
    counts: Vec<usize>,
    current: Option<Vec<usize>>,
}

impl CartesianIndices {
    fn new(counts: &[usize]) -> Self {
        let current = if counts.iter().all(|&c| c > 0) {
            Some(vec![0; counts.len()])
        } else {
            None
        };
        Self { counts: counts.to_vec(), current }
    }
}

impl Iterator for CartesianIndices {
    type Item = Vec<usize>;
    fn next(&mut self) -> Option<Vec<usize>> {
        let cur = self.current.clone()?;
        let mut next = cur.clone();
        let mut i = next.len();
        loop {
            if i == 0 {
                self.current = None;
                break;
            }
            i -= 1;
            next[i] += 1;
            if next[i] < self.counts[i] {
                self.current = Some(next);
                break;
            }
            next[i] = 0;
            if i == 0 {
                self.current = None;
                break;
            }
        }
        Some(cur)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combinations_of_two_from_three() {
        let items = vec![1, 2, 3];
        let combos = k_combinations(&items, 2);
        assert_eq!(combos.len(), 3);
    }

    #[test]
    fn cartesian_product_size() {
        let all: Vec<_> = CartesianIndices::new(&[2, 3]).collect();
        assert_eq!(all.len(), 6);
    }

    #[test]
    fn mpi_context_widens_dependent_set_and_marks_mpi_originated() {
        use crate::call::Call;
        use crate::workload::MpiWorkload;

        let mut arena = CallArena::new();
        let pwrite = |path: &str| CallKind::Pwrite {
            path: path.into(),
            offset: 0,
            length: 4,
            bytes: vec![0; 4],
            is_append: false,
        };
        let mk = |arena: &mut CallArena, server: &str, ts: f64, kind: CallKind| {
            arena.push(Call { gid: 0, local_id: 0, server: server.into(), timestamp: ts, kind, retval: 0, error: None, correlated_call: None })
        };

        // three servers, no edges between them (no send/recv, no client sync)
        // so HB/PB alone see all three as mutually unrelated.
        let c0 = mk(&mut arena, "A", 0.0, pwrite("/x"));
        let c1 = mk(&mut arena, "C", 1.0, pwrite("/y"));
        let c2 = mk(&mut arena, "B", 2.0, pwrite("/z"));
        arena.assign_gids();

        let graph = ExecGraph::build(&arena, &[c0, c1, c2], "client").reduce(&arena);
        let causality = Causality::build(&arena, &graph);

        let mpi = MpiWorkload::default();
        let mut group_writes = HashMap::new();
        group_writes.insert(0usize, vec![c0, c1]);

        let enumerator = FrontierEnumerator::new(&arena, &graph, &causality)
            .with_mpi_context(MpiContext { workload: &mpi, group_writes });

        // HB/PB alone would only omit c0; the MPI-aware extension should pull
        // in c1 since it shares c0's barrier group and sits between it and
        // the pivot in gid order.
        let state = enumerator.try_reorder(&[c0, c1, c2], &[c0], c2).expect("victim should be reorderable");
        assert!(state.reorder_victims.contains(&c1));
        assert!(state.mpi_originated);
    }
}
