//! Dedup, prune, and tour (C7): shrink the raw frontier-enumeration output
//! down to the states actually worth replaying, in an order that minimizes
//! snapshot/restore churn.

use std::collections::HashMap;

use crate::call::CallArena;
use crate::crash_state::CrashState;
use crate::objmap::ObjMapping;

/// Deduplicates by call-set equality. Among equivalents, prefers an
/// MPI-originated state, else the one with the smallest reorder set.
pub fn dedup(states: Vec<CrashState>) -> Vec<CrashState> {
    let mut by_calls: HashMap<Vec<crate::call::CallId>, CrashState> = HashMap::new();
    for state in states {
        let key: Vec<_> = state.calls.iter().copied().collect();
        match by_calls.get(&key) {
            None => {
                by_calls.insert(key, state);
            }
            Some(existing) => {
                let better = if state.mpi_originated && !existing.mpi_originated {
                    true
                } else if existing.mpi_originated && !state.mpi_originated {
                    false
                } else {
                    state.reorder_victims.len() < existing.reorder_victims.len()
                };
                if better {
                    by_calls.insert(key, state);
                }
            }
        }
    }
    by_calls.into_values().collect()
}

#[derive(Debug, Clone, Copy)]
pub struct PruneOptions {
    pub drop_fsync_terminal: bool,
    pub drop_datachunk_only: bool,
}

impl Default for PruneOptions {
    fn default() -> Self {
        Self { drop_fsync_terminal: true, drop_datachunk_only: true }
    }
}

pub fn prune(
    states: Vec<CrashState>,
    arena: &CallArena,
    objmap: Option<&ObjMapping>,
    opts: PruneOptions,
) -> Vec<CrashState> {
    states
        .into_iter()
        .filter(|s| {
            if opts.drop_fsync_terminal && s.touches_fsync_terminal(arena) {
                return false;
            }
            if opts.drop_datachunk_only {
                if let Some(map) = objmap {
                    let all_datachunk = std::iter::once(s.pivot)
                        .flatten()
                        .chain(s.reorder_victims.iter().copied())
                        .map(|id| arena.get(id))
                        .all(|c| map.is_datachunk(c));
                    if all_datachunk && (s.pivot.is_some() || !s.reorder_victims.is_empty()) {
                        return false;
                    }
                }
            }
            true
        })
        .collect()
}

/// Greedy nearest-neighbor tour over the server-touch symmetric
/// difference between states, with endpoints fixed at the first and last
/// index of the input order.
pub fn greedy_tour(states: &[CrashState], arena: &CallArena) -> Vec<usize> {
    let n = states.len();
    if n <= 2 {
        return (0..n).collect();
    }

    let cost = |i: usize, j: usize| -> usize { states[i].symmetric_diff_servers(&states[j], arena).len() };

    let start = 0;
    let end = n - 1;
    let mut visited = vec![false; n];
    visited[start] = true;
    let mut tour = vec![start];
    let mut current = start;

    while tour.len() < n - 1 {
        let mut best: Option<(usize, usize)> = None;
        for j in 0..n {
            if visited[j] || j == end {
                continue;
            }
            let c = cost(current, j);
            if best.map(|(_, bc)| c < bc).unwrap_or(true) {
                best = Some((j, c));
            }
        }
        match best {
            Some((next, _)) => {
                visited[next] = true;
                tour.push(next);
                current = next;
            }
            None => break,
        }
    }
    tour.push(end);
    visited[end] = true;
    tour
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn dedup_keeps_smallest_reorder_set() {
        let a = CrashState::reordered(BTreeSet::from([1, 2]), BTreeSet::from([3]), Some(2), false);
        let b = CrashState::atomic(BTreeSet::from([1, 2]), Some(2));
        let out = dedup(vec![a, b]);
        assert_eq!(out.len(), 1);
        assert!(out[0].reorder_victims.is_empty());
    }

    #[test]
    fn tour_fixes_endpoints() {
        let s0 = CrashState::atomic(BTreeSet::from([1]), Some(1));
        let s1 = CrashState::atomic(BTreeSet::from([1, 2]), Some(2));
        let s2 = CrashState::atomic(BTreeSet::from([1, 2, 3]), Some(3));
        let mut arena = CallArena::new();
        for _ in 0..4 {
            arena.push(crate::call::Call {
                gid: 0,
                local_id: 0,
                server: "s".into(),
                timestamp: 0.0,
                kind: crate::call::CallKind::Fsync { path: "/x".into() },
                retval: 0,
                error: None,
                correlated_call: None,
            });
        }
        let tour = greedy_tour(&[s0, s1, s2], &arena);
        assert_eq!(tour[0], 0);
        assert_eq!(*tour.last().unwrap(), 2);
    }
}
