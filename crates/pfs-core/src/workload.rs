//! The client side of a run: a single POSIX process or a set of MPI ranks
//! partitioned by barrier.

use crate::call::{CallArena, CallId, CallKind};
use crate::error::IngestError;

/// One rank's ordered stream of workload calls.
#[derive(Debug, Clone, Default)]
pub struct Rank {
    pub calls: Vec<CallId>,
}

#[derive(Debug)]
pub enum Workload {
    Posix(Rank),
    Mpi(MpiWorkload),
}

#[derive(Debug, Default)]
pub struct MpiWorkload {
    pub ranks: Vec<Rank>,
    /// barrier_id -> calls (across all ranks) belonging to that group
    pub barrier_groups: Vec<Vec<CallId>>,
}

impl Workload {
    pub fn posix(calls: Vec<CallId>) -> Self {
        Workload::Posix(Rank { calls })
    }

    /// Builds an MPI workload from one raw call stream per rank, removing
    /// spuriously duplicated consecutive barriers (an artifact of how
    /// collective calls are captured: one logical collective can produce
    /// two back-to-back `Barrier` records in every rank simultaneously)
    /// before assigning real per-occurrence barrier ids and partitioning
    /// into barrier groups.
    pub fn mpi(raw_ranks: Vec<Vec<CallId>>, arena: &mut CallArena) -> Result<Self, IngestError> {
        let mut ranks: Vec<Rank> = raw_ranks
            .into_iter()
            .map(|calls| Rank { calls })
            .collect();

        remove_duplicate_barriers(&mut ranks, arena)?;
        assign_barrier_ids(&ranks, arena);

        let mut mpi = MpiWorkload { ranks, barrier_groups: Vec::new() };
        mpi.build_barrier_groups(arena);
        Ok(Workload::Mpi(mpi))
    }

    pub fn all_calls(&self) -> Vec<CallId> {
        match self {
            Workload::Posix(r) => r.calls.clone(),
            Workload::Mpi(m) => m.ranks.iter().flat_map(|r| r.calls.clone()).collect(),
        }
    }
}

impl MpiWorkload {
    fn build_barrier_groups(&mut self, arena: &CallArena) {
        let mut groups: Vec<Vec<CallId>> = vec![Vec::new()];
        // Walk all ranks' calls in global gid order so a barrier group
        // collects contributions from every rank between two barriers.
        let mut all: Vec<CallId> = self.ranks.iter().flat_map(|r| r.calls.clone()).collect();
        all.sort_by_key(|&c| arena.get(c).gid);
        for c in all {
            if arena.get(c).kind.is_barrier() {
                groups.push(Vec::new());
            } else {
                groups.last_mut().unwrap().push(c);
            }
        }
        self.barrier_groups = groups;
    }

    pub fn group_of(&self, call: CallId) -> Option<usize> {
        self.barrier_groups
            .iter()
            .position(|g| g.contains(&call))
    }
}

/// For each rank, finds the raw-stream positions of its `Barrier` calls.
/// Barrier slot `i` is a capture-duplicate of slot `i-1` iff, in *every*
/// rank, the two sit at adjacent positions in that rank's raw call list —
/// i.e. one logical collective was recorded as two back-to-back Barrier
/// lines everywhere, not just coincidentally in one rank. Only the later
/// barrier of such a pair is removed, mirroring the per-rank structure the
/// original implementation preserves.
fn remove_duplicate_barriers(ranks: &mut [Rank], arena: &CallArena) -> Result<(), IngestError> {
    let barrier_positions: Vec<Vec<usize>> = ranks
        .iter()
        .map(|r| {
            r.calls
                .iter()
                .enumerate()
                .filter(|&(_, &c)| arena.get(c).kind.is_barrier())
                .map(|(i, _)| i)
                .collect()
        })
        .collect();

    let counts: Vec<usize> = barrier_positions.iter().map(Vec::len).collect();
    if let Some((&first, rest)) = counts.split_first() {
        for (i, &c) in rest.iter().enumerate() {
            if c != first {
                return Err(IngestError::BarrierCountMismatch(0, first, i + 1, c));
            }
        }
    }
    let barrier_count = counts.first().copied().unwrap_or(0);

    let mut to_remove: Vec<std::collections::HashSet<usize>> = vec![Default::default(); ranks.len()];
    for i in 1..barrier_count {
        let is_duplicate = barrier_positions
            .iter()
            .all(|positions| positions[i] == positions[i - 1] + 1);
        if is_duplicate {
            for (rank_idx, positions) in barrier_positions.iter().enumerate() {
                to_remove[rank_idx].insert(positions[i]);
            }
        }
    }

    for (rank, remove) in ranks.iter_mut().zip(to_remove) {
        rank.calls = rank
            .calls
            .iter()
            .enumerate()
            .filter(|(i, _)| !remove.contains(i))
            .map(|(_, &c)| c)
            .collect();
    }
    Ok(())
}

/// Reassigns barrier ids as a 1-based sequential index over each rank's
/// (now deduplicated) Barrier calls, in occurrence order — matching the
/// original implementation's `barrier.barrier_id = i+1` pass.
fn assign_barrier_ids(ranks: &[Rank], arena: &mut CallArena) {
    for rank in ranks {
        let mut next_id = 1u64;
        for &c in &rank.calls {
            if arena.get(c).kind.is_barrier() {
                if let CallKind::Barrier { barrier_id } = &mut arena.get_mut(c).kind {
                    *barrier_id = next_id;
                }
                next_id += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::Call;

    fn barrier(arena: &mut CallArena, server: &str, ts: f64) -> CallId {
        arena.push(Call {
            gid: 0,
            local_id: 0,
            server: server.into(),
            timestamp: ts,
            kind: CallKind::Barrier { barrier_id: 0 },
            retval: 0,
            error: None,
            correlated_call: None,
        })
    }

    fn creat(arena: &mut CallArena, server: &str, ts: f64, path: &str) -> CallId {
        arena.push(Call {
            gid: 0,
            local_id: 0,
            server: server.into(),
            timestamp: ts,
            kind: CallKind::Creat { path: path.into() },
            retval: 0,
            error: None,
            correlated_call: None,
        })
    }

    #[test]
    fn barrier_duplicated_in_every_rank_collapses_to_one() {
        let mut arena = CallArena::new();
        // rank0: Creat, Barrier, Barrier, Creat — the two adjacent barriers
        // are a capture artifact present at the same position in both ranks.
        let r0 = vec![
            creat(&mut arena, "rank0", 0.0, "/a"),
            barrier(&mut arena, "rank0", 1.0),
            barrier(&mut arena, "rank0", 1.1),
            creat(&mut arena, "rank0", 2.0, "/b"),
        ];
        let r1 = vec![
            creat(&mut arena, "rank1", 0.0, "/a"),
            barrier(&mut arena, "rank1", 1.0),
            barrier(&mut arena, "rank1", 1.1),
            creat(&mut arena, "rank1", 2.0, "/b"),
        ];

        let workload = Workload::mpi(vec![r0, r1], &mut arena).unwrap();
        let Workload::Mpi(mpi) = workload else { panic!("expected mpi workload") };
        for rank in &mpi.ranks {
            let barrier_count = rank.calls.iter().filter(|&&c| arena.get(c).kind.is_barrier()).count();
            assert_eq!(barrier_count, 1);
        }
    }

    #[test]
    fn surviving_barriers_get_unique_positive_ids() {
        let mut arena = CallArena::new();
        // a non-barrier call separates the two barriers in every rank, so
        // neither is adjacent to the other and both survive deduplication.
        let r0 = vec![
            barrier(&mut arena, "rank0", 1.0),
            creat(&mut arena, "rank0", 2.0, "/a"),
            barrier(&mut arena, "rank0", 3.0),
        ];
        let r1 = vec![
            barrier(&mut arena, "rank1", 1.0),
            creat(&mut arena, "rank1", 2.0, "/a"),
            barrier(&mut arena, "rank1", 3.0),
        ];

        let workload = Workload::mpi(vec![r0, r1], &mut arena).unwrap();
        let Workload::Mpi(mpi) = workload else { panic!("expected mpi workload") };
        let ids: Vec<u64> = mpi.ranks[0]
            .calls
            .iter()
            .filter_map(|&c| match arena.get(c).kind {
                CallKind::Barrier { barrier_id } => Some(barrier_id),
                _ => None,
            })
            .collect();
        assert_eq!(ids, vec![1, 2]);
        assert!(ids.iter().all(|&id| id > 0));
    }
}
