//! A candidate durable state: a consistent prefix of the execution graph,
//! optionally with a set of reorder victims omitted relative to a pivot.

use std::collections::BTreeSet;

use crate::call::CallId;

#[derive(Debug, Clone)]
pub struct CrashState {
    /// Calls included in this state, after removing any reorder victims.
    pub calls: BTreeSet<CallId>,
    /// Calls omitted to represent "did not persist before the pivot".
    pub reorder_victims: BTreeSet<CallId>,
    /// The cut's temporally last call; the anchor reorderings are
    /// expressed against.
    pub pivot: Option<CallId>,
    /// True if this state was produced by the MPI-aware causality layer.
    pub mpi_originated: bool,
}

impl CrashState {
    pub fn atomic(calls: BTreeSet<CallId>, pivot: Option<CallId>) -> Self {
        Self { calls, reorder_victims: BTreeSet::new(), pivot, mpi_originated: false }
    }

    pub fn reordered(
        mut calls: BTreeSet<CallId>,
        victims: BTreeSet<CallId>,
        pivot: Option<CallId>,
        mpi_originated: bool,
    ) -> Self {
        for v in &victims {
            calls.remove(v);
        }
        Self { calls, reorder_victims: victims, pivot, mpi_originated }
    }

    pub fn touches_fsync_terminal(&self, arena: &crate::call::CallArena) -> bool {
        self.pivot.map(|p| arena.get(p).is_fsync()).unwrap_or(false)
    }

    /// Servers touched by the symmetric difference between `self` and
    /// `other`'s call sets — the minimal restore-diff the replay driver
    /// needs for this transition.
    pub fn symmetric_diff_servers(&self, other: &CrashState, arena: &crate::call::CallArena) -> BTreeSet<String> {
        let mut servers = BTreeSet::new();
        for &c in self.calls.symmetric_difference(&other.calls) {
            servers.insert(arena.get(c).server.clone());
        }
        servers
    }
}

impl PartialEq for CrashState {
    fn eq(&self, other: &Self) -> bool {
        self.calls == other.calls
    }
}
impl Eq for CrashState {}
