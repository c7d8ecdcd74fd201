//! The typed call model (C1): every disk-affecting operation a server or
//! workload process performed, as recovered from a trace.

use std::fmt;

/// Stable index of a `Call` inside a `CallArena`. Every downstream structure
/// (graph, causality matrices, crash states) addresses calls through this
/// rather than by reference, so the arena can be built once and frozen.
pub type CallId = usize;

#[derive(Debug, Clone, PartialEq)]
pub enum CallKind {
    Creat { path: String },
    Link { src: String, dst: String },
    Unlink { path: String },
    Rename { src: String, dst: String },
    Mkdir { path: String, mode: u32 },
    Setxattr { path: String, key: String, value: Vec<u8> },
    Removexattr { path: String, key: String },
    Truncate { path: String, length: u64 },
    Pwrite { path: String, offset: u64, length: u64, bytes: Vec<u8>, is_append: bool },
    Fsync { path: String },
    Sendto { peer: String, bytes: Vec<u8> },
    Recvfrom { peer: String, bytes: Vec<u8> },
    Barrier { barrier_id: u64 },
}

impl CallKind {
    /// The file path this call touches, if any. Network and barrier calls
    /// have none.
    pub fn path(&self) -> Option<&str> {
        match self {
            CallKind::Creat { path }
            | CallKind::Unlink { path }
            | CallKind::Mkdir { path, .. }
            | CallKind::Setxattr { path, .. }
            | CallKind::Removexattr { path, .. }
            | CallKind::Truncate { path, .. }
            | CallKind::Pwrite { path, .. }
            | CallKind::Fsync { path } => Some(path),
            CallKind::Link { src, .. } | CallKind::Rename { src, .. } => Some(src),
            CallKind::Sendto { .. } | CallKind::Recvfrom { .. } | CallKind::Barrier { .. } => None,
        }
    }

    pub fn is_fsync(&self) -> bool {
        matches!(self, CallKind::Fsync { .. })
    }

    pub fn is_barrier(&self) -> bool {
        matches!(self, CallKind::Barrier { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            CallKind::Creat { .. } => "creat",
            CallKind::Link { .. } => "link",
            CallKind::Unlink { .. } => "unlink",
            CallKind::Rename { .. } => "rename",
            CallKind::Mkdir { .. } => "mkdir",
            CallKind::Setxattr { .. } => "setxattr",
            CallKind::Removexattr { .. } => "removexattr",
            CallKind::Truncate { .. } => "truncate",
            CallKind::Pwrite { is_append: true, .. } => "append",
            CallKind::Pwrite { .. } => "pwrite",
            CallKind::Fsync { .. } => "fsync",
            CallKind::Sendto { .. } => "sendto",
            CallKind::Recvfrom { .. } => "recvfrom",
            CallKind::Barrier { .. } => "barrier",
        }
    }
}

/// A single recovered operation, owned by the arena it was ingested into.
#[derive(Debug, Clone)]
pub struct Call {
    pub gid: u64,
    pub local_id: usize,
    pub server: String,
    pub timestamp: f64,
    pub kind: CallKind,
    pub retval: i64,
    pub error: Option<String>,
    /// Set after cross-server correlation (C2 `format_sendrecv`): the id of
    /// the paired Sendto/Recvfrom on the other side, if any.
    pub correlated_call: Option<CallId>,
}

impl Call {
    pub fn is_fsync(&self) -> bool {
        self.kind.is_fsync()
    }

    pub fn path(&self) -> Option<&str> {
        self.kind.path()
    }
}

impl fmt::Display for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.6} {}@{}({})",
            self.timestamp,
            self.kind.name(),
            self.server,
            self.kind.path().unwrap_or("-")
        )
    }
}

/// Owns all `Call`s ingested from a run. Frozen once ingest completes;
/// every other component references calls by `CallId` into this arena.
#[derive(Debug, Default)]
pub struct CallArena {
    calls: Vec<Call>,
}

impl CallArena {
    pub fn new() -> Self {
        Self { calls: Vec::new() }
    }

    pub fn push(&mut self, call: Call) -> CallId {
        let id = self.calls.len();
        self.calls.push(call);
        id
    }

    pub fn get(&self, id: CallId) -> &Call {
        &self.calls[id]
    }

    pub fn get_mut(&mut self, id: CallId) -> &mut Call {
        &mut self.calls[id]
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (CallId, &Call)> {
        self.calls.iter().enumerate()
    }

    /// Assigns `gid` to every call in strict timestamp order (ties broken by
    /// insertion order), establishing the single global order every other
    /// component relies on.
    pub fn assign_gids(&mut self) {
        let mut order: Vec<usize> = (0..self.calls.len()).collect();
        order.sort_by(|&a, &b| {
            self.calls[a]
                .timestamp
                .partial_cmp(&self.calls[b].timestamp)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.cmp(&b))
        });
        for (gid, idx) in order.into_iter().enumerate() {
            self.calls[idx].gid = gid as u64;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mk(server: &str, ts: f64, kind: CallKind) -> Call {
        Call {
            gid: 0,
            local_id: 0,
            server: server.into(),
            timestamp: ts,
            kind,
            retval: 0,
            error: None,
            correlated_call: None,
        }
    }

    #[test]
    fn gids_follow_timestamp_order_across_servers() {
        let mut arena = CallArena::new();
        let a = arena.push(mk("srv-a", 2.0, CallKind::Fsync { path: "/x".into() }));
        let b = arena.push(mk("srv-b", 1.0, CallKind::Fsync { path: "/x".into() }));
        arena.assign_gids();
        assert!(arena.get(b).gid < arena.get(a).gid);
    }

    #[test]
    fn append_is_named_append() {
        let c = CallKind::Pwrite {
            path: "/x".into(),
            offset: 0,
            length: 4,
            bytes: vec![0; 4],
            is_append: true,
        };
        assert_eq!(c.name(), "append");
    }
}
