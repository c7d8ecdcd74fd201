//! Execution graph (C4): per-server chains plus cross-server send/recv and
//! client-synchronization edges, reduced to drop network nodes and
//! transitively redundant edges.

use std::collections::{HashMap, HashSet};

use crate::call::{CallArena, CallId, CallKind};

#[derive(Debug, Default)]
pub struct ExecGraph {
    pub nodes: Vec<CallId>,
    edges: HashMap<CallId, Vec<CallId>>,
    rev_edges: HashMap<CallId, Vec<CallId>>,
}

impl ExecGraph {
    pub fn successors(&self, id: CallId) -> &[CallId] {
        self.edges.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn predecessors(&self, id: CallId) -> &[CallId] {
        self.rev_edges.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    #[cfg(test)]
    pub fn add_edge_for_test(&mut self, from: CallId, to: CallId) {
        self.add_edge(from, to);
    }

    fn add_edge(&mut self, from: CallId, to: CallId) {
        let fwd = self.edges.entry(from).or_default();
        if !fwd.contains(&to) {
            fwd.push(to);
        }
        let rev = self.rev_edges.entry(to).or_default();
        if !rev.contains(&from) {
            rev.push(from);
        }
    }

    fn remove_edge(&mut self, from: CallId, to: CallId) {
        if let Some(v) = self.edges.get_mut(&from) {
            v.retain(|&x| x != to);
        }
        if let Some(v) = self.rev_edges.get_mut(&to) {
            v.retain(|&x| x != from);
        }
    }

    /// Builds the full (unreduced) graph over every call in `calls`:
    /// intra-server chains, correlated send/recv edges, and client-sync
    /// edges.
    pub fn build(arena: &CallArena, calls: &[CallId], client_name: &str) -> Self {
        let mut g = ExecGraph { nodes: calls.to_vec(), ..Default::default() };

        let mut by_server: HashMap<&str, Vec<CallId>> = HashMap::new();
        for &id in calls {
            by_server.entry(arena.get(id).server.as_str()).or_default().push(id);
        }
        for (_, mut ids) in by_server {
            ids.sort_by_key(|&id| arena.get(id).gid);
            for w in ids.windows(2) {
                g.add_edge(w[0], w[1]);
            }
        }

        for &id in calls {
            let call = arena.get(id);
            if matches!(call.kind, CallKind::Sendto { .. }) {
                if let Some(recv) = call.correlated_call {
                    g.add_edge(id, recv);
                }
            }
        }

        g.add_client_sync_edges(arena, calls, client_name);
        g
    }

    fn add_client_sync_edges(&mut self, arena: &CallArena, calls: &[CallId], client_name: &str) {
        let mut ordered: Vec<CallId> = calls.to_vec();
        ordered.sort_by_key(|&id| arena.get(id).gid);

        let mut last_client_sendto: HashMap<String, CallId> = HashMap::new();
        let mut linked: HashSet<(String, String)> = HashSet::new();

        for &id in &ordered {
            let call = arena.get(id);
            match &call.kind {
                CallKind::Sendto { peer, .. } if peer == client_name => {
                    last_client_sendto.insert(call.server.clone(), id);
                }
                CallKind::Recvfrom { peer, .. } if peer == client_name => {
                    for (srv, &send_id) in last_client_sendto.clone().iter() {
                        if srv == &call.server {
                            continue;
                        }
                        let key = (srv.clone(), call.server.clone());
                        if linked.insert(key) {
                            self.add_edge(send_id, id);
                        }
                    }
                }
                _ => {}
            }
        }
    }

    /// Removes Recvfrom then Sendto nodes, reconnecting predecessors to
    /// successors, then applies transitive reduction while preserving
    /// intra-server edges.
    pub fn reduce(mut self, arena: &CallArena) -> Self {
        for &kind_is_recv in &[true, false] {
            let targets: Vec<CallId> = self
                .nodes
                .iter()
                .copied()
                .filter(|&id| {
                    matches!(
                        arena.get(id).kind,
                        CallKind::Recvfrom { .. }
                    ) == kind_is_recv
                        && matches!(arena.get(id).kind, CallKind::Sendto { .. } | CallKind::Recvfrom { .. })
                })
                .collect();
            for id in targets {
                let preds = self.predecessors(id).to_vec();
                let succs = self.successors(id).to_vec();
                for &p in &preds {
                    for &s in &succs {
                        self.add_edge(p, s);
                    }
                }
                for &p in &preds {
                    self.remove_edge(p, id);
                }
                for &s in &succs {
                    self.remove_edge(id, s);
                }
                self.nodes.retain(|&n| n != id);
            }
        }

        let intra_server_pairs: HashSet<(CallId, CallId)> = self
            .nodes
            .iter()
            .flat_map(|&id| {
                self.successors(id)
                    .iter()
                    .filter(move |&&s| arena.get(s).server == arena.get(id).server)
                    .map(move |&s| (id, s))
            })
            .collect();

        self.transitive_reduce();

        for (a, b) in intra_server_pairs {
            self.add_edge(a, b);
        }
        self
    }

    fn reachable_excluding(&self, from: CallId, skip_edge_to: CallId) -> HashSet<CallId> {
        let mut seen = HashSet::new();
        let mut stack = vec![from];
        while let Some(n) = stack.pop() {
            for &s in self.successors(n) {
                if n == from && s == skip_edge_to {
                    continue;
                }
                if seen.insert(s) {
                    stack.push(s);
                }
            }
        }
        seen
    }

    fn transitive_reduce(&mut self) {
        let edges: Vec<(CallId, CallId)> = self
            .nodes
            .iter()
            .flat_map(|&id| self.successors(id).iter().map(move |&s| (id, s)))
            .collect();
        for (a, b) in edges {
            if self.reachable_excluding(a, b).contains(&b) {
                self.remove_edge(a, b);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::Call;

    fn mk(arena: &mut CallArena, server: &str, ts: f64, kind: CallKind) -> CallId {
        arena.push(Call { gid: 0, local_id: 0, server: server.into(), timestamp: ts, kind, retval: 0, error: None, correlated_call: None })
    }

    #[test]
    fn intra_server_chain_is_acyclic() {
        let mut arena = CallArena::new();
        let a = mk(&mut arena, "s", 1.0, CallKind::Fsync { path: "/a".into() });
        let b = mk(&mut arena, "s", 2.0, CallKind::Fsync { path: "/a".into() });
        arena.assign_gids();
        let g = ExecGraph::build(&arena, &[a, b], "client");
        assert_eq!(g.successors(a), &[b]);
        assert!(g.predecessors(a).is_empty());
    }
}
