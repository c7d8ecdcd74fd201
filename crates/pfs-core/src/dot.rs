//! DOT-format dumps of the execution graph: one cluster per server,
//! intra-server edges dashed, cross-server edges solid, and — once replay
//! has classified states — edges touching a confirmed vulnerability's
//! calls rendered in red.

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;

use crate::call::{CallArena, CallId};
use crate::graph::ExecGraph;

pub fn write_dot(arena: &CallArena, graph: &ExecGraph, highlight: &HashSet<CallId>) -> String {
    let mut out = String::new();
    writeln!(out, "digraph exec_graph {{").unwrap();
    writeln!(out, "  rankdir=LR;").unwrap();

    let mut by_server: HashMap<&str, Vec<CallId>> = HashMap::new();
    for &id in &graph.nodes {
        by_server.entry(arena.get(id).server.as_str()).or_default().push(id);
    }
    let mut servers: Vec<&str> = by_server.keys().copied().collect();
    servers.sort();

    for (i, server) in servers.iter().enumerate() {
        writeln!(out, "  subgraph cluster_{i} {{").unwrap();
        writeln!(out, "    label=\"{server}\";").unwrap();
        let mut ids = by_server[server].clone();
        ids.sort_by_key(|&id| arena.get(id).gid);
        for &id in &ids {
            let call = arena.get(id);
            let color = if highlight.contains(&id) { ",color=red,fontcolor=red" } else { "" };
            writeln!(out, "    n{id} [label=\"{}#{}\"{color}];", call.kind.name(), call.gid).unwrap();
        }
        writeln!(out, "  }}").unwrap();
    }

    for &id in &graph.nodes {
        let from_server = &arena.get(id).server;
        for &succ in graph.successors(id) {
            let to_server = &arena.get(succ).server;
            let style = if from_server == to_server { "style=dashed" } else { "style=solid" };
            let color = if highlight.contains(&id) && highlight.contains(&succ) { ",color=red" } else { "" };
            writeln!(out, "  n{id} -> n{succ} [{style}{color}];").unwrap();
        }
    }

    writeln!(out, "}}").unwrap();
    out
}
