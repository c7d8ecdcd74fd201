//! Run summary (C10): totals by verdict, written as a JSON report file
//! alongside a human-readable table on stderr.

use std::path::Path;

use pfs_core::replay::{StateResult, Verdict};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub states_total: usize,
    pub states_explored: usize,
    pub states_pruned: usize,
    pub ok: usize,
    pub checker_failed: usize,
    pub pfs_unavailable: usize,
    pub replay_errors: usize,
}

impl RunSummary {
    pub fn from_results(states_total: usize, explored: usize, results: &[StateResult]) -> Self {
        let mut s = RunSummary {
            states_total,
            states_explored: explored,
            states_pruned: states_total.saturating_sub(explored),
            ok: 0,
            checker_failed: 0,
            pfs_unavailable: 0,
            replay_errors: 0,
        };
        for r in results {
            match &r.verdict {
                Verdict::Ok => s.ok += 1,
                Verdict::CheckerFailed => s.checker_failed += 1,
                Verdict::PfsUnavailable => s.pfs_unavailable += 1,
                Verdict::ReplayError(_) => s.replay_errors += 1,
            }
        }
        s
    }

    pub fn print_table(&self) {
        eprintln!("{:-<48}", "");
        eprintln!("{:<24} {:>20}", "states total", self.states_total);
        eprintln!("{:<24} {:>20}", "states explored", self.states_explored);
        eprintln!("{:<24} {:>20}", "states pruned", self.states_pruned);
        eprintln!("{:<24} {:>20}", "ok", self.ok);
        eprintln!("{:<24} {:>20}", "checker_failed", self.checker_failed);
        eprintln!("{:<24} {:>20}", "pfs_unavailable", self.pfs_unavailable);
        eprintln!("{:<24} {:>20}", "replay_errors", self.replay_errors);
        eprintln!("{:-<48}", "");
    }

    pub fn write_json(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}
