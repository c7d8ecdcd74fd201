//! Replay driver (C8): restores the servers touched by each state's
//! symmetric difference, replays side effects, invokes the checker, and
//! classifies the outcome. Recovers via a full clean restart when a
//! snapshot copy or checker invocation hangs.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{info, warn};

use crate::call::{CallArena, CallId, CallKind};
use crate::crash_state::CrashState;
use crate::error::{CheckerFailed, PfsUnavailable, ReplayError};
use crate::sandbox::{full_clean_restart, RunOutcome, SandboxRunner, SnapshotBlob};
use crate::server::Server;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Ok,
    CheckerFailed,
    PfsUnavailable,
    ReplayError(String),
}

#[derive(Debug)]
pub struct StateResult {
    pub state_index: usize,
    pub verdict: Verdict,
    pub output_dir: PathBuf,
    /// Populated only when the state failed and had reorder victims:
    /// which single-victim omission(s) alone reproduce the failure.
    pub localized_victims: Vec<CallId>,
}

pub struct ReplayConfig {
    pub mount_point: PathBuf,
    pub checker: String,
    pub checker_timeout: Duration,
    pub save_timeout: Duration,
    pub output_root: PathBuf,
}

pub struct ReplayDriver<'a> {
    runner: &'a dyn SandboxRunner,
    servers: &'a [Server],
    config: ReplayConfig,
    last_snapshots: HashMap<String, SnapshotBlob>,
}

impl<'a> ReplayDriver<'a> {
    pub fn new(runner: &'a dyn SandboxRunner, servers: &'a [Server], config: ReplayConfig) -> Self {
        Self { runner, servers, config, last_snapshots: HashMap::new() }
    }

    pub fn seed_snapshot(&mut self, server: &str, blob: SnapshotBlob) {
        self.last_snapshots.insert(server.to_string(), blob);
    }

    /// Replays `tour` (a permutation of indices into `states`) in order,
    /// restoring only the servers each transition's symmetric difference
    /// touches.
    pub fn run_tour(
        &mut self,
        states: &[CrashState],
        tour: &[usize],
        arena: &CallArena,
    ) -> Vec<StateResult> {
        let mut results = Vec::new();
        let mut previous: Option<&CrashState> = None;

        for (ordinal, &idx) in tour.iter().enumerate() {
            let state = &states[idx];
            let touched: Vec<String> = match previous {
                Some(prev) => state.symmetric_diff_servers(prev, arena).into_iter().collect(),
                None => self.servers.iter().map(|s| s.name.clone()).collect(),
            };

            let result = self.replay_one(idx, ordinal, state, &touched, arena);
            if result.verdict == Verdict::CheckerFailed && !state.reorder_victims.is_empty() {
                let localized = self.localize_victims(state, arena);
                results.push(StateResult { localized_victims: localized, ..result });
            } else {
                results.push(result);
            }
            previous = Some(state);
        }
        results
    }

    fn replay_one(
        &mut self,
        state_index: usize,
        ordinal: usize,
        state: &CrashState,
        touched_servers: &[String],
        arena: &CallArena,
    ) -> StateResult {
        let output_dir = self.config.output_root.join(format!("prefixes/state-{ordinal:04}"));
        let _ = std::fs::create_dir_all(&output_dir);

        for server in self.servers.iter().filter(|s| touched_servers.contains(&s.name)) {
            if let Some(blob) = self.last_snapshots.get(&server.name).cloned() {
                if let Err(e) = self.runner.restore(server, &blob) {
                    return StateResult {
                        state_index,
                        verdict: Verdict::ReplayError(e.to_string()),
                        output_dir,
                        localized_victims: Vec::new(),
                    };
                }
            }
        }

        if let Err(e) = self.runner.start_fs(Some(
            &touched_servers.iter().map(String::as_str).collect::<Vec<_>>(),
        )) {
            return StateResult {
                state_index,
                verdict: Verdict::ReplayError(e.to_string()),
                output_dir,
                localized_victims: Vec::new(),
            };
        }

        if let Err(err) = self.apply_side_effects(state, touched_servers, arena) {
            warn!(state = state_index, error = %err, "replay side effect failed");
            return StateResult {
                state_index,
                verdict: Verdict::ReplayError(err.to_string()),
                output_dir,
                localized_victims: Vec::new(),
            };
        }

        match self.runner.copy_tree(&self.config.mount_point, &output_dir, self.config.save_timeout) {
            RunOutcome::Timeout => {
                warn!(state = state_index, "save copy timed out, recovering via full clean restart");
                let blobs: Vec<_> = self
                    .last_snapshots
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                let _ = full_clean_restart(self.runner, self.servers, &blobs);
                let _ = PfsUnavailable::SaveTimeout(self.config.save_timeout.as_secs());
                return StateResult { state_index, verdict: Verdict::PfsUnavailable, output_dir, localized_victims: Vec::new() };
            }
            RunOutcome::Fail(_) => {}
            RunOutcome::Ok => {}
        }

        match self.runner.run_checker(&self.config.checker, &self.config.mount_point, self.config.checker_timeout) {
            RunOutcome::Ok => {
                info!(state = state_index, "checker ok");
                StateResult { state_index, verdict: Verdict::Ok, output_dir, localized_victims: Vec::new() }
            }
            RunOutcome::Fail(code) => {
                let _ = CheckerFailed(code, state_index);
                StateResult { state_index, verdict: Verdict::CheckerFailed, output_dir, localized_victims: Vec::new() }
            }
            RunOutcome::Timeout => {
                let blobs: Vec<_> = self
                    .last_snapshots
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                let _ = full_clean_restart(self.runner, self.servers, &blobs);
                let _ = PfsUnavailable::CheckerTimeout(self.config.checker_timeout.as_secs());
                StateResult { state_index, verdict: Verdict::PfsUnavailable, output_dir, localized_victims: Vec::new() }
            }
        }
    }

    fn apply_side_effects(&self, state: &CrashState, touched: &[String], arena: &CallArena) -> Result<(), ReplayError> {
        let mut ordered: Vec<CallId> = state.calls.iter().copied().collect();
        ordered.sort_by_key(|&c| arena.get(c).gid);

        for id in ordered {
            let call = arena.get(id);
            if !touched.contains(&call.server) {
                continue;
            }
            let server = match self.servers.iter().find(|s| s.name == call.server) {
                Some(s) => s,
                None => continue,
            };
            perform_side_effect(server, call)?;
        }
        Ok(())
    }

    /// For a failed reordered state, independently re-runs with each
    /// single victim omitted from the base state to localize which
    /// reorder(s) alone reproduce the failure.
    fn localize_victims(&mut self, state: &CrashState, arena: &CallArena) -> Vec<CallId> {
        let mut confirmed = Vec::new();
        for &victim in &state.reorder_victims {
            // Testing victim `v` alone means omitting only `v` from the cut:
            // add back every *other* victim, not `v` itself.
            let mut trial_calls = state.calls.clone();
            for &other in &state.reorder_victims {
                if other != victim {
                    trial_calls.insert(other);
                }
            }
            let trial = CrashState::atomic(trial_calls, state.pivot);
            let touched: Vec<String> = trial.symmetric_diff_servers(state, arena).into_iter().collect();
            let result = self.replay_one(usize::MAX, usize::MAX, &trial, &touched, arena);
            if result.verdict == Verdict::CheckerFailed {
                confirmed.push(victim);
            }
        }
        confirmed
    }
}

fn perform_side_effect(server: &Server, call: &crate::call::Call) -> Result<(), ReplayError> {
    use std::fs::OpenOptions;
    use std::os::unix::fs::FileExt;

    let abs = |p: &str| -> PathBuf { Path::new(&server.data_path).join(p.trim_start_matches('/')) };

    match &call.kind {
        CallKind::Creat { path } => {
            let full = abs(path);
            std::fs::File::create(&full).map_err(|e| ReplayError::Io { op: "creat", path: full, source: e })?;
        }
        CallKind::Mkdir { path, .. } => {
            let full = abs(path);
            std::fs::create_dir_all(&full).map_err(|e| ReplayError::Io { op: "mkdir", path: full, source: e })?;
        }
        CallKind::Unlink { path } => {
            let full = abs(path);
            let _ = std::fs::remove_file(&full);
        }
        CallKind::Link { src, dst } => {
            let (s, d) = (abs(src), abs(dst));
            let _ = std::fs::hard_link(&s, &d);
        }
        CallKind::Rename { src, dst } => {
            let (s, d) = (abs(src), abs(dst));
            std::fs::rename(&s, &d).map_err(|e| ReplayError::Io { op: "rename", path: d, source: e })?;
        }
        CallKind::Truncate { path, length } => {
            let full = abs(path);
            let f = OpenOptions::new().write(true).create(true).open(&full)
                .map_err(|e| ReplayError::Io { op: "truncate", path: full.clone(), source: e })?;
            f.set_len(*length).map_err(|e| ReplayError::Io { op: "truncate", path: full, source: e })?;
        }
        CallKind::Pwrite { path, offset, bytes, .. } => {
            let full = abs(path);
            let f = OpenOptions::new().write(true).create(true).open(&full)
                .map_err(|e| ReplayError::Io { op: "pwrite", path: full.clone(), source: e })?;
            f.write_all_at(bytes, *offset).map_err(|e| ReplayError::Io { op: "pwrite", path: full, source: e })?;
        }
        CallKind::Setxattr { path, key, value } => {
            let full = abs(path);
            let _ = xattr_set(&full, key, value);
        }
        CallKind::Removexattr { path, key } => {
            let full = abs(path);
            let _ = xattr_remove(&full, key);
        }
        // Fsync/Sendto/Recvfrom/Barrier have no on-disk side effect during
        // replay: durability is modeled by which cut includes them, not by
        // re-issuing the syscall.
        CallKind::Fsync { .. } | CallKind::Sendto { .. } | CallKind::Recvfrom { .. } | CallKind::Barrier { .. } => {}
    }
    Ok(())
}

fn xattr_set(path: &Path, key: &str, value: &[u8]) -> std::io::Result<()> {
    let key = std::ffi::CString::new(key).map_err(|_| std::io::Error::from(std::io::ErrorKind::InvalidInput))?;
    let path_c = std::ffi::CString::new(path.as_os_str().as_encoded_bytes())
        .map_err(|_| std::io::Error::from(std::io::ErrorKind::InvalidInput))?;
    let rc = unsafe {
        libc::setxattr(
            path_c.as_ptr(),
            key.as_ptr(),
            value.as_ptr() as *const libc::c_void,
            value.len(),
            0,
        )
    };
    if rc != 0 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(())
    }
}

fn xattr_remove(path: &Path, key: &str) -> std::io::Result<()> {
    let key = std::ffi::CString::new(key).map_err(|_| std::io::Error::from(std::io::ErrorKind::InvalidInput))?;
    let path_c = std::ffi::CString::new(path.as_os_str().as_encoded_bytes())
        .map_err(|_| std::io::Error::from(std::io::ErrorKind::InvalidInput))?;
    let rc = unsafe { libc::removexattr(path_c.as_ptr(), key.as_ptr()) };
    if rc != 0 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(())
    }
}
