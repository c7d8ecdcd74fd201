//! The sandbox-runner abstraction (§9): everything the replay driver
//! needs from a concrete cluster deployment, behind one interface so the
//! core never has to know which file system it is driving.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, Instant};

use crate::fsconfig::FsType;
use crate::server::Server;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Ok,
    Fail(Option<i32>),
    Timeout,
}

/// Opaque handle to a snapshot taken by `snapshot`; in the process-backed
/// implementation this is the tar file's path.
#[derive(Debug, Clone)]
pub struct SnapshotBlob(pub PathBuf);

pub trait SandboxRunner {
    fn snapshot(&self, server: &Server, dest_dir: &Path) -> io::Result<SnapshotBlob>;
    fn restore(&self, server: &Server, blob: &SnapshotBlob) -> io::Result<()>;
    fn start_fs(&self, whitelist: Option<&[&str]>) -> io::Result<()>;
    fn stop_fs(&self, whitelist: Option<&[&str]>) -> io::Result<()>;
    fn run_checker(&self, checker: &str, cwd: &Path, timeout: Duration) -> RunOutcome;
    fn copy_tree(&self, src: &Path, dst: &Path, timeout: Duration) -> RunOutcome;
}

/// Drives a concrete cluster through `std::process::Command` — the same
/// idiom the rest of the ambient stack uses for `systemctl`/`curl`/`which`
/// subprocess orchestration, generalized to tar/mount/checker invocation.
pub struct ProcessSandbox {
    pub fs_type: FsType,
    pub servers: Vec<Server>,
}

impl ProcessSandbox {
    pub fn new(fs_type: FsType, servers: Vec<Server>) -> Self {
        Self { fs_type, servers }
    }

    fn service_names(&self, whitelist: Option<&[&str]>) -> Vec<&str> {
        self.servers
            .iter()
            .map(|s| s.name.as_str())
            .filter(|n| whitelist.map(|w| w.contains(n)).unwrap_or(true))
            .collect()
    }

    fn run_with_timeout(mut cmd: Command, timeout: Duration) -> RunOutcome {
        let start = Instant::now();
        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(_) => return RunOutcome::Fail(None),
        };
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return status.code().map(|c| if c == 0 { RunOutcome::Ok } else { RunOutcome::Fail(Some(c)) }).unwrap_or(RunOutcome::Fail(None)),
                Ok(None) => {
                    if start.elapsed() >= timeout {
                        let _ = child.kill();
                        let _ = child.wait();
                        return RunOutcome::Timeout;
                    }
                    std::thread::sleep(Duration::from_millis(50));
                }
                Err(_) => return RunOutcome::Fail(None),
            }
        }
    }
}

impl SandboxRunner for ProcessSandbox {
    fn snapshot(&self, server: &Server, dest_dir: &Path) -> io::Result<SnapshotBlob> {
        let tar_path = dest_dir.join(format!("{}.tar", server.name));
        let mut cmd = Command::new("tar");
        cmd.arg("--xattrs").arg("--xattrs-include=*").arg("-cf").arg(&tar_path).arg("-C").arg(&server.data_path);
        cmd.args(&server.data_dirs);
        let status = cmd.status()?;
        if !status.success() {
            return Err(io::Error::other("snapshot tar failed"));
        }
        Ok(SnapshotBlob(tar_path))
    }

    fn restore(&self, server: &Server, blob: &SnapshotBlob) -> io::Result<()> {
        if self.fs_type.removes_internal_cache_on_restore() {
            let cache = Path::new(&server.data_path).join(".glusterfs");
            if cache.exists() {
                std::fs::remove_dir_all(&cache)?;
            }
        }
        for dir in &server.data_dirs {
            let full = Path::new(&server.data_path).join(dir);
            if full.exists() {
                std::fs::remove_dir_all(&full)?;
            }
        }
        let status = Command::new("tar").arg("-xf").arg(&blob.0).arg("-C").arg(&server.data_path).status()?;
        if !status.success() {
            return Err(io::Error::other("restore tar failed"));
        }
        Ok(())
    }

    fn start_fs(&self, whitelist: Option<&[&str]>) -> io::Result<()> {
        let names = self.service_names(whitelist);
        for cmd_args in self.fs_type.start_commands(&names) {
            run_command(&cmd_args)?;
        }
        std::thread::sleep(Duration::from_millis(800));
        Ok(())
    }

    fn stop_fs(&self, whitelist: Option<&[&str]>) -> io::Result<()> {
        let names = self.service_names(whitelist);
        for cmd_args in self.fs_type.stop_commands(&names) {
            run_command(&cmd_args)?;
        }
        Ok(())
    }

    fn run_checker(&self, checker: &str, cwd: &Path, timeout: Duration) -> RunOutcome {
        let mut cmd = Command::new(checker);
        cmd.current_dir(cwd);
        Self::run_with_timeout(cmd, timeout)
    }

    fn copy_tree(&self, src: &Path, dst: &Path, timeout: Duration) -> RunOutcome {
        let mut cmd = Command::new("cp");
        cmd.arg("-r").arg(src).arg(dst);
        Self::run_with_timeout(cmd, timeout)
    }
}

fn run_command(args: &[String]) -> io::Result<()> {
    if args.is_empty() {
        return Ok(());
    }
    let status = Command::new(&args[0]).args(&args[1..]).status()?;
    if !status.success() {
        tracing::warn!(cmd = ?args, "sandbox lifecycle command exited non-zero");
    }
    Ok(())
}

/// Recovery path used when a snapshot copy or checker invocation hangs:
/// stop the whole cluster, restore every server from its last-known-good
/// snapshot, and start again, discarding whatever partial state the hang
/// may have left behind.
pub fn full_clean_restart(
    runner: &dyn SandboxRunner,
    servers: &[Server],
    blobs: &[(String, SnapshotBlob)],
) -> io::Result<()> {
    runner.stop_fs(None)?;
    for server in servers {
        if let Some((_, blob)) = blobs.iter().find(|(name, _)| name == &server.name) {
            runner.restore(server, blob)?;
        }
    }
    runner.start_fs(None)?;
    Ok(())
}
