//! Cluster discovery (C9): resolves each configured service to a live pid,
//! builds its descriptor/socket-peer table from `lsof`/`/proc`, and its
//! file-size table by walking its data path.

use std::collections::HashMap;
use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result};
use pfs_core::server::{ProcessTables, Server, ServerRole};

use crate::config::{ClusterConfig, ServiceConfig};

/// Finds the pid(s) of `exec`, then disambiguates by matching `tag`
/// against `/proc/<pid>/cmdline` — rejecting a match where the character
/// right after the tag is itself a digit, so a tag that is a strict
/// prefix of another configured tag never falsely matches.
pub fn resolve_pid(exec: &str, tag: &str) -> Option<u32> {
    let output = Command::new("pidof").arg(exec).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    for candidate in stdout.split_whitespace() {
        let pid: u32 = candidate.parse().ok()?;
        let cmdline = std::fs::read(format!("/proc/{pid}/cmdline")).ok()?;
        let cmdline = String::from_utf8_lossy(&cmdline).replace('\0', " ");
        if cmdline_matches_tag(&cmdline, tag) {
            return Some(pid);
        }
    }
    None
}

/// True if `tag` appears in `cmdline` as a whole token, not as a strict
/// prefix of a longer tag (e.g. `storage0` must not match a cmdline that
/// only contains `storage01`).
fn cmdline_matches_tag(cmdline: &str, tag: &str) -> bool {
    match cmdline.find(tag) {
        Some(pos) => {
            let after = cmdline.as_bytes().get(pos + tag.len());
            !after.map(|b| b.is_ascii_digit()).unwrap_or(false)
        }
        None => false,
    }
}

/// Parses `lsof -i -P -p <pid>` to resolve the service's established TCP
/// peers, then maps destination ports back to configured service names
/// (an unmatched destination resolves to the client).
pub fn build_socket_table(pid: u32, services: &[ServiceConfig], client_name: &str) -> HashMap<i64, String> {
    let mut table = HashMap::new();
    let Ok(output) = Command::new("lsof").args(["-i", "-P", "-p", &pid.to_string()]).output() else {
        return table;
    };
    let text = String::from_utf8_lossy(&output.stdout);
    for line in text.lines().skip(1) {
        let cols: Vec<&str> = line.split_whitespace().collect();
        if cols.len() < 9 {
            continue;
        }
        let fd_field = cols[3].trim_end_matches(|c: char| !c.is_ascii_digit());
        let Ok(fd) = fd_field.parse::<i64>() else { continue };
        let name_field = cols[8];
        let Some(peer_host_port) = name_field.split("->").nth(1) else { continue };
        let peer = services
            .iter()
            .find(|s| peer_host_port.starts_with(&s.host))
            .map(|s| s.name.clone())
            .unwrap_or_else(|| client_name.to_string());
        table.insert(fd, peer);
    }
    table
}

/// Walks `/proc/<pid>/fd` to seed the descriptor table with files already
/// open under the service's data path at discovery time.
pub fn build_fd_table(pid: u32, data_path: &str) -> HashMap<i64, String> {
    let mut table = HashMap::new();
    let dir = format!("/proc/{pid}/fd");
    let Ok(entries) = std::fs::read_dir(&dir) else { return table };
    for entry in entries.flatten() {
        let Ok(fd) = entry.file_name().to_string_lossy().parse::<i64>() else { continue };
        if let Ok(target) = std::fs::read_link(entry.path()) {
            let target = target.to_string_lossy().to_string();
            if target.starts_with(data_path) {
                table.insert(fd, target);
            }
        }
    }
    table
}

/// Recursively records on-disk file sizes under a service's data
/// directories, seeding the append-detection logic in ingest.
pub fn build_size_table(data_path: &str, data_dirs: &[String]) -> HashMap<String, u64> {
    let mut table = HashMap::new();
    for dir in data_dirs {
        let root = Path::new(data_path).join(dir);
        walk_sizes(&root, &mut table);
    }
    table
}

fn walk_sizes(dir: &Path, out: &mut HashMap<String, u64>) {
    let Ok(entries) = std::fs::read_dir(dir) else { return };
    for entry in entries.flatten() {
        let path = entry.path();
        if let Ok(meta) = entry.metadata() {
            if meta.is_dir() {
                walk_sizes(&path, out);
            } else {
                out.insert(path.to_string_lossy().to_string(), meta.len());
            }
        }
    }
}

pub struct DiscoveredServer {
    pub server: Server,
    pub tables: ProcessTables,
}

/// Discovers every service in the cluster config, returning a `Server`
/// plus a seeded `ProcessTables` for each.
pub fn discover_cluster(config: &ClusterConfig) -> Result<Vec<DiscoveredServer>> {
    let mut out = Vec::with_capacity(config.services.len());
    for svc in &config.services {
        let pid = resolve_pid(&svc.exec, &svc.tag);
        let mut tables = ProcessTables::new();

        if let Some(pid) = pid {
            for (fd, peer) in build_socket_table(pid, &config.services, &config.global.client_name) {
                tables.seed_socket(fd, peer);
            }
            for (fd, path) in build_fd_table(pid, &svc.data_path) {
                tables.set_desc(fd, path);
            }
        }
        for (path, size) in build_size_table(&svc.data_path, &svc.data_dirs) {
            tables.seed_size(path, size);
        }

        let server = Server {
            name: svc.name.clone(),
            role: svc.role,
            exec: svc.exec.clone(),
            tag: svc.tag.clone(),
            host: svc.host.clone(),
            data_path: svc.data_path.clone(),
            data_dirs: svc.data_dirs.clone(),
            pid,
        };
        out.push(DiscoveredServer { server, tables });
    }
    Ok(out)
}

/// Resolves the ordered list of storage servers holding a file's stripes.
/// BeeGFS/OrangeFS use their introspection tool's text output; GlusterFS
/// has none and falls back to the configured `entryinfo_hints`.
pub fn entryinfo(config: &ClusterConfig, relative_path: &str) -> Result<Vec<String>> {
    if !config.global.fs_type.has_entryinfo_tool() {
        return config
            .global
            .entryinfo_hints
            .clone()
            .context("glusterfs requires global.entryinfo_hints since it has no introspection tool");
    }
    let cmd = config.global.fs_type.entryinfo_command(relative_path);
    let output = Command::new(&cmd[0])
        .args(&cmd[1..])
        .output()
        .with_context(|| format!("running entryinfo tool {:?}", cmd))?;
    let text = String::from_utf8_lossy(&output.stdout);
    let hosts: Vec<String> = text
        .lines()
        .filter_map(|l| {
            config
                .services
                .iter()
                .find(|s| s.role == ServerRole::Storage && l.contains(&s.host))
                .map(|s| s.name.clone())
        })
        .collect();
    Ok(hosts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_matches_as_whole_token() {
        assert!(cmdline_matches_tag("/usr/sbin/beegfs-storage --cfgFile=storage0.conf", "storage0"));
    }

    #[test]
    fn tag_does_not_match_as_strict_prefix_of_longer_tag() {
        assert!(!cmdline_matches_tag("/usr/sbin/beegfs-storage --cfgFile=storage01.conf", "storage0"));
    }
}
