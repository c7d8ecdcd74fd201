//! Trace ingest (C2): turns raw kernel-dialect or recorder-dialect trace
//! lines into `Call`s, maintaining the per-process descriptor/size tables
//! as it goes and assigning the global gid order once all files are read.

use std::collections::HashMap;
use std::path::Path;

use crate::call::{Call, CallArena, CallId, CallKind};
use crate::error::IngestError;
use crate::server::{ProcessTables, Whence};

const EPSILON: f64 = 1e-6;

/// Decodes the three payload encodings the two trace dialects use:
/// strace's `\xNN` groups, the recorder's `0xNN` groups, or a plain escaped
/// string.
pub fn parse_string(raw: &str) -> Vec<u8> {
    if let Some(body) = raw.strip_prefix("\\x").map(|_| raw) {
        return decode_hex_groups(body, "\\x", 4);
    }
    if raw.starts_with("0x") {
        return decode_hex_groups(raw, "0x", 4);
    }
    unescape(raw)
}

fn decode_hex_groups(raw: &str, prefix: &str, group_len: usize) -> Vec<u8> {
    let mut out = Vec::new();
    let mut rest = raw;
    while let Some(stripped) = rest.strip_prefix(prefix) {
        if stripped.len() < group_len - prefix.len() {
            break;
        }
        let (hex, tail) = stripped.split_at(group_len - prefix.len());
        if let Ok(byte) = u8::from_str_radix(hex, 16) {
            out.push(byte);
        }
        rest = tail;
    }
    out
}

fn unescape(raw: &str) -> Vec<u8> {
    raw.as_bytes().to_vec()
}

/// A single parsed kernel-dialect (strace-style) line.
#[derive(Debug)]
pub struct KernelLine {
    pub timestamp: f64,
    pub name: String,
    pub args: Vec<String>,
    pub retval: i64,
    pub errmsg: Option<String>,
}

/// Parses `<ts> <name>(<args>) = <ret>|-<errno> <msg>`.
pub fn parse_strace(line: &str) -> Option<KernelLine> {
    let line = line.trim();
    let sp = line.find(' ')?;
    let timestamp: f64 = line[..sp].parse().ok()?;
    let rest = line[sp..].trim_start();

    let open = rest.find('(')?;
    let name = rest[..open].to_string();
    let close = rest.rfind(')')?;
    let args_str = &rest[open + 1..close];
    let args = split_args(args_str);

    let tail = rest[close + 1..].trim_start();
    let tail = tail.strip_prefix('=')?.trim_start();
    if let Some(stripped) = tail.strip_prefix('-') {
        let mut parts = stripped.splitn(2, ' ');
        let errno: i64 = parts.next()?.parse().ok()?;
        let msg = parts.next().map(|s| s.trim().to_string());
        Some(KernelLine { timestamp, name, args, retval: -errno, errmsg: msg })
    } else {
        let mut parts = tail.splitn(2, ' ');
        let retval: i64 = parts.next()?.parse().ok()?;
        Some(KernelLine { timestamp, name, args, retval, errmsg: None })
    }
}

fn split_args(s: &str) -> Vec<String> {
    // Arguments are comma-separated but may contain quoted strings with
    // embedded commas; track quote state while splitting.
    let mut out = Vec::new();
    let mut cur = String::new();
    let mut in_quotes = false;
    for c in s.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                cur.push(c);
            }
            ',' if !in_quotes => {
                out.push(cur.trim().trim_matches('"').to_string());
                cur.clear();
            }
            _ => cur.push(c),
        }
    }
    if !cur.trim().is_empty() {
        out.push(cur.trim().trim_matches('"').to_string());
    }
    out
}

/// A single parsed recorder-dialect (MPI-I/O Recorder) line.
#[derive(Debug)]
pub struct RecorderLine {
    pub t_start: f64,
    pub t_end: f64,
    pub retval: i64,
    pub name: String,
    pub args: Vec<String>,
}

pub fn parse_recorder(line: &str) -> Option<RecorderLine> {
    let mut it = line.split_whitespace();
    let t_start: f64 = it.next()?.parse().ok()?;
    let t_end: f64 = it.next()?.parse().ok()?;
    let retval: i64 = it.next()?.parse().ok()?;
    let name = it.next()?.to_string();
    let args: Vec<String> = it.map(String::from).collect();
    Some(RecorderLine { t_start, t_end, retval, name, args })
}

fn resolve_path(fd_or_path: &str, tables: &ProcessTables) -> String {
    if fd_or_path == "AT_FDCWD" {
        return ".".to_string();
    }
    if let Ok(fd) = fd_or_path.parse::<i64>() {
        if let Some((path, _)) = tables.get_desc(fd) {
            return path.clone();
        }
    }
    fd_or_path.trim_matches('"').to_string()
}

/// Ingests one kernel-dialect trace file for a single server process,
/// pushing calls into `arena` and returning their ids in file order.
/// `sizes`/`sockets` should already be seeded from discovery before the
/// first call.
pub fn ingest_kernel_trace(
    path: &Path,
    server: &str,
    arena: &mut CallArena,
    tables: &mut ProcessTables,
) -> Result<Vec<CallId>, IngestError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| IngestError::MalformedLine(path.to_path_buf(), 0, e.to_string()))?;
    let mut out = Vec::new();
    for (lineno, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let parsed = parse_strace(line).ok_or_else(|| {
            IngestError::MalformedLine(path.to_path_buf(), lineno + 1, line.to_string())
        })?;
        if let Some(id) = dispatch_kernel(&parsed, server, arena, tables)? {
            out.push(id);
        }
    }
    Ok(out)
}

fn push(arena: &mut CallArena, server: &str, ts: f64, kind: CallKind, retval: i64) -> CallId {
    arena.push(Call {
        gid: 0,
        local_id: 0,
        server: server.to_string(),
        timestamp: ts,
        kind,
        retval,
        error: None,
        correlated_call: None,
    })
}

fn dispatch_kernel(
    l: &KernelLine,
    server: &str,
    arena: &mut CallArena,
    t: &mut ProcessTables,
) -> Result<Option<CallId>, IngestError> {
    let name = l.name.as_str();
    let ts = l.timestamp;
    match name {
        "unlink" | "unlinkat" => {
            let path = resolve_path(l.args.last().map(String::as_str).unwrap_or(""), t);
            Ok(Some(push(arena, server, ts, CallKind::Unlink { path }, l.retval)))
        }
        "mkdir" | "mkdirat" => {
            let path = resolve_path(l.args.first().map(String::as_str).unwrap_or(""), t);
            let mode = l.args.last().and_then(|s| s.parse().ok()).unwrap_or(0o755);
            Ok(Some(push(arena, server, ts, CallKind::Mkdir { path, mode }, l.retval)))
        }
        "setxattr" | "fsetxattr" | "lsetxattr" => {
            let path = resolve_path(l.args.first().map(String::as_str).unwrap_or(""), t);
            let key = l.args.get(1).cloned().unwrap_or_default();
            let value = l.args.get(2).map(|s| parse_string(s)).unwrap_or_default();
            Ok(Some(push(arena, server, ts, CallKind::Setxattr { path, key, value }, l.retval)))
        }
        "lremovexattr" => {
            let path = resolve_path(l.args.first().map(String::as_str).unwrap_or(""), t);
            let key = l.args.get(1).cloned().unwrap_or_default();
            Ok(Some(push(arena, server, ts, CallKind::Removexattr { path, key }, l.retval)))
        }
        "link" | "linkat" => {
            let src = resolve_path(l.args.first().map(String::as_str).unwrap_or(""), t);
            let dst = resolve_path(l.args.get(1).map(String::as_str).unwrap_or(""), t);
            Ok(Some(push(arena, server, ts, CallKind::Link { src, dst }, l.retval)))
        }
        "rename" | "renameat" | "renameat2" => {
            let src = resolve_path(l.args.first().map(String::as_str).unwrap_or(""), t);
            let dst = resolve_path(l.args.get(1).map(String::as_str).unwrap_or(""), t);
            Ok(Some(push(arena, server, ts, CallKind::Rename { src, dst }, l.retval)))
        }
        "open" | "open64" | "openat" => {
            let has_creat = l.args.iter().any(|a| a.contains("O_CREAT"));
            let fd = l.retval;
            let path = resolve_path(l.args.get(if name == "openat" { 1 } else { 0 }).map(String::as_str).unwrap_or(""), t);
            if fd >= 0 {
                t.set_desc(fd, path.clone());
            }
            if has_creat && fd >= 0 {
                Ok(Some(push(arena, server, ts, CallKind::Creat { path }, l.retval)))
            } else {
                Ok(None)
            }
        }
        "lseek" | "lseek64" => {
            let fd: i64 = l.args.first().and_then(|s| s.parse().ok()).unwrap_or(-1);
            let value: i64 = l.args.get(1).and_then(|s| s.parse().ok()).unwrap_or(0);
            let whence = match l.args.get(2).map(String::as_str) {
                Some(w) if w.contains("SEEK_CUR") => Whence::Cur,
                Some(w) if w.contains("SEEK_END") => Whence::End,
                _ => Whence::Set,
            };
            t.set_offset(fd, whence, value);
            Ok(None)
        }
        "close" => {
            let fd: i64 = l.args.first().and_then(|s| s.parse().ok()).unwrap_or(-1);
            t.remove_desc(fd);
            Ok(None)
        }
        "ftruncate" | "truncate" => {
            let path = if name == "truncate" {
                resolve_path(l.args.first().map(String::as_str).unwrap_or(""), t)
            } else {
                let fd: i64 = l.args.first().and_then(|s| s.parse().ok()).unwrap_or(-1);
                t.get_desc(fd).map(|(p, _)| p.clone()).ok_or(IngestError::UnknownDescriptor(fd))?
            };
            let length: u64 = l.args.last().and_then(|s| s.parse().ok()).unwrap_or(0);
            Ok(Some(push(arena, server, ts, CallKind::Truncate { path, length }, l.retval)))
        }
        "pwrite64" | "pwrite" | "write" => {
            let fd: i64 = l.args.first().and_then(|s| s.parse().ok()).unwrap_or(-1);
            let (path, _) = t.get_desc(fd).cloned().ok_or(IngestError::UnknownDescriptor(fd))?;
            let bytes = l.args.get(1).map(|s| parse_string(s)).unwrap_or_default();
            let length = l.retval.max(0) as u64;
            let offset = if name == "write" {
                let off = t.get_offset(fd).unwrap_or(0);
                t.advance_offset(fd, length);
                off
            } else {
                l.args.get(2).and_then(|s| s.parse().ok()).unwrap_or(0)
            };
            let is_append = t.record_write(&path, offset, length);
            Ok(Some(push(
                arena,
                server,
                ts,
                CallKind::Pwrite { path, offset, length, bytes, is_append },
                l.retval,
            )))
        }
        "fsync" | "fdatasync" => {
            let fd: i64 = l.args.first().and_then(|s| s.parse().ok()).unwrap_or(-1);
            let path = t.get_desc(fd).map(|(p, _)| p.clone()).unwrap_or_default();
            Ok(Some(push(arena, server, ts, CallKind::Fsync { path }, l.retval)))
        }
        "sendto" | "writev" => {
            let fd: i64 = l.args.first().and_then(|s| s.parse().ok()).unwrap_or(-1);
            if l.args.iter().any(|a| a.contains("MSG_PEEK")) {
                return Ok(None);
            }
            let peer = t.peer(fd).unwrap_or("client").to_string();
            let bytes = if name == "writev" {
                Vec::new()
            } else {
                l.args.get(1).map(|s| parse_string(s)).unwrap_or_default()
            };
            Ok(Some(push(arena, server, ts, CallKind::Sendto { peer, bytes }, l.retval)))
        }
        "recvfrom" | "readv" => {
            let fd: i64 = l.args.first().and_then(|s| s.parse().ok()).unwrap_or(-1);
            if l.args.iter().any(|a| a.contains("MSG_PEEK")) {
                return Ok(None);
            }
            let peer = t.peer(fd).unwrap_or("client").to_string();
            let bytes = if name == "readv" {
                Vec::new()
            } else {
                l.args.get(1).map(|s| parse_string(s)).unwrap_or_default()
            };
            Ok(Some(push(arena, server, ts, CallKind::Recvfrom { peer, bytes }, l.retval)))
        }
        _ => Ok(None),
    }
}

/// Ingests one recorder-dialect trace file for a single MPI rank.
pub fn ingest_recorder_trace(
    path: &Path,
    rank_name: &str,
    arena: &mut CallArena,
    t: &mut ProcessTables,
) -> Result<Vec<CallId>, IngestError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| IngestError::MalformedLine(path.to_path_buf(), 0, e.to_string()))?;
    let mut out = Vec::new();
    for (lineno, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let parsed = parse_recorder(line).ok_or_else(|| {
            IngestError::MalformedLine(path.to_path_buf(), lineno + 1, line.to_string())
        })?;
        let mut ids = dispatch_recorder(&parsed, rank_name, arena, t)?;
        out.append(&mut ids);
    }
    Ok(out)
}

fn dispatch_recorder(
    l: &RecorderLine,
    rank: &str,
    arena: &mut CallArena,
    t: &mut ProcessTables,
) -> Result<Vec<CallId>, IngestError> {
    let ts = l.t_start;
    match l.name.as_str() {
        "PMPI_File_open" => {
            let creates = l.args.iter().any(|a| a.contains("MPI_MODE_CREATE"));
            let fd: i64 = i64::from_str_radix(l.args.last().unwrap_or(&"0".into()).trim_start_matches("0x"), 16).unwrap_or(0);
            let path = l.args.first().cloned().unwrap_or_default();
            t.set_desc(fd, path.clone());
            if creates {
                Ok(vec![push(arena, rank, ts, CallKind::Creat { path }, l.retval)])
            } else {
                Ok(vec![])
            }
        }
        "PMPI_File_write_at_all" => {
            let path = l.args.first().cloned().unwrap_or_default();
            let offset: u64 = l.args.get(1).and_then(|s| s.parse().ok()).unwrap_or(0);
            let length = l.retval.max(0) as u64;
            let barrier = push(arena, rank, ts, CallKind::Barrier { barrier_id: 0 }, 0);
            let is_append = t.record_write(&path, offset, length);
            let write = push(
                arena,
                rank,
                ts + EPSILON,
                CallKind::Pwrite { path, offset, length, bytes: Vec::new(), is_append },
                l.retval,
            );
            Ok(vec![barrier, write])
        }
        "PMPI_File_write_at" => {
            let path = l.args.first().cloned().unwrap_or_default();
            let offset: u64 = l.args.get(1).and_then(|s| s.parse().ok()).unwrap_or(0);
            let length = l.retval.max(0) as u64;
            let is_append = t.record_write(&path, offset, length);
            Ok(vec![push(
                arena,
                rank,
                ts,
                CallKind::Pwrite { path, offset, length, bytes: Vec::new(), is_append },
                l.retval,
            )])
        }
        "PMPI_File_sync" => {
            let path = l.args.first().cloned().unwrap_or_default();
            Ok(vec![push(arena, rank, ts, CallKind::Fsync { path }, l.retval)])
        }
        "PMPI_Barrier" | "PMPI_Bcast" | "PMPI_File_close" | "PMPI_File_set_view" => {
            Ok(vec![push(arena, rank, ts, CallKind::Barrier { barrier_id: 0 }, l.retval)])
        }
        _ => Ok(vec![]),
    }
}

/// Two-phase cross-server Sendto/Recvfrom correlation (`format_sendrecv`):
/// first merges a header frame with the body Recvfrom that immediately
/// follows it on the same peer, then pairs each Sendto with the next
/// unclaimed Recvfrom from the destination, in timestamp order, via a
/// per-(dest, src) FIFO queue.
pub fn correlate_send_recv(
    arena: &mut CallArena,
    calls: &[CallId],
    client_name: &str,
    header_magic: &[u8],
    header_len: usize,
) {
    merge_header_frames(arena, calls, header_magic, header_len);

    let mut ordered: Vec<CallId> = calls.to_vec();
    ordered.sort_by_key(|&c| (arena.get(c).gid, c));

    let mut recv_queues: HashMap<(String, String), Vec<CallId>> = HashMap::new();
    for &id in &ordered {
        let call = arena.get(id);
        if let CallKind::Recvfrom { peer, .. } = &call.kind {
            if peer == client_name {
                continue;
            }
            recv_queues
                .entry((call.server.clone(), peer.clone()))
                .or_default()
                .push(id);
        }
    }

    for &id in &ordered {
        let (server, peer, is_send) = {
            let call = arena.get(id);
            match &call.kind {
                CallKind::Sendto { peer, .. } => (call.server.clone(), peer.clone(), true),
                _ => continue,
            }
        };
        if peer == client_name || !is_send {
            continue;
        }
        if let Some(queue) = recv_queues.get_mut(&(peer.clone(), server.clone())) {
            if !queue.is_empty() {
                let recv_id = queue.remove(0);
                arena.get_mut(id).correlated_call = Some(recv_id);
                arena.get_mut(recv_id).correlated_call = Some(id);
            }
        }
    }
}

fn merge_header_frames(arena: &mut CallArena, calls: &[CallId], magic: &[u8], header_len: usize) {
    let mut ordered: Vec<CallId> = calls.to_vec();
    ordered.sort_by_key(|&c| (arena.get(c).gid, c));
    let mut i = 0;
    while i + 1 < ordered.len() {
        let (is_header, peer_a, bytes_len) = {
            let call = arena.get(ordered[i]);
            match &call.kind {
                CallKind::Recvfrom { peer, bytes } => {
                    (bytes.len() == header_len && bytes.starts_with(magic), peer.clone(), bytes.len())
                }
                _ => (false, String::new(), 0),
            }
        };
        let _ = bytes_len;
        if is_header {
            let peer_b = match &arena.get(ordered[i + 1]).kind {
                CallKind::Recvfrom { peer, .. } => Some(peer.clone()),
                _ => None,
            };
            if peer_b.as_deref() == Some(peer_a.as_str()) {
                let body_bytes = match &arena.get(ordered[i + 1]).kind {
                    CallKind::Recvfrom { bytes, .. } => bytes.clone(),
                    _ => Vec::new(),
                };
                let body_ret = arena.get(ordered[i + 1]).retval;
                let header = arena.get_mut(ordered[i]);
                if let CallKind::Recvfrom { bytes, .. } = &mut header.kind {
                    bytes.extend(body_bytes);
                }
                header.retval += body_ret;
            }
        }
        i += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strace_line_roundtrips_pwrite() {
        let l = parse_strace("1.000001 pwrite64(4, \"hello\", 5, 0) = 5").unwrap();
        assert_eq!(l.name, "pwrite64");
        assert_eq!(l.retval, 5);
        assert_eq!(l.args[0], "4");
    }

    #[test]
    fn hex_groups_decode() {
        assert_eq!(parse_string("\\x68\\x69"), vec![0x68, 0x69]);
        assert_eq!(parse_string("0x680x69"), vec![0x68, 0x69]);
    }
}
