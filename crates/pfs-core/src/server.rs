//! Server identity and the side-tables ingest needs to resolve descriptors,
//! file sizes, and socket peers while walking a raw trace.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerRole {
    Metadata,
    Storage,
}

#[derive(Debug, Clone)]
pub struct Server {
    pub name: String,
    pub role: ServerRole,
    pub exec: String,
    pub tag: String,
    pub host: String,
    pub data_path: String,
    pub data_dirs: Vec<String>,
    pub pid: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Set,
    Cur,
    End,
}

/// Per-process descriptor/size/socket state, live only during ingest.
#[derive(Debug, Default)]
pub struct ProcessTables {
    /// fd -> (path, current offset)
    descriptors: HashMap<i64, (String, u64)>,
    /// path -> size-on-disk as recovered so far
    sizes: HashMap<String, u64>,
    /// fd -> peer service name, seeded from discovery
    sockets: HashMap<i64, String>,
}

impl ProcessTables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_socket(&mut self, fd: i64, peer: impl Into<String>) {
        self.sockets.insert(fd, peer.into());
    }

    pub fn seed_size(&mut self, path: impl Into<String>, size: u64) {
        self.sizes.insert(path.into(), size);
    }

    pub fn set_desc(&mut self, fd: i64, path: impl Into<String>) {
        self.descriptors.insert(fd, (path.into(), 0));
    }

    pub fn remove_desc(&mut self, fd: i64) {
        self.descriptors.remove(&fd);
    }

    pub fn get_desc(&self, fd: i64) -> Option<&(String, u64)> {
        self.descriptors.get(&fd)
    }

    pub fn get_offset(&self, fd: i64) -> Option<u64> {
        self.descriptors.get(&fd).map(|(_, off)| *off)
    }

    pub fn set_offset(&mut self, fd: i64, whence: Whence, value: i64) {
        let size = self
            .descriptors
            .get(&fd)
            .map(|(p, _)| *self.sizes.get(p).unwrap_or(&0))
            .unwrap_or(0);
        if let Some(entry) = self.descriptors.get_mut(&fd) {
            let base = match whence {
                Whence::Set => 0,
                Whence::Cur => entry.1 as i64,
                Whence::End => size as i64,
            };
            entry.1 = (base + value).max(0) as u64;
        }
    }

    pub fn advance_offset(&mut self, fd: i64, by: u64) {
        if let Some(entry) = self.descriptors.get_mut(&fd) {
            entry.1 += by;
        }
    }

    pub fn peer(&self, fd: i64) -> Option<&str> {
        self.sockets.get(&fd).map(String::as_str)
    }

    pub fn size_of(&self, path: &str) -> u64 {
        *self.sizes.get(path).unwrap_or(&0)
    }

    /// Records a write, returning whether it extended the file (append).
    pub fn record_write(&mut self, path: &str, offset: u64, length: u64) -> bool {
        let size_before = self.size_of(path);
        let end = offset + length;
        let is_append = end > size_before;
        if is_append {
            self.sizes.insert(path.to_string(), end);
        }
        is_append
    }
}
