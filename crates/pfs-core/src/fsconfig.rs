//! Small per-file-system strategy table (§9): the frame-header sentinel
//! C2/C4 need for Sendto/Recvfrom correlation, and the lifecycle commands
//! the sandbox runner drives for each supported cluster file system.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsType {
    BeeGfs,
    OrangeFs,
    GlusterFs,
}

impl fmt::Display for FsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FsType::BeeGfs => "beegfs",
            FsType::OrangeFs => "orangefs",
            FsType::GlusterFs => "glusterfs",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for FsType {
    type Err = crate::error::ConfigError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "beegfs" => Ok(FsType::BeeGfs),
            "orangefs" => Ok(FsType::OrangeFs),
            "glusterfs" => Ok(FsType::GlusterFs),
            other => Err(crate::error::ConfigError::UnknownFsType(other.to_string())),
        }
    }
}

pub struct FrameHeader {
    pub magic: &'static [u8],
    pub len: usize,
}

impl FsType {
    pub fn frame_header(&self) -> FrameHeader {
        match self {
            FsType::BeeGfs => FrameHeader { magic: &[0x53, 0x46, 0x47, 0x42], len: 40 },
            FsType::OrangeFs => FrameHeader { magic: &[0xBF, 0xCA, 0x00, 0x00], len: 24 },
            FsType::GlusterFs => FrameHeader { magic: &[0x80, 0x00, 0x00, 0x80], len: 4 },
        }
    }

    /// Whether this file system exposes a striping-introspection tool
    /// (`beegfs-ctl --getentryinfo` / `pvfs2-viewdist`); GlusterFS has none
    /// and relies on the operator-supplied `entryinfo_hints`.
    pub fn has_entryinfo_tool(&self) -> bool {
        !matches!(self, FsType::GlusterFs)
    }

    pub fn entryinfo_command(&self, path: &str) -> Vec<String> {
        match self {
            FsType::BeeGfs => vec!["beegfs-ctl".into(), "--getentryinfo".into(), path.into()],
            FsType::OrangeFs => vec!["pvfs2-viewdist".into(), "-f".into(), path.into()],
            FsType::GlusterFs => vec![],
        }
    }

    /// Commands to start the named service(s), honoring an optional
    /// whitelist/blocklist used by the replay driver's incremental restore.
    pub fn start_commands(&self, services: &[&str]) -> Vec<Vec<String>> {
        match self {
            FsType::BeeGfs => services
                .iter()
                .map(|s| vec!["service".into(), s.to_string(), "restart".into()])
                .collect(),
            FsType::OrangeFs => {
                let mut cmds: Vec<Vec<String>> = services
                    .iter()
                    .map(|s| vec!["service".into(), s.to_string(), "restart".into()])
                    .collect();
                cmds.push(vec!["pvfs2-client".into(), "restart".into()]);
                cmds
            }
            FsType::GlusterFs => vec![vec!["gluster".into(), "volume".into(), "start".into(), "pfsvol".into()]],
        }
    }

    pub fn stop_commands(&self, services: &[&str]) -> Vec<Vec<String>> {
        match self {
            FsType::BeeGfs | FsType::OrangeFs => services
                .iter()
                .map(|s| vec!["service".into(), s.to_string(), "stop".into()])
                .collect(),
            FsType::GlusterFs => vec![vec!["gluster".into(), "volume".into(), "stop".into(), "pfsvol".into(), "--mode=script".into()]],
        }
    }

    /// Whether the restore step must additionally remove the file
    /// system's internal metadata cache before untarring a snapshot
    /// (GlusterFS regenerates `.glusterfs/` on remount).
    pub fn removes_internal_cache_on_restore(&self) -> bool {
        matches!(self, FsType::GlusterFs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_sentinels_match_documented_bytes() {
        assert_eq!(FsType::BeeGfs.frame_header().len, 40);
        assert_eq!(FsType::OrangeFs.frame_header().magic, &[0xBF, 0xCA, 0x00, 0x00]);
        assert_eq!(FsType::GlusterFs.frame_header().len, 4);
    }

    #[test]
    fn glusterfs_has_no_entryinfo_tool() {
        assert!(!FsType::GlusterFs.has_entryinfo_tool());
        assert!(FsType::BeeGfs.has_entryinfo_tool());
    }
}
