//! Configuration loading: a small hand-rolled INI-like parser (`[global]`
//! section plus one section per service) mirroring the key names and
//! semantics of the original Python tool's `configparser`-based loader.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use pfs_core::error::ConfigError;
use pfs_core::fsconfig::FsType;
use pfs_core::server::ServerRole;

#[derive(Debug, Clone)]
pub struct GlobalConfig {
    pub services: Vec<String>,
    pub mount_point: String,
    pub client_name: String,
    pub fs_type: FsType,
    pub stripe_size: u64,
    pub run_sudo: bool,
    pub entryinfo_hints: Option<Vec<String>>,
    pub parallel: Option<usize>,
    pub init: Option<String>,
    pub workload: Option<String>,
    pub checker: Option<String>,
    pub timeout_secs: u64,
    pub trace_dir: PathBuf,
    pub result_dir: PathBuf,
    pub snapshot_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub name: String,
    pub role: ServerRole,
    pub exec: String,
    pub tag: String,
    pub host: String,
    pub data_path: String,
    pub data_dirs: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub global: GlobalConfig,
    pub services: Vec<ServiceConfig>,
}

type Section = HashMap<String, String>;

fn parse_ini(content: &str) -> HashMap<String, Section> {
    let mut sections: HashMap<String, Section> = HashMap::new();
    let mut current: Option<String> = None;

    for raw_line in content.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if line.starts_with('[') && line.ends_with(']') {
            let name = line[1..line.len() - 1].trim().to_string();
            sections.entry(name.clone()).or_default();
            current = Some(name);
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            if let Some(section) = &current {
                sections
                    .entry(section.clone())
                    .or_default()
                    .insert(key.trim().to_string(), value.trim().to_string());
            }
        }
    }
    sections
}

fn csv(value: &str) -> Vec<String> {
    value.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect()
}

fn required<'a>(section: &'a Section, key: &str, section_name: &str) -> Result<&'a String, ConfigError> {
    section
        .get(key)
        .ok_or_else(|| ConfigError::MissingKey(key.to_string(), section_name.to_string()))
}

impl ClusterConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let sections = parse_ini(content);
        let global_section = sections.get("global").cloned().unwrap_or_default();

        let services_list = csv(required(&global_section, "services", "global")?);
        let mount_point = required(&global_section, "mount_point", "global")?.clone();
        let client_name = required(&global_section, "client_name", "global")?.clone();
        let fs_type: FsType = required(&global_section, "type", "global")?.parse()?;
        let stripe_size: u64 = required(&global_section, "stripe_size", "global")?
            .parse()
            .map_err(|_| ConfigError::MissingKey("stripe_size".into(), "global".into()))?;
        let run_sudo = global_section.get("run_sudo").map(|v| v.eq_ignore_ascii_case("true")).unwrap_or(false);
        let entryinfo_hints = global_section.get("entryinfo_hints").map(|v| csv(v));
        let parallel = global_section.get("parallel").and_then(|v| v.parse().ok());
        let timeout_secs = global_section.get("timeout").and_then(|v| v.parse().ok()).unwrap_or(30);
        let trace_dir = PathBuf::from(global_section.get("trace_dir").cloned().unwrap_or_else(|| "traces".into()));
        let result_dir = PathBuf::from(global_section.get("result_dir").cloned().unwrap_or_else(|| "results".into()));
        let snapshot_dir = PathBuf::from(global_section.get("snapshot_dir").cloned().unwrap_or_else(|| "snapshots".into()));

        let global = GlobalConfig {
            services: services_list.clone(),
            mount_point,
            client_name,
            fs_type,
            stripe_size,
            run_sudo,
            entryinfo_hints,
            parallel,
            init: global_section.get("init").cloned(),
            workload: global_section.get("workload").cloned(),
            checker: global_section.get("checker").cloned(),
            timeout_secs,
            trace_dir,
            result_dir,
            snapshot_dir,
        };

        let mut services = Vec::with_capacity(services_list.len());
        for name in &services_list {
            let section = sections
                .get(name.as_str())
                .ok_or_else(|| ConfigError::UnknownService(name.clone()))?;
            let role = match required(section, "type", name)?.as_str() {
                "metadata" => ServerRole::Metadata,
                _ => ServerRole::Storage,
            };
            services.push(ServiceConfig {
                name: name.clone(),
                role,
                exec: required(section, "exec", name)?.clone(),
                tag: required(section, "tag", name)?.clone(),
                host: required(section, "host", name)?.clone(),
                data_path: required(section, "data_path", name)?.clone(),
                data_dirs: csv(required(section, "data_dirs", name)?),
            });
        }

        Ok(ClusterConfig { global, services })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = r#"
[global]
services = meta0, storage0, storage1
mount_point = /mnt/pfs
client_name = client
type = beegfs
stripe_size = 131072

[meta0]
type = metadata
exec = beegfs-meta
tag = meta0
host = 10.0.0.1
data_path = /data/meta0
data_dirs = meta

[storage0]
type = storage
exec = beegfs-storage
tag = storage0
host = 10.0.0.2
data_path = /data/storage0
data_dirs = chunks

[storage1]
type = storage
exec = beegfs-storage
tag = storage1
host = 10.0.0.3
data_path = /data/storage1
data_dirs = chunks
"#;

    #[test]
    fn parses_minimal_two_service_config() {
        let cfg = ClusterConfig::parse(EXAMPLE).unwrap();
        assert_eq!(cfg.global.services.len(), 3);
        assert_eq!(cfg.global.stripe_size, 131072);
        assert_eq!(cfg.services.len(), 3);
        assert_eq!(cfg.services[0].role, ServerRole::Metadata);
    }

    #[test]
    fn missing_global_key_is_config_error() {
        let bad = "[global]\nservices = a\n";
        let err = ClusterConfig::parse(bad).unwrap_err();
        assert!(matches!(err, ConfigError::MissingKey(_, _)));
    }
}
