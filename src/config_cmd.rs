//! `crashcut config` — resolve and print the configured cluster.

use anyhow::Result;

use crate::color;
use crate::config::ClusterConfig;
use crate::discover::discover_cluster;

pub fn run(config: &ClusterConfig) -> Result<()> {
    println!("{}", color::bold_cyan("cluster"));
    println!("  type           {}", config.global.fs_type);
    println!("  mount_point    {}", config.global.mount_point);
    println!("  client_name    {}", config.global.client_name);
    println!("  stripe_size    {}", config.global.stripe_size);
    if let Some(p) = config.global.parallel {
        println!("  parallel       {p} ranks");
    } else {
        println!("  parallel       (posix, single stream)");
    }
    println!();

    println!("{}", color::bold_cyan("services"));
    println!(
        "  {:<12} {:<10} {:<18} {:<16} {:>8}",
        "NAME", "ROLE", "EXEC", "HOST", "PID"
    );
    let discovered = discover_cluster(config)?;
    for d in &discovered {
        let role = match d.server.role {
            pfs_core::server::ServerRole::Metadata => "metadata",
            pfs_core::server::ServerRole::Storage => "storage",
        };
        let pid = d
            .server
            .pid
            .map(|p| p.to_string())
            .unwrap_or_else(|| color::yellow("not running"));
        println!(
            "  {:<12} {:<10} {:<18} {:<16} {:>8}",
            d.server.name, role, d.server.exec, d.server.host, pid
        );
    }

    let missing = discovered.iter().filter(|d| d.server.pid.is_none()).count();
    if missing > 0 {
        println!();
        println!(
            "{}",
            color::yellow(&format!("{missing} service(s) could not be resolved to a running process"))
        );
    }

    Ok(())
}
