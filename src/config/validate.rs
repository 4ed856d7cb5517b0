//! Cross-server validation performed after parsing and before binding (§10).
//!
//! Conflicts are dropped with a logged warning rather than aborting the
//! whole load — this mirrors the grounding codebase's existing
//! `validate_configs` behaviour, adapted to the brace-grammar `ServerConfig`.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use proxy_log::warn;

use super::types::{normalize_listen_spec, ServerConfig};

pub fn validate_configs(configs: Vec<ServerConfig>) -> Vec<ServerConfig> {
    let mut dropped: HashSet<usize> = HashSet::new();

    // (host, port, server_name) duplicates.
    let mut usage: HashMap<(String, u16, String), Vec<usize>> = HashMap::new();
    for (idx, cfg) in configs.iter().enumerate() {
        for spec in cfg.listen_specs() {
            let Ok((host, port)) = normalize_listen_spec(&spec) else {
                continue;
            };
            let name = cfg
                .server_names
                .first()
                .cloned()
                .unwrap_or_else(|| "_".to_string());
            usage.entry((host, port, name)).or_default().push(idx);
        }
    }
    for ((host, port, name), indices) in &usage {
        if indices.len() > 1 {
            warn!(
                "duplicate virtual host {}:{} name '{}' — dropping {} conflicting server block(s)",
                host,
                port,
                name,
                indices.len()
            );
            dropped.extend(indices.iter().copied());
        }
    }

    // Wildcard vs specific-IP bind conflicts on the same port.
    let mut port_hosts: HashMap<u16, HashSet<String>> = HashMap::new();
    let mut port_indices: HashMap<u16, Vec<usize>> = HashMap::new();
    for (idx, cfg) in configs.iter().enumerate() {
        for spec in cfg.listen_specs() {
            if let Ok((host, port)) = normalize_listen_spec(&spec) {
                port_hosts.entry(port).or_default().insert(host);
                port_indices.entry(port).or_default().push(idx);
            }
        }
    }
    for (port, hosts) in &port_hosts {
        if hosts.contains("0.0.0.0") && hosts.len() > 1 {
            warn!(
                "port {} mixes wildcard '0.0.0.0' with a specific address — dropping conflicting server block(s)",
                port
            );
            if let Some(indices) = port_indices.get(port) {
                dropped.extend(indices.iter().copied());
            }
        }
    }

    // Informational checks: never drop configs for these, just warn.
    for cfg in &configs {
        for (code, path) in &cfg.error_pages {
            if *code < 100 || *code > 599 {
                warn!("error_page status code {} is outside 100..=599", code);
            }
            if !Path::new(path).exists() && !path.starts_with('/') {
                warn!("error_page path '{}' does not exist on disk", path);
            }
        }
        if let Some(root) = cfg.get("root") {
            if !Path::new(root).exists() {
                warn!("server root '{}' does not exist on disk", root);
            }
        }
        for loc in &cfg.locations {
            if let Some(root) = loc.get("root") {
                if !Path::new(root).exists() {
                    warn!("location '{}' root '{}' does not exist on disk", loc.path, root);
                }
            }
        }
    }

    configs
        .into_iter()
        .enumerate()
        .filter(|(idx, _)| !dropped.contains(idx))
        .map(|(_, cfg)| cfg)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make(listen: &str, name: &str) -> ServerConfig {
        let mut c = ServerConfig::new();
        c.listen.push(listen.to_string());
        c.server_names.push(name.to_string());
        c
    }

    #[test]
    fn no_conflicts_keeps_all() {
        let configs = vec![make("8001", "a"), make("8002", "b")];
        assert_eq!(validate_configs(configs).len(), 2);
    }

    #[test]
    fn same_host_port_different_name_is_virtual_hosting() {
        let configs = vec![make("8080", "a.com"), make("8080", "b.com")];
        assert_eq!(validate_configs(configs).len(), 2);
    }

    #[test]
    fn duplicate_vhost_drops_both() {
        let configs = vec![
            make("8080", "same.com"),
            make("8080", "same.com"),
            make("8081", "other.com"),
        ];
        let valid = validate_configs(configs);
        assert_eq!(valid.len(), 1);
        assert_eq!(valid[0].server_names[0], "other.com");
    }

    #[test]
    fn wildcard_vs_specific_conflict_drops_both() {
        let configs = vec![make("0.0.0.0:8080", "a"), make("127.0.0.1:8080", "b")];
        assert_eq!(validate_configs(configs).len(), 0);
    }

    #[test]
    fn wildcard_with_distinct_names_is_virtual_hosting() {
        let configs = vec![make("0.0.0.0:8080", "a"), make("0.0.0.0:8080", "b")];
        assert_eq!(validate_configs(configs).len(), 2);
    }
}
