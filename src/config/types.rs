use std::collections::HashMap;

pub const DEFAULT_LISTEN: &str = "0.0.0.0:8080";
pub const DEFAULT_ROOT: &str = ".";
pub const DEFAULT_METHODS: &str = "GET, POST";
pub const DEFAULT_MAX_BODY_SIZE: usize = 1_048_576; // 1 MiB

/// A `location <prefix> { ... }` block: a path prefix plus whatever
/// directives were written inside it, captured unchanged into a raw map.
#[derive(Debug, Clone, Default)]
pub struct Location {
    pub path: String,
    pub directives: HashMap<String, String>,
}

impl Location {
    pub fn new(path: String) -> Self {
        Self {
            path,
            directives: HashMap::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.directives.get(key).map(|s| s.as_str())
    }
}

/// One `server { ... }` block. Immutable once the configuration is loaded.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    /// Raw listen specs as written (`host:port`, `:port`, `port`, `*:port`).
    pub listen: Vec<String>,
    pub server_names: Vec<String>,
    pub locations: Vec<Location>,
    pub directives: HashMap<String, String>,
    pub error_pages: HashMap<u16, String>,
}

impl ServerConfig {
    pub fn new() -> Self {
        let mut directives = HashMap::new();
        directives.insert("root".to_string(), DEFAULT_ROOT.to_string());
        directives.insert("methods".to_string(), DEFAULT_METHODS.to_string());
        directives.insert(
            "client_max_body_size".to_string(),
            DEFAULT_MAX_BODY_SIZE.to_string(),
        );
        Self {
            listen: Vec::new(),
            server_names: Vec::new(),
            locations: Vec::new(),
            directives,
            error_pages: HashMap::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.directives.get(key).map(|s| s.as_str())
    }

    pub fn listen_specs(&self) -> Vec<String> {
        if self.listen.is_empty() {
            vec![DEFAULT_LISTEN.to_string()]
        } else {
            self.listen.clone()
        }
    }

    /// Longest-prefix location match at a `/` boundary (§4.6).
    pub fn match_location(&self, path: &str) -> Option<&Location> {
        let mut best: Option<&Location> = None;
        for loc in &self.locations {
            if is_prefix_match(&loc.path, path) {
                if best.map_or(true, |b| loc.path.len() > b.path.len()) {
                    best = Some(loc);
                }
            }
        }
        best
    }
}

/// Normalises a listen spec (`host:port`, `:port`, `port`, `*:port`) into
/// `(host, port)`, defaulting an absent or `*` host to `0.0.0.0` (§4.1).
pub fn normalize_listen_spec(spec: &str) -> Result<(String, u16), String> {
    let spec = spec.trim();
    let (host, port_str) = match spec.rfind(':') {
        Some(idx) => (&spec[..idx], &spec[idx + 1..]),
        None => ("", spec),
    };
    let host = if host.is_empty() || host == "*" {
        "0.0.0.0".to_string()
    } else {
        host.to_string()
    };
    if port_str.is_empty() || !port_str.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("invalid listen spec '{}'", spec));
    }
    let port: u32 = port_str
        .parse()
        .map_err(|_| format!("invalid listen spec '{}'", spec))?;
    if port == 0 || port > 65535 {
        return Err(format!("listen port out of range in '{}'", spec));
    }
    Ok((host, port as u16))
}

fn is_prefix_match(prefix: &str, path: &str) -> bool {
    if !path.starts_with(prefix) {
        return false;
    }
    if path.len() == prefix.len() {
        return true;
    }
    // Boundary must land on a '/' in the remainder, unless the prefix itself
    // already ends in '/'.
    prefix.ends_with('/') || path.as_bytes()[prefix.len()] == b'/'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_listen_variants() {
        assert_eq!(
            normalize_listen_spec("8080").unwrap(),
            ("0.0.0.0".to_string(), 8080)
        );
        assert_eq!(
            normalize_listen_spec(":8080").unwrap(),
            ("0.0.0.0".to_string(), 8080)
        );
        assert_eq!(
            normalize_listen_spec("*:8080").unwrap(),
            ("0.0.0.0".to_string(), 8080)
        );
        assert_eq!(
            normalize_listen_spec("127.0.0.1:9090").unwrap(),
            ("127.0.0.1".to_string(), 9090)
        );
        assert!(normalize_listen_spec("127.0.0.1:0").is_err());
        assert!(normalize_listen_spec("127.0.0.1:notaport").is_err());
    }

    #[test]
    fn longest_prefix_wins() {
        let mut cfg = ServerConfig::new();
        cfg.locations.push(Location::new("/".to_string()));
        cfg.locations.push(Location::new("/a".to_string()));
        cfg.locations.push(Location::new("/a/b".to_string()));

        let m = cfg.match_location("/a/b/c").unwrap();
        assert_eq!(m.path, "/a/b");
    }

    #[test]
    fn boundary_must_be_slash() {
        let mut cfg = ServerConfig::new();
        cfg.locations.push(Location::new("/ab".to_string()));
        assert!(cfg.match_location("/abc").is_none());
        assert!(cfg.match_location("/ab/c").is_some());
        assert!(cfg.match_location("/ab").is_some());
    }
}
