//! Vhost/location selection, effective configuration merge, filesystem
//! mapping, and request classification (§4.6).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::config::{Location, ServerConfig};
use crate::http::request::{HttpRequest, Method};
use crate::http::response::HttpResponse;

pub const CORE_METHODS: [&str; 4] = ["GET", "POST", "DELETE", "HEAD"];

#[derive(Debug, Clone)]
pub struct EffectiveConfig {
    pub root: String,
    pub autoindex: bool,
    pub index: Vec<String>,
    pub methods: Vec<String>,
    pub error_pages: HashMap<u16, String>,
    pub client_max_body_size: u64,
    pub upload_store: Option<String>,
    pub cgi_pass: HashMap<String, String>,
    pub cgi_timeout: u64,
    pub cgi_allowed_methods: Vec<String>,
    pub return_directive: Option<(u16, String)>,
    pub location_prefix: String,
}

#[derive(Debug)]
pub enum Action {
    Static { fs_path: PathBuf },
    Directory { fs_path: PathBuf, uri_path: String },
    Upload { fs_path: PathBuf },
    Delete { fs_path: PathBuf },
    Cgi { script_path: PathBuf, interpreter: PathBuf },
}

pub enum RouteDecision {
    Immediate(HttpResponse),
    Proceed { action: Action, effective: EffectiveConfig },
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

pub fn parse_body_size(raw: &str) -> u64 {
    let raw = raw.trim();
    if raw.is_empty() {
        return crate::config::types::DEFAULT_MAX_BODY_SIZE as u64;
    }
    let (digits, mult) = match raw.chars().last() {
        Some('K') | Some('k') => (&raw[..raw.len() - 1], 1024u64),
        Some('M') | Some('m') => (&raw[..raw.len() - 1], 1024 * 1024),
        Some('G') | Some('g') => (&raw[..raw.len() - 1], 1024 * 1024 * 1024),
        _ => (raw, 1u64),
    };
    digits.trim().parse::<u64>().unwrap_or(0).saturating_mul(mult)
}

/// First server whose `server_names` contains the request's Host wins;
/// otherwise fall back to the server the accepting listener was declared
/// for (§3 Listener record, §4.6).
fn select_vhost(req: &HttpRequest, servers: &[ServerConfig], default_idx: usize) -> Option<usize> {
    for (idx, server) in servers.iter().enumerate() {
        if server
            .server_names
            .iter()
            .any(|name| name.eq_ignore_ascii_case(&req.host))
        {
            return Some(idx);
        }
    }
    if servers.is_empty() {
        None
    } else {
        Some(default_idx.min(servers.len() - 1))
    }
}

fn directive(location: Option<&Location>, server: &ServerConfig, key: &str) -> Option<String> {
    location
        .and_then(|l| l.get(key))
        .or_else(|| server.get(key))
        .map(|s| s.to_string())
}

fn build_effective(server: &ServerConfig, location: Option<&Location>) -> EffectiveConfig {
    let mut error_pages = server.error_pages.clone();
    let methods_raw = directive(location, server, "methods")
        .unwrap_or_else(|| crate::config::types::DEFAULT_METHODS.to_string());
    let index_raw = directive(location, server, "index").unwrap_or_default();
    let cgi_allowed_raw = directive(location, server, "cgi_allowed_methods");

    let mut cgi_pass = HashMap::new();
    if let Some(raw) = directive(location, server, "cgi_pass") {
        let parts: Vec<&str> = raw.split_whitespace().collect();
        if parts.len() == 2 {
            cgi_pass.insert(parts[0].to_string(), parts[1].to_string());
        }
    }

    if let Some(loc) = location {
        if let Some(raw) = loc.get("error_page") {
            let parts: Vec<&str> = raw.split_whitespace().collect();
            if parts.len() >= 2 {
                let uri = parts[parts.len() - 1];
                for code_str in &parts[..parts.len() - 1] {
                    if let Ok(code) = code_str.parse::<u16>() {
                        error_pages.insert(code, uri.to_string());
                    }
                }
            }
        }
    }

    let return_directive = directive(location, server, "return").and_then(|raw| {
        let mut parts = raw.splitn(2, char::is_whitespace);
        let status: u16 = parts.next()?.parse().ok()?;
        let target = parts.next()?.trim().to_string();
        if (300..400).contains(&status) {
            Some((status, target))
        } else {
            None
        }
    });

    EffectiveConfig {
        root: directive(location, server, "root").unwrap_or_else(|| crate::config::types::DEFAULT_ROOT.to_string()),
        autoindex: directive(location, server, "autoindex").map(|v| v == "on").unwrap_or(false),
        index: split_list(&index_raw),
        methods: split_list(&methods_raw),
        error_pages,
        client_max_body_size: directive(location, server, "client_max_body_size")
            .map(|v| parse_body_size(&v))
            .unwrap_or(crate::config::types::DEFAULT_MAX_BODY_SIZE as u64),
        upload_store: directive(location, server, "upload_store"),
        cgi_pass,
        cgi_timeout: directive(location, server, "cgi_timeout")
            .and_then(|v| v.parse().ok())
            .unwrap_or(30),
        cgi_allowed_methods: cgi_allowed_raw.map(|v| split_list(&v)).unwrap_or_else(|| split_list(&methods_raw)),
        return_directive,
        location_prefix: location.map(|l| l.path.clone()).unwrap_or_else(|| "/".to_string()),
    }
}

/// Lexical path canonicalisation with traversal protection (§4.6). Never
/// lets the result climb above `root`.
pub fn canonicalize(root: &str, location_prefix: &str, request_path: &str) -> Result<PathBuf, ()> {
    let remainder = request_path.strip_prefix(location_prefix).unwrap_or(request_path);
    let root_components: Vec<String> = root
        .split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .map(|s| s.to_string())
        .collect();
    let root_depth = root_components.len();
    let mut stack = root_components;

    for comp in remainder.split('/') {
        match comp {
            "" | "." => continue,
            ".." => {
                if stack.len() <= root_depth {
                    return Err(());
                }
                stack.pop();
            }
            other => stack.push(other.to_string()),
        }
    }

    let joined = stack.join("/");
    Ok(if root.starts_with('/') {
        PathBuf::from(format!("/{}", joined))
    } else {
        PathBuf::from(joined)
    })
}

fn is_cgi(path: &Path, cgi_pass: &HashMap<String, String>) -> Option<&str> {
    let ext = path.extension()?.to_str()?;
    let dotted = format!(".{}", ext);
    cgi_pass.get(&dotted).map(|s| s.as_str())
}

fn error_response(status: u16, effective: Option<&EffectiveConfig>) -> HttpResponse {
    if let Some(eff) = effective {
        if let Some(page) = eff.error_pages.get(&status) {
            let fs_path = if let Some(rel) = page.strip_prefix('/') {
                Path::new(&eff.root).join(rel)
            } else {
                PathBuf::from(page)
            };
            if let Ok(body) = std::fs::read(&fs_path) {
                return HttpResponse::new(status).body("text/html; charset=utf-8", body);
            }
        }
    }
    HttpResponse::html(status, crate::http::response::default_error_body(status))
}

pub fn dispatch(req: &HttpRequest, servers: &[ServerConfig], default_idx: usize) -> RouteDecision {
    let Some(vhost_idx) = select_vhost(req, servers, default_idx) else {
        return RouteDecision::Immediate(error_response(404, None));
    };
    let server = &servers[vhost_idx];
    let location = server.match_location(&req.path);
    let effective = build_effective(server, location);

    if !CORE_METHODS.contains(&req.method.as_str()) {
        return RouteDecision::Immediate(error_response(501, Some(&effective)));
    }

    if let Some((status, target)) = &effective.return_directive {
        let body = format!(
            "<html><head><title>{0} {1}</title></head><body><a href=\"{2}\">{1}</a></body></html>",
            status,
            crate::http::response::status_text(*status),
            target
        );
        return RouteDecision::Immediate(
            HttpResponse::html(*status, body).header("Location", target.clone()),
        );
    }

    let Ok(fs_path) = canonicalize(&effective.root, &effective.location_prefix, &req.path) else {
        return RouteDecision::Immediate(error_response(403, Some(&effective)));
    };

    let cgi_interpreter = is_cgi(&fs_path, &effective.cgi_pass).map(|s| s.to_string());
    // §9 Open Question: the classifier only treats POST as CGI; GET on a CGI
    // extension falls through to Action::Static, matching original_source's
    // `cgi = (method == "POST") && isCgiRequest(...)`.
    let request_is_cgi = cgi_interpreter.is_some() && req.method == Method::Post;

    let allowed_methods: &[String] = if request_is_cgi {
        &effective.cgi_allowed_methods
    } else {
        &effective.methods
    };
    if !allowed_methods.iter().any(|m| m == req.method.as_str()) {
        let allow = allowed_methods.join(", ");
        return RouteDecision::Immediate(
            error_response(405, Some(&effective)).header("Allow", allow),
        );
    }

    if req.has_content_length
        && effective.client_max_body_size != 0
        && req.content_length > effective.client_max_body_size
    {
        return RouteDecision::Immediate(error_response(413, Some(&effective)));
    }

    if req.method == Method::Post && effective.upload_store.is_some() && !request_is_cgi {
        if req
            .header("content-type")
            .map(|ct| ct.to_ascii_lowercase().starts_with("multipart/form-data"))
            .unwrap_or(false)
        {
            return RouteDecision::Immediate(error_response(501, Some(&effective)));
        }
        let store = effective.upload_store.clone().unwrap();
        let filename = req.path.rsplit('/').next().unwrap_or("");
        if !is_valid_upload_filename(filename) {
            return RouteDecision::Immediate(error_response(400, Some(&effective)));
        }
        let upload_path = Path::new(&store).join(filename);
        return RouteDecision::Proceed {
            action: Action::Upload { fs_path: upload_path },
            effective,
        };
    }

    let meta = std::fs::metadata(&fs_path);

    let action = if req.method == Method::Delete {
        match meta {
            Ok(m) if m.is_file() => Action::Delete { fs_path },
            Ok(_) => return RouteDecision::Immediate(error_response(403, Some(&effective))),
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                return RouteDecision::Immediate(error_response(403, Some(&effective)))
            }
            Err(_) => return RouteDecision::Immediate(error_response(404, Some(&effective))),
        }
    } else {
        match meta {
            Ok(m) if m.is_file() && request_is_cgi => Action::Cgi {
                script_path: fs_path,
                interpreter: PathBuf::from(cgi_interpreter.unwrap()),
            },
            Ok(m) if m.is_file() => Action::Static { fs_path },
            Ok(m) if m.is_dir() => Action::Directory {
                uri_path: req.path.clone(),
                fs_path,
            },
            Ok(_) => return RouteDecision::Immediate(error_response(403, Some(&effective))),
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                return RouteDecision::Immediate(error_response(403, Some(&effective)))
            }
            Err(_) => return RouteDecision::Immediate(error_response(404, Some(&effective))),
        }
    };

    RouteDecision::Proceed { action, effective }
}

/// Filename validation for uploads (§4.7): no empty name, `.`/`..`, control
/// bytes, or any of `/\:*?"<>|`.
fn is_valid_upload_filename(name: &str) -> bool {
    if name.is_empty() || name == "." || name == ".." {
        return false;
    }
    !name.bytes().any(|b| b < 0x20 || b"/\\:*?\"<>|".contains(&b))
}

pub fn render_error(status: u16, effective: Option<&EffectiveConfig>) -> HttpResponse {
    error_response(status, effective)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalize_blocks_escape_above_root() {
        assert!(canonicalize("./www", "/", "/../../etc/passwd").is_err());
    }

    #[test]
    fn canonicalize_resolves_dot_dot_within_root() {
        let p = canonicalize("/r", "/", "/a/../b").unwrap();
        assert_eq!(p, PathBuf::from("/r/b"));
    }

    #[test]
    fn canonicalize_strips_location_prefix() {
        let p = canonicalize("./www", "/static", "/static/a/b.txt").unwrap();
        assert_eq!(p, PathBuf::from("www/a/b.txt"));
    }

    #[test]
    fn upload_filename_validation() {
        assert!(is_valid_upload_filename("report.txt"));
        assert!(!is_valid_upload_filename(""));
        assert!(!is_valid_upload_filename(".."));
        assert!(!is_valid_upload_filename("a/b"));
        assert!(!is_valid_upload_filename("a\"b"));
    }

    #[test]
    fn body_size_suffixes() {
        assert_eq!(parse_body_size("10"), 10);
        assert_eq!(parse_body_size("10K"), 10 * 1024);
        assert_eq!(parse_body_size("2M"), 2 * 1024 * 1024);
        assert_eq!(parse_body_size("1G"), 1024 * 1024 * 1024);
    }
}
