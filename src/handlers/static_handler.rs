//! Static file serving and directory listing (§4.7).

use std::io;
use std::path::Path;

use proxy_log::errors;

use crate::dispatcher::EffectiveConfig;
use crate::http::response::{mime_type_for, render_autoindex, HttpResponse};

pub fn handle_static(fs_path: &Path) -> HttpResponse {
    match std::fs::read(fs_path) {
        Ok(bytes) => {
            let mime = mime_type_for(&fs_path.to_string_lossy());
            HttpResponse::new(200).body(mime, bytes)
        }
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => HttpResponse::html(403, super::default_page(403)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => HttpResponse::html(404, super::default_page(404)),
        Err(e) => {
            errors!("static read failed for {:?}: {}", fs_path, e);
            HttpResponse::html(500, super::default_page(500))
        }
    }
}

pub fn handle_directory(fs_path: &Path, uri_path: &str, effective: &EffectiveConfig) -> HttpResponse {
    for candidate in &effective.index {
        let candidate_path = fs_path.join(candidate);
        if candidate_path.is_file() {
            return handle_static(&candidate_path);
        }
    }

    if !effective.autoindex {
        return HttpResponse::html(404, super::default_page(404));
    }

    let uri_with_slash = if uri_path.ends_with('/') {
        uri_path.to_string()
    } else {
        format!("{}/", uri_path)
    };

    match render_autoindex(&uri_with_slash, fs_path) {
        Ok(html) => HttpResponse::html(200, html),
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => HttpResponse::html(403, super::default_page(403)),
        Err(e) => {
            errors!("autoindex failed for {:?}: {}", fs_path, e);
            HttpResponse::html(500, super::default_page(500))
        }
    }
}
