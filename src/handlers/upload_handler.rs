//! Whole-body upload handling (§4.7). Multipart/form-data is rejected
//! upstream by the dispatcher before this handler ever runs.

use std::io;
use std::path::Path;

use proxy_log::errors;

use crate::http::response::HttpResponse;

pub fn handle_upload(fs_path: &Path, body: &[u8], request_target: &str) -> HttpResponse {
    let Some(parent) = fs_path.parent() else {
        return HttpResponse::html(500, super::default_page(500));
    };
    match std::fs::metadata(parent) {
        Ok(m) if m.is_dir() => {}
        _ => return HttpResponse::html(500, super::default_page(500)),
    }

    match std::fs::metadata(fs_path) {
        Ok(m) if m.is_dir() => return HttpResponse::html(403, super::default_page(403)),
        Ok(_) => return HttpResponse::html(409, super::default_page(409)),
        Err(_) => {}
    }

    if let Err(e) = std::fs::write(fs_path, body) {
        let _ = std::fs::remove_file(fs_path);
        return match e.kind() {
            io::ErrorKind::PermissionDenied => HttpResponse::html(403, super::default_page(403)),
            _ => {
                errors!("upload write failed for {:?}: {}", fs_path, e);
                HttpResponse::html(500, super::default_page(500))
            }
        };
    }

    HttpResponse::new(201).header("Location", request_target.to_string())
}
