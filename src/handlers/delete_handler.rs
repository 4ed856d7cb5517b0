//! DELETE handling (§4.7).

use std::io;
use std::path::Path;

use proxy_log::errors;

use crate::http::response::HttpResponse;

pub fn handle_delete(fs_path: &Path) -> HttpResponse {
    match std::fs::remove_file(fs_path) {
        Ok(()) => HttpResponse::new(204),
        Err(e) if e.kind() == io::ErrorKind::NotFound => HttpResponse::html(404, super::default_page(404)),
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => HttpResponse::html(403, super::default_page(403)),
        Err(e) => {
            errors!("delete failed for {:?}: {}", fs_path, e);
            HttpResponse::html(500, super::default_page(500))
        }
    }
}
