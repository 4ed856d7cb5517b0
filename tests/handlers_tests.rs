use std::collections::HashMap;
use std::path::PathBuf;

use webserv::dispatcher::EffectiveConfig;
use webserv::handlers::{handle_delete, handle_directory, handle_static, handle_upload};

fn effective(root: &str, autoindex: bool, index: Vec<&str>) -> EffectiveConfig {
    EffectiveConfig {
        root: root.to_string(),
        autoindex,
        index: index.into_iter().map(String::from).collect(),
        methods: vec!["GET".to_string()],
        error_pages: HashMap::new(),
        client_max_body_size: 1_048_576,
        upload_store: None,
        cgi_pass: HashMap::new(),
        cgi_timeout: 30,
        cgi_allowed_methods: vec!["GET".to_string()],
        return_directive: None,
        location_prefix: "/".to_string(),
    }
}

#[test]
fn serves_existing_file_with_matching_mime() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("page.html");
    std::fs::write(&file, b"<h1>hi</h1>").unwrap();

    let resp = handle_static(&file);
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body, b"<h1>hi</h1>");
    assert!(resp
        .headers
        .iter()
        .any(|(k, v)| k == "Content-Type" && v == "text/html; charset=utf-8"));
}

#[test]
fn missing_file_is_404() {
    let resp = handle_static(&PathBuf::from("/no/such/file/anywhere.txt"));
    assert_eq!(resp.status, 404);
}

#[test]
fn directory_prefers_index_file_over_autoindex() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("index.html"), b"welcome").unwrap();

    let eff = effective(dir.path().to_str().unwrap(), true, vec!["index.html"]);
    let resp = handle_directory(dir.path(), "/", &eff);
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body, b"welcome");
}

#[test]
fn directory_without_index_or_autoindex_is_404() {
    let dir = tempfile::tempdir().unwrap();
    let eff = effective(dir.path().to_str().unwrap(), false, vec![]);
    let resp = handle_directory(dir.path(), "/", &eff);
    assert_eq!(resp.status, 404);
}

#[test]
fn directory_autoindex_lists_entries() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.txt"), b"x").unwrap();
    let eff = effective(dir.path().to_str().unwrap(), true, vec![]);
    let resp = handle_directory(dir.path(), "/files", &eff);
    assert_eq!(resp.status, 200);
    let body = String::from_utf8(resp.body).unwrap();
    assert!(body.contains("a.txt"));
}

#[test]
fn upload_writes_new_file_and_returns_201() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("report.txt");
    let resp = handle_upload(&target, b"uploaded contents", "/up/report.txt");
    assert_eq!(resp.status, 201);
    assert_eq!(std::fs::read(&target).unwrap(), b"uploaded contents");
}

#[test]
fn upload_refuses_to_clobber_existing_file() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("existing.txt");
    std::fs::write(&target, b"already here").unwrap();

    let resp = handle_upload(&target, b"new contents", "/up/existing.txt");
    assert_eq!(resp.status, 409);
    assert_eq!(std::fs::read(&target).unwrap(), b"already here");
}

#[test]
fn upload_into_missing_directory_is_500() {
    let resp = handle_upload(&PathBuf::from("/no/such/dir/file.txt"), b"x", "/up/file.txt");
    assert_eq!(resp.status, 500);
}

#[test]
fn delete_removes_existing_file() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("doomed.txt");
    std::fs::write(&target, b"x").unwrap();

    let resp = handle_delete(&target);
    assert_eq!(resp.status, 204);
    assert!(!target.exists());
}

#[test]
fn delete_missing_file_is_404() {
    let resp = handle_delete(&PathBuf::from("/no/such/file.txt"));
    assert_eq!(resp.status, 404);
}
