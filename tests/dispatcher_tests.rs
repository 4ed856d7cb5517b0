use webserv::config::parser::parse_config;
use webserv::dispatcher::{dispatch, Action, RouteDecision};
use webserv::http::request::parse_head;

fn request(raw: &str) -> webserv::http::request::HttpRequest {
    parse_head(raw.as_bytes()).unwrap()
}

#[test]
fn routes_static_file_under_server_root() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("index.html"), b"hello").unwrap();

    let src = format!(
        "server {{ listen 8080; root {}; }}",
        dir.path().to_str().unwrap()
    );
    let servers = parse_config(&src).unwrap();
    let req = request("GET /index.html HTTP/1.1\r\nHost: x\r\n\r\n");

    match dispatch(&req, &servers, 0) {
        RouteDecision::Proceed { action: Action::Static { fs_path }, .. } => {
            assert_eq!(std::fs::read(fs_path).unwrap(), b"hello");
        }
        other => panic!("expected a static action, got {:?}", other_kind(&other)),
    }
}

#[test]
fn missing_file_returns_immediate_404() {
    let dir = tempfile::tempdir().unwrap();
    let src = format!("server {{ listen 8080; root {}; }}", dir.path().to_str().unwrap());
    let servers = parse_config(&src).unwrap();
    let req = request("GET /nope.html HTTP/1.1\r\nHost: x\r\n\r\n");

    match dispatch(&req, &servers, 0) {
        RouteDecision::Immediate(resp) => assert_eq!(resp.status, 404),
        other => panic!("expected an immediate response, got {:?}", other_kind(&other)),
    }
}

#[test]
fn method_outside_location_allow_list_is_405_with_allow_header() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("f.txt"), b"x").unwrap();
    let src = format!(
        "server {{ listen 8080; root {}; location / {{ methods GET; }} }}",
        dir.path().to_str().unwrap()
    );
    let servers = parse_config(&src).unwrap();
    let req = request("DELETE /f.txt HTTP/1.1\r\nHost: x\r\n\r\n");

    match dispatch(&req, &servers, 0) {
        RouteDecision::Immediate(resp) => {
            assert_eq!(resp.status, 405);
            assert!(resp.headers.iter().any(|(k, v)| k == "Allow" && v == "GET"));
        }
        other => panic!("expected an immediate response, got {:?}", other_kind(&other)),
    }
}

#[test]
fn host_header_selects_matching_virtual_host() {
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    std::fs::write(dir_a.path().join("f.txt"), b"from a").unwrap();
    std::fs::write(dir_b.path().join("f.txt"), b"from b").unwrap();

    let src = format!(
        "server {{ listen 8080; server_name a.test; root {}; }}\n\
         server {{ listen 8080; server_name b.test; root {}; }}",
        dir_a.path().to_str().unwrap(),
        dir_b.path().to_str().unwrap(),
    );
    let servers = parse_config(&src).unwrap();
    let req = request("GET /f.txt HTTP/1.1\r\nHost: b.test\r\n\r\n");

    match dispatch(&req, &servers, 0) {
        RouteDecision::Proceed { action: Action::Static { fs_path }, .. } => {
            assert_eq!(std::fs::read(fs_path).unwrap(), b"from b");
        }
        other => panic!("expected a static action, got {:?}", other_kind(&other)),
    }
}

#[test]
fn return_directive_issues_an_immediate_redirect() {
    let src = "server { listen 8080; location / { return 301 https://example.test/; } }";
    let servers = parse_config(src).unwrap();
    let req = request("GET / HTTP/1.1\r\nHost: x\r\n\r\n");

    match dispatch(&req, &servers, 0) {
        RouteDecision::Immediate(resp) => {
            assert_eq!(resp.status, 301);
            assert!(resp
                .headers
                .iter()
                .any(|(k, v)| k == "Location" && v == "https://example.test/"));
        }
        other => panic!("expected an immediate redirect, got {:?}", other_kind(&other)),
    }
}

fn other_kind(decision: &RouteDecision) -> &'static str {
    match decision {
        RouteDecision::Immediate(_) => "Immediate",
        RouteDecision::Proceed { .. } => "Proceed",
    }
}
