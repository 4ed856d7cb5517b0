use std::path::Path;

use webserv::cgi::build_env;
use webserv::http::request::parse_head;

fn lookup<'a>(env: &'a [(String, String)], key: &str) -> &'a str {
    env.iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
        .unwrap_or_else(|| panic!("missing CGI env var {}", key))
}

#[test]
fn builds_core_cgi_variables() {
    let req = parse_head(b"GET /cgi-bin/hello.cgi?name=world HTTP/1.1\r\nHost: x\r\nX-Request-Id: abc\r\n\r\n").unwrap();
    let script = Path::new("/var/www/cgi-bin/hello.cgi");

    let env = build_env(&req, script, "/cgi-bin/hello.cgi", "/var/www", "x", 8080);

    assert_eq!(lookup(&env, "GATEWAY_INTERFACE"), "CGI/1.1");
    assert_eq!(lookup(&env, "REQUEST_METHOD"), "GET");
    assert_eq!(lookup(&env, "QUERY_STRING"), "name=world");
    assert_eq!(lookup(&env, "SCRIPT_NAME"), "/cgi-bin/hello.cgi");
    assert_eq!(lookup(&env, "SCRIPT_FILENAME"), "/var/www/cgi-bin/hello.cgi");
    assert_eq!(lookup(&env, "SERVER_NAME"), "x");
    assert_eq!(lookup(&env, "SERVER_PORT"), "8080");
    assert_eq!(lookup(&env, "HTTP_X_REQUEST_ID"), "abc");
}

#[test]
fn omits_content_type_when_request_has_none() {
    let req = parse_head(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").unwrap();
    let env = build_env(&req, Path::new("/x"), "/", "/var/www", "x", 80);
    assert!(!env.iter().any(|(k, _)| k == "CONTENT_TYPE"));
}
