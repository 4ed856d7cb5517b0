//! CGI/1.1 launcher (§4.8): process spawn, environment construction, and
//! non-blocking bidirectional I/O integrated into the shared `Poll`
//! (REDESIGN FLAGS — no nested blocking loop per CGI request).

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::path::Path;
use std::process::{Child, Command, Stdio};

use mio::event::Source;
use mio::unix::pipe::{Receiver, Sender};
use mio::{Interest, Registry, Token};
use proxy_log::errors;

use crate::http::request::{HttpRequest, Method};
use crate::http::response::HttpResponse;

/// Ticks (at the main loop's 250 ms housekeeping cadence) of no I/O
/// progress before a CGI child is considered hung (§4.8, REDESIGN FLAGS).
const TICK_MS: u64 = 250;

pub fn build_env(
    req: &HttpRequest,
    script_path: &Path,
    script_name: &str,
    document_root: &str,
    server_name: &str,
    server_port: u16,
) -> Vec<(String, String)> {
    let mut env = vec![
        ("GATEWAY_INTERFACE".to_string(), "CGI/1.1".to_string()),
        ("SERVER_SOFTWARE".to_string(), "webserv/1.0".to_string()),
        ("SERVER_PROTOCOL".to_string(), req.version.clone()),
        ("REQUEST_METHOD".to_string(), req.method.as_str().to_string()),
        ("REQUEST_URI".to_string(), req.target.clone()),
        ("QUERY_STRING".to_string(), req.query.clone()),
        ("SCRIPT_NAME".to_string(), script_name.to_string()),
        ("SCRIPT_FILENAME".to_string(), script_path.to_string_lossy().into_owned()),
        ("PATH_TRANSLATED".to_string(), script_path.to_string_lossy().into_owned()),
        ("PATH_INFO".to_string(), req.path.clone()),
        ("DOCUMENT_ROOT".to_string(), document_root.to_string()),
        ("CONTENT_LENGTH".to_string(), req.content_length.to_string()),
        ("SERVER_PORT".to_string(), server_port.to_string()),
        ("SERVER_NAME".to_string(), server_name.to_string()),
        ("REMOTE_ADDR".to_string(), "127.0.0.1".to_string()),
        ("REDIRECT_STATUS".to_string(), "200".to_string()),
    ];
    if let Some(ct) = req.header("content-type") {
        env.push(("CONTENT_TYPE".to_string(), ct.to_string()));
    }
    for (name, value) in &req.headers {
        if name == "content-type" || name == "content-length" {
            continue;
        }
        if name.is_empty() || !name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-') {
            continue;
        }
        let var_name = format!("HTTP_{}", name.to_ascii_uppercase().replace('-', "_"));
        env.push((var_name, value.clone()));
    }
    env
}

pub struct CgiProcess {
    pub child: Child,
    pub stdin_writer: Option<Sender>,
    pub stdout_reader: Receiver,
    pub stdin_token: Token,
    pub stdout_token: Token,
    pending_stdin: Vec<u8>,
    stdin_offset: usize,
    pub output: Vec<u8>,
    pub stdout_done: bool,
    idle_slices: u32,
    timeout_slices: u32,
}

impl CgiProcess {
    pub fn spawn(
        interpreter: &Path,
        script_path: &Path,
        env: Vec<(String, String)>,
        body: Vec<u8>,
        cgi_timeout_secs: u64,
        stdin_token: Token,
        stdout_token: Token,
    ) -> io::Result<CgiProcess> {
        let (stdin_writer, child_stdin) = mio::unix::pipe::new()?;
        let (child_stdout, stdout_reader) = mio::unix::pipe::new()?;

        let mut command = Command::new(interpreter);
        command
            .arg(script_path)
            .env_clear()
            .envs(env)
            .stdin(Stdio::from(child_stdin))
            .stdout(Stdio::from(child_stdout))
            .stderr(Stdio::null());

        let child = command.spawn()?;

        let timeout_slices = ((cgi_timeout_secs * 1000) / TICK_MS).max(1) as u32;

        let stdin_writer = if body.is_empty() { None } else { Some(stdin_writer) };

        Ok(CgiProcess {
            child,
            stdin_writer,
            stdout_reader,
            stdin_token,
            stdout_token,
            pending_stdin: body,
            stdin_offset: 0,
            output: Vec::new(),
            stdout_done: false,
            idle_slices: 0,
            timeout_slices,
        })
    }

    pub fn register(&mut self, registry: &Registry) -> io::Result<()> {
        registry.register(&mut self.stdout_reader, self.stdout_token, Interest::READABLE)?;
        if let Some(writer) = self.stdin_writer.as_mut() {
            registry.register(writer, self.stdin_token, Interest::WRITABLE)?;
        }
        Ok(())
    }

    pub fn deregister(&mut self, registry: &Registry) {
        let _ = Source::deregister(&mut self.stdout_reader, registry);
        if let Some(writer) = self.stdin_writer.as_mut() {
            let _ = Source::deregister(writer, registry);
        }
    }

    /// Drains as much of `pending_stdin` as the pipe will accept; closes
    /// the write end once fully flushed so the child sees stdin EOF.
    pub fn writable(&mut self, registry: &Registry) -> io::Result<()> {
        let Some(writer) = self.stdin_writer.as_mut() else {
            return Ok(());
        };
        loop {
            if self.stdin_offset >= self.pending_stdin.len() {
                let mut writer = self.stdin_writer.take().unwrap();
                let _ = Source::deregister(&mut writer, registry);
                drop(writer);
                return Ok(());
            }
            match writer.write(&self.pending_stdin[self.stdin_offset..]) {
                Ok(0) => return Ok(()),
                Ok(n) => {
                    self.stdin_offset += n;
                    self.idle_slices = 0;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Reads available stdout bytes. Returns `true` once EOF is observed.
    pub fn readable(&mut self) -> io::Result<bool> {
        let mut buf = [0u8; 16 * 1024];
        loop {
            match self.stdout_reader.read(&mut buf) {
                Ok(0) => {
                    self.stdout_done = true;
                    return Ok(true);
                }
                Ok(n) => {
                    self.output.extend_from_slice(&buf[..n]);
                    self.idle_slices = 0;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Advances the idle-slice counter once per housekeeping tick. Returns
    /// `true` once the CGI request has exceeded `cgi_timeout`.
    pub fn tick(&mut self) -> bool {
        self.idle_slices += 1;
        self.idle_slices >= self.timeout_slices
    }

    pub fn kill_and_reap(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }

    /// Non-blocking reap; `Ok(Some(status))` once the child has exited.
    pub fn try_wait(&mut self) -> io::Result<Option<std::process::ExitStatus>> {
        self.child.try_wait()
    }
}

/// Parses raw CGI stdout into a response (§4.8). Headers managed by the
/// core (`Content-Length`, `Connection`, `Transfer-Encoding`) are dropped
/// and `Content-Length` is recomputed from the body.
pub fn parse_cgi_output(raw: &[u8], exit_ok: bool) -> Result<HttpResponse, u16> {
    if raw.is_empty() {
        return Err(500);
    }

    let (header_end, sep_len) = find_header_terminator(raw).ok_or(502u16)?;
    let header_text = std::str::from_utf8(&raw[..header_end]).map_err(|_| 502u16)?;
    let body = raw[header_end + sep_len..].to_vec();

    let mut status: Option<u16> = None;
    let mut headers: HashMap<String, String> = HashMap::new();
    for line in header_text.split("\r\n").flat_map(|l| l.split('\n')) {
        if line.is_empty() {
            continue;
        }
        let Some(idx) = line.find(':') else {
            return Err(502);
        };
        let key = line[..idx].trim().to_ascii_lowercase();
        let value = line[idx + 1..].trim().to_string();
        if key == "status" {
            let code_str = value.split_whitespace().next().unwrap_or("");
            status = code_str.parse().ok();
        } else if !matches!(key.as_str(), "content-length" | "connection" | "transfer-encoding") {
            headers.insert(key, value);
        }
    }

    if headers.get("content-type").is_none() && headers.get("location").is_none() {
        return Err(500);
    }

    let resolved_status = status.unwrap_or(if headers.contains_key("location") { 302 } else { 200 });
    if !exit_ok && resolved_status < 400 {
        return Err(500);
    }

    let mut resp = HttpResponse::new(resolved_status);
    for (key, value) in headers {
        let name = key
            .split('-')
            .map(|part| {
                let mut c = part.chars();
                match c.next() {
                    Some(first) => first.to_ascii_uppercase().to_string() + c.as_str(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join("-");
        resp = resp.header(&name, value);
    }
    resp.body = body;
    Ok(resp)
}

fn find_header_terminator(raw: &[u8]) -> Option<(usize, usize)> {
    if let Some(pos) = crate::http::request::find_subsequence(raw, b"\r\n\r\n") {
        return Some((pos, 4));
    }
    crate::http::request::find_subsequence(raw, b"\n\n").map(|pos| (pos, 2))
}

pub fn method_allows_cgi(method: &Method, allowed: &[String]) -> bool {
    allowed.iter().any(|m| m == method.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_status_and_body() {
        let raw = b"Status: 201 Created\r\nContent-Type: text/plain\r\n\r\nok";
        let resp = parse_cgi_output(raw, true).unwrap();
        assert_eq!(resp.status, 201);
        assert_eq!(resp.body, b"ok");
    }

    #[test]
    fn defaults_to_302_with_location() {
        let raw = b"Location: /elsewhere\r\n\r\n";
        let resp = parse_cgi_output(raw, true).unwrap();
        assert_eq!(resp.status, 302);
    }

    #[test]
    fn missing_terminator_is_502() {
        let raw = b"Content-Type: text/plain\r\nno terminator here";
        assert_eq!(parse_cgi_output(raw, true).unwrap_err(), 502);
    }

    #[test]
    fn missing_content_type_and_location_is_500() {
        let raw = b"X-Custom: 1\r\n\r\nbody";
        assert_eq!(parse_cgi_output(raw, true).unwrap_err(), 500);
    }

    #[test]
    fn strips_core_managed_headers() {
        let raw = b"Content-Type: text/plain\r\nContent-Length: 999\r\nConnection: keep-alive\r\n\r\nhi";
        let resp = parse_cgi_output(raw, true).unwrap();
        assert!(!resp.headers.iter().any(|(k, _)| k.eq_ignore_ascii_case("content-length")));
        assert!(!resp.headers.iter().any(|(k, _)| k.eq_ignore_ascii_case("connection")));
    }
}
