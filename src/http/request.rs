//! Incremental HTTP/1.x message parsing (§4.3, §4.4).
//!
//! Head extraction waits for a full `CRLFCRLF` in the connection's read
//! buffer, then the request-line and headers are parsed out of that
//! complete head in one pass. Bodies are decoded incrementally by a
//! streaming content-length or chunked reader that consumes bytes straight
//! out of the connection's read buffer as they arrive.

use std::collections::HashMap;
use std::fmt;

pub const MAX_HEAD_SIZE: usize = 16 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Delete,
    Head,
    Other(String),
}

impl Method {
    pub fn as_str(&self) -> &str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
            Method::Other(s) => s.as_str(),
        }
    }

    fn from_token(s: &str) -> Self {
        match s {
            "GET" => Method::Get,
            "POST" => Method::Post,
            "DELETE" => Method::Delete,
            "HEAD" => Method::Head,
            other => Method::Other(other.to_string()),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyMode {
    None,
    ContentLength,
    Chunked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    Size,
    Data,
    DataCrlf,
    Trailers,
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    BadRequest,
    UriTooLong,
    HeadersTooLarge,
    VersionNotSupported,
    NotImplemented,
    PayloadTooLarge,
}

impl ParseError {
    pub fn status(&self) -> u16 {
        match self {
            ParseError::BadRequest => 400,
            ParseError::UriTooLong => 414,
            ParseError::HeadersTooLarge => 431,
            ParseError::VersionNotSupported => 505,
            ParseError::NotImplemented => 501,
            ParseError::PayloadTooLarge => 413,
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({})", self, self.status())
    }
}

impl std::error::Error for ParseError {}

/// A fully or partially parsed HTTP request (§3 data model).
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub target: String,
    pub path: String,
    pub query: String,
    pub version: String,
    pub host: String,
    pub headers: HashMap<String, String>,
    pub keep_alive: bool,
    pub content_length: u64,
    pub has_content_length: bool,
    pub is_chunked: bool,
    pub body: Vec<u8>,
    pub body_mode: BodyMode,
    pub chunk_state: ChunkState,
    pub chunk_remaining: usize,
}

impl Default for HttpRequest {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpRequest {
    pub fn new() -> Self {
        Self {
            method: Method::Get,
            target: String::new(),
            path: String::new(),
            query: String::new(),
            version: String::new(),
            host: String::new(),
            headers: HashMap::new(),
            keep_alive: true,
            content_length: 0,
            has_content_length: false,
            is_chunked: false,
            body: Vec::new(),
            body_mode: BodyMode::None,
            chunk_state: ChunkState::Size,
            chunk_remaining: 0,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(|s| s.as_str())
    }
}

/// Strips leading empty heads (a client sending stray `CRLFCRLF` between
/// pipelined requests) then locates the first `CRLFCRLF`. Returns the
/// number of leading bytes to discard as noise, if any.
fn skip_leading_blank_lines(buf: &[u8]) -> usize {
    let mut i = 0;
    while buf[i..].starts_with(b"\r\n") {
        i += 2;
    }
    i
}

/// Attempts to extract a complete head (request-line + headers, terminator
/// included) from the front of `buf`. Returns the number of bytes consumed
/// (including the terminator) and the head bytes (terminator excluded).
pub fn extract_head(buf: &[u8]) -> Result<Option<(usize, Vec<u8>)>, ParseError> {
    let skip = skip_leading_blank_lines(buf);
    let rest = &buf[skip..];
    match find_subsequence(rest, b"\r\n\r\n") {
        Some(pos) => Ok(Some((skip + pos + 4, rest[..pos].to_vec()))),
        None => {
            if rest.len() > MAX_HEAD_SIZE {
                Err(ParseError::HeadersTooLarge)
            } else {
                Ok(None)
            }
        }
    }
}

pub fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn is_tchar(b: u8) -> bool {
    b.is_ascii_alphanumeric()
        || matches!(
            b,
            b'!' | b'#'
                | b'$'
                | b'%'
                | b'&'
                | b'\''
                | b'*'
                | b'+'
                | b'-'
                | b'.'
                | b'^'
                | b'_'
                | b'`'
                | b'|'
                | b'~'
        )
}

fn split_target(target: &str, method: &Method) -> Result<(String, String), ParseError> {
    if target == "*" {
        if *method != Method::Other("OPTIONS".to_string()) {
            return Err(ParseError::BadRequest);
        }
        return Ok(("/".to_string(), String::new()));
    }
    if target.starts_with('/') {
        // Origin-form.
        let (path, query) = match target.split_once('?') {
            Some((p, q)) => (p.to_string(), q.to_string()),
            None => (target.to_string(), String::new()),
        };
        return Ok((path, query));
    }
    if let Some(scheme_end) = target.find("://") {
        // Absolute-form: skip scheme + authority.
        let after_scheme = &target[scheme_end + 3..];
        let path_start = after_scheme.find('/');
        let (path_part, query) = match path_start {
            Some(idx) => match after_scheme[idx..].split_once('?') {
                Some((p, q)) => (p.to_string(), q.to_string()),
                None => (after_scheme[idx..].to_string(), String::new()),
            },
            None => ("/".to_string(), String::new()),
        };
        return Ok((path_part, query));
    }
    Err(ParseError::BadRequest)
}

fn parse_request_line(line: &str) -> Result<(Method, String, String), ParseError> {
    let mut parts = line.split(|c| c == ' ' || c == '\t').filter(|s| !s.is_empty());
    let method_tok = parts.next().ok_or(ParseError::BadRequest)?;
    let target = parts.next().ok_or(ParseError::BadRequest)?;
    let version = parts.next().ok_or(ParseError::BadRequest)?;
    if parts.next().is_some() {
        return Err(ParseError::BadRequest);
    }
    if method_tok.is_empty() || !method_tok.bytes().all(is_tchar) {
        return Err(ParseError::BadRequest);
    }
    if target.is_empty() || target.bytes().any(|b| b < 0x20 || b == 0x7f) {
        return Err(ParseError::BadRequest);
    }
    if version != "HTTP/1.0" && version != "HTTP/1.1" {
        return Err(ParseError::VersionNotSupported);
    }
    Ok((Method::from_token(method_tok), target.to_string(), version.to_string()))
}

/// Parses a complete head (as returned by `extract_head`) into a fresh
/// `HttpRequest`, applying request-line, header, Host, Connection,
/// Content-Length, and Transfer-Encoding validation from §4.3.
pub fn parse_head(head: &[u8]) -> Result<HttpRequest, ParseError> {
    let text = std::str::from_utf8(head).map_err(|_| ParseError::BadRequest)?;
    let mut lines = split_crlf_lines(text);
    let request_line = lines.next().ok_or(ParseError::BadRequest)?;
    let (method, target, version) = parse_request_line(request_line)?;

    let mut req = HttpRequest::new();
    req.method = method;
    req.target = target.clone();
    req.version = version.clone();

    let (path, query) = split_target(&target, &req.method)?;
    req.path = path;
    req.query = query;

    let mut pending_key: Option<String> = None;
    let mut host_values: Vec<String> = Vec::new();

    for line in lines {
        if line.is_empty() {
            continue;
        }
        let is_continuation = line.starts_with(' ') || line.starts_with('\t');
        if is_continuation {
            let key = pending_key.clone().ok_or(ParseError::BadRequest)?;
            let extra = line.trim();
            let entry = req.headers.get_mut(&key).ok_or(ParseError::BadRequest)?;
            entry.push(' ');
            entry.push_str(extra);
            if key == "host" {
                if let Some(last) = host_values.last_mut() {
                    last.push(' ');
                    last.push_str(extra);
                }
            }
            continue;
        }
        let sep = line.find(':').ok_or(ParseError::BadRequest)?;
        let raw_key = &line[..sep];
        if raw_key.is_empty() || !raw_key.bytes().all(is_tchar) {
            return Err(ParseError::BadRequest);
        }
        let key = raw_key.to_ascii_lowercase();
        let value = line[sep + 1..].trim().to_string();

        if key == "host" {
            host_values.push(value.clone());
        }

        req.headers
            .entry(key.clone())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
        pending_key = Some(key);
    }

    // Host validation (§4.3).
    if req.version == "HTTP/1.1" && host_values.is_empty() {
        return Err(ParseError::BadRequest);
    }
    if host_values.len() > 1 {
        let first = host_values[0].to_ascii_lowercase();
        if !host_values.iter().all(|h| h.to_ascii_lowercase() == first) {
            return Err(ParseError::BadRequest);
        }
    }
    if let Some(h) = host_values.first() {
        if h.contains(',') {
            return Err(ParseError::BadRequest);
        }
        req.host = h.to_ascii_lowercase();
    }

    // Connection handling: close wins over keep-alive when both appear.
    req.keep_alive = req.version == "HTTP/1.1";
    if let Some(conn_header) = req.headers.get("connection") {
        let tokens: Vec<String> = conn_header
            .split(',')
            .map(|t| t.trim().to_ascii_lowercase())
            .collect();
        if tokens.iter().any(|t| t == "close") {
            req.keep_alive = false;
        } else if tokens.iter().any(|t| t == "keep-alive") {
            req.keep_alive = true;
        }
    }

    // Content-Length / Transfer-Encoding disambiguation.
    let has_te = req.headers.contains_key("transfer-encoding");
    let has_cl = req.headers.contains_key("content-length");
    if has_te && has_cl {
        return Err(ParseError::BadRequest);
    }
    if has_te {
        let te = req.headers.get("transfer-encoding").unwrap().to_ascii_lowercase();
        let tokens: Vec<&str> = te.split(',').map(|t| t.trim()).collect();
        if tokens != ["chunked"] {
            return Err(ParseError::NotImplemented);
        }
        req.is_chunked = true;
        req.body_mode = BodyMode::Chunked;
    } else if has_cl {
        let cl_header = req.headers.get("content-length").unwrap().clone();
        let values: Vec<&str> = cl_header.split(',').map(|v| v.trim()).collect();
        let first = values[0];
        if !values.iter().all(|v| *v == first) {
            return Err(ParseError::BadRequest);
        }
        if first.is_empty() || !first.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ParseError::BadRequest);
        }
        let len: u64 = first.parse().map_err(|_| ParseError::PayloadTooLarge)?;
        req.content_length = len;
        req.has_content_length = true;
        req.body_mode = if len > 0 {
            BodyMode::ContentLength
        } else {
            BodyMode::None
        };
    }

    Ok(req)
}

fn split_crlf_lines(text: &str) -> impl Iterator<Item = &str> {
    let mut rest = text;
    std::iter::from_fn(move || {
        if rest.is_empty() {
            return None;
        }
        match rest.find("\r\n") {
            Some(idx) => {
                let line = &rest[..idx];
                rest = &rest[idx + 2..];
                Some(line)
            }
            None => {
                let line = rest;
                rest = "";
                Some(line)
            }
        }
    })
}

/// Streaming content-length body reader. Consumes bytes from the front of
/// `buf`, returns `Ok(true)` once the body is complete.
pub fn feed_content_length_body(
    req: &mut HttpRequest,
    buf: &mut Vec<u8>,
    cap: u64,
) -> Result<bool, ParseError> {
    let remaining = req.content_length - req.body.len() as u64;
    let to_take = std::cmp::min(buf.len() as u64, remaining) as usize;
    if to_take > 0 {
        req.body.extend_from_slice(&buf[..to_take]);
        buf.drain(..to_take);
        if cap != 0 && req.body.len() as u64 > cap {
            return Err(ParseError::PayloadTooLarge);
        }
    }
    Ok(req.body.len() as u64 == req.content_length)
}

/// Streaming chunked body decoder (§4.4). Consumes bytes from the front of
/// `buf` as a full chunked-transfer state machine; returns `Ok(true)` once
/// the terminating bare CRLF after trailers has been consumed.
pub fn feed_chunked_body(req: &mut HttpRequest, buf: &mut Vec<u8>, cap: u64) -> Result<bool, ParseError> {
    loop {
        match req.chunk_state {
            ChunkState::Size => {
                let Some(line_end) = find_subsequence(buf, b"\r\n") else {
                    if buf.len() > 4096 {
                        return Err(ParseError::BadRequest);
                    }
                    return Ok(false);
                };
                let line = std::str::from_utf8(&buf[..line_end]).map_err(|_| ParseError::BadRequest)?;
                let size_str = line.split(';').next().unwrap_or("").trim();
                let size = usize::from_str_radix(size_str, 16).map_err(|_| ParseError::BadRequest)?;
                buf.drain(..line_end + 2);
                if size == 0 {
                    req.chunk_state = ChunkState::Trailers;
                } else {
                    if cap != 0 && req.body.len() as u64 + size as u64 > cap {
                        return Err(ParseError::PayloadTooLarge);
                    }
                    req.chunk_remaining = size;
                    req.chunk_state = ChunkState::Data;
                }
            }
            ChunkState::Data => {
                if buf.is_empty() {
                    return Ok(false);
                }
                let to_take = std::cmp::min(buf.len(), req.chunk_remaining);
                req.body.extend_from_slice(&buf[..to_take]);
                buf.drain(..to_take);
                req.chunk_remaining -= to_take;
                if req.chunk_remaining == 0 {
                    req.chunk_state = ChunkState::DataCrlf;
                } else {
                    return Ok(false);
                }
            }
            ChunkState::DataCrlf => {
                if buf.len() < 2 {
                    return Ok(false);
                }
                if &buf[..2] != b"\r\n" {
                    return Err(ParseError::BadRequest);
                }
                buf.drain(..2);
                req.chunk_state = ChunkState::Size;
            }
            ChunkState::Trailers => {
                let Some(line_end) = find_subsequence(buf, b"\r\n") else {
                    if buf.len() > 8192 {
                        return Err(ParseError::HeadersTooLarge);
                    }
                    return Ok(false);
                };
                if line_end == 0 {
                    buf.drain(..2);
                    req.chunk_state = ChunkState::Done;
                    return Ok(true);
                }
                // Trailer values are discarded (§4.4).
                buf.drain(..line_end + 2);
            }
            ChunkState::Done => return Ok(true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn head(s: &str) -> Vec<u8> {
        s.replace('\n', "\r\n").into_bytes()
    }

    #[test]
    fn parses_simple_get() {
        let h = head("GET /index.html HTTP/1.1\nHost: localhost\n");
        let req = parse_head(&h).unwrap();
        assert_eq!(req.method, Method::Get);
        assert_eq!(req.path, "/index.html");
        assert_eq!(req.host, "localhost");
        assert!(req.keep_alive);
    }

    #[test]
    fn query_string_split() {
        let h = head("GET /a?x=1&y=2 HTTP/1.1\nHost: a\n");
        let req = parse_head(&h).unwrap();
        assert_eq!(req.path, "/a");
        assert_eq!(req.query, "x=1&y=2");
    }

    #[test]
    fn absolute_form_target() {
        let h = head("GET http://example.com/a/b?q HTTP/1.1\nHost: a\n");
        let req = parse_head(&h).unwrap();
        assert_eq!(req.path, "/a/b");
        assert_eq!(req.query, "q");
    }

    #[test]
    fn missing_host_on_http11_is_bad_request() {
        let h = head("GET / HTTP/1.1\n");
        assert_eq!(parse_head(&h).unwrap_err(), ParseError::BadRequest);
    }

    #[test]
    fn http10_allows_missing_host() {
        let h = head("GET / HTTP/1.0\n");
        let req = parse_head(&h).unwrap();
        assert!(!req.keep_alive);
    }

    #[test]
    fn duplicate_distinct_host_is_bad_request() {
        let h = head("GET / HTTP/1.1\nHost: a\nHost: b\n");
        assert_eq!(parse_head(&h).unwrap_err(), ParseError::BadRequest);
    }

    #[test]
    fn close_wins_over_keep_alive() {
        let h = head("GET / HTTP/1.1\nHost: a\nConnection: keep-alive, close\n");
        let req = parse_head(&h).unwrap();
        assert!(!req.keep_alive);
    }

    #[test]
    fn header_folding_joins_with_space() {
        let h = head("GET / HTTP/1.1\nHost: a\nX-Long: foo\n bar\n");
        let req = parse_head(&h).unwrap();
        assert_eq!(req.header("x-long"), Some("foo bar"));
    }

    #[test]
    fn duplicate_headers_coalesce_with_comma() {
        let h = head("GET / HTTP/1.1\nHost: a\nX-A: 1\nX-A: 2\n");
        let req = parse_head(&h).unwrap();
        assert_eq!(req.header("x-a"), Some("1, 2"));
    }

    #[test]
    fn content_length_and_transfer_encoding_conflict() {
        let h = head("GET / HTTP/1.1\nHost: a\nContent-Length: 5\nTransfer-Encoding: chunked\n");
        assert_eq!(parse_head(&h).unwrap_err(), ParseError::BadRequest);
    }

    #[test]
    fn unsupported_transfer_encoding_is_501() {
        let h = head("GET / HTTP/1.1\nHost: a\nTransfer-Encoding: gzip\n");
        assert_eq!(parse_head(&h).unwrap_err(), ParseError::NotImplemented);
    }

    #[test]
    fn bad_version_is_505() {
        let h = head("GET / HTTP/2.0\nHost: a\n");
        assert_eq!(parse_head(&h).unwrap_err(), ParseError::VersionNotSupported);
    }

    #[test]
    fn content_length_body_feed() {
        let h = head("POST / HTTP/1.1\nHost: a\nContent-Length: 5\n");
        let mut req = parse_head(&h).unwrap();
        let mut buf = b"hel".to_vec();
        assert_eq!(feed_content_length_body(&mut req, &mut buf, 0).unwrap(), false);
        let mut buf2 = b"lo".to_vec();
        assert_eq!(feed_content_length_body(&mut req, &mut buf2, 0).unwrap(), true);
        assert_eq!(req.body, b"hello");
    }

    #[test]
    fn content_length_over_cap_is_413() {
        let h = head("POST / HTTP/1.1\nHost: a\nContent-Length: 10\n");
        let mut req = parse_head(&h).unwrap();
        let mut buf = b"0123456789".to_vec();
        assert_eq!(
            feed_content_length_body(&mut req, &mut buf, 4).unwrap_err(),
            ParseError::PayloadTooLarge
        );
    }

    #[test]
    fn chunked_body_decodes_fully() {
        let h = head("POST / HTTP/1.1\nHost: a\nTransfer-Encoding: chunked\n");
        let mut req = parse_head(&h).unwrap();
        let mut buf = b"4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n".to_vec();
        assert!(feed_chunked_body(&mut req, &mut buf, 0).unwrap());
        assert_eq!(req.body, b"Wikipedia");
    }

    #[test]
    fn chunked_body_zero_chunk_is_empty() {
        let h = head("POST / HTTP/1.1\nHost: a\nTransfer-Encoding: chunked\n");
        let mut req = parse_head(&h).unwrap();
        let mut buf = b"0\r\n\r\n".to_vec();
        assert!(feed_chunked_body(&mut req, &mut buf, 0).unwrap());
        assert!(req.body.is_empty());
    }

    #[test]
    fn chunked_body_in_pieces_is_deterministic() {
        let whole = b"4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n".to_vec();
        let h = head("POST / HTTP/1.1\nHost: a\nTransfer-Encoding: chunked\n");

        let mut req_all = parse_head(&h).unwrap();
        let mut buf_all = whole.clone();
        assert!(feed_chunked_body(&mut req_all, &mut buf_all, 0).unwrap());

        let mut req_split = parse_head(&h).unwrap();
        let mut buf_split: Vec<u8> = Vec::new();
        for byte in whole {
            buf_split.push(byte);
            let _ = feed_chunked_body(&mut req_split, &mut buf_split, 0);
        }
        assert_eq!(req_all.body, req_split.body);
    }

    #[test]
    fn head_too_large_without_terminator_is_431() {
        let mut buf = vec![b'a'; MAX_HEAD_SIZE + 1];
        assert_eq!(extract_head(&mut buf).unwrap_err(), ParseError::HeadersTooLarge);
    }

    #[test]
    fn head_at_exact_cap_with_terminator_succeeds() {
        let mut line = b"GET / HTTP/1.1\r\nHost: a\r\n".to_vec();
        let pad_len = MAX_HEAD_SIZE - line.len() - 4 - 2;
        line.extend(std::iter::repeat(b'x').take(pad_len));
        let mut buf = line;
        buf.extend_from_slice(b"\r\n\r\n");
        let (consumed, head_bytes) = extract_head(&buf).unwrap().unwrap();
        assert_eq!(consumed, buf.len());
        assert!(!head_bytes.is_empty());
    }
}
