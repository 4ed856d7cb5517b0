//! Response construction and serialization (§4.9), plus the small amount of
//! presentation logic (MIME table, autoindex HTML, default error bodies)
//! that the response builder owns.

use std::fs;
use std::path::Path;
use std::time::SystemTime;

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub keep_alive: bool,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
            keep_alive: true,
        }
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn body(mut self, content_type: &str, body: Vec<u8>) -> Self {
        self.headers.push(("Content-Type".to_string(), content_type.to_string()));
        self.body = body;
        self
    }

    pub fn text(status: u16, text: impl Into<String>) -> Self {
        Self::new(status).body("text/plain; charset=utf-8", text.into().into_bytes())
    }

    pub fn html(status: u16, html: impl Into<String>) -> Self {
        Self::new(status).body("text/html; charset=utf-8", html.into().into_bytes())
    }

    pub fn empty(status: u16) -> Self {
        Self::new(status)
    }

    pub fn redirect(status: u16, location: impl Into<String>) -> Self {
        Self::new(status).header("Location", location.into())
    }

    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Serializes the full response. `include_body` is false for HEAD
    /// requests: headers (including Content-Length) are still computed
    /// from `self.body`, but no body bytes are written to the wire.
    pub fn serialize(&self, include_body: bool) -> Vec<u8> {
        let mut out = Vec::with_capacity(256 + self.body.len());
        out.extend_from_slice(format!("HTTP/1.1 {} {}\r\n", self.status, status_text(self.status)).as_bytes());
        out.extend_from_slice(format!("Server: webserv\r\n").as_bytes());
        out.extend_from_slice(format!("Date: {}\r\n", rfc1123_date(SystemTime::now())).as_bytes());

        let mut wrote_content_length = false;
        let mut wrote_connection = false;
        for (name, value) in &self.headers {
            if name.eq_ignore_ascii_case("content-length") {
                wrote_content_length = true;
            }
            if name.eq_ignore_ascii_case("connection") {
                wrote_connection = true;
            }
            out.extend_from_slice(format!("{}: {}\r\n", name, value).as_bytes());
        }
        if !wrote_content_length {
            out.extend_from_slice(format!("Content-Length: {}\r\n", self.body.len()).as_bytes());
        }
        if !wrote_connection {
            if self.keep_alive {
                out.extend_from_slice(b"Connection: keep-alive\r\n");
                out.extend_from_slice(b"Keep-Alive: timeout=5\r\n");
            } else {
                out.extend_from_slice(b"Connection: close\r\n");
            }
        }
        out.extend_from_slice(b"\r\n");
        if include_body {
            out.extend_from_slice(&self.body);
        }
        out
    }
}

/// Formats a `SystemTime` as an RFC 1123 GMT timestamp for the `Date`
/// header (§4.9), e.g. `Tue, 15 Nov 1994 08:12:31 GMT`.
pub fn rfc1123_date(t: SystemTime) -> String {
    let secs = t
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    let days = secs.div_euclid(86_400);
    let secs_of_day = secs.rem_euclid(86_400);
    let (year, month, day) = civil_from_days(days);
    let weekday = ((days % 7 + 11) % 7) as usize; // 1970-01-01 was a Thursday.
    let hour = secs_of_day / 3600;
    let minute = (secs_of_day % 3600) / 60;
    let second = secs_of_day % 60;

    const WEEKDAYS: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];
    const MONTHS: [&str; 12] = [
        "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
    ];
    format!(
        "{}, {:02} {} {:04} {:02}:{:02}:{:02} GMT",
        WEEKDAYS[weekday],
        day,
        MONTHS[(month - 1) as usize],
        year,
        hour,
        minute,
        second
    )
}

/// Howard Hinnant's `civil_from_days`: converts a day count since the Unix
/// epoch into a `(year, month, day)` proleptic-Gregorian civil date.
fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146_096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    let year = if m <= 2 { y + 1 } else { y };
    (year, m, d)
}

pub fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        409 => "Conflict",
        411 => "Length Required",
        413 => "Payload Too Large",
        414 => "URI Too Long",
        415 => "Unsupported Media Type",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        505 => "HTTP Version Not Supported",
        _ => "Unknown",
    }
}

/// Minimal fallback error body (§4.9), used when no custom `error_page`
/// directive applies or the custom page itself cannot be read.
pub fn default_error_body(status: u16) -> String {
    let text = status_text(status);
    format!(
        "<html>\r\n<head><title>{0} {1}</title></head>\r\n\
         <body>\r\n<center><h1>{0} {1}</h1></center>\r\n\
         <hr><center>webserv</center>\r\n</body>\r\n</html>\r\n",
        status, text
    )
}

/// Extension-based MIME lookup (§4.9). Unknown extensions fall back to
/// `application/octet-stream`.
pub fn mime_type_for(path: &str) -> &'static str {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    match ext.as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" | "mjs" => "text/javascript; charset=utf-8",
        "json" => "application/json",
        "txt" => "text/plain; charset=utf-8",
        "xml" => "application/xml",
        "csv" => "text/csv; charset=utf-8",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "webp" => "image/webp",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "tar" => "application/x-tar",
        "mp4" => "video/mp4",
        "mp3" => "audio/mpeg",
        "wasm" => "application/wasm",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        _ => "application/octet-stream",
    }
}

fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Renders a directory listing (§4.7). Dotfiles are skipped; `uri_path`
/// must already end in `/`.
pub fn render_autoindex(uri_path: &str, fs_path: &Path) -> std::io::Result<String> {
    let mut entries: Vec<(String, bool)> = Vec::new();
    for entry in fs::read_dir(fs_path)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        entries.push((name, is_dir));
    }
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let mut body = String::new();
    body.push_str("<html>\r\n<head><title>Index of ");
    body.push_str(&html_escape(uri_path));
    body.push_str("</title></head>\r\n<body>\r\n<h1>Index of ");
    body.push_str(&html_escape(uri_path));
    body.push_str("</h1><hr><pre>\r\n");
    if uri_path != "/" {
        body.push_str("<a href=\"../\">../</a>\r\n");
    }
    for (name, is_dir) in entries {
        let href = if is_dir { format!("{}/", name) } else { name.clone() };
        let display = if is_dir { format!("{}/", name) } else { name };
        body.push_str(&format!(
            "<a href=\"{}\">{}</a>\r\n",
            html_escape(&href),
            html_escape(&display)
        ));
    }
    body.push_str("</pre><hr></body>\r\n</html>\r\n");
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize_includes_status_and_headers() {
        let resp = HttpResponse::html(200, "<p>hi</p>");
        let bytes = resp.serialize(true);
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Type: text/html; charset=utf-8\r\n"));
        assert!(text.contains("Content-Length: 9\r\n"));
        assert!(text.ends_with("<p>hi</p>"));
    }

    #[test]
    fn head_omits_body_but_keeps_content_length() {
        let resp = HttpResponse::text(200, "hello");
        let bytes = resp.serialize(false);
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("Content-Length: 5\r\n"));
        assert!(!text.contains("hello"));
    }

    #[test]
    fn close_connection_has_no_keep_alive_header() {
        let resp = HttpResponse::empty(204).keep_alive(false);
        let text = String::from_utf8(resp.serialize(true)).unwrap();
        assert!(text.contains("Connection: close\r\n"));
        assert!(!text.contains("Keep-Alive:"));
    }

    #[test]
    fn mime_lookup_known_and_unknown() {
        assert_eq!(mime_type_for("a.html"), "text/html; charset=utf-8");
        assert_eq!(mime_type_for("a.unknownext"), "application/octet-stream");
    }

    #[test]
    fn autoindex_escapes_and_skips_dotfiles() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".hidden"), b"x").unwrap();
        std::fs::write(dir.path().join("a&b.txt"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let html = render_autoindex("/files/", dir.path()).unwrap();
        assert!(!html.contains(".hidden"));
        assert!(html.contains("a&amp;b.txt"));
        assert!(html.contains("sub/"));
    }

    #[test]
    fn default_error_body_mentions_status() {
        let body = default_error_body(404);
        assert!(body.contains("404"));
        assert!(body.contains("Not Found"));
    }

    #[test]
    fn rfc1123_date_known_epoch() {
        // 2024-01-01T00:00:00Z is a Monday.
        let t = std::time::UNIX_EPOCH + std::time::Duration::from_secs(1_704_067_200);
        assert_eq!(rfc1123_date(t), "Mon, 01 Jan 2024 00:00:00 GMT");
    }

    #[test]
    fn rfc1123_date_at_epoch() {
        assert_eq!(rfc1123_date(std::time::UNIX_EPOCH), "Thu, 01 Jan 1970 00:00:00 GMT");
    }
}
