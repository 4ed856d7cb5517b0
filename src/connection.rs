//! Per-connection state machine (§4.5, §3 data model).

use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use mio::net::TcpStream;
use mio::Token;

use crate::cgi::CgiProcess;
use crate::clock::Clock;
use crate::dispatcher::{Action, EffectiveConfig};
use crate::http::request::{extract_head, parse_head, feed_chunked_body, feed_content_length_body, BodyMode, HttpRequest};

pub const HEADER_TIMEOUT: Duration = Duration::from_secs(15);
pub const BODY_TIMEOUT: Duration = Duration::from_secs(30);
pub const KEEPALIVE_IDLE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    ReadingHeaders,
    ReadingBody,
    Cgi,
    Writing,
    Closing,
}

/// One accepted client socket and all of its per-request mutable state.
pub struct Connection {
    pub socket: TcpStream,
    pub token: Token,
    pub peer_addr: SocketAddr,
    pub listener_token: Token,
    /// Index into the shared `Vec<ServerConfig>` to fall back on when no
    /// `Host` header matches any server name (§3 Listener record).
    pub default_server_idx: usize,

    pub read_buf: Vec<u8>,
    pub write_buf: Vec<u8>,
    pub write_offset: usize,

    pub state: ConnState,
    pub request: HttpRequest,
    pub effective_body_cap: u64,
    /// The route decided right after headers were parsed (§4.6), carried
    /// across body reading so the action only has to be computed once.
    pub pending: Option<(Action, EffectiveConfig)>,

    pub last_active: Instant,
    pub keepalive_idle_start: Option<Instant>,

    pub close_after_write: bool,
    pub cgi: Option<CgiProcess>,
}

impl Connection {
    pub fn new(
        socket: TcpStream,
        token: Token,
        listener_token: Token,
        default_server_idx: usize,
        clock: &dyn Clock,
    ) -> io::Result<Self> {
        let peer_addr = socket.peer_addr().unwrap_or_else(|_| "0.0.0.0:0".parse().unwrap());
        Ok(Self {
            socket,
            token,
            peer_addr,
            listener_token,
            default_server_idx,
            read_buf: Vec::new(),
            write_buf: Vec::new(),
            write_offset: 0,
            state: ConnState::ReadingHeaders,
            request: HttpRequest::new(),
            effective_body_cap: 0,
            pending: None,
            last_active: clock.now(),
            keepalive_idle_start: None,
            close_after_write: false,
            cgi: None,
        })
    }

    /// Drains the socket into `read_buf` until would-block, EOF, or error.
    /// Returns `true` if the peer closed the connection.
    pub fn drain_readable(&mut self) -> io::Result<bool> {
        let mut tmp = [0u8; 16 * 1024];
        loop {
            match self.socket.read(&mut tmp) {
                Ok(0) => return Ok(true),
                Ok(n) => self.read_buf.extend_from_slice(&tmp[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Attempts to extract a full head from the read buffer (§4.3).
    pub fn try_extract_head(&mut self) -> Result<Option<Vec<u8>>, crate::http::request::ParseError> {
        match extract_head(&self.read_buf)? {
            Some((consumed, head)) => {
                self.read_buf.drain(..consumed);
                Ok(Some(head))
            }
            None => Ok(None),
        }
    }

    pub fn parse_request_head(&mut self, head: &[u8]) -> Result<(), crate::http::request::ParseError> {
        self.request = parse_head(head)?;
        Ok(())
    }

    /// Feeds buffered body bytes into the in-progress request. Returns
    /// `true` once the body is complete.
    pub fn feed_body(&mut self) -> Result<bool, crate::http::request::ParseError> {
        match self.request.body_mode {
            BodyMode::None => Ok(true),
            BodyMode::ContentLength => {
                feed_content_length_body(&mut self.request, &mut self.read_buf, self.effective_body_cap)
            }
            BodyMode::Chunked => feed_chunked_body(&mut self.request, &mut self.read_buf, self.effective_body_cap),
        }
    }

    /// Writes from `write_buf[write_offset..]` until would-block or drained.
    /// Returns `true` once fully flushed.
    pub fn flush_writable(&mut self) -> io::Result<bool> {
        loop {
            if self.write_offset >= self.write_buf.len() {
                return Ok(true);
            }
            match self.socket.write(&self.write_buf[self.write_offset..]) {
                Ok(0) => return Ok(false),
                Ok(n) => self.write_offset += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    pub fn set_response(&mut self, bytes: Vec<u8>, close_after: bool) {
        self.write_buf = bytes;
        self.write_offset = 0;
        self.close_after_write = close_after;
        self.state = ConnState::Writing;
    }

    /// Resets per-request state after a keep-alive response has flushed.
    pub fn reset_for_next_request(&mut self, clock: &dyn Clock) {
        self.read_buf.clear();
        self.write_buf.clear();
        self.write_offset = 0;
        self.request = HttpRequest::new();
        self.effective_body_cap = 0;
        self.pending = None;
        self.state = ConnState::ReadingHeaders;
        let now = clock.now();
        self.last_active = now;
        self.keepalive_idle_start = Some(now);
    }

    pub fn touch(&mut self, clock: &dyn Clock) {
        self.last_active = clock.now();
        self.keepalive_idle_start = None;
    }

    pub fn is_timed_out(&self, clock: &dyn Clock) -> bool {
        let now = clock.now();
        match self.state {
            ConnState::ReadingHeaders => {
                if let Some(idle_start) = self.keepalive_idle_start {
                    now.saturating_duration_since(idle_start) > KEEPALIVE_IDLE_TIMEOUT
                } else {
                    now.saturating_duration_since(self.last_active) > HEADER_TIMEOUT
                }
            }
            ConnState::ReadingBody => now.saturating_duration_since(self.last_active) > BODY_TIMEOUT,
            _ => false,
        }
    }
}
