//! The event loop (§4.5, §5): a single `mio::Poll` driving listeners,
//! client connections, and CGI pipes from one readiness-driven reactor tick.

use std::collections::HashMap;
use std::io;
use std::time::Duration;

use mio::{Events, Interest, Token};
use proxy_log::{info, warn};

use crate::cgi::CgiProcess;
use crate::clock::{Clock, SystemClock};
use crate::config::ServerConfig;
use crate::connection::{Connection, ConnState};
use crate::dispatcher::{self, Action, EffectiveConfig, RouteDecision};
use crate::error::Result;
use crate::handlers;
use crate::http::{default_error_body, BodyMode, HttpResponse, Method};
use crate::listener::{build_listeners, Listener};
use crate::poll::{PollRegistry, TokenAllocator};

/// Fixed housekeeping tick (§4.2): a zero-event `poll()` return still
/// advances the logical clock and runs timeout/CGI-idle bookkeeping.
const TICK: Duration = Duration::from_millis(250);

/// What `advance_request` got done with the bytes currently buffered.
/// Side-effecting follow-up (spawning a CGI child, closing a socket) is the
/// caller's job since that needs the registry/token allocator.
enum Outcome {
    NeedMoreHeaderBytes,
    NeedMoreBody,
    Responded,
    StartCgi(Action, EffectiveConfig),
}

/// Builds the wire response for a completed route decision and stores it
/// on the connection, applying HEAD's no-body rule and forcing `close`
/// when the framing is ambiguous or a body was left unread (§4.9, §7).
fn apply_response(conn: &mut Connection, mut resp: HttpResponse, force_close: bool) {
    let keep_alive = conn.request.keep_alive && !force_close;
    resp.keep_alive = keep_alive;
    let include_body = conn.request.method != Method::Head;
    let bytes = resp.serialize(include_body);
    conn.set_response(bytes, !keep_alive);
}

fn execute_sync_action(action: &Action, effective: &EffectiveConfig, req: &crate::http::HttpRequest) -> HttpResponse {
    match action {
        Action::Static { fs_path } => handlers::handle_static(fs_path),
        Action::Directory { fs_path, uri_path } => handlers::handle_directory(fs_path, uri_path, effective),
        Action::Upload { fs_path } => handlers::handle_upload(fs_path, &req.body, &req.target),
        Action::Delete { fs_path } => handlers::handle_delete(fs_path),
        Action::Cgi { .. } => unreachable!("CGI is handled via Outcome::StartCgi"),
    }
}

fn finish_action(conn: &mut Connection, action: Action, effective: EffectiveConfig) -> Outcome {
    if matches!(action, Action::Cgi { .. }) {
        return Outcome::StartCgi(action, effective);
    }
    let resp = execute_sync_action(&action, &effective, &conn.request);
    apply_response(conn, resp, false);
    Outcome::Responded
}

/// Drives one connection's request as far as the bytes currently in its
/// read buffer allow: extract + parse the head, route it, then (if a body
/// is expected) decode as much of it as has arrived (§4.3-§4.6).
fn advance_request(conn: &mut Connection, servers: &[ServerConfig]) -> Outcome {
    loop {
        match conn.state {
            ConnState::ReadingHeaders => {
                let head = match conn.try_extract_head() {
                    Ok(Some(h)) => h,
                    Ok(None) => return Outcome::NeedMoreHeaderBytes,
                    Err(e) => {
                        apply_response(conn, HttpResponse::html(e.status(), default_error_body(e.status())), true);
                        return Outcome::Responded;
                    }
                };
                if let Err(e) = conn.parse_request_head(&head) {
                    apply_response(conn, HttpResponse::html(e.status(), default_error_body(e.status())), true);
                    return Outcome::Responded;
                }

                let decision = dispatcher::dispatch(&conn.request, servers, conn.default_server_idx);
                match decision {
                    RouteDecision::Immediate(resp) => {
                        let body_pending = conn.request.body_mode != BodyMode::None;
                        apply_response(conn, resp, body_pending);
                        return Outcome::Responded;
                    }
                    RouteDecision::Proceed { action, effective } => {
                        conn.effective_body_cap = effective.client_max_body_size;
                        if conn.request.body_mode == BodyMode::None {
                            return finish_action(conn, action, effective);
                        }
                        conn.pending = Some((action, effective));
                        conn.state = ConnState::ReadingBody;
                    }
                }
            }
            ConnState::ReadingBody => match conn.feed_body() {
                Ok(true) => {
                    let (action, effective) = conn.pending.take().expect("pending action set before body read");
                    return finish_action(conn, action, effective);
                }
                Ok(false) => return Outcome::NeedMoreBody,
                Err(e) => {
                    apply_response(conn, HttpResponse::html(e.status(), default_error_body(e.status())), true);
                    return Outcome::Responded;
                }
            },
            _ => return Outcome::Responded,
        }
    }
}

/// Owns every listener, connection, and in-flight CGI pipe, and drives them
/// all from one `mio::Poll` (§5: single-threaded, cooperative, readiness-driven).
pub struct Server {
    servers: Vec<ServerConfig>,
    listeners: Vec<Listener>,
    listener_by_token: HashMap<Token, usize>,
    registry: PollRegistry,
    tokens: TokenAllocator,
    connections: HashMap<Token, Connection>,
    /// Maps a CGI pipe's own token back to the connection token that owns it.
    cgi_pipe_owner: HashMap<Token, Token>,
    clock: Box<dyn Clock>,
}

impl Server {
    pub fn new(servers: Vec<ServerConfig>) -> Result<Self> {
        Self::with_clock(servers, Box::new(SystemClock))
    }

    pub fn with_clock(servers: Vec<ServerConfig>, clock: Box<dyn Clock>) -> Result<Self> {
        let mut tokens = TokenAllocator::starting_at(0);
        let mut listeners = build_listeners(&servers, &mut tokens);
        if listeners.is_empty() {
            return Err("no listener could be bound on any configured address".into());
        }

        let mut registry = PollRegistry::new()?;
        let mut listener_by_token = HashMap::new();
        for (idx, listener) in listeners.iter_mut().enumerate() {
            registry.register(&mut listener.mio_listener, listener.token, Interest::READABLE)?;
            listener_by_token.insert(listener.token, idx);
            info!("listening on {}", listener.addr);
        }

        Ok(Self {
            servers,
            listeners,
            listener_by_token,
            registry,
            tokens,
            connections: HashMap::new(),
            cgi_pipe_owner: HashMap::new(),
            clock,
        })
    }

    pub fn run(&mut self) -> Result<()> {
        let mut events = Events::with_capacity(1024);
        loop {
            match self.registry.poll(&mut events, Some(TICK)) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }

            for event in events.iter() {
                let token = event.token();
                if let Some(&listener_idx) = self.listener_by_token.get(&token) {
                    self.accept_all(listener_idx);
                    continue;
                }
                if let Some(&conn_token) = self.cgi_pipe_owner.get(&token) {
                    self.handle_cgi_event(conn_token, token, event.is_readable(), event.is_writable());
                    continue;
                }
                self.handle_connection_event(token, event.is_readable(), event.is_writable());
            }

            self.run_housekeeping();
        }
    }

    fn accept_all(&mut self, listener_idx: usize) {
        loop {
            let accepted = self.listeners[listener_idx].mio_listener.accept();
            match accepted {
                Ok((stream, _addr)) => {
                    let token = self.tokens.allocate();
                    let listener_token = self.listeners[listener_idx].token;
                    let default_idx = self.listeners[listener_idx].default_server_idx();
                    let mut conn = match Connection::new(stream, token, listener_token, default_idx, self.clock.as_ref()) {
                        Ok(c) => c,
                        Err(e) => {
                            warn!("failed to initialise accepted connection: {}", e);
                            self.tokens.release(token);
                            continue;
                        }
                    };
                    match self.registry.register(&mut conn.socket, token, Interest::READABLE) {
                        Ok(()) => {
                            self.connections.insert(token, conn);
                        }
                        Err(e) => {
                            warn!("failed to register accepted connection: {}", e);
                            self.tokens.release(token);
                        }
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("accept failed on {}: {}", self.listeners[listener_idx].addr, e);
                    break;
                }
            }
        }
    }

    fn handle_connection_event(&mut self, token: Token, readable: bool, writable: bool) {
        let state = match self.connections.get(&token) {
            Some(c) => c.state,
            None => return,
        };
        match state {
            ConnState::ReadingHeaders | ConnState::ReadingBody => {
                if readable {
                    self.on_readable(token);
                }
            }
            ConnState::Writing => {
                if writable {
                    self.on_writable(token);
                }
            }
            ConnState::Cgi => {
                if readable {
                    self.drain_and_discard_client(token);
                }
            }
            ConnState::Closing => {}
        }
    }

    fn on_readable(&mut self, token: Token) {
        let eof = {
            let Some(conn) = self.connections.get_mut(&token) else { return };
            match conn.drain_readable() {
                Ok(eof) => {
                    conn.touch(self.clock.as_ref());
                    eof
                }
                Err(_) => {
                    self.close_connection(token);
                    return;
                }
            }
        };

        let outcome = {
            let Some(conn) = self.connections.get_mut(&token) else { return };
            advance_request(conn, &self.servers)
        };

        match outcome {
            Outcome::StartCgi(action, effective) => self.spawn_cgi(token, action, effective),
            Outcome::Responded => self.sync_interest(token),
            Outcome::NeedMoreHeaderBytes | Outcome::NeedMoreBody => {
                if eof {
                    self.close_connection(token);
                }
            }
        }
    }

    fn on_writable(&mut self, token: Token) {
        let result = {
            let Some(conn) = self.connections.get_mut(&token) else { return };
            conn.flush_writable()
        };
        match result {
            Ok(true) => {
                let close_after = match self.connections.get(&token) {
                    Some(c) => c.close_after_write,
                    None => return,
                };
                if close_after {
                    self.close_connection(token);
                } else {
                    let Some(conn) = self.connections.get_mut(&token) else { return };
                    conn.reset_for_next_request(self.clock.as_ref());
                    self.sync_interest(token);
                }
            }
            Ok(false) => {}
            Err(_) => self.close_connection(token),
        }
    }

    fn drain_and_discard_client(&mut self, token: Token) {
        let Some(conn) = self.connections.get_mut(&token) else { return };
        match conn.drain_readable() {
            Ok(false) => conn.read_buf.clear(),
            Ok(true) => {}
            Err(_) => {
                self.close_connection(token);
            }
        }
    }

    fn sync_interest(&mut self, token: Token) {
        let Some(conn) = self.connections.get_mut(&token) else { return };
        let interest = match conn.state {
            ConnState::Writing => Interest::WRITABLE,
            ConnState::ReadingHeaders | ConnState::ReadingBody | ConnState::Cgi => Interest::READABLE,
            ConnState::Closing => return,
        };
        let _ = self.registry.reregister(&mut conn.socket, token, interest);
    }

    fn spawn_cgi(&mut self, token: Token, action: Action, effective: EffectiveConfig) {
        let Action::Cgi { script_path, interpreter } = action else {
            unreachable!("spawn_cgi only called for Action::Cgi")
        };
        let Some(conn) = self.connections.get_mut(&token) else { return };

        let (server_name, server_port) = split_host(&conn.request.host);
        let env = crate::cgi::build_env(&conn.request, &script_path, &effective.location_prefix, &effective.root, &server_name, server_port);

        let stdin_token = self.tokens.allocate();
        let stdout_token = self.tokens.allocate();
        let spawned = CgiProcess::spawn(
            &interpreter,
            &script_path,
            env,
            conn.request.body.clone(),
            effective.cgi_timeout,
            stdin_token,
            stdout_token,
        );

        match spawned {
            Ok(mut process) => {
                if process.register(self.registry.registry()).is_ok() {
                    self.cgi_pipe_owner.insert(stdout_token, token);
                    self.cgi_pipe_owner.insert(stdin_token, token);
                    conn.state = ConnState::Cgi;
                    conn.cgi = Some(process);
                } else {
                    process.kill_and_reap();
                    self.tokens.release(stdin_token);
                    self.tokens.release(stdout_token);
                    apply_response(conn, HttpResponse::html(500, default_error_body(500)), true);
                    self.sync_interest(token);
                }
            }
            Err(e) => {
                warn!("CGI spawn failed for {:?}: {}", script_path, e);
                self.tokens.release(stdin_token);
                self.tokens.release(stdout_token);
                apply_response(conn, HttpResponse::html(500, default_error_body(500)), true);
                self.sync_interest(token);
            }
        }
    }

    fn handle_cgi_event(&mut self, conn_token: Token, pipe_token: Token, readable: bool, writable: bool) {
        let mut failed = false;
        let mut done = false;
        {
            let Some(conn) = self.connections.get_mut(&conn_token) else { return };
            let Some(cgi) = conn.cgi.as_mut() else { return };

            if writable && pipe_token == cgi.stdin_token && cgi.writable(self.registry.registry()).is_err() {
                failed = true;
            }
            if !failed && readable && pipe_token == cgi.stdout_token {
                match cgi.readable() {
                    Ok(eof) => done = eof,
                    Err(_) => failed = true,
                }
            }
        }

        if failed {
            self.fail_cgi(conn_token, 500);
        } else if done {
            self.complete_cgi(conn_token);
        }
    }

    fn complete_cgi(&mut self, token: Token) {
        let Some(conn) = self.connections.get_mut(&token) else { return };
        let Some(mut cgi) = conn.cgi.take() else { return };
        self.release_cgi_pipes(&cgi);
        cgi.deregister(self.registry.registry());

        let exit_ok = cgi.child.wait().map(|s| s.success()).unwrap_or(false);
        let resp = match crate::cgi::parse_cgi_output(&cgi.output, exit_ok) {
            Ok(r) => r,
            Err(status) => HttpResponse::html(status, default_error_body(status)),
        };
        let Some(conn) = self.connections.get_mut(&token) else { return };
        apply_response(conn, resp, false);
        self.sync_interest(token);
    }

    fn fail_cgi(&mut self, token: Token, status: u16) {
        let Some(conn) = self.connections.get_mut(&token) else { return };
        if let Some(mut cgi) = conn.cgi.take() {
            cgi.kill_and_reap();
            self.release_cgi_pipes(&cgi);
            cgi.deregister(self.registry.registry());
        }
        let Some(conn) = self.connections.get_mut(&token) else { return };
        apply_response(conn, HttpResponse::html(status, default_error_body(status)), true);
        self.sync_interest(token);
    }

    fn release_cgi_pipes(&mut self, cgi: &CgiProcess) {
        self.cgi_pipe_owner.remove(&cgi.stdin_token);
        self.cgi_pipe_owner.remove(&cgi.stdout_token);
        self.tokens.release(cgi.stdin_token);
        self.tokens.release(cgi.stdout_token);
    }

    fn run_housekeeping(&mut self) {
        let timed_out: Vec<Token> = self
            .connections
            .iter()
            .filter(|(_, c)| c.is_timed_out(self.clock.as_ref()))
            .map(|(&t, _)| t)
            .collect();
        for token in timed_out {
            self.close_connection(token);
        }

        let cgi_tokens: Vec<Token> = self
            .connections
            .iter()
            .filter(|(_, c)| c.state == ConnState::Cgi)
            .map(|(&t, _)| t)
            .collect();
        for token in cgi_tokens {
            let timed_out = match self.connections.get_mut(&token) {
                Some(conn) => conn.cgi.as_mut().map(|c| c.tick()).unwrap_or(false),
                None => false,
            };
            if timed_out {
                self.fail_cgi(token, 504);
            }
        }
    }

    fn close_connection(&mut self, token: Token) {
        if let Some(mut conn) = self.connections.remove(&token) {
            let _ = self.registry.deregister(&mut conn.socket, token);
            self.tokens.release(token);
            if let Some(mut cgi) = conn.cgi.take() {
                cgi.kill_and_reap();
                self.release_cgi_pipes(&cgi);
                cgi.deregister(self.registry.registry());
            }
        }
    }
}

/// Splits a `Host` header into `(name, port)`, defaulting the port to 80
/// when absent, for the CGI `SERVER_NAME`/`SERVER_PORT` variables (§4.8).
fn split_host(host: &str) -> (String, u16) {
    match host.rsplit_once(':') {
        Some((name, port)) => (name.to_string(), port.parse().unwrap_or(80)),
        None => (host.to_string(), 80),
    }
}
