//! Listener set (§4.1): opens, non-blocks, binds, and listens on each unique
//! `host:port` a loaded configuration asks for, deduplicating aliases so two
//! `server` blocks that listen on the same address share one socket.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::os::fd::FromRawFd;

use mio::net::TcpListener;
use mio::Token;
use proxy_log::warn;

use crate::config::{types::normalize_listen_spec, ServerConfig};

/// A bound, listening, non-blocking socket and the server blocks it serves.
/// `default_server_idx` is the first `server` block declared against this
/// address — used as the vhost fallback when no `Host` header matches any
/// server name (§3 Listener record).
pub struct Listener {
    pub mio_listener: TcpListener,
    pub token: Token,
    pub addr: SocketAddr,
    pub server_indices: Vec<usize>,
}

impl Listener {
    pub fn default_server_idx(&self) -> usize {
        self.server_indices[0]
    }
}

/// Creates a bound, listening, non-blocking socket with `SO_REUSEADDR` set
/// before bind (§4.1). Modelled as a plain constructor rather than a
/// Socket/BindingSocket/ListeningSocket hierarchy — no runtime dispatch is
/// needed since nothing else implements the same interface (§9).
fn bind_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let domain = if addr.is_ipv4() { libc::AF_INET } else { libc::AF_INET6 };
    let fd = unsafe { libc::socket(domain, libc::SOCK_STREAM, 0) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }

    let reuse: libc::c_int = 1;
    let rc = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            &reuse as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        let e = io::Error::last_os_error();
        unsafe { libc::close(fd) };
        return Err(e);
    }

    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL, 0) };
    if flags < 0 || unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        let e = io::Error::last_os_error();
        unsafe { libc::close(fd) };
        return Err(e);
    }

    let result = socket_bind_and_listen(fd, addr);
    if let Err(e) = result {
        unsafe { libc::close(fd) };
        return Err(e);
    }

    let std_listener = unsafe { std::net::TcpListener::from_raw_fd(fd) };
    TcpListener::from_std(std_listener)
}

fn socket_bind_and_listen(fd: libc::c_int, addr: SocketAddr) -> io::Result<()> {
    match addr {
        SocketAddr::V4(a) => {
            let sin = libc::sockaddr_in {
                sin_family: libc::AF_INET as libc::sa_family_t,
                sin_port: a.port().to_be(),
                sin_addr: libc::in_addr {
                    s_addr: u32::from_ne_bytes(a.ip().octets()),
                },
                sin_zero: [0; 8],
            };
            let rc = unsafe {
                libc::bind(
                    fd,
                    &sin as *const _ as *const libc::sockaddr,
                    std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
                )
            };
            if rc < 0 {
                return Err(io::Error::last_os_error());
            }
        }
        SocketAddr::V6(_) => {
            return Err(io::Error::new(io::ErrorKind::Unsupported, "IPv6 listen not supported"));
        }
    }
    let rc = unsafe { libc::listen(fd, libc::SOMAXCONN) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Normalises every `listen` spec across all servers, dedupes by
/// `host:port`, and binds one socket per unique address (§4.1). Returns all
/// successfully bound listeners; a spec that fails to bind only logs a
/// warning. The caller is responsible for treating an empty result as a
/// fatal startup error.
pub fn build_listeners(servers: &[ServerConfig], tokens: &mut crate::poll::TokenAllocator) -> Vec<Listener> {
    let mut by_addr: HashMap<SocketAddr, Vec<usize>> = HashMap::new();
    let mut order: Vec<SocketAddr> = Vec::new();

    for (idx, server) in servers.iter().enumerate() {
        for spec in server.listen_specs() {
            match normalize_listen_spec(&spec) {
                Ok((host, port)) => match format!("{}:{}", host, port).parse::<SocketAddr>() {
                    Ok(addr) => {
                        let entry = by_addr.entry(addr).or_insert_with(|| {
                            order.push(addr);
                            Vec::new()
                        });
                        if !entry.contains(&idx) {
                            entry.push(idx);
                        }
                    }
                    Err(e) => warn!("could not parse listen address '{}': {}", spec, e),
                },
                Err(e) => warn!("{}", e),
            }
        }
    }

    let mut listeners = Vec::new();
    for addr in order {
        match bind_listener(addr) {
            Ok(mio_listener) => {
                listeners.push(Listener {
                    mio_listener,
                    token: tokens.allocate(),
                    addr,
                    server_indices: by_addr.remove(&addr).unwrap_or_default(),
                });
            }
            Err(e) => warn!("failed to bind listener on {}: {}", addr, e),
        }
    }
    listeners
}
