use std::env;
use std::process::ExitCode;

use proxy_log::errors;
use webserv::config::{display, parser, validate};
use webserv::server::Server;

fn main() -> ExitCode {
    ignore_sigpipe();

    let config_path = env::args().nth(1).unwrap_or_else(|| "webserv.conf".to_string());
    let source = match std::fs::read_to_string(&config_path) {
        Ok(s) => s,
        Err(e) => {
            errors!("could not read config file '{}': {}", config_path, e);
            return ExitCode::FAILURE;
        }
    };

    let servers = match parser::parse_config(&source) {
        Ok(s) => s,
        Err(e) => {
            errors!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let servers = validate::validate_configs(servers);
    if servers.is_empty() {
        errors!("no usable server blocks remain after validation");
        return ExitCode::FAILURE;
    }

    display::display_config(&servers);

    let mut server = match Server::new(servers) {
        Ok(s) => s,
        Err(e) => {
            errors!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = server.run() {
        errors!("{}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

/// A client that closes its read side shouldn't kill the process on the
/// next write — the socket write itself already surfaces `EPIPE`/`ECONNRESET`
/// through the normal `io::Result` path (§4.2, §9).
fn ignore_sigpipe() {
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }
}
