//! Startup dashboard: a human-readable dump of the loaded configuration,
//! in the same colourised style the grounding codebase prints at boot.

use std::fmt;

use super::types::{Location, ServerConfig};

impl fmt::Display for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "  \x1b[38;5;244m───────────────────────────────────────────────\x1b[0m"
        )?;
        writeln!(
            f,
            "  \x1b[1;34m⦿\x1b[0m \x1b[1;37mListen:\x1b[0m      \x1b[32m{:?}\x1b[0m",
            self.listen_specs()
        )?;
        writeln!(
            f,
            "  \x1b[1;34m⦿\x1b[0m \x1b[1;37mNames:\x1b[0m       \x1b[36m{:?}\x1b[0m",
            self.server_names
        )?;
        writeln!(
            f,
            "  \x1b[1;34m⦿\x1b[0m \x1b[1;37mRoot:\x1b[0m        \x1b[32m{}\x1b[0m",
            self.get("root").unwrap_or(".")
        )?;
        writeln!(
            f,
            "  \x1b[1;34m⦿\x1b[0m \x1b[1;37mBody limit:\x1b[0m  \x1b[33m{}\x1b[0m",
            self.get("client_max_body_size").unwrap_or("default")
        )?;

        if !self.error_pages.is_empty() {
            writeln!(f, "  \x1b[1;34m⦿\x1b[0m \x1b[1;37mError pages:\x1b[0m")?;
            for (code, path) in &self.error_pages {
                writeln!(f, "    \x1b[38;5;244m{:4}\x1b[0m → \x1b[31m{}\x1b[0m", code, path)?;
            }
        }

        writeln!(
            f,
            "\n  \x1b[1;37m📋 LOCATIONS ({})\x1b[0m",
            self.locations.len()
        )?;
        let mut sorted = self.locations.clone();
        sorted.sort_by(|a, b| a.path.cmp(&b.path));
        for (idx, loc) in sorted.iter().enumerate() {
            let last = idx == sorted.len() - 1;
            let branch = if last { "  └──" } else { "  ├──" };
            writeln!(f, "  \x1b[38;5;244m{}\x1b[0m \x1b[1;37m{}\x1b[0m", branch, loc.path)?;
            loc.fmt_details(f)?;
        }
        Ok(())
    }
}

impl Location {
    fn fmt_details(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.directives.keys().collect();
        keys.sort();
        for key in keys {
            writeln!(
                f,
                "  \x1b[38;5;250m      {}:\x1b[0m {}",
                key, self.directives[key]
            )?;
        }
        Ok(())
    }
}

pub fn display_config(configs: &[ServerConfig]) {
    println!("\n\x1b[1;35m 🌐 SERVER CONFIGURATION DASHBOARD\x1b[0m");
    println!("\x1b[38;5;240m ════════════════════════════════════════════════════════════════\x1b[0m");
    for (i, server) in configs.iter().enumerate() {
        println!("\n  \x1b[1;37mSERVER BLOCK {:02}\x1b[0m", i + 1);
        print!("{}", server);
    }
    println!("\n\x1b[38;5;240m ════════════════════════════════════════════════════════════════\x1b[0m");
    println!(" \x1b[1;32m✔\x1b[0m Configuration loaded — ready for requests\n");
}
