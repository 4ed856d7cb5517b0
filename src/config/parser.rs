//! Recursive-descent parser over the token stream, building `Vec<ServerConfig>`.

use std::fmt;

use super::lexer::{Lexer, Token, TokenKind};
use super::types::{Location, ServerConfig};

#[derive(Debug, Clone)]
pub struct ConfigError {
    pub line: usize,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "config error at line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for ConfigError {}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn current_line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| t.line)
            .unwrap_or(0)
    }

    fn bump(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expect_word(&mut self) -> Result<String, ConfigError> {
        match self.bump() {
            Some(Token {
                kind: TokenKind::Word(w),
                ..
            }) => Ok(w),
            Some(t) => Err(ConfigError {
                line: t.line,
                message: format!("expected a word, found {:?}", t.kind),
            }),
            None => Err(ConfigError {
                line: self.current_line(),
                message: "unexpected end of file, expected a word".to_string(),
            }),
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<(), ConfigError> {
        match self.bump() {
            Some(t) if t.kind == kind => Ok(()),
            Some(t) => Err(ConfigError {
                line: t.line,
                message: format!("expected {:?}, found {:?}", kind, t.kind),
            }),
            None => Err(ConfigError {
                line: self.current_line(),
                message: format!("unexpected end of file, expected {:?}", kind),
            }),
        }
    }

    fn peek_is(&self, kind: &TokenKind) -> bool {
        self.peek().map(|t| &t.kind == kind).unwrap_or(false)
    }

    /// Consume tokens up to (and including) a `;`, collecting the words in
    /// between. A missing `;` is a config-load error, never a panic.
    fn collect_statement(&mut self) -> Result<Vec<String>, ConfigError> {
        let mut words = Vec::new();
        loop {
            match self.bump() {
                Some(Token {
                    kind: TokenKind::Word(w),
                    ..
                }) => words.push(w),
                Some(Token {
                    kind: TokenKind::Semicolon,
                    ..
                }) => return Ok(words),
                Some(t) => {
                    return Err(ConfigError {
                        line: t.line,
                        message: format!("expected ';', found {:?}", t.kind),
                    })
                }
                None => {
                    return Err(ConfigError {
                        line: self.current_line(),
                        message: "missing ';' terminating directive".to_string(),
                    })
                }
            }
        }
    }

    fn parse_config(&mut self) -> Result<Vec<ServerConfig>, ConfigError> {
        let mut servers = Vec::new();
        while self.peek().is_some() {
            let word = self.expect_word()?;
            if word != "server" {
                return Err(ConfigError {
                    line: self.current_line(),
                    message: format!("expected 'server' block, found '{}'", word),
                });
            }
            servers.push(self.parse_server_block()?);
        }
        Ok(servers)
    }

    fn parse_server_block(&mut self) -> Result<ServerConfig, ConfigError> {
        self.expect(TokenKind::OpenBrace)?;
        let mut server = ServerConfig::new();

        while !self.peek_is(&TokenKind::CloseBrace) {
            if self.peek().is_none() {
                return Err(ConfigError {
                    line: self.current_line(),
                    message: "missing '}' closing server block".to_string(),
                });
            }
            let key = self.expect_word()?;
            if key == "location" {
                let loc = self.parse_location_block()?;
                server.locations.push(loc);
                continue;
            }
            let values = self.collect_statement()?;
            match key.as_str() {
                "listen" => {
                    if let Some(v) = values.into_iter().next() {
                        server.listen.push(v);
                    }
                }
                "server_name" => server.server_names.extend(values),
                "error_page" => {
                    if values.len() < 2 {
                        return Err(ConfigError {
                            line: self.current_line(),
                            message: "error_page requires a status code and a uri".to_string(),
                        });
                    }
                    let uri = values.last().unwrap().clone();
                    for code_str in &values[..values.len() - 1] {
                        let code: u16 = code_str.parse().map_err(|_| ConfigError {
                            line: self.current_line(),
                            message: format!("invalid error_page status code '{}'", code_str),
                        })?;
                        server.error_pages.insert(code, uri.clone());
                    }
                }
                _ => {
                    server
                        .directives
                        .insert(key, values.join(" "));
                }
            }
        }
        self.expect(TokenKind::CloseBrace)?;
        Ok(server)
    }

    fn parse_location_block(&mut self) -> Result<Location, ConfigError> {
        let path = self.expect_word()?;
        self.expect(TokenKind::OpenBrace)?;
        let mut loc = Location::new(path);

        while !self.peek_is(&TokenKind::CloseBrace) {
            if self.peek().is_none() {
                return Err(ConfigError {
                    line: self.current_line(),
                    message: "missing '}' closing location block".to_string(),
                });
            }
            let key = self.expect_word()?;
            let values = self.collect_statement()?;
            loc.directives.insert(key, values.join(" "));
        }
        self.expect(TokenKind::CloseBrace)?;
        Ok(loc)
    }
}

pub fn parse_config(src: &str) -> Result<Vec<ServerConfig>, ConfigError> {
    let tokens = Lexer::new(src).tokenize().map_err(|e| ConfigError {
        line: e.line,
        message: e.message,
    })?;
    let mut parser = Parser { tokens, pos: 0 };
    parser.parse_config()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_server() {
        let src = "server { listen 8080; server_name x; }";
        let servers = parse_config(src).unwrap();
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].listen, vec!["8080".to_string()]);
        assert_eq!(servers[0].server_names, vec!["x".to_string()]);
    }

    #[test]
    fn parses_location_and_directives() {
        let src = r#"
            server {
                listen 8080;
                root ./www;
                location /up {
                    upload_store ./up;
                    methods GET POST;
                }
            }
        "#;
        let servers = parse_config(src).unwrap();
        let s = &servers[0];
        assert_eq!(s.get("root"), Some("./www"));
        assert_eq!(s.locations.len(), 1);
        assert_eq!(s.locations[0].path, "/up");
        assert_eq!(s.locations[0].get("methods"), Some("GET POST"));
    }

    #[test]
    fn missing_semicolon_is_a_load_error() {
        let src = "server { listen 8080 }";
        assert!(parse_config(src).is_err());
    }

    #[test]
    fn missing_closing_brace_is_a_load_error() {
        let src = "server { listen 8080;";
        assert!(parse_config(src).is_err());
    }

    #[test]
    fn error_page_multiple_codes() {
        let src = "server { error_page 500 502 503 /50x.html; }";
        let servers = parse_config(src).unwrap();
        assert_eq!(
            servers[0].error_pages.get(&500),
            Some(&"/50x.html".to_string())
        );
        assert_eq!(
            servers[0].error_pages.get(&503),
            Some(&"/50x.html".to_string())
        );
    }

    #[test]
    fn multiple_server_blocks() {
        let src = "server { listen 80; } server { listen 81; }";
        let servers = parse_config(src).unwrap();
        assert_eq!(servers.len(), 2);
    }
}
