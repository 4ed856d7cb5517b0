//! Tokeniser for the nginx-style config grammar (§10 of the spec).
//!
//! Produces a flat stream of bare words, quoted strings, and the structural
//! tokens `{`, `}`, `;`. Comments start with `#` and run to end of line.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Word(String),
    OpenBrace,
    CloseBrace,
    Semicolon,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
    pub col: usize,
}

pub struct Lexer<'a> {
    bytes: &'a [u8],
    pos: usize,
    line: usize,
    col: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self {
            bytes: src.as_bytes(),
            pos: 0,
            line: 1,
            col: 1,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        if b == b'\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(b)
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(b) if b.is_ascii_whitespace() => {
                    self.advance();
                }
                Some(b'#') => {
                    while let Some(b) = self.peek() {
                        if b == b'\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                _ => break,
            }
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_trivia();
            let (line, col) = (self.line, self.col);
            let Some(b) = self.peek() else { break };
            let kind = match b {
                b'{' => {
                    self.advance();
                    TokenKind::OpenBrace
                }
                b'}' => {
                    self.advance();
                    TokenKind::CloseBrace
                }
                b';' => {
                    self.advance();
                    TokenKind::Semicolon
                }
                b'"' => {
                    self.advance();
                    let mut s = String::new();
                    loop {
                        match self.advance() {
                            Some(b'"') => break,
                            Some(c) => s.push(c as char),
                            None => {
                                return Err(LexError {
                                    line,
                                    col,
                                    message: "unterminated quoted string".to_string(),
                                })
                            }
                        }
                    }
                    TokenKind::Word(s)
                }
                _ => {
                    let mut s = String::new();
                    while let Some(c) = self.peek() {
                        if c.is_ascii_whitespace() || c == b'{' || c == b'}' || c == b';' || c == b'#'
                        {
                            break;
                        }
                        s.push(c as char);
                        self.advance();
                    }
                    TokenKind::Word(s)
                }
            };
            tokens.push(Token { kind, line, col });
        }
        Ok(tokens)
    }
}

#[derive(Debug, Clone)]
pub struct LexError {
    pub line: usize,
    pub col: usize,
    pub message: String,
}

impl std::fmt::Display for LexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}, col {}: {}", self.line, self.col, self.message)
    }
}

impl std::error::Error for LexError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_server_block() {
        let src = "server {\n  listen 8080;\n}\n";
        let toks = Lexer::new(src).tokenize().unwrap();
        let kinds: Vec<_> = toks.into_iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Word("server".into()),
                TokenKind::OpenBrace,
                TokenKind::Word("listen".into()),
                TokenKind::Word("8080".into()),
                TokenKind::Semicolon,
                TokenKind::CloseBrace,
            ]
        );
    }

    #[test]
    fn strips_comments() {
        let src = "server { # a comment\n listen 80; }";
        let toks = Lexer::new(src).tokenize().unwrap();
        assert!(toks.iter().all(|t| t.kind != TokenKind::Word("#".into())));
    }

    #[test]
    fn quoted_strings() {
        let src = r#"error_page 404 "/not found.html";"#;
        let toks = Lexer::new(src).tokenize().unwrap();
        assert_eq!(toks[2].kind, TokenKind::Word("/not found.html".into()));
    }
}
