//! Tokenizer for program sources

use std::fmt;

/// Source position, 1-based
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub line: usize,
    pub column: usize,
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Ident(String),
    Int(u64),
    Str(Vec<u8>),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Assign,
    Semicolon,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Ident(name) => write!(f, "`{}`", name),
            Token::Int(n) => write!(f, "{}", n),
            Token::Str(_) => f.write_str("string literal"),
            Token::LParen => f.write_str("`(`"),
            Token::RParen => f.write_str("`)`"),
            Token::LBracket => f.write_str("`[`"),
            Token::RBracket => f.write_str("`]`"),
            Token::Comma => f.write_str("`,`"),
            Token::Dot => f.write_str("`.`"),
            Token::Assign => f.write_str("`=`"),
            Token::Semicolon => f.write_str("`;`"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexError {
    pub span: Span,
    pub message: String,
}

/// Split `source` into spanned tokens
pub fn tokenize(source: &str) -> Result<Vec<(Token, Span)>, LexError> {
    let mut lexer = Lexer {
        chars: source.chars().peekable(),
        line: 1,
        column: 1,
    };
    let mut tokens = Vec::new();
    while let Some(token) = lexer.next_token()? {
        tokens.push(token);
    }
    Ok(tokens)
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: usize,
    column: usize,
}

impl Lexer<'_> {
    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn span(&self) -> Span {
        Span {
            line: self.line,
            column: self.column,
        }
    }

    fn error(&self, span: Span, message: impl Into<String>) -> LexError {
        LexError {
            span,
            message: message.into(),
        }
    }

    fn next_token(&mut self) -> Result<Option<(Token, Span)>, LexError> {
        // Skip whitespace and comments
        loop {
            match self.chars.peek() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('#') => {
                    while let Some(c) = self.bump() {
                        if c == '\n' {
                            break;
                        }
                    }
                }
                _ => break,
            }
        }

        let span = self.span();
        let Some(c) = self.bump() else {
            return Ok(None);
        };

        let token = match c {
            '(' => Token::LParen,
            ')' => Token::RParen,
            '[' => Token::LBracket,
            ']' => Token::RBracket,
            ',' => Token::Comma,
            '.' => Token::Dot,
            '=' => Token::Assign,
            ';' => Token::Semicolon,
            '"' => Token::Str(self.string(span)?),
            c if c.is_ascii_digit() => Token::Int(self.number(c, span)?),
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut name = String::from(c);
                while let Some(&next) = self.chars.peek() {
                    if next.is_ascii_alphanumeric() || next == '_' {
                        name.push(next);
                        self.bump();
                    } else {
                        break;
                    }
                }
                Token::Ident(name)
            }
            other => {
                return Err(self.error(span, format!("unexpected character {:?}", other)));
            }
        };

        Ok(Some((token, span)))
    }

    fn number(&mut self, first: char, span: Span) -> Result<u64, LexError> {
        let mut text = String::from(first);
        while let Some(&next) = self.chars.peek() {
            if next.is_ascii_alphanumeric() || next == '_' {
                text.push(next);
                self.bump();
            } else {
                break;
            }
        }
        let digits = text.replace('_', "");
        let parsed = match digits
            .strip_prefix("0x")
            .or_else(|| digits.strip_prefix("0X"))
        {
            Some(hex) => u64::from_str_radix(hex, 16),
            None => digits.parse::<u64>(),
        };
        parsed.map_err(|_| self.error(span, format!("invalid integer literal {}", text)))
    }

    fn string(&mut self, span: Span) -> Result<Vec<u8>, LexError> {
        let mut out = String::new();
        loop {
            match self.bump() {
                None | Some('\n') => return Err(self.error(span, "unterminated string literal")),
                Some('"') => return Ok(out.into_bytes()),
                Some('\\') => match self.bump() {
                    Some('"') => out.push('"'),
                    Some('\\') => out.push('\\'),
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some(other) => {
                        return Err(self.error(span, format!("unknown escape \\{}", other)))
                    }
                    None => return Err(self.error(span, "unterminated string literal")),
                },
                Some(c) => out.push(c),
            }
        }
    }
}
