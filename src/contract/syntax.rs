//! Parser for program sources
//!
//! Produces an untyped syntax tree of bindings. Nothing is resolved here:
//! names stay as dotted paths until the sandbox evaluates them.

use crate::contract::lexer::{tokenize, Span, Token};

/// Maximum expression nesting depth
pub const MAX_DEPTH: usize = 64;

/// Maximum number of syntax nodes in one source
pub const MAX_NODES: usize = 10_000;

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Int(u64),
    Str(Vec<u8>),
    /// Dotted name without a call, e.g. `OnComplete.NoOp` or a binding
    Path(String),
    /// Dotted name applied to arguments, e.g. `App.globalGet(k)`
    Call(String, Vec<Node>),
    /// `[a, b]`
    Pair(Box<Node>, Box<Node>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub kind: NodeKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub name: String,
    pub span: Span,
    pub value: Node,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub span: Option<Span>,
    pub message: String,
}

/// Parse a whole source into its bindings
pub fn parse(source: &str) -> Result<Vec<Binding>, ParseError> {
    let tokens = tokenize(source).map_err(|e| ParseError {
        span: Some(e.span),
        message: e.message,
    })?;

    let mut parser = Parser {
        tokens,
        pos: 0,
        nodes: 0,
    };

    let mut bindings = Vec::new();
    while !parser.at_end() {
        bindings.push(parser.binding()?);
    }
    Ok(bindings)
}

struct Parser {
    tokens: Vec<(Token, Span)>,
    pos: usize,
    nodes: usize,
}

impl Parser {
    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn next(&mut self) -> Result<(Token, Span), ParseError> {
        let item = self.tokens.get(self.pos).cloned().ok_or_else(|| ParseError {
            span: self.tokens.last().map(|(_, s)| *s),
            message: "unexpected end of program".to_string(),
        })?;
        self.pos += 1;
        Ok(item)
    }

    fn expect(&mut self, expected: Token) -> Result<Span, ParseError> {
        let (token, span) = self.next()?;
        if token == expected {
            Ok(span)
        } else {
            Err(ParseError {
                span: Some(span),
                message: format!("expected {}, found {}", expected, token),
            })
        }
    }

    fn binding(&mut self) -> Result<Binding, ParseError> {
        let (token, span) = self.next()?;
        let Token::Ident(name) = token else {
            return Err(ParseError {
                span: Some(span),
                message: format!("expected a binding name, found {}", token),
            });
        };
        self.expect(Token::Assign)?;
        let value = self.expr(0)?;
        if self.peek() == Some(&Token::Semicolon) {
            self.pos += 1;
        }
        Ok(Binding { name, span, value })
    }

    fn expr(&mut self, depth: usize) -> Result<Node, ParseError> {
        let (token, span) = self.next()?;

        if depth > MAX_DEPTH {
            return Err(ParseError {
                span: Some(span),
                message: format!("expression nested deeper than {}", MAX_DEPTH),
            });
        }
        self.nodes += 1;
        if self.nodes > MAX_NODES {
            return Err(ParseError {
                span: Some(span),
                message: format!("program has more than {} expressions", MAX_NODES),
            });
        }

        let kind = match token {
            Token::Int(n) => NodeKind::Int(n),
            Token::Str(s) => NodeKind::Str(s),
            Token::LBracket => {
                let first = self.expr(depth + 1)?;
                self.expect(Token::Comma)?;
                let second = self.expr(depth + 1)?;
                self.expect(Token::RBracket)?;
                NodeKind::Pair(Box::new(first), Box::new(second))
            }
            Token::Ident(head) => {
                let mut path = head;
                while self.peek() == Some(&Token::Dot) {
                    self.pos += 1;
                    let (segment, seg_span) = self.next()?;
                    let Token::Ident(segment) = segment else {
                        return Err(ParseError {
                            span: Some(seg_span),
                            message: format!("expected a name after `.`, found {}", segment),
                        });
                    };
                    path.push('.');
                    path.push_str(&segment);
                }

                if self.peek() == Some(&Token::LParen) {
                    self.pos += 1;
                    let args = self.args(depth)?;
                    NodeKind::Call(path, args)
                } else {
                    NodeKind::Path(path)
                }
            }
            other => {
                return Err(ParseError {
                    span: Some(span),
                    message: format!("expected an expression, found {}", other),
                })
            }
        };

        Ok(Node { kind, span })
    }

    /// Arguments after `(`, consuming the closing `)`
    fn args(&mut self, depth: usize) -> Result<Vec<Node>, ParseError> {
        let mut args = Vec::new();
        loop {
            if self.peek() == Some(&Token::RParen) {
                self.pos += 1;
                return Ok(args);
            }
            args.push(self.expr(depth + 1)?);
            match self.next()? {
                (Token::Comma, _) => continue,
                (Token::RParen, _) => return Ok(args),
                (other, span) => {
                    return Err(ParseError {
                        span: Some(span),
                        message: format!("expected `,` or `)`, found {}", other),
                    })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bindings() {
        let bindings = parse(
            r#"
            approval = Seq(App.globalPut(Bytes("value"), Txn.application_args(0)), Approve(),);
            clear = Approve()
        "#,
        )
        .unwrap();

        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[0].name, "approval");
        let NodeKind::Call(head, args) = &bindings[0].value.kind else {
            panic!("expected call");
        };
        assert_eq!(head, "Seq");
        assert_eq!(args.len(), 2);
        assert!(matches!(&args[0].kind, NodeKind::Call(p, _) if p == "App.globalPut"));
    }

    #[test]
    fn test_parse_pairs_and_paths() {
        let bindings =
            parse("approval = Cond([Eq(Txn.on_completion(), OnComplete.NoOp), Approve()])").unwrap();
        let NodeKind::Call(_, args) = &bindings[0].value.kind else {
            panic!("expected call");
        };
        let NodeKind::Pair(cond, _) = &args[0].kind else {
            panic!("expected pair");
        };
        let NodeKind::Call(_, eq_args) = &cond.kind else {
            panic!("expected call");
        };
        assert_eq!(eq_args[1].kind, NodeKind::Path("OnComplete.NoOp".into()));
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse("approval").is_err());
        assert!(parse("approval = ").is_err());
        assert!(parse("approval = Seq(Int(1) Int(2))").is_err());
        assert!(parse("= Approve()").is_err());
        assert!(parse("x = Txn.(1)").is_err());
    }

    #[test]
    fn test_depth_limit() {
        let deep = format!("x = {}Int(1){}", "Seq(".repeat(MAX_DEPTH + 2), ")".repeat(MAX_DEPTH + 2));
        let err = parse(&deep).unwrap_err();
        assert!(err.message.contains("nested"));
    }
}
