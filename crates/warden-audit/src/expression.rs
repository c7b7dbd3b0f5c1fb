//! Boolean filter expressions.
//!
//! A small language for selecting audit records by their flattened fields:
//!
//! ```text
//! mount_type == kv and operation != read
//! not (namespace == root) or path matches "^secret/.*"
//! client_id is not empty
//! "team-a" in path
//! ```
//!
//! Values are bare words or double-quoted strings. Expressions are compiled
//! once and evaluated read-only, so one [`Expression`] can be shared freely
//! between threads.

use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

/// Errors produced while compiling or evaluating an expression.
#[derive(Debug, Error)]
pub enum ExpressionError {
    #[error("expression is empty")]
    Empty,

    #[error("unexpected end of expression, expected {expected}")]
    UnexpectedEnd { expected: &'static str },

    #[error("unexpected {found:?} at position {position}, expected {expected}")]
    UnexpectedToken {
        found: String,
        position: usize,
        expected: &'static str,
    },

    #[error("unterminated string starting at position {0}")]
    UnterminatedString(usize),

    #[error("invalid selector {0:?}")]
    InvalidSelector(String),

    #[error("invalid regular expression {pattern:?}: {source}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("selector {0:?} is not a known field")]
    UnknownSelector(String),
}

/// Named fields an expression is evaluated against.
pub trait Datum {
    fn lookup(&self, selector: &str) -> Option<&str>;
}

impl Datum for BTreeMap<&'static str, String> {
    fn lookup(&self, selector: &str) -> Option<&str> {
        self.get(selector).map(String::as_str)
    }
}

impl Datum for HashMap<String, String> {
    fn lookup(&self, selector: &str) -> Option<&str> {
        self.get(selector).map(String::as_str)
    }
}

/// A compiled boolean expression.
#[derive(Debug, Clone)]
pub struct Expression {
    source: String,
    root: Expr,
}

#[derive(Debug, Clone)]
enum Expr {
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Match { selector: String, op: MatchOp },
}

#[derive(Debug, Clone)]
enum MatchOp {
    Equal(String),
    NotEqual(String),
    Matches(Regex),
    NotMatches(Regex),
    IsEmpty,
    IsNotEmpty,
    In(String),
    NotIn(String),
}

impl Expression {
    /// Compile an expression.
    pub fn parse(source: &str) -> Result<Self, ExpressionError> {
        let tokens = tokenize(source)?;
        if tokens.is_empty() {
            return Err(ExpressionError::Empty);
        }

        let mut parser = Parser { tokens, pos: 0 };
        let root = parser.parse_or()?;
        if let Some(extra) = parser.peek() {
            return Err(extra.unexpected("end of expression"));
        }

        Ok(Self {
            source: source.to_string(),
            root,
        })
    }

    /// The text this expression was compiled from.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Evaluate against `datum`. Selecting a field the datum lacks is an error.
    pub fn evaluate(&self, datum: &dyn Datum) -> Result<bool, ExpressionError> {
        self.root.evaluate(datum)
    }
}

impl Expr {
    fn evaluate(&self, datum: &dyn Datum) -> Result<bool, ExpressionError> {
        match self {
            Self::And(lhs, rhs) => Ok(lhs.evaluate(datum)? && rhs.evaluate(datum)?),
            Self::Or(lhs, rhs) => Ok(lhs.evaluate(datum)? || rhs.evaluate(datum)?),
            Self::Not(inner) => Ok(!inner.evaluate(datum)?),
            Self::Match { selector, op } => {
                let value = datum
                    .lookup(selector)
                    .ok_or_else(|| ExpressionError::UnknownSelector(selector.clone()))?;

                Ok(match op {
                    MatchOp::Equal(expected) => value == expected,
                    MatchOp::NotEqual(expected) => value != expected,
                    MatchOp::Matches(re) => re.is_match(value),
                    MatchOp::NotMatches(re) => !re.is_match(value),
                    MatchOp::IsEmpty => value.is_empty(),
                    MatchOp::IsNotEmpty => !value.is_empty(),
                    MatchOp::In(needle) => value.contains(needle.as_str()),
                    MatchOp::NotIn(needle) => !value.contains(needle.as_str()),
                })
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TokenKind {
    Word(String),
    Quoted(String),
    Equal,
    NotEqual,
    LParen,
    RParen,
    And,
    Or,
    Not,
    Matches,
    Is,
    Empty,
    In,
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    position: usize,
}

impl Token {
    fn text(&self) -> String {
        match &self.kind {
            TokenKind::Word(w) => w.clone(),
            TokenKind::Quoted(q) => format!("\"{q}\""),
            TokenKind::Equal => "==".to_string(),
            TokenKind::NotEqual => "!=".to_string(),
            TokenKind::LParen => "(".to_string(),
            TokenKind::RParen => ")".to_string(),
            TokenKind::And => "and".to_string(),
            TokenKind::Or => "or".to_string(),
            TokenKind::Not => "not".to_string(),
            TokenKind::Matches => "matches".to_string(),
            TokenKind::Is => "is".to_string(),
            TokenKind::Empty => "empty".to_string(),
            TokenKind::In => "in".to_string(),
        }
    }

    fn unexpected(&self, expected: &'static str) -> ExpressionError {
        ExpressionError::UnexpectedToken {
            found: self.text(),
            position: self.position,
            expected,
        }
    }
}

fn is_word_char(c: char) -> bool {
    !c.is_whitespace() && !matches!(c, '(' | ')' | '"' | '=' | '!')
}

fn tokenize(source: &str) -> Result<Vec<Token>, ExpressionError> {
    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();

    while let Some(&(position, c)) = chars.peek() {
        let kind = match c {
            c if c.is_whitespace() => {
                chars.next();
                continue;
            }
            '(' => {
                chars.next();
                TokenKind::LParen
            }
            ')' => {
                chars.next();
                TokenKind::RParen
            }
            '=' | '!' => {
                chars.next();
                match chars.next() {
                    Some((_, '=')) if c == '=' => TokenKind::Equal,
                    Some((_, '=')) => TokenKind::NotEqual,
                    other => {
                        let found = other.map(|(_, n)| format!("{c}{n}")).unwrap_or(c.to_string());
                        return Err(ExpressionError::UnexpectedToken {
                            found,
                            position,
                            expected: "== or !=",
                        });
                    }
                }
            }
            '"' => {
                chars.next();
                let mut value = String::new();
                let mut closed = false;
                while let Some((_, c)) = chars.next() {
                    match c {
                        '"' => {
                            closed = true;
                            break;
                        }
                        '\\' => match chars.next() {
                            Some((_, escaped)) => value.push(escaped),
                            None => break,
                        },
                        other => value.push(other),
                    }
                }
                if !closed {
                    return Err(ExpressionError::UnterminatedString(position));
                }
                TokenKind::Quoted(value)
            }
            _ => {
                let mut word = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if !is_word_char(c) {
                        break;
                    }
                    word.push(c);
                    chars.next();
                }
                match word.as_str() {
                    "and" => TokenKind::And,
                    "or" => TokenKind::Or,
                    "not" => TokenKind::Not,
                    "matches" => TokenKind::Matches,
                    "is" => TokenKind::Is,
                    "empty" => TokenKind::Empty,
                    "in" => TokenKind::In,
                    _ => TokenKind::Word(word),
                }
            }
        };

        tokens.push(Token { kind, position });
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_kind(&self) -> Option<&TokenKind> {
        self.peek().map(|t| &t.kind)
    }

    fn next(&mut self, expected: &'static str) -> Result<Token, ExpressionError> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or(ExpressionError::UnexpectedEnd { expected })?;
        self.pos += 1;
        Ok(token)
    }

    fn parse_or(&mut self) -> Result<Expr, ExpressionError> {
        let mut lhs = self.parse_and()?;
        while self.peek_kind() == Some(&TokenKind::Or) {
            self.pos += 1;
            let rhs = self.parse_and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ExpressionError> {
        let mut lhs = self.parse_unary()?;
        while self.peek_kind() == Some(&TokenKind::And) {
            self.pos += 1;
            let rhs = self.parse_unary()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ExpressionError> {
        match self.peek_kind() {
            Some(TokenKind::Not) => {
                self.pos += 1;
                Ok(Expr::Not(Box::new(self.parse_unary()?)))
            }
            Some(TokenKind::LParen) => {
                self.pos += 1;
                let inner = self.parse_or()?;
                let close = self.next(")")?;
                if close.kind != TokenKind::RParen {
                    return Err(close.unexpected(")"));
                }
                Ok(inner)
            }
            _ => self.parse_match(),
        }
    }

    fn parse_match(&mut self) -> Result<Expr, ExpressionError> {
        let first = self.next("a selector or value")?;
        let operator = self.next("an operator")?;

        match operator.kind {
            TokenKind::Equal => {
                let selector = selector(&first)?;
                let value = self.value()?;
                Ok(Expr::Match {
                    selector,
                    op: MatchOp::Equal(value),
                })
            }
            TokenKind::NotEqual => {
                let selector = selector(&first)?;
                let value = self.value()?;
                Ok(Expr::Match {
                    selector,
                    op: MatchOp::NotEqual(value),
                })
            }
            TokenKind::Matches => {
                let selector = selector(&first)?;
                let re = self.regex()?;
                Ok(Expr::Match {
                    selector,
                    op: MatchOp::Matches(re),
                })
            }
            TokenKind::Is => {
                let selector = selector(&first)?;
                let next = self.next("empty or not empty")?;
                let op = match next.kind {
                    TokenKind::Empty => MatchOp::IsEmpty,
                    TokenKind::Not => {
                        let empty = self.next("empty")?;
                        if empty.kind != TokenKind::Empty {
                            return Err(empty.unexpected("empty"));
                        }
                        MatchOp::IsNotEmpty
                    }
                    _ => return Err(next.unexpected("empty or not empty")),
                };
                Ok(Expr::Match { selector, op })
            }
            TokenKind::In => {
                let needle = literal(&first)?;
                let target = self.next("a selector")?;
                Ok(Expr::Match {
                    selector: selector(&target)?,
                    op: MatchOp::In(needle),
                })
            }
            TokenKind::Not => {
                let next = self.next("matches or in")?;
                match next.kind {
                    TokenKind::Matches => {
                        let selector = selector(&first)?;
                        let re = self.regex()?;
                        Ok(Expr::Match {
                            selector,
                            op: MatchOp::NotMatches(re),
                        })
                    }
                    TokenKind::In => {
                        let needle = literal(&first)?;
                        let target = self.next("a selector")?;
                        Ok(Expr::Match {
                            selector: selector(&target)?,
                            op: MatchOp::NotIn(needle),
                        })
                    }
                    _ => Err(next.unexpected("matches or in")),
                }
            }
            _ => Err(operator.unexpected("an operator")),
        }
    }

    fn value(&mut self) -> Result<String, ExpressionError> {
        let token = self.next("a value")?;
        literal(&token)
    }

    fn regex(&mut self) -> Result<Regex, ExpressionError> {
        let pattern = self.value()?;
        Regex::new(&pattern).map_err(|source| ExpressionError::InvalidRegex { pattern, source })
    }
}

fn literal(token: &Token) -> Result<String, ExpressionError> {
    match &token.kind {
        TokenKind::Word(w) => Ok(w.clone()),
        TokenKind::Quoted(q) => Ok(q.clone()),
        _ => Err(token.unexpected("a value")),
    }
}

fn selector(token: &Token) -> Result<String, ExpressionError> {
    let TokenKind::Word(word) = &token.kind else {
        return Err(token.unexpected("a selector"));
    };

    let mut chars = word.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if !valid_start || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.') {
        return Err(ExpressionError::InvalidSelector(word.clone()));
    }

    Ok(word.clone())
}
