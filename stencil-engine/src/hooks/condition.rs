//! Boolean conditions over template variables.
//!
//! ```text
//! expr    := and ( "||" and )*
//! and     := unary ( "&&" unary )*
//! unary   := "!" unary | "(" expr ")" | operand ( ("==" | "!=") operand )?
//! operand := ident | "{{" ident "}}" | 'str' | "str" | number | true | false
//! ```
//!
//! A bare operand is tested for truthiness. Unbound variables are `null`,
//! which is falsy and compares equal only to `null`.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use stencil_core::Variables;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConditionError {
    #[error("empty condition")]
    Empty,

    #[error("unexpected character '{ch}' at offset {offset}")]
    UnexpectedChar { ch: char, offset: usize },

    #[error("unterminated string starting at offset {offset}")]
    UnterminatedString { offset: usize },

    #[error("unterminated placeholder starting at offset {offset}")]
    UnterminatedPlaceholder { offset: usize },

    #[error("unexpected {found} in condition")]
    UnexpectedToken { found: String },

    #[error("condition ended unexpectedly")]
    UnexpectedEnd,
}

/// What an unparseable condition evaluates to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionPolicy {
    /// Treat it as false: the hook is skipped.
    #[default]
    FailClosed,
    /// Treat it as true: the hook runs.
    FailOpen,
}

/// A condition attached to a hook.
#[derive(Debug, Clone)]
pub struct Condition {
    source: String,
    expr: Result<Expr, ConditionError>,
    policy: ConditionPolicy,
}

impl Condition {
    /// Parse strictly; errors are returned to the caller.
    pub fn parse(source: &str) -> Result<Self, ConditionError> {
        let expr = parse_expr(source)?;
        Ok(Condition {
            source: source.to_string(),
            expr: Ok(expr),
            policy: ConditionPolicy::default(),
        })
    }

    /// Parse leniently; a parse error is kept and resolved by `policy` at
    /// evaluation time.
    pub fn lenient(source: &str, policy: ConditionPolicy) -> Self {
        Condition {
            source: source.to_string(),
            expr: parse_expr(source),
            policy,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn parse_error(&self) -> Option<&ConditionError> {
        self.expr.as_ref().err()
    }

    pub fn evaluate(&self, variables: &Variables) -> bool {
        match &self.expr {
            Ok(expr) => expr.eval(variables),
            Err(err) => {
                tracing::warn!(
                    condition = %self.source,
                    error = %err,
                    policy = ?self.policy,
                    "unparseable hook condition"
                );
                self.policy == ConditionPolicy::FailOpen
            }
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

// ---------------------------------------------------------------------------
// AST + evaluation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Var(String),
    Lit(Value),
}

impl Operand {
    fn resolve(&self, variables: &Variables) -> Value {
        match self {
            Operand::Var(name) => variables.get(name).cloned().unwrap_or(Value::Null),
            Operand::Lit(value) => value.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Or(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Eq(Operand, Operand),
    Ne(Operand, Operand),
    Truthy(Operand),
}

impl Expr {
    fn eval(&self, vars: &Variables) -> bool {
        match self {
            Expr::Or(a, b) => a.eval(vars) || b.eval(vars),
            Expr::And(a, b) => a.eval(vars) && b.eval(vars),
            Expr::Not(e) => !e.eval(vars),
            Expr::Eq(a, b) => loose_eq(&a.resolve(vars), &b.resolve(vars)),
            Expr::Ne(a, b) => !loose_eq(&a.resolve(vars), &b.resolve(vars)),
            Expr::Truthy(o) => truthy(&o.resolve(vars)),
        }
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !(s.is_empty() || s == "false" || s == "0"),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Equality that lets `"8080" == 8080` and `"true" == true` hold, since
/// CLI-supplied values arrive as strings.
fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => scalar_text(a) == scalar_text(b),
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    Not,
    And,
    Or,
    Eq,
    Ne,
    Ident(String),
    Lit(Value),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::LParen => f.write_str("'('"),
            Token::RParen => f.write_str("')'"),
            Token::Not => f.write_str("'!'"),
            Token::And => f.write_str("'&&'"),
            Token::Or => f.write_str("'||'"),
            Token::Eq => f.write_str("'=='"),
            Token::Ne => f.write_str("'!='"),
            Token::Ident(name) => write!(f, "identifier '{name}'"),
            Token::Lit(value) => write!(f, "literal {value}"),
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-'
}

fn tokenize(source: &str) -> Result<Vec<Token>, ConditionError> {
    let chars: Vec<(usize, char)> = source.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    let peek = |i: usize| chars.get(i).map(|(_, c)| *c);

    while let Some(&(offset, c)) = chars.get(i) {
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '!' if peek(i + 1) == Some('=') => {
                tokens.push(Token::Ne);
                i += 2;
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '=' if peek(i + 1) == Some('=') => {
                tokens.push(Token::Eq);
                i += 2;
            }
            '&' if peek(i + 1) == Some('&') => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if peek(i + 1) == Some('|') => {
                tokens.push(Token::Or);
                i += 2;
            }
            '{' if peek(i + 1) == Some('{') => {
                let start = i + 2;
                let mut end = start;
                while end < chars.len() && !(chars[end].1 == '}' && peek(end + 1) == Some('}')) {
                    end += 1;
                }
                if end >= chars.len() {
                    return Err(ConditionError::UnterminatedPlaceholder { offset });
                }
                let name: String = chars[start..end].iter().map(|(_, c)| *c).collect();
                let name = name.trim();
                if name.is_empty() || !name.starts_with(is_ident_start) || !name.chars().all(is_ident_char) {
                    return Err(ConditionError::UnexpectedToken {
                        found: format!("placeholder '{{{{{name}}}}}'"),
                    });
                }
                tokens.push(Token::Ident(name.to_string()));
                i = end + 2;
            }
            '\'' | '"' => {
                let quote = c;
                let mut end = i + 1;
                let mut text = String::new();
                loop {
                    match peek(end) {
                        None => return Err(ConditionError::UnterminatedString { offset }),
                        Some(ch) if ch == quote => break,
                        Some(ch) => text.push(ch),
                    }
                    end += 1;
                }
                tokens.push(Token::Lit(Value::String(text)));
                i = end + 1;
            }
            c if c.is_ascii_digit() || (c == '-' && peek(i + 1).is_some_and(|n| n.is_ascii_digit())) => {
                let mut end = i + 1;
                while peek(end).is_some_and(|n| n.is_ascii_digit() || n == '.') {
                    end += 1;
                }
                let text: String = chars[i..end].iter().map(|(_, c)| *c).collect();
                let number = text
                    .parse::<i64>()
                    .map(Value::from)
                    .or_else(|_| text.parse::<f64>().map(Value::from))
                    .map_err(|_| ConditionError::UnexpectedToken {
                        found: format!("number '{text}'"),
                    })?;
                tokens.push(Token::Lit(number));
                i = end;
            }
            c if is_ident_start(c) => {
                let mut end = i + 1;
                while peek(end).is_some_and(is_ident_char) {
                    end += 1;
                }
                let word: String = chars[i..end].iter().map(|(_, c)| *c).collect();
                tokens.push(match word.as_str() {
                    "true" => Token::Lit(Value::Bool(true)),
                    "false" => Token::Lit(Value::Bool(false)),
                    _ => Token::Ident(word),
                });
                i = end;
            }
            ch => return Err(ConditionError::UnexpectedChar { ch, offset }),
        }
    }
    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

fn parse_expr(source: &str) -> Result<Expr, ConditionError> {
    let tokens = tokenize(source)?;
    if tokens.is_empty() {
        return Err(ConditionError::Empty);
    }
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.or()?;
    match parser.next() {
        None => Ok(expr),
        Some(tok) => Err(ConditionError::UnexpectedToken {
            found: tok.to_string(),
        }),
    }
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn or(&mut self) -> Result<Expr, ConditionError> {
        let mut lhs = self.and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            lhs = Expr::Or(Box::new(lhs), Box::new(self.and()?));
        }
        Ok(lhs)
    }

    fn and(&mut self) -> Result<Expr, ConditionError> {
        let mut lhs = self.unary()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            lhs = Expr::And(Box::new(lhs), Box::new(self.unary()?));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, ConditionError> {
        match self.next().ok_or(ConditionError::UnexpectedEnd)? {
            Token::Not => Ok(Expr::Not(Box::new(self.unary()?))),
            Token::LParen => {
                let inner = self.or()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    Some(tok) => Err(ConditionError::UnexpectedToken {
                        found: tok.to_string(),
                    }),
                    None => Err(ConditionError::UnexpectedEnd),
                }
            }
            tok => {
                let lhs = operand(tok)?;
                match self.peek() {
                    Some(Token::Eq) => {
                        self.pos += 1;
                        Ok(Expr::Eq(lhs, self.operand()?))
                    }
                    Some(Token::Ne) => {
                        self.pos += 1;
                        Ok(Expr::Ne(lhs, self.operand()?))
                    }
                    _ => Ok(Expr::Truthy(lhs)),
                }
            }
        }
    }

    fn operand(&mut self) -> Result<Operand, ConditionError> {
        operand(self.next().ok_or(ConditionError::UnexpectedEnd)?)
    }
}

fn operand(tok: Token) -> Result<Operand, ConditionError> {
    match tok {
        Token::Ident(name) => Ok(Operand::Var(name)),
        Token::Lit(value) => Ok(Operand::Lit(value)),
        other => Err(ConditionError::UnexpectedToken {
            found: other.to_string(),
        }),
    }
}
