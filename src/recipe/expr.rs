//! Arithmetic expressions embedded in recipe values as `eval(<expr>)`.
//!
//! Grammar:
//!
//! ```text
//! expr  := term (('+' | '-') term)*
//! term  := unary (('*' | '/') unary)*
//! unary := ('-' | '+') unary | atom
//! atom  := number | bool | ident | '(' expr ')' | '[' (expr (',' expr)*)? ']'
//! ```
//!
//! Integer arithmetic stays integral for `+ - *`; `/` always yields a float.
//! List literals parse so that a non-scalar result can be reported
//! precisely instead of as a syntax error.

use crate::error::{PodarError, Result};
use serde_yaml::{Number, Value};
use std::fmt;

/// Scalar produced by an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
}

impl Scalar {
    pub fn into_value(self) -> Value {
        match self {
            Scalar::Int(i) => Value::Number(Number::from(i)),
            Scalar::Float(f) => Value::Number(Number::from(f)),
            Scalar::Bool(b) => Value::Bool(b),
            Scalar::Str(s) => Value::String(s),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Scalar::Int(_) => "int",
            Scalar::Float(_) => "float",
            Scalar::Bool(_) => "bool",
            Scalar::Str(_) => "string",
        }
    }
}

/// Result of evaluating an expression before the scalar check.
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluated {
    Scalar(Scalar),
    List(Vec<Evaluated>),
}

impl Evaluated {
    /// Convert a YAML value bound to an identifier.
    fn from_value(value: &Value) -> Option<Evaluated> {
        match value {
            Value::Bool(b) => Some(Evaluated::Scalar(Scalar::Bool(*b))),
            Value::Number(n) => Some(Evaluated::Scalar(number_to_scalar(n))),
            Value::String(s) => Some(Evaluated::Scalar(Scalar::Str(s.clone()))),
            Value::Sequence(items) => items
                .iter()
                .map(Evaluated::from_value)
                .collect::<Option<Vec<_>>>()
                .map(Evaluated::List),
            Value::Tagged(tagged) => Evaluated::from_value(&tagged.value),
            Value::Null | Value::Mapping(_) => None,
        }
    }

    fn describe(&self) -> String {
        match self {
            Evaluated::Scalar(s) => s.type_name().to_string(),
            Evaluated::List(items) => format!("list of {} items", items.len()),
        }
    }
}

fn number_to_scalar(n: &Number) -> Scalar {
    match n.as_i64() {
        Some(i) => Scalar::Int(i),
        None => Scalar::Float(n.as_f64().unwrap_or(f64::NAN)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
        };
        f.write_str(s)
    }
}

/// Parsed expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Scalar),
    Ident(String),
    List(Vec<Expr>),
    Neg(Box<Expr>),
    Binary(Box<Expr>, BinOp, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(Scalar),
    Ident(String),
    Op(char),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
}

/// If `raw` is written as `eval(<expr>)`, return the inner expression text.
pub fn strip_eval(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    trimmed.strip_prefix("eval(")?.strip_suffix(')')
}

impl Expr {
    /// Parse expression text (without the `eval(...)` wrapper).
    pub fn parse(source: &str) -> Result<Expr> {
        let tokens = tokenize(source)?;
        let mut parser = Parser { tokens: &tokens, pos: 0, source };
        let expr = parser.expr()?;
        if parser.pos != tokens.len() {
            return Err(parser.error(format!("unexpected token {:?}", tokens[parser.pos])));
        }
        Ok(expr)
    }

    /// Identifiers referenced anywhere in the tree, in first-use order.
    pub fn identifiers(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_identifiers(&mut out);
        out
    }

    fn collect_identifiers(&self, out: &mut Vec<String>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Ident(name) => {
                if !out.contains(name) {
                    out.push(name.clone());
                }
            }
            Expr::List(items) => items.iter().for_each(|e| e.collect_identifiers(out)),
            Expr::Neg(inner) => inner.collect_identifiers(out),
            Expr::Binary(lhs, _, rhs) => {
                lhs.collect_identifiers(out);
                rhs.collect_identifiers(out);
            }
        }
    }

    /// Evaluate with `lookup` resolving identifiers to YAML values.
    ///
    /// `name` labels errors with the variable or field being computed.
    pub fn evaluate<F>(&self, name: &str, lookup: &F) -> Result<Evaluated>
    where
        F: Fn(&str) -> Option<Value>,
    {
        match self {
            Expr::Literal(s) => Ok(Evaluated::Scalar(s.clone())),
            Expr::Ident(ident) => {
                let value = lookup(ident).ok_or_else(|| PodarError::UndefinedVariable {
                    name: ident.clone(),
                    referenced_by: name.to_string(),
                })?;
                Evaluated::from_value(&value).ok_or_else(|| PodarError::NonScalarExpression {
                    name: name.to_string(),
                    found: format!("'{ident}' bound to a mapping or null"),
                })
            }
            Expr::List(items) => items
                .iter()
                .map(|e| e.evaluate(name, lookup))
                .collect::<Result<Vec<_>>>()
                .map(Evaluated::List),
            Expr::Neg(inner) => match inner.evaluate(name, lookup)? {
                Evaluated::Scalar(Scalar::Int(i)) => Ok(Evaluated::Scalar(Scalar::Int(-i))),
                Evaluated::Scalar(Scalar::Float(f)) => Ok(Evaluated::Scalar(Scalar::Float(-f))),
                other => Err(PodarError::InvalidExpression {
                    expr: name.to_string(),
                    message: format!("cannot negate {}", other.describe()),
                }),
            },
            Expr::Binary(lhs, op, rhs) => {
                let l = lhs.evaluate(name, lookup)?;
                let r = rhs.evaluate(name, lookup)?;
                apply_binary(name, *op, l, r).map(Evaluated::Scalar)
            }
        }
    }

    /// Evaluate and require a scalar result.
    pub fn evaluate_scalar<F>(&self, name: &str, lookup: &F) -> Result<Scalar>
    where
        F: Fn(&str) -> Option<Value>,
    {
        match self.evaluate(name, lookup)? {
            Evaluated::Scalar(s) => Ok(s),
            other => Err(PodarError::NonScalarExpression {
                name: name.to_string(),
                found: other.describe(),
            }),
        }
    }
}

fn apply_binary(name: &str, op: BinOp, l: Evaluated, r: Evaluated) -> Result<Scalar> {
    let invalid = |message: String| PodarError::InvalidExpression {
        expr: name.to_string(),
        message,
    };

    let (l, r) = match (l, r) {
        (Evaluated::Scalar(l), Evaluated::Scalar(r)) => (l, r),
        (l, r) => {
            return Err(invalid(format!(
                "operator {op} needs scalar operands, got {} and {}",
                l.describe(),
                r.describe()
            )))
        }
    };

    match (&l, &r) {
        (Scalar::Int(a), Scalar::Int(b)) if op != BinOp::Div => {
            let result = match op {
                BinOp::Add => a.checked_add(*b),
                BinOp::Sub => a.checked_sub(*b),
                BinOp::Mul => a.checked_mul(*b),
                BinOp::Div => None,
            };
            result
                .map(Scalar::Int)
                .ok_or_else(|| invalid(format!("integer overflow in {a} {op} {b}")))
        }
        (Scalar::Int(_) | Scalar::Float(_), Scalar::Int(_) | Scalar::Float(_)) => {
            let a = as_f64(&l);
            let b = as_f64(&r);
            match op {
                BinOp::Add => Ok(Scalar::Float(a + b)),
                BinOp::Sub => Ok(Scalar::Float(a - b)),
                BinOp::Mul => Ok(Scalar::Float(a * b)),
                BinOp::Div if b == 0.0 => Err(invalid("division by zero".to_string())),
                BinOp::Div => Ok(Scalar::Float(a / b)),
            }
        }
        _ => Err(invalid(format!(
            "operator {op} not supported between {} and {}",
            l.type_name(),
            r.type_name()
        ))),
    }
}

fn as_f64(s: &Scalar) -> f64 {
    match s {
        Scalar::Int(i) => *i as f64,
        Scalar::Float(f) => *f,
        Scalar::Bool(_) | Scalar::Str(_) => f64::NAN,
    }
}

fn tokenize(source: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '+' | '-' | '*' | '/' => {
                tokens.push(Token::Op(c));
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                // scientific notation: 1e-3, 2.5E4
                if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].is_ascii_digit() {
                        i = j;
                        while i < chars.len() && chars[i].is_ascii_digit() {
                            i += 1;
                        }
                    }
                }
                let text: String = chars[start..i].iter().collect();
                tokens.push(Token::Num(parse_number(&text, source)?));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => {
                return Err(PodarError::InvalidExpression {
                    expr: source.to_string(),
                    message: format!("unexpected character '{other}'"),
                })
            }
        }
    }
    Ok(tokens)
}

fn parse_number(text: &str, source: &str) -> Result<Scalar> {
    let is_float = text.contains(['.', 'e', 'E']);
    let parsed = if is_float {
        text.parse::<f64>().ok().map(Scalar::Float)
    } else {
        text.parse::<i64>().ok().map(Scalar::Int)
    };
    parsed.ok_or_else(|| PodarError::InvalidExpression {
        expr: source.to_string(),
        message: format!("bad number literal '{text}'"),
    })
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    source: &'a str,
}

impl Parser<'_> {
    fn error(&self, message: String) -> PodarError {
        PodarError::InvalidExpression { expr: self.source.to_string(), message }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn expect(&mut self, expected: Token) -> Result<()> {
        match self.next() {
            Some(tok) if tok == expected => Ok(()),
            Some(tok) => Err(self.error(format!("expected {expected:?}, found {tok:?}"))),
            None => Err(self.error(format!("expected {expected:?}, found end of input"))),
        }
    }

    fn expr(&mut self) -> Result<Expr> {
        let mut lhs = self.term()?;
        while let Some(Token::Op(c @ ('+' | '-'))) = self.peek() {
            let op = if *c == '+' { BinOp::Add } else { BinOp::Sub };
            self.pos += 1;
            let rhs = self.term()?;
            lhs = Expr::Binary(Box::new(lhs), op, Box::new(rhs));
        }
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Expr> {
        let mut lhs = self.unary()?;
        while let Some(Token::Op(c @ ('*' | '/'))) = self.peek() {
            let op = if *c == '*' { BinOp::Mul } else { BinOp::Div };
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = Expr::Binary(Box::new(lhs), op, Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr> {
        match self.peek() {
            Some(Token::Op('-')) => {
                self.pos += 1;
                Ok(Expr::Neg(Box::new(self.unary()?)))
            }
            Some(Token::Op('+')) => {
                self.pos += 1;
                self.unary()
            }
            _ => self.atom(),
        }
    }

    fn atom(&mut self) -> Result<Expr> {
        match self.next() {
            Some(Token::Num(n)) => Ok(Expr::Literal(n)),
            Some(Token::Ident(name)) => Ok(match name.as_str() {
                "True" | "true" => Expr::Literal(Scalar::Bool(true)),
                "False" | "false" => Expr::Literal(Scalar::Bool(false)),
                _ => Expr::Ident(name),
            }),
            Some(Token::LParen) => {
                let inner = self.expr()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::LBracket) => {
                let mut items = Vec::new();
                if self.peek() != Some(&Token::RBracket) {
                    items.push(self.expr()?);
                    while self.peek() == Some(&Token::Comma) {
                        self.pos += 1;
                        items.push(self.expr()?);
                    }
                }
                self.expect(Token::RBracket)?;
                Ok(Expr::List(items))
            }
            Some(tok) => Err(self.error(format!("unexpected token {tok:?}"))),
            None => Err(self.error("unexpected end of expression".to_string())),
        }
    }
}
