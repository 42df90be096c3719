//! Pure expression language for `transformation.formula`.
//!
//! ```text
//! expr    := compare
//! compare := sum (("==" | "!=" | "<" | "<=" | ">" | ">=") sum)*
//! sum     := product (("+" | "-") product)*
//! product := unary (("*" | "/") unary)*
//! unary   := "-" unary | primary
//! primary := number | string | true | false | null
//!          | ident | ident "(" args ")" | "{" field name "}" | "(" expr ")"
//! ```
//!
//! Identifiers resolve to fields of the cleaned record; a missing field is null.

use serde_json::Value;
use std::cmp::Ordering;
use thiserror::Error;

use super::Record;
use super::transform::{lookup, number_value, to_number, truthy};

#[derive(Debug, Error, PartialEq)]
pub enum FormulaError {
    #[error("Parse error at {pos}: {msg}")]
    Parse { pos: usize, msg: String },

    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    #[error("{name}() takes {expected} argument(s), got {got}")]
    Arity {
        name: String,
        expected: &'static str,
        got: usize,
    },

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Not a number: {0}")]
    NotNumeric(String),

    #[error("Cannot compare {0} with {1}")]
    Incomparable(String, String),
}

type Result<T> = std::result::Result<T, FormulaError>;

/// Longest formula accepted, in characters.
pub const MAX_FORMULA_LEN: usize = 2000;

/// Deepest nesting of parentheses, calls and unary minus.
const MAX_DEPTH: usize = 64;

/// Parse and evaluate `source` against `record`.
pub fn evaluate(source: &str, record: &Record) -> Result<Value> {
    let expr = parse(source)?;
    eval(&expr, record)
}

// ---------- lexer ----------

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Num(f64),
    Str(String),
    Ident(String),
    Field(String),
    Op(&'static str),
    LParen,
    RParen,
    Comma,
}

fn parse_err<T>(pos: usize, msg: impl Into<String>) -> Result<T> {
    Err(FormulaError::Parse {
        pos,
        msg: msg.into(),
    })
}

fn lex(src: &str) -> Result<Vec<(usize, Tok)>> {
    let chars: Vec<char> = src.chars().collect();
    let mut toks = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let start = i;
        match c {
            c if c.is_whitespace() => {
                i += 1;
                continue;
            }
            '(' => {
                toks.push((start, Tok::LParen));
                i += 1;
            }
            ')' => {
                toks.push((start, Tok::RParen));
                i += 1;
            }
            ',' => {
                toks.push((start, Tok::Comma));
                i += 1;
            }
            '+' | '-' | '*' | '/' => {
                toks.push((
                    start,
                    Tok::Op(match c {
                        '+' => "+",
                        '-' => "-",
                        '*' => "*",
                        _ => "/",
                    }),
                ));
                i += 1;
            }
            '=' | '!' | '<' | '>' => {
                let next_eq = chars.get(i + 1) == Some(&'=');
                let op = match (c, next_eq) {
                    ('=', true) => "==",
                    ('!', true) => "!=",
                    ('<', true) => "<=",
                    ('>', true) => ">=",
                    ('<', false) => "<",
                    ('>', false) => ">",
                    _ => return parse_err(start, format!("unexpected '{c}'")),
                };
                toks.push((start, Tok::Op(op)));
                i += if next_eq { 2 } else { 1 };
            }
            '\'' | '"' => {
                let quote = c;
                let mut s = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return parse_err(start, "unterminated string"),
                        Some('\\') if i + 1 < chars.len() => {
                            s.push(chars[i + 1]);
                            i += 2;
                        }
                        Some(&ch) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some(&ch) => {
                            s.push(ch);
                            i += 1;
                        }
                    }
                }
                toks.push((start, Tok::Str(s)));
            }
            '{' => {
                let Some(len) = chars[i + 1..].iter().position(|&ch| ch == '}') else {
                    return parse_err(start, "unterminated field reference");
                };
                let name: String = chars[i + 1..i + 1 + len].iter().collect();
                let name = name.trim().to_string();
                if name.is_empty() {
                    return parse_err(start, "empty field reference");
                }
                toks.push((start, Tok::Field(name)));
                i += len + 2;
            }
            c if c.is_ascii_digit() || c == '.' => {
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                match text.parse::<f64>() {
                    Ok(n) => toks.push((start, Tok::Num(n))),
                    Err(_) => return parse_err(start, format!("invalid number '{text}'")),
                }
            }
            c if c.is_alphabetic() || c == '_' => {
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                toks.push((start, Tok::Ident(chars[start..i].iter().collect())));
            }
            other => return parse_err(start, format!("unexpected '{other}'")),
        }
    }

    Ok(toks)
}

// ---------- parser ----------

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Lit(Value),
    Field(String),
    Neg(Box<Expr>),
    Binary(&'static str, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

struct Parser {
    toks: Vec<(usize, Tok)>,
    pos: usize,
    end: usize,
    depth: usize,
}

fn parse(src: &str) -> Result<Expr> {
    let end = src.chars().count();
    if end > MAX_FORMULA_LEN {
        return parse_err(MAX_FORMULA_LEN, format!("formula longer than {MAX_FORMULA_LEN} characters"));
    }
    let mut p = Parser {
        toks: lex(src)?,
        pos: 0,
        end,
        depth: 0,
    };
    if p.toks.is_empty() {
        return parse_err(0, "empty formula");
    }
    let expr = p.compare()?;
    if let Some((at, tok)) = p.toks.get(p.pos) {
        return parse_err(*at, format!("unexpected {tok:?}"));
    }
    Ok(expr)
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos).map(|(_, t)| t)
    }

    fn here(&self) -> usize {
        self.toks.get(self.pos).map_or(self.end, |(at, _)| *at)
    }

    fn next(&mut self) -> Option<Tok> {
        let tok = self.toks.get(self.pos).map(|(_, t)| t.clone());
        self.pos += 1;
        tok
    }

    fn eat_op(&mut self, ops: &[&'static str]) -> Option<&'static str> {
        match self.peek() {
            Some(Tok::Op(op)) if ops.contains(op) => {
                let op = *op;
                self.pos += 1;
                Some(op)
            }
            _ => None,
        }
    }

    fn enter(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return parse_err(self.here(), format!("nested deeper than {MAX_DEPTH} levels"));
        }
        Ok(())
    }

    fn compare(&mut self) -> Result<Expr> {
        self.enter()?;
        let mut lhs = self.sum()?;
        while let Some(op) = self.eat_op(&["==", "!=", "<", "<=", ">", ">="]) {
            let rhs = self.sum()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        self.depth -= 1;
        Ok(lhs)
    }

    fn sum(&mut self) -> Result<Expr> {
        let mut lhs = self.product()?;
        while let Some(op) = self.eat_op(&["+", "-"]) {
            let rhs = self.product()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn product(&mut self) -> Result<Expr> {
        let mut lhs = self.unary()?;
        while let Some(op) = self.eat_op(&["*", "/"]) {
            let rhs = self.unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr> {
        if self.eat_op(&["-"]).is_some() {
            self.enter()?;
            let inner = self.unary()?;
            self.depth -= 1;
            return Ok(Expr::Neg(Box::new(inner)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr> {
        let at = self.here();
        match self.next() {
            Some(Tok::Num(n)) => Ok(Expr::Lit(number_value(n).unwrap_or(Value::Null))),
            Some(Tok::Str(s)) => Ok(Expr::Lit(Value::String(s))),
            Some(Tok::Field(name)) => Ok(Expr::Field(name)),
            Some(Tok::LParen) => {
                let inner = self.compare()?;
                self.expect_rparen()?;
                Ok(inner)
            }
            Some(Tok::Ident(name)) => {
                if self.peek() == Some(&Tok::LParen) {
                    self.pos += 1;
                    let args = self.args()?;
                    return Ok(Expr::Call(name.to_ascii_lowercase(), args));
                }
                Ok(match name.as_str() {
                    "true" => Expr::Lit(Value::Bool(true)),
                    "false" => Expr::Lit(Value::Bool(false)),
                    "null" => Expr::Lit(Value::Null),
                    _ => Expr::Field(name),
                })
            }
            Some(tok) => parse_err(at, format!("unexpected {tok:?}")),
            None => parse_err(at, "unexpected end of formula"),
        }
    }

    fn args(&mut self) -> Result<Vec<Expr>> {
        let mut args = Vec::new();
        if self.peek() == Some(&Tok::RParen) {
            self.pos += 1;
            return Ok(args);
        }
        loop {
            args.push(self.compare()?);
            match self.next() {
                Some(Tok::Comma) => continue,
                Some(Tok::RParen) => return Ok(args),
                _ => return parse_err(self.here(), "expected ',' or ')'"),
            }
        }
    }

    fn expect_rparen(&mut self) -> Result<()> {
        let at = self.here();
        match self.next() {
            Some(Tok::RParen) => Ok(()),
            _ => parse_err(at, "expected ')'"),
        }
    }
}

// ---------- evaluation ----------

fn eval(expr: &Expr, record: &Record) -> Result<Value> {
    match expr {
        Expr::Lit(v) => Ok(v.clone()),
        Expr::Field(name) => Ok(lookup(record, name).cloned().unwrap_or(Value::Null)),
        Expr::Neg(inner) => {
            let v = eval(inner, record)?;
            numeric_result(-num(&v)?)
        }
        Expr::Binary(op, lhs, rhs) => {
            let l = eval(lhs, record)?;
            let r = eval(rhs, record)?;
            binary(op, &l, &r)
        }
        Expr::Call(name, args) => call(name, args, record),
    }
}

fn num(v: &Value) -> Result<f64> {
    to_number(v).ok_or_else(|| FormulaError::NotNumeric(v.to_string()))
}

fn numeric_result(f: f64) -> Result<Value> {
    number_value(f).ok_or_else(|| FormulaError::NotNumeric(f.to_string()))
}

fn text(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn binary(op: &str, l: &Value, r: &Value) -> Result<Value> {
    match op {
        "+" if l.is_string() || r.is_string() => Ok(Value::String(text(l) + &text(r))),
        "+" => numeric_result(num(l)? + num(r)?),
        "-" => numeric_result(num(l)? - num(r)?),
        "*" => numeric_result(num(l)? * num(r)?),
        "/" => {
            let d = num(r)?;
            if d == 0.0 {
                return Err(FormulaError::DivisionByZero);
            }
            numeric_result(num(l)? / d)
        }
        "==" => Ok(Value::Bool(loose_eq(l, r))),
        "!=" => Ok(Value::Bool(!loose_eq(l, r))),
        _ => {
            let ord = order(l, r)?;
            Ok(Value::Bool(match op {
                "<" => ord == Ordering::Less,
                "<=" => ord != Ordering::Greater,
                ">" => ord == Ordering::Greater,
                _ => ord != Ordering::Less,
            }))
        }
    }
}

/// Numbers compare numerically even when one side is numeric text.
fn loose_eq(l: &Value, r: &Value) -> bool {
    if l.is_number() || r.is_number() {
        if let (Some(a), Some(b)) = (to_number(l), to_number(r)) {
            return a == b;
        }
    }
    l == r
}

fn order(l: &Value, r: &Value) -> Result<Ordering> {
    if let (Value::String(a), Value::String(b)) = (l, r) {
        return Ok(a.cmp(b));
    }
    match (to_number(l), to_number(r)) {
        (Some(a), Some(b)) => a
            .partial_cmp(&b)
            .ok_or_else(|| FormulaError::Incomparable(l.to_string(), r.to_string())),
        _ => Err(FormulaError::Incomparable(l.to_string(), r.to_string())),
    }
}

fn arity(name: &str, args: &[Expr], min: usize, max: usize, expected: &'static str) -> Result<()> {
    if args.len() < min || args.len() > max {
        return Err(FormulaError::Arity {
            name: name.to_string(),
            expected,
            got: args.len(),
        });
    }
    Ok(())
}

fn call(name: &str, args: &[Expr], record: &Record) -> Result<Value> {
    // `if` evaluates only the chosen branch
    if name == "if" {
        arity(name, args, 3, 3, "3")?;
        let cond = eval(&args[0], record)?;
        return eval(if truthy(&cond) { &args[1] } else { &args[2] }, record);
    }

    let vals = args
        .iter()
        .map(|a| eval(a, record))
        .collect::<Result<Vec<_>>>()?;

    match name {
        "upper" | "lower" | "trim" => {
            arity(name, args, 1, 1, "1")?;
            if vals[0].is_null() {
                return Ok(Value::Null);
            }
            let s = text(&vals[0]);
            Ok(Value::String(match name {
                "upper" => s.to_uppercase(),
                "lower" => s.to_lowercase(),
                _ => s.trim().to_string(),
            }))
        }
        "concat" => Ok(Value::String(vals.iter().map(text).collect())),
        "coalesce" => Ok(vals.into_iter().find(|v| !v.is_null()).unwrap_or(Value::Null)),
        "round" => {
            arity(name, args, 1, 2, "1 or 2")?;
            let x = num(&vals[0])?;
            let digits = match vals.get(1) {
                Some(d) => num(d)?.clamp(0.0, 12.0) as i32,
                None => 0,
            };
            let scale = 10f64.powi(digits);
            numeric_result((x * scale).round() / scale)
        }
        "abs" => {
            arity(name, args, 1, 1, "1")?;
            numeric_result(num(&vals[0])?.abs())
        }
        "len" => {
            arity(name, args, 1, 1, "1")?;
            let n = match &vals[0] {
                Value::Null => 0,
                Value::Array(a) => a.len(),
                Value::Object(o) => o.len(),
                other => text(other).chars().count(),
            };
            Ok(Value::from(n as u64))
        }
        other => Err(FormulaError::UnknownFunction(other.to_string())),
    }
}
