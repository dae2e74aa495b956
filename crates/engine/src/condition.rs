//! Restricted condition expression language.
//!
//! A small hand-rolled recursive-descent parser and interpreter covering
//! exactly the grammar named in the design notes: identifiers, literals,
//! `==`, `!=`, `<`, `>`, `&&`, `||`, `!`, parens, and member/index access
//! into `context` — no general-purpose scripting, no `eval`.
//!
//! `context` is bound to the map of prior task outputs keyed by upstream
//! `task_id`, mirroring `ExecutionContext::outputs`.

use std::collections::HashMap;
use std::iter::Peekable;
use std::str::Chars;

use serde_json::Value;

use crate::EngineError;

// ---------------------------------------------------------------------------
// Tokens
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Str(String),
    True,
    False,
    Null,
    Dot,
    LBracket,
    RBracket,
    LParen,
    RParen,
    EqEq,
    NotEq,
    Lt,
    Gt,
    AndAnd,
    OrOr,
    Bang,
    Eof,
}

struct Lexer<'a> {
    chars: Peekable<Chars<'a>>,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self { chars: src.chars().peekable() }
    }

    fn tokenize(mut self) -> Result<Vec<Token>, EngineError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace();
            let Some(&c) = self.chars.peek() else {
                tokens.push(Token::Eof);
                break;
            };

            match c {
                '.' => { self.chars.next(); tokens.push(Token::Dot); }
                '[' => { self.chars.next(); tokens.push(Token::LBracket); }
                ']' => { self.chars.next(); tokens.push(Token::RBracket); }
                '(' => { self.chars.next(); tokens.push(Token::LParen); }
                ')' => { self.chars.next(); tokens.push(Token::RParen); }
                '!' => {
                    self.chars.next();
                    if self.chars.peek() == Some(&'=') {
                        self.chars.next();
                        tokens.push(Token::NotEq);
                    } else {
                        tokens.push(Token::Bang);
                    }
                }
                '=' => {
                    self.chars.next();
                    if self.chars.peek() == Some(&'=') {
                        self.chars.next();
                        tokens.push(Token::EqEq);
                    } else {
                        return Err(EngineError::ConditionError("unexpected '='".into()));
                    }
                }
                '<' => { self.chars.next(); tokens.push(Token::Lt); }
                '>' => { self.chars.next(); tokens.push(Token::Gt); }
                '&' => {
                    self.chars.next();
                    if self.chars.peek() == Some(&'&') {
                        self.chars.next();
                        tokens.push(Token::AndAnd);
                    } else {
                        return Err(EngineError::ConditionError("unexpected '&'".into()));
                    }
                }
                '|' => {
                    self.chars.next();
                    if self.chars.peek() == Some(&'|') {
                        self.chars.next();
                        tokens.push(Token::OrOr);
                    } else {
                        return Err(EngineError::ConditionError("unexpected '|'".into()));
                    }
                }
                '\'' | '"' => tokens.push(self.read_string(c)?),
                c if c.is_ascii_digit() => tokens.push(self.read_number()),
                c if c.is_alphabetic() || c == '_' => tokens.push(self.read_ident()),
                other => {
                    return Err(EngineError::ConditionError(format!(
                        "unexpected character '{other}'"
                    )))
                }
            }
        }
        Ok(tokens)
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.chars.peek(), Some(c) if c.is_whitespace()) {
            self.chars.next();
        }
    }

    fn read_string(&mut self, quote: char) -> Result<Token, EngineError> {
        self.chars.next(); // consume opening quote
        let mut s = String::new();
        loop {
            match self.chars.next() {
                Some(c) if c == quote => return Ok(Token::Str(s)),
                Some(c) => s.push(c),
                None => return Err(EngineError::ConditionError("unterminated string".into())),
            }
        }
    }

    fn read_number(&mut self) -> Token {
        let mut s = String::new();
        while matches!(self.chars.peek(), Some(c) if c.is_ascii_digit() || *c == '.') {
            s.push(self.chars.next().unwrap());
        }
        Token::Number(s.parse().unwrap_or(0.0))
    }

    fn read_ident(&mut self) -> Token {
        let mut s = String::new();
        while matches!(self.chars.peek(), Some(c) if c.is_alphanumeric() || *c == '_') {
            s.push(self.chars.next().unwrap());
        }
        match s.as_str() {
            "true" => Token::True,
            "false" => Token::False,
            "null" => Token::Null,
            _ => Token::Ident(s),
        }
    }
}

// ---------------------------------------------------------------------------
// AST
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Expr {
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    Ident(String),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Eq(Box<Expr>, Box<Expr>),
    NotEq(Box<Expr>, Box<Expr>),
    Lt(Box<Expr>, Box<Expr>),
    Gt(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

// ---------------------------------------------------------------------------
// Parser (recursive descent, lowest precedence first)
// ---------------------------------------------------------------------------

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, tok: Token) -> Result<(), EngineError> {
        if *self.peek() == tok {
            self.advance();
            Ok(())
        } else {
            Err(EngineError::ConditionError(format!(
                "expected {tok:?}, found {:?}",
                self.peek()
            )))
        }
    }

    fn parse(&mut self) -> Result<Expr, EngineError> {
        let expr = self.parse_or()?;
        if *self.peek() != Token::Eof {
            return Err(EngineError::ConditionError(format!(
                "unexpected trailing token {:?}",
                self.peek()
            )));
        }
        Ok(expr)
    }

    fn parse_or(&mut self) -> Result<Expr, EngineError> {
        let mut lhs = self.parse_and()?;
        while *self.peek() == Token::OrOr {
            self.advance();
            let rhs = self.parse_and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, EngineError> {
        let mut lhs = self.parse_comparison()?;
        while *self.peek() == Token::AndAnd {
            self.advance();
            let rhs = self.parse_comparison()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_comparison(&mut self) -> Result<Expr, EngineError> {
        let lhs = self.parse_unary()?;
        let op = self.peek().clone();
        let ctor: fn(Box<Expr>, Box<Expr>) -> Expr = match op {
            Token::EqEq => Expr::Eq,
            Token::NotEq => Expr::NotEq,
            Token::Lt => Expr::Lt,
            Token::Gt => Expr::Gt,
            _ => return Ok(lhs),
        };
        self.advance();
        let rhs = self.parse_unary()?;
        Ok(ctor(Box::new(lhs), Box::new(rhs)))
    }

    fn parse_unary(&mut self) -> Result<Expr, EngineError> {
        if *self.peek() == Token::Bang {
            self.advance();
            let inner = self.parse_unary()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, EngineError> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek().clone() {
                Token::Dot => {
                    self.advance();
                    let Token::Ident(name) = self.advance() else {
                        return Err(EngineError::ConditionError("expected identifier after '.'".into()));
                    };
                    expr = Expr::Member(Box::new(expr), name);
                }
                Token::LBracket => {
                    self.advance();
                    let index = self.parse_or()?;
                    self.expect(Token::RBracket)?;
                    expr = Expr::Index(Box::new(expr), Box::new(index));
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, EngineError> {
        match self.advance() {
            Token::Null => Ok(Expr::Null),
            Token::True => Ok(Expr::Bool(true)),
            Token::False => Ok(Expr::Bool(false)),
            Token::Number(n) => Ok(Expr::Number(n)),
            Token::Str(s) => Ok(Expr::Str(s)),
            Token::Ident(name) => Ok(Expr::Ident(name)),
            Token::LParen => {
                let inner = self.parse_or()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            other => Err(EngineError::ConditionError(format!(
                "unexpected token {other:?}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Evaluator
// ---------------------------------------------------------------------------

/// `context`'s only binding: the identifier `context` resolves to the
/// upstream-outputs map itself as a JSON object.
fn context_value(outputs: &HashMap<String, Value>) -> Value {
    Value::Object(outputs.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
}

fn eval(expr: &Expr, outputs: &HashMap<String, Value>) -> Result<Value, EngineError> {
    match expr {
        Expr::Null => Ok(Value::Null),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Number(n) => Ok(serde_json::Number::from_f64(*n).map(Value::Number).unwrap_or(Value::Null)),
        Expr::Str(s) => Ok(Value::String(s.clone())),
        Expr::Ident(name) => {
            if name == "context" {
                Ok(context_value(outputs))
            } else {
                Err(EngineError::ConditionError(format!("unknown identifier '{name}'")))
            }
        }
        Expr::Member(base, field) => {
            let base_val = eval(base, outputs)?;
            Ok(base_val.get(field).cloned().unwrap_or(Value::Null))
        }
        Expr::Index(base, index) => {
            let base_val = eval(base, outputs)?;
            let index_val = eval(index, outputs)?;
            let result = match &index_val {
                Value::String(key) => base_val.get(key.as_str()),
                Value::Number(n) => n.as_u64().and_then(|i| base_val.get(i as usize)),
                _ => None,
            };
            Ok(result.cloned().unwrap_or(Value::Null))
        }
        Expr::Not(inner) => Ok(Value::Bool(!is_truthy(&eval(inner, outputs)?))),
        Expr::Eq(l, r) => Ok(Value::Bool(eval(l, outputs)? == eval(r, outputs)?)),
        Expr::NotEq(l, r) => Ok(Value::Bool(eval(l, outputs)? != eval(r, outputs)?)),
        Expr::Lt(l, r) => Ok(Value::Bool(compare(&eval(l, outputs)?, &eval(r, outputs)?)? == std::cmp::Ordering::Less)),
        Expr::Gt(l, r) => Ok(Value::Bool(compare(&eval(l, outputs)?, &eval(r, outputs)?)? == std::cmp::Ordering::Greater)),
        Expr::And(l, r) => Ok(Value::Bool(is_truthy(&eval(l, outputs)?) && is_truthy(&eval(r, outputs)?))),
        Expr::Or(l, r) => Ok(Value::Bool(is_truthy(&eval(l, outputs)?) || is_truthy(&eval(r, outputs)?))),
    }
}

fn compare(a: &Value, b: &Value) -> Result<std::cmp::Ordering, EngineError> {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => a
            .as_f64()
            .zip(b.as_f64())
            .and_then(|(a, b)| a.partial_cmp(&b))
            .ok_or_else(|| EngineError::ConditionError("cannot compare numbers".into())),
        (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
        _ => Err(EngineError::ConditionError("cannot compare mismatched types".into())),
    }
}

/// Truthiness rules: `null`, `false`, `0`, `""`, empty arrays/objects are
/// falsy; everything else is truthy.
fn is_truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Parse and evaluate `expr_src` against `outputs`, returning its truthiness.
pub fn evaluate(expr_src: &str, outputs: &HashMap<String, Value>) -> Result<bool, EngineError> {
    let tokens = Lexer::new(expr_src).tokenize()?;
    let expr = Parser::new(tokens).parse()?;
    let value = eval(&expr, outputs)?;
    Ok(is_truthy(&value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn outputs_with(task_id: &str, value: Value) -> HashMap<String, Value> {
        let mut m = HashMap::new();
        m.insert(task_id.to_string(), value);
        m
    }

    #[test]
    fn index_access_and_equality() {
        let outputs = outputs_with("t0", json!({"returncode": 0}));
        assert!(evaluate("context['t0']['returncode'] == 0", &outputs).unwrap());
    }

    #[test]
    fn member_access_and_inequality() {
        let outputs = outputs_with("t0", json!({"status": "ok"}));
        assert!(!evaluate("context.t0.status != 'ok'", &outputs).unwrap());
    }

    #[test]
    fn boolean_and_or_not() {
        let outputs = outputs_with("t0", json!({"a": true, "b": false}));
        assert!(evaluate("context.t0.a && !context.t0.b", &outputs).unwrap());
        assert!(evaluate("context.t0.a || context.t0.b", &outputs).unwrap());
    }

    #[test]
    fn numeric_comparison() {
        let outputs = outputs_with("t0", json!({"n": 42}));
        assert!(evaluate("context.t0.n > 10", &outputs).unwrap());
        assert!(!evaluate("context.t0.n < 10", &outputs).unwrap());
    }

    #[test]
    fn missing_field_is_falsy_null() {
        let outputs = outputs_with("t0", json!({}));
        assert!(!evaluate("context.t0.missing", &outputs).unwrap());
    }

    #[test]
    fn unknown_identifier_is_an_error() {
        let outputs = HashMap::new();
        assert!(evaluate("foo == 1", &outputs).is_err());
    }

    #[test]
    fn malformed_expression_is_an_error() {
        let outputs = HashMap::new();
        assert!(evaluate("context[", &outputs).is_err());
    }
}
