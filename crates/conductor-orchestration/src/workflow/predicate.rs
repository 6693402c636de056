//! Boolean predicates over workflow variables.
//!
//! Predicates are data: a small expression tree that serializes with the
//! graph, plus an escape hatch for caller-supplied closures. The parser
//! accepts expressions such as
//!
//! ```text
//! score >= 0.5 && status == 'ok'
//! !approved || (retries < 3 and tags contains "urgent")
//! report.summary exists
//! ```
//!
//! Paths are dotted lookups into nested objects (`a.b.c`) with numeric
//! segments indexing arrays (`items.0`).

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// Variables a predicate is evaluated against.
pub type Variables = HashMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// A caller-supplied predicate. Not serializable.
#[derive(Clone)]
pub struct CustomPredicate {
    name: String,
    func: Arc<dyn Fn(&Variables) -> bool + Send + Sync>,
}

impl CustomPredicate {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for CustomPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomPredicate")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl PartialEq for CustomPredicate {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && Arc::ptr_eq(&self.func, &other.func)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Predicate {
    Literal {
        value: bool,
    },
    /// The path resolves to any value, including `null`.
    Exists {
        path: String,
    },
    /// The path resolves to a truthy value.
    Truthy {
        path: String,
    },
    Compare {
        path: String,
        op: CompareOp,
        value: Value,
    },
    /// Substring, array element or object key.
    Contains {
        path: String,
        value: Value,
    },
    Not {
        predicate: Box<Predicate>,
    },
    All {
        predicates: Vec<Predicate>,
    },
    Any {
        predicates: Vec<Predicate>,
    },
    #[serde(skip)]
    Custom(CustomPredicate),
}

impl Predicate {
    pub fn literal(value: bool) -> Self {
        Predicate::Literal { value }
    }

    pub fn exists(path: impl Into<String>) -> Self {
        Predicate::Exists { path: path.into() }
    }

    pub fn truthy(path: impl Into<String>) -> Self {
        Predicate::Truthy { path: path.into() }
    }

    pub fn compare(path: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Predicate::Compare {
            path: path.into(),
            op,
            value: value.into(),
        }
    }

    pub fn equals(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(path, CompareOp::Eq, value)
    }

    pub fn not_equals(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(path, CompareOp::Ne, value)
    }

    pub fn greater_than(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(path, CompareOp::Gt, value)
    }

    pub fn less_than(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(path, CompareOp::Lt, value)
    }

    pub fn contains(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Contains {
            path: path.into(),
            value: value.into(),
        }
    }

    pub fn negate(predicate: Predicate) -> Self {
        Predicate::Not {
            predicate: Box::new(predicate),
        }
    }

    pub fn all(predicates: Vec<Predicate>) -> Self {
        Predicate::All { predicates }
    }

    pub fn any(predicates: Vec<Predicate>) -> Self {
        Predicate::Any { predicates }
    }

    /// Wrap a closure.
    pub fn custom<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Variables) -> bool + Send + Sync + 'static,
    {
        Predicate::Custom(CustomPredicate {
            name: name.into(),
            func: Arc::new(func),
        })
    }

    /// Parse an expression.
    pub fn parse(expression: &str) -> Result<Self, PredicateError> {
        let tokens = tokenize(expression)?;
        let mut parser = Parser { tokens, pos: 0 };
        let predicate = parser.or_expr()?;
        match parser.peek() {
            None => Ok(predicate),
            Some(t) => Err(PredicateError::UnexpectedToken {
                token: t.token.to_string(),
                pos: t.pos,
            }),
        }
    }

    /// Whether any part of the tree is a closure.
    pub fn is_custom(&self) -> bool {
        match self {
            Predicate::Custom(_) => true,
            Predicate::Not { predicate } => predicate.is_custom(),
            Predicate::All { predicates } | Predicate::Any { predicates } => {
                predicates.iter().any(Predicate::is_custom)
            }
            _ => false,
        }
    }

    pub fn evaluate(&self, vars: &Variables) -> bool {
        match self {
            Predicate::Literal { value } => *value,
            Predicate::Exists { path } => lookup(vars, path).is_some(),
            Predicate::Truthy { path } => lookup(vars, path).is_some_and(is_truthy),
            Predicate::Compare { path, op, value } => match lookup(vars, path) {
                Some(actual) => compare(actual, *op, value),
                None => *op == CompareOp::Ne,
            },
            Predicate::Contains { path, value } => {
                lookup(vars, path).is_some_and(|actual| contains(actual, value))
            }
            Predicate::Not { predicate } => !predicate.evaluate(vars),
            Predicate::All { predicates } => predicates.iter().all(|p| p.evaluate(vars)),
            Predicate::Any { predicates } => predicates.iter().any(|p| p.evaluate(vars)),
            Predicate::Custom(custom) => (custom.func)(vars),
        }
    }
}

impl FromStr for Predicate {
    type Err = PredicateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Resolve a dotted path.
pub fn lookup<'a>(vars: &'a Variables, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = vars.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn compare(actual: &Value, op: CompareOp, expected: &Value) -> bool {
    use std::cmp::Ordering;

    let ordering = match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => a.as_f64().zip(b.as_f64()).and_then(|(a, b)| a.partial_cmp(&b)),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    };

    match op {
        CompareOp::Eq => values_equal(actual, expected),
        CompareOp::Ne => !values_equal(actual, expected),
        CompareOp::Lt => ordering == Some(Ordering::Less),
        CompareOp::Le => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
        CompareOp::Gt => ordering == Some(Ordering::Greater),
        CompareOp::Ge => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
    }
}

fn contains(actual: &Value, needle: &Value) -> bool {
    match (actual, needle) {
        (Value::String(s), Value::String(n)) => s.contains(n.as_str()),
        (Value::Array(items), _) => items.iter().any(|item| values_equal(item, needle)),
        (Value::Object(map), Value::String(key)) => map.contains_key(key),
        _ => false,
    }
}

// ============================================================================
// Expression parser
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PredicateError {
    #[error("Unexpected character '{ch}' at position {pos}")]
    UnexpectedChar { ch: char, pos: usize },

    #[error("Unterminated string starting at position {0}")]
    UnterminatedString(usize),

    #[error("Invalid number '{0}'")]
    InvalidNumber(String),

    #[error("Unexpected token '{token}' at position {pos}")]
    UnexpectedToken { token: String, pos: usize },

    #[error("Unexpected end of expression")]
    UnexpectedEnd,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Path(String),
    Number(Number),
    Str(String),
    True,
    False,
    Null,
    And,
    Or,
    Not,
    Contains,
    Exists,
    Op(CompareOp),
    LParen,
    RParen,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Path(p) => write!(f, "{}", p),
            Token::Number(n) => write!(f, "{}", n),
            Token::Str(s) => write!(f, "'{}'", s),
            Token::True => f.write_str("true"),
            Token::False => f.write_str("false"),
            Token::Null => f.write_str("null"),
            Token::And => f.write_str("&&"),
            Token::Or => f.write_str("||"),
            Token::Not => f.write_str("!"),
            Token::Contains => f.write_str("contains"),
            Token::Exists => f.write_str("exists"),
            Token::Op(op) => f.write_str(match op {
                CompareOp::Eq => "==",
                CompareOp::Ne => "!=",
                CompareOp::Lt => "<",
                CompareOp::Le => "<=",
                CompareOp::Gt => ">",
                CompareOp::Ge => ">=",
            }),
            Token::LParen => f.write_str("("),
            Token::RParen => f.write_str(")"),
        }
    }
}

#[derive(Debug, Clone)]
struct Spanned {
    token: Token,
    pos: usize,
}

fn tokenize(input: &str) -> Result<Vec<Spanned>, PredicateError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let pos = i;
        let next = chars.get(i + 1).copied();

        let token = match c {
            c if c.is_whitespace() => {
                i += 1;
                continue;
            }
            '(' => {
                i += 1;
                Token::LParen
            }
            ')' => {
                i += 1;
                Token::RParen
            }
            '&' if next == Some('&') => {
                i += 2;
                Token::And
            }
            '|' if next == Some('|') => {
                i += 2;
                Token::Or
            }
            '=' if next == Some('=') => {
                i += 2;
                Token::Op(CompareOp::Eq)
            }
            '!' if next == Some('=') => {
                i += 2;
                Token::Op(CompareOp::Ne)
            }
            '!' => {
                i += 1;
                Token::Not
            }
            '<' | '>' => {
                let or_equal = next == Some('=');
                i += if or_equal { 2 } else { 1 };
                Token::Op(match (c, or_equal) {
                    ('<', false) => CompareOp::Lt,
                    ('<', true) => CompareOp::Le,
                    ('>', false) => CompareOp::Gt,
                    _ => CompareOp::Ge,
                })
            }
            '\'' | '"' => {
                let quote = c;
                let mut text = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(PredicateError::UnterminatedString(pos)),
                        Some('\\') if i + 1 < chars.len() => {
                            text.push(chars[i + 1]);
                            i += 2;
                        }
                        Some(&ch) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some(&ch) => {
                            text.push(ch);
                            i += 1;
                        }
                    }
                }
                Token::Str(text)
            }
            c if c.is_ascii_digit() || (c == '-' && next.is_some_and(|n| n.is_ascii_digit())) => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                Token::Number(parse_number(&text)?)
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.')
                {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                match word.as_str() {
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    "contains" => Token::Contains,
                    "exists" => Token::Exists,
                    _ => Token::Path(word),
                }
            }
            other => return Err(PredicateError::UnexpectedChar { ch: other, pos }),
        };
        tokens.push(Spanned { token, pos });
    }

    Ok(tokens)
}

fn parse_number(text: &str) -> Result<Number, PredicateError> {
    if let Ok(i) = text.parse::<i64>() {
        return Ok(Number::from(i));
    }
    text.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .ok_or_else(|| PredicateError::InvalidNumber(text.to_string()))
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Spanned> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Result<Spanned, PredicateError> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or(PredicateError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(token)
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek().is_some_and(|t| &t.token == token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn or_expr(&mut self) -> Result<Predicate, PredicateError> {
        let mut terms = vec![self.and_expr()?];
        while self.eat(&Token::Or) {
            terms.push(self.and_expr()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            Predicate::any(terms)
        })
    }

    fn and_expr(&mut self) -> Result<Predicate, PredicateError> {
        let mut terms = vec![self.unary()?];
        while self.eat(&Token::And) {
            terms.push(self.unary()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            Predicate::all(terms)
        })
    }

    fn unary(&mut self) -> Result<Predicate, PredicateError> {
        if self.eat(&Token::Not) {
            return Ok(Predicate::negate(self.unary()?));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Predicate, PredicateError> {
        let Spanned { token, pos } = self.next()?;
        match token {
            Token::LParen => {
                let inner = self.or_expr()?;
                match self.next()? {
                    Spanned {
                        token: Token::RParen,
                        ..
                    } => Ok(inner),
                    other => Err(unexpected(other)),
                }
            }
            Token::True => Ok(Predicate::literal(true)),
            Token::False => Ok(Predicate::literal(false)),
            Token::Path(path) => self.after_path(path),
            other => Err(PredicateError::UnexpectedToken {
                token: other.to_string(),
                pos,
            }),
        }
    }

    fn after_path(&mut self, path: String) -> Result<Predicate, PredicateError> {
        let Some(next) = self.peek().map(|t| t.token.clone()) else {
            return Ok(Predicate::truthy(path));
        };
        match next {
            Token::Op(op) => {
                self.pos += 1;
                Ok(Predicate::compare(path, op, self.literal()?))
            }
            Token::Contains => {
                self.pos += 1;
                Ok(Predicate::contains(path, self.literal()?))
            }
            Token::Exists => {
                self.pos += 1;
                Ok(Predicate::exists(path))
            }
            _ => Ok(Predicate::truthy(path)),
        }
    }

    fn literal(&mut self) -> Result<Value, PredicateError> {
        let spanned = self.next()?;
        match spanned.token {
            Token::Number(n) => Ok(Value::Number(n)),
            Token::Str(s) => Ok(Value::String(s)),
            Token::True => Ok(Value::Bool(true)),
            Token::False => Ok(Value::Bool(false)),
            Token::Null => Ok(Value::Null),
            _ => Err(unexpected(spanned)),
        }
    }
}

fn unexpected(spanned: Spanned) -> PredicateError {
    PredicateError::UnexpectedToken {
        token: spanned.token.to_string(),
        pos: spanned.pos,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(value: Value) -> Variables {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_parse_comparison_chain() {
        let p = Predicate::parse("score >= 0.5 && status == 'ok'").unwrap();
        assert_eq!(
            p,
            Predicate::all(vec![
                Predicate::compare("score", CompareOp::Ge, 0.5),
                Predicate::equals("status", "ok"),
            ])
        );
        assert!(p.evaluate(&vars(json!({"score": 0.7, "status": "ok"}))));
        assert!(!p.evaluate(&vars(json!({"score": 0.2, "status": "ok"}))));
    }

    #[test]
    fn test_precedence_and_grouping() {
        let vars = vars(json!({"a": true, "b": false, "c": false}));
        assert!(Predicate::parse("a || b && c").unwrap().evaluate(&vars));
        assert!(!Predicate::parse("(a || b) && c").unwrap().evaluate(&vars));
        assert!(Predicate::parse("not b and !c").unwrap().evaluate(&vars));
    }

    #[test]
    fn test_nested_paths_and_contains() {
        let vars = vars(json!({
            "report": {"tags": ["urgent", "billing"], "title": "Quarterly numbers"},
            "items": [{"n": 1}, {"n": 2}]
        }));
        assert!(Predicate::parse("report.tags contains 'urgent'").unwrap().evaluate(&vars));
        assert!(Predicate::parse("report.title contains \"numbers\"").unwrap().evaluate(&vars));
        assert!(Predicate::parse("items.1.n == 2").unwrap().evaluate(&vars));
        assert!(Predicate::parse("report exists").unwrap().evaluate(&vars));
        assert!(!Predicate::parse("report.missing exists").unwrap().evaluate(&vars));
    }

    #[test]
    fn test_missing_paths() {
        let empty = Variables::new();
        assert!(!Predicate::equals("x", 1).evaluate(&empty));
        assert!(Predicate::not_equals("x", 1).evaluate(&empty));
        assert!(!Predicate::truthy("x").evaluate(&empty));
    }

    #[test]
    fn test_integer_and_float_compare_equal() {
        let vars = vars(json!({"n": 3}));
        assert!(Predicate::parse("n == 3.0").unwrap().evaluate(&vars));
        assert!(Predicate::parse("n > -1").unwrap().evaluate(&vars));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(Predicate::parse("a ==").unwrap_err(), PredicateError::UnexpectedEnd);
        assert!(matches!(
            Predicate::parse("a == 'x").unwrap_err(),
            PredicateError::UnterminatedString(5)
        ));
        assert!(matches!(
            Predicate::parse("a # b").unwrap_err(),
            PredicateError::UnexpectedChar { ch: '#', pos: 2 }
        ));
        assert!(matches!(
            Predicate::parse("a b").unwrap_err(),
            PredicateError::UnexpectedToken { pos: 2, .. }
        ));
    }

    #[test]
    fn test_custom_predicate_not_serialized() {
        let p = Predicate::custom("even", |v: &Variables| {
            v.get("n").and_then(Value::as_i64).is_some_and(|n| n % 2 == 0)
        });
        assert!(p.is_custom());
        assert!(p.evaluate(&vars(json!({"n": 4}))));
        assert!(serde_json::to_string(&p).is_err());
    }

    #[test]
    fn test_structured_predicate_round_trip() {
        let p = Predicate::parse("!(done) && retries < 3").unwrap();
        let json = serde_json::to_string(&p).unwrap();
        assert_eq!(serde_json::from_str::<Predicate>(&json).unwrap(), p);
    }
}
