//! `--filter` expressions
//!
//! Grammar:
//!
//! ```text
//! expr    := or
//! or      := and ("OR" and)*
//! and     := unary (["AND"] unary)*
//! unary   := ("NOT" | "-") unary | primary
//! primary := "(" expr ")" | key OP value | word
//! OP      := ":" | "=" | "!=" | "<" | "<=" | ">" | ">=" | "~" | "!~"
//! ```
//!
//! `key:value` is a case-insensitive word match (`*` suffix for prefixes,
//! `key:*` for presence). `=` compares case-insensitively, with `*`
//! globbing. Ordering operators compare numerically when both sides are
//! numbers. A bare word matches any string value in the resource.

use super::projection::{scalar_text, Key, Projection};
use crate::error::{Error, Result};
use regex::Regex;
use serde_json::Value;
use std::cmp::Ordering;

/// Comparison operator of a term.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Has,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Match,
    NotMatch,
}

/// Right-hand side of a term, precompiled where needed.
#[derive(Debug, Clone)]
pub enum Operand {
    Text(String),
    /// `key:(a b c)`: any of the values.
    AnyOf(Vec<String>),
    Pattern(Regex),
}

/// Parsed filter expression.
#[derive(Debug, Clone)]
pub enum Filter {
    And(Box<Filter>, Box<Filter>),
    Or(Box<Filter>, Box<Filter>),
    Not(Box<Filter>),
    Term { key: Key, op: Op, operand: Operand },
    /// Bare word matched against every string in the resource.
    Global(String),
}

impl Filter {
    /// Parse an expression. `projection` resolves `:alias=` names.
    pub fn parse(text: &str, projection: Option<&Projection>) -> Result<Self> {
        let tokens = tokenize(text).map_err(|reason| Error::invalid_argument("--filter", text, reason))?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            projection,
        };
        let filter = parser
            .parse_or()
            .map_err(|reason| Error::invalid_argument("--filter", text, reason))?;
        if parser.pos < parser.tokens.len() {
            return Err(Error::invalid_argument(
                "--filter",
                text,
                format!("unexpected [{}]", parser.tokens[parser.pos].text()),
            ));
        }
        Ok(filter)
    }

    /// Whether `item` satisfies the expression.
    pub fn matches(&self, item: &Value) -> bool {
        match self {
            Self::And(a, b) => a.matches(item) && b.matches(item),
            Self::Or(a, b) => a.matches(item) || b.matches(item),
            Self::Not(inner) => !inner.matches(item),
            Self::Global(word) => contains_word(item, &word.to_lowercase()),
            Self::Term { key, op, operand } => match key.resolve(item) {
                None | Some(Value::Null) => matches_absent(*op, operand),
                Some(value) => {
                    if *op == Op::Ne {
                        !any_scalar(&value, &|v| compare(v, Op::Eq, operand))
                    } else if *op == Op::NotMatch {
                        !any_scalar(&value, &|v| compare(v, Op::Match, operand))
                    } else {
                        any_scalar(&value, &|v| compare(v, *op, operand))
                    }
                }
            },
        }
    }
}

/// A missing or null key satisfies the negated operators, and `=` against
/// an empty or `null` operand. Every other term fails.
fn matches_absent(op: Op, operand: &Operand) -> bool {
    match (op, operand) {
        (Op::Ne | Op::NotMatch, _) => true,
        (Op::Eq, Operand::Text(text)) => text.is_empty() || text == "null",
        _ => false,
    }
}

/// Arrays match when any element matches.
fn any_scalar(value: &Value, test: &dyn Fn(&Value) -> bool) -> bool {
    match value {
        Value::Array(items) => items.iter().any(|v| any_scalar(v, test)),
        other => test(other),
    }
}

fn contains_word(value: &Value, word: &str) -> bool {
    match value {
        Value::String(s) => s.to_lowercase().contains(word),
        Value::Number(n) => n.to_string() == word,
        Value::Array(items) => items.iter().any(|v| contains_word(v, word)),
        Value::Object(map) => map.values().any(|v| contains_word(v, word)),
        _ => false,
    }
}

fn words(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// `key:pattern` on one scalar.
fn has(value: &Value, pattern: &str) -> bool {
    if pattern == "*" {
        return !matches!(value, Value::Null) && scalar_text(value) != "";
    }
    let text = scalar_text(value);
    let (pattern, prefix) = match pattern.strip_suffix('*') {
        Some(p) => (p, true),
        None => (pattern, false),
    };
    if text.eq_ignore_ascii_case(pattern) {
        return true;
    }
    let wanted = words(pattern);
    if wanted.is_empty() {
        return false;
    }
    let have = words(&text);
    if have.len() < wanted.len() {
        return false;
    }
    have.windows(wanted.len()).any(|window| {
        window.iter().zip(&wanted).enumerate().all(|(i, (h, w))| {
            if prefix && i + 1 == wanted.len() {
                h.starts_with(w.as_str())
            } else {
                h == w
            }
        })
    })
}

fn glob_matches(text: &str, pattern: &str) -> bool {
    let escaped = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&format!("(?i)^{escaped}$"))
        .map(|r| r.is_match(text))
        .unwrap_or(false)
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn order(value: &Value, rhs: &str) -> Option<Ordering> {
    if let (Some(a), Ok(b)) = (as_number(value), rhs.trim().parse::<f64>()) {
        return a.partial_cmp(&b);
    }
    Some(scalar_text(value).as_str().cmp(rhs))
}

fn compare(value: &Value, op: Op, operand: &Operand) -> bool {
    match (op, operand) {
        (Op::Has, Operand::AnyOf(options)) => options.iter().any(|o| has(value, o)),
        (Op::Eq, Operand::AnyOf(options)) => options.iter().any(|o| equals(value, o)),
        (Op::Has, Operand::Text(pattern)) => has(value, pattern),
        (Op::Eq, Operand::Text(rhs)) => equals(value, rhs),
        (Op::Match, Operand::Pattern(re)) => re.is_match(&scalar_text(value)),
        (Op::Lt, Operand::Text(rhs)) => order(value, rhs) == Some(Ordering::Less),
        (Op::Le, Operand::Text(rhs)) => matches!(order(value, rhs), Some(Ordering::Less | Ordering::Equal)),
        (Op::Gt, Operand::Text(rhs)) => order(value, rhs) == Some(Ordering::Greater),
        (Op::Ge, Operand::Text(rhs)) => {
            matches!(order(value, rhs), Some(Ordering::Greater | Ordering::Equal))
        }
        _ => false,
    }
}

fn equals(value: &Value, rhs: &str) -> bool {
    if let (Some(a), Ok(b)) = (as_number(value), rhs.trim().parse::<f64>()) {
        return a == b;
    }
    let text = match value {
        Value::Bool(b) => b.to_string(),
        other => scalar_text(other),
    };
    if rhs.contains('*') {
        glob_matches(&text, rhs)
    } else {
        text.eq_ignore_ascii_case(rhs)
    }
}

// =========================================================================
// Lexer
// =========================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Open,
    Close,
    Op(Op),
    Word(String),
    Quoted(String),
}

impl Token {
    fn text(&self) -> String {
        match self {
            Self::Open => "(".to_string(),
            Self::Close => ")".to_string(),
            Self::Op(op) => format!("{op:?}"),
            Self::Word(w) | Self::Quoted(w) => w.clone(),
        }
    }
}

fn tokenize(text: &str) -> std::result::Result<Vec<Token>, String> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    // After an operator the next word is a value and may contain operator characters.
    let mut expect_value = false;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c == '"' || c == '\'' {
            let mut value = String::new();
            i += 1;
            loop {
                match chars.get(i) {
                    None => return Err("unterminated quoted string".to_string()),
                    Some('\\') if chars.get(i + 1).is_some() => {
                        value.push(chars[i + 1]);
                        i += 2;
                    }
                    Some(&q) if q == c => {
                        i += 1;
                        break;
                    }
                    Some(&other) => {
                        value.push(other);
                        i += 1;
                    }
                }
            }
            tokens.push(Token::Quoted(value));
            expect_value = false;
            continue;
        }
        if c == '(' {
            tokens.push(Token::Open);
            i += 1;
            continue;
        }
        if c == ')' {
            tokens.push(Token::Close);
            i += 1;
            expect_value = false;
            continue;
        }
        if !expect_value {
            let two: String = chars[i..chars.len().min(i + 2)].iter().collect();
            let op = match two.as_str() {
                "!=" => Some((Op::Ne, 2)),
                "<=" => Some((Op::Le, 2)),
                ">=" => Some((Op::Ge, 2)),
                "!~" => Some((Op::NotMatch, 2)),
                _ => match c {
                    ':' => Some((Op::Has, 1)),
                    '=' => Some((Op::Eq, 1)),
                    '<' => Some((Op::Lt, 1)),
                    '>' => Some((Op::Gt, 1)),
                    '~' => Some((Op::Match, 1)),
                    _ => None,
                },
            };
            if let Some((op, len)) = op {
                tokens.push(Token::Op(op));
                i += len;
                expect_value = true;
                continue;
            }
        }
        let start = i;
        while i < chars.len() {
            let ch = chars[i];
            if ch.is_whitespace() || ch == '(' || ch == ')' {
                break;
            }
            if !expect_value && matches!(ch, ':' | '=' | '<' | '>' | '~' | '!') && i > start {
                break;
            }
            i += 1;
        }
        if i == start {
            return Err(format!("unexpected character [{c}]"));
        }
        tokens.push(Token::Word(chars[start..i].iter().collect()));
        expect_value = false;
    }
    Ok(tokens)
}

// =========================================================================
// Parser
// =========================================================================

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    projection: Option<&'a Projection>,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Word(w)) if w == keyword)
    }

    fn parse_or(&mut self) -> std::result::Result<Filter, String> {
        let mut left = self.parse_and()?;
        while self.is_keyword("OR") {
            self.pos += 1;
            let right = self.parse_and()?;
            left = Filter::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> std::result::Result<Filter, String> {
        let mut left = self.parse_unary()?;
        loop {
            if self.is_keyword("AND") {
                self.pos += 1;
            } else if self.peek().is_none() || self.is_keyword("OR") || self.peek() == Some(&Token::Close) {
                break;
            }
            let right = self.parse_unary()?;
            left = Filter::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> std::result::Result<Filter, String> {
        if self.is_keyword("NOT") {
            self.pos += 1;
            return Ok(Filter::Not(Box::new(self.parse_unary()?)));
        }
        if let Some(Token::Word(w)) = self.peek() {
            if let Some(rest) = w.strip_prefix('-').filter(|r| !r.is_empty()) {
                let rest = rest.to_string();
                self.tokens[self.pos] = Token::Word(rest);
                return Ok(Filter::Not(Box::new(self.parse_unary()?)));
            }
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> std::result::Result<Filter, String> {
        match self.peek().cloned() {
            None => Err("expression expected".to_string()),
            Some(Token::Open) => {
                self.pos += 1;
                let inner = self.parse_or()?;
                if self.peek() != Some(&Token::Close) {
                    return Err("missing )".to_string());
                }
                self.pos += 1;
                Ok(inner)
            }
            Some(Token::Close) => Err("unexpected )".to_string()),
            Some(Token::Op(op)) => Err(format!("term expected before {op:?}")),
            Some(Token::Quoted(word)) => {
                self.pos += 1;
                Ok(Filter::Global(word))
            }
            Some(Token::Word(word)) => {
                self.pos += 1;
                let Some(Token::Op(op)) = self.peek().cloned() else {
                    return Ok(Filter::Global(word));
                };
                self.pos += 1;
                let key = self.resolve_key(&word)?;
                let operand = self.parse_operand(op)?;
                Ok(Filter::Term { key, op, operand })
            }
        }
    }

    fn resolve_key(&self, name: &str) -> std::result::Result<Key, String> {
        if let Some(key) = self.projection.and_then(|p| p.alias(name)) {
            return Ok(key.clone());
        }
        Key::parse(name)
    }

    fn parse_operand(&mut self, op: Op) -> std::result::Result<Operand, String> {
        let text = match self.peek().cloned() {
            Some(Token::Word(w)) | Some(Token::Quoted(w)) => {
                self.pos += 1;
                w
            }
            Some(Token::Open) if matches!(op, Op::Has | Op::Eq) => {
                self.pos += 1;
                let mut options = Vec::new();
                loop {
                    match self.peek().cloned() {
                        Some(Token::Close) => {
                            self.pos += 1;
                            break;
                        }
                        Some(Token::Word(w)) if w == "OR" => self.pos += 1,
                        Some(Token::Word(w)) | Some(Token::Quoted(w)) => {
                            options.push(w);
                            self.pos += 1;
                        }
                        _ => return Err("unterminated value list".to_string()),
                    }
                }
                return Ok(Operand::AnyOf(options));
            }
            _ => return Err(format!("value expected after {op:?}")),
        };
        if matches!(op, Op::Match | Op::NotMatch) {
            return Regex::new(&text)
                .map(Operand::Pattern)
                .map_err(|e| format!("invalid regular expression [{text}]: {e}"));
        }
        Ok(Operand::Text(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn check(expr: &str, item: &Value) -> bool {
        Filter::parse(expr, None).unwrap().matches(item)
    }

    #[test]
    fn test_numeric_comparisons() {
        let item = json!({"name": "b", "size": 2});
        assert!(check("size>=2", &item));
        assert!(check("size > 1", &item));
        assert!(!check("size<2", &item));
        assert!(check("size<=2", &item));
        assert!(check("size=2", &item));
        assert!(check("size!=3", &item));
        // strings holding numbers compare numerically
        assert!(check("size>10", &json!({"size": "11"})));
    }

    #[test]
    fn test_has_matches_words() {
        let item = json!({"zone": "us-central1-a", "name": "my-instance"});
        assert!(check("zone:us-central1", &item));
        assert!(check("zone:US-CENTRAL1-A", &item));
        assert!(check("name:inst*", &item));
        assert!(!check("name:inst", &item));
        assert!(check("name:*", &item));
        assert!(!check("missing:*", &item));
    }

    #[test]
    fn test_boolean_operators() {
        let item = json!({"status": "RUNNING", "zone": "us-east1-b"});
        assert!(check("status=RUNNING AND zone:us-east1", &item));
        assert!(check("status=running zone:us-east1", &item));
        assert!(check("status=STOPPED OR zone:us-east1", &item));
        assert!(check("NOT status=STOPPED", &item));
        assert!(check("-status=STOPPED", &item));
        assert!(!check("(status=STOPPED OR zone:europe) AND status=RUNNING", &item));
    }

    #[test]
    fn test_missing_keys() {
        let item = json!({"name": "x", "zone": null});
        assert!(!check("labels.env=prod", &item));
        assert!(check("NOT labels.env=prod", &item));
        assert!(check("labels.env!=prod", &item));
        assert!(check("zone!=us-east1-b", &item));
        assert!(check("labels.env!~^prod", &item));
        assert!(!check("labels.env:*", &item));
        assert!(!check("labels.env<3", &item));
        assert!(check("labels.env=null", &item));
        assert!(check("labels.env=''", &item));
    }

    #[test]
    fn test_arrays_match_any_element() {
        let item = json!({"bindings": [{"role": "roles/viewer"}, {"role": "roles/owner"}]});
        assert!(check("bindings.role:roles/owner", &item));
        assert!(check("bindings[].role=roles/viewer", &item));
        assert!(!check("bindings.role=roles/editor", &item));
    }

    #[test]
    fn test_regex_and_glob() {
        let item = json!({"name": "web-42"});
        assert!(check("name~^web-\\d+$", &item));
        assert!(check("name!~^db", &item));
        assert!(check("name=web-*", &item));
        assert!(check("name:(db web)", &item));
    }

    #[test]
    fn test_values_may_contain_operator_characters() {
        let item = json!({"selfLink": "https://x/projects/p/zones/z/instances/i"});
        assert!(check("selfLink=https://x/projects/p/zones/z/instances/i", &item));
        assert!(check("selfLink:\"https://x/projects/p\"", &item));
    }

    #[test]
    fn test_global_restriction() {
        assert!(check("central1", &json!({"zone": "us-central1-a"})));
        assert!(!check("europe", &json!({"zone": "us-central1-a"})));
    }

    #[test]
    fn test_aliases_resolve_through_projection() {
        let projection = Projection::parse("zone.basename():alias=z").unwrap();
        let filter = Filter::parse("z:us-east1-b", Some(&projection)).unwrap();
        assert!(filter.matches(&json!({"zone": "us-east1-b"})));
    }

    #[test]
    fn test_parse_errors() {
        assert!(Filter::parse("(a=1", None).is_err());
        assert!(Filter::parse("a=", None).is_err());
        assert!(Filter::parse("=1", None).is_err());
        assert!(Filter::parse("name~(", None).is_err());
        let err = Filter::parse("a=\"x", None).unwrap_err();
        assert!(err.is_usage());
    }
}
