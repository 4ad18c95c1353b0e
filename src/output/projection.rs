//! Keys, projections and format specs
//!
//! `--format` takes `NAME[ATTRIBUTES](PROJECTION)`, for example
//! `table[no-heading](name, zone.basename(), size.size():label=BYTES)`.
//! The projection is a list of keys (`a.b[0].c`, `a[].b`) with optional
//! transforms and `:attr=value` column attributes.

use crate::error::{Error, Result};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

// =========================================================================
// Keys
// =========================================================================

/// One step of a key path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyPart {
    Field(String),
    /// Array index; negative values count from the end.
    Index(i64),
    /// `[]`: every element.
    All,
}

/// A dotted field path into a resource.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Key(pub Vec<KeyPart>);

impl Key {
    /// Parse `a.b[0].c` / `a[].b`.
    pub fn parse(text: &str) -> std::result::Result<Self, String> {
        let text = text.trim();
        if text.is_empty() {
            return Err("empty key".to_string());
        }
        let mut parts = Vec::new();
        for segment in text.split('.') {
            let (name, mut rest) = match segment.find('[') {
                Some(i) => (&segment[..i], &segment[i..]),
                None => (segment, ""),
            };
            if !name.is_empty() {
                if !name
                    .chars()
                    .all(|c| c.is_alphanumeric() || c == '_' || c == '-' || c == '@')
                {
                    return Err(format!("invalid key segment [{segment}]"));
                }
                parts.push(KeyPart::Field(name.to_string()));
            } else if rest.is_empty() {
                return Err(format!("empty segment in key [{text}]"));
            }
            while !rest.is_empty() {
                let close = rest
                    .find(']')
                    .ok_or_else(|| format!("unterminated [ in key [{text}]"))?;
                let inner = rest[1..close].trim();
                if inner.is_empty() {
                    parts.push(KeyPart::All);
                } else {
                    let index = inner
                        .parse::<i64>()
                        .map_err(|_| format!("invalid index [{inner}] in key [{text}]"))?;
                    parts.push(KeyPart::Index(index));
                }
                rest = &rest[close + 1..];
                if !rest.is_empty() && !rest.starts_with('[') {
                    return Err(format!("unexpected [{rest}] in key [{text}]"));
                }
            }
        }
        Ok(Self(parts))
    }

    /// Value at this key, or `None` when any step is missing.
    pub fn resolve(&self, value: &Value) -> Option<Value> {
        resolve_parts(&self.0, value)
    }

    /// Last field name, used for default column labels.
    pub fn last_name(&self) -> Option<&str> {
        self.0.iter().rev().find_map(|p| match p {
            KeyPart::Field(name) => Some(name.as_str()),
            _ => None,
        })
    }

    /// Field names only, used to build nested projection output.
    fn field_path(&self) -> Vec<&str> {
        self.0
            .iter()
            .filter_map(|p| match p {
                KeyPart::Field(name) => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }
}

fn resolve_parts(parts: &[KeyPart], value: &Value) -> Option<Value> {
    let Some((first, rest)) = parts.split_first() else {
        return Some(value.clone());
    };
    match first {
        // A field applied to a list applies to every element.
        KeyPart::Field(_) if value.is_array() => {
            let array = value.as_array()?;
            Some(Value::Array(
                array.iter().filter_map(|v| resolve_parts(parts, v)).collect(),
            ))
        }
        KeyPart::Field(name) => value.get(name).and_then(|v| resolve_parts(rest, v)),
        KeyPart::Index(index) => {
            let array = value.as_array()?;
            let len = array.len() as i64;
            let index = if *index < 0 { len + index } else { *index };
            if index < 0 || index >= len {
                return None;
            }
            resolve_parts(rest, &array[index as usize])
        }
        KeyPart::All => {
            let array = value.as_array()?;
            Some(Value::Array(
                array.iter().filter_map(|v| resolve_parts(rest, v)).collect(),
            ))
        }
    }
}

// =========================================================================
// Transforms
// =========================================================================

/// Per-column value transform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transform {
    Basename,
    Date(Option<String>),
    Join(String),
    Len,
    Lower,
    Upper,
    Size,
    YesNo { yes: String, no: String },
}

const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

impl Transform {
    fn parse(name: &str, args: &[(Option<String>, String)]) -> std::result::Result<Self, String> {
        let positional = |i: usize| args.iter().filter(|(k, _)| k.is_none()).nth(i).map(|(_, v)| v.clone());
        let named = |key: &str| {
            args.iter()
                .find(|(k, _)| k.as_deref() == Some(key))
                .map(|(_, v)| v.clone())
        };
        match name {
            "basename" => Ok(Self::Basename),
            "date" => Ok(Self::Date(positional(0).or_else(|| named("format")))),
            "join" => Ok(Self::Join(
                positional(0).or_else(|| named("sep")).unwrap_or_else(|| ",".to_string()),
            )),
            "len" => Ok(Self::Len),
            "lower" => Ok(Self::Lower),
            "upper" => Ok(Self::Upper),
            "size" => Ok(Self::Size),
            "yesno" => Ok(Self::YesNo {
                yes: named("yes").or_else(|| positional(0)).unwrap_or_else(|| "yes".to_string()),
                no: named("no").or_else(|| positional(1)).unwrap_or_else(|| "no".to_string()),
            }),
            other => Err(format!("unknown transform [{other}]")),
        }
    }

    /// Apply to a resolved value. Missing values only matter to `yesno` and `len`.
    pub fn apply(&self, value: Option<Value>) -> Option<Value> {
        match self {
            Self::YesNo { yes, no } => {
                let truthy = value.as_ref().map(is_truthy).unwrap_or(false);
                Some(Value::String(if truthy { yes.clone() } else { no.clone() }))
            }
            Self::Len => Some(Value::from(match &value {
                Some(Value::Array(a)) => a.len(),
                Some(Value::Object(o)) => o.len(),
                Some(Value::String(s)) => s.chars().count(),
                _ => 0,
            })),
            _ => value.map(|v| self.apply_present(v)),
        }
    }

    fn apply_present(&self, value: Value) -> Value {
        match (self, value) {
            (Self::Basename, Value::String(s)) => {
                Value::String(s.trim_end_matches('/').rsplit('/').next().unwrap_or_default().to_string())
            }
            (Self::Date(format), v) => format_date(&v, format.as_deref().unwrap_or(DEFAULT_DATE_FORMAT))
                .map(Value::String)
                .unwrap_or(v),
            (Self::Join(sep), Value::Array(items)) => {
                Value::String(items.iter().map(scalar_text).collect::<Vec<_>>().join(sep))
            }
            (Self::Lower, Value::String(s)) => Value::String(s.to_lowercase()),
            (Self::Upper, Value::String(s)) => Value::String(s.to_uppercase()),
            (Self::Size, v) => match as_u64(&v) {
                Some(bytes) => Value::String(format_bytes(bytes)),
                None => v,
            },
            (_, v) => v,
        }
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn format_date(value: &Value, format: &str) -> Option<String> {
    let parsed = match value {
        Value::String(s) => chrono::DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|d| d.with_timezone(&chrono::Utc)),
        Value::Number(n) => n
            .as_i64()
            .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0)),
        _ => None,
    }?;
    let mut out = String::new();
    use std::fmt::Write;
    write!(out, "{}", parsed.format(format)).ok()?;
    Some(out)
}

/// Format bytes to human readable
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    const TB: u64 = GB * 1024;

    if bytes >= TB {
        format!("{:.1} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Plain text of a scalar; containers become compact JSON.
pub fn scalar_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => if *b { "True" } else { "False" }.to_string(),
        other => other.to_string(),
    }
}

// =========================================================================
// Projection
// =========================================================================

/// One projected column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub key: Key,
    pub transforms: Vec<Transform>,
    pub label: Option<String>,
    /// `sort=N`: default sort order when `--sort-by` is absent.
    pub sort: Option<u32>,
    pub reverse: bool,
    pub alias: Option<String>,
}

impl Column {
    /// Heading text: the label, or the key's last name in UPPER_SNAKE case.
    pub fn heading(&self) -> String {
        if let Some(label) = &self.label {
            return label.clone();
        }
        let name = self.key.last_name().unwrap_or_default();
        let mut out = String::new();
        for (i, c) in name.chars().enumerate() {
            if c.is_uppercase() && i > 0 {
                out.push('_');
            }
            out.extend(c.to_uppercase());
        }
        out
    }

    /// Resolved and transformed value of this column for `item`.
    pub fn evaluate(&self, item: &Value) -> Option<Value> {
        self.transforms
            .iter()
            .fold(self.key.resolve(item), |value, t| t.apply(value))
    }
}

/// An ordered list of columns.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Projection {
    pub columns: Vec<Column>,
}

impl Projection {
    pub fn parse(text: &str) -> std::result::Result<Self, String> {
        let mut columns = Vec::new();
        for item in split_top_level(text, ',') {
            let item = item.trim();
            if item.is_empty() {
                continue;
            }
            columns.push(parse_column(item)?);
        }
        Ok(Self { columns })
    }

    /// Project `item` into a new object keyed by the projected paths.
    pub fn apply(&self, item: &Value) -> Value {
        let mut out = Map::new();
        for column in &self.columns {
            let value = column.evaluate(item).unwrap_or(Value::Null);
            let path = column.key.field_path();
            if path.is_empty() {
                continue;
            }
            insert_path(&mut out, &path, value);
        }
        Value::Object(out)
    }

    /// Rows of cell values, one per column.
    pub fn row(&self, item: &Value) -> Vec<Option<Value>> {
        self.columns.iter().map(|c| c.evaluate(item)).collect()
    }

    /// Key for an alias declared with `:alias=NAME`.
    pub fn alias(&self, name: &str) -> Option<&Key> {
        self.columns
            .iter()
            .find(|c| c.alias.as_deref() == Some(name))
            .map(|c| &c.key)
    }

    /// Sort keys declared with `:sort=N`, in order, with their direction.
    pub fn sort_keys(&self) -> Vec<(Key, bool)> {
        let mut keyed: Vec<(u32, Key, bool)> = self
            .columns
            .iter()
            .filter_map(|c| c.sort.map(|n| (n, c.key.clone(), c.reverse)))
            .collect();
        keyed.sort_by_key(|(n, _, _)| *n);
        keyed.into_iter().map(|(_, k, r)| (k, r)).collect()
    }
}

fn insert_path(out: &mut Map<String, Value>, path: &[&str], value: Value) {
    let Some((first, rest)) = path.split_first() else {
        return;
    };
    if rest.is_empty() {
        out.insert(first.to_string(), value);
        return;
    }
    let entry = out
        .entry(first.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if !entry.is_object() {
        *entry = Value::Object(Map::new());
    }
    if let Value::Object(map) = entry {
        insert_path(map, rest, value);
    }
}

fn parse_column(text: &str) -> std::result::Result<Column, String> {
    let mut pieces = split_top_level(text, ':').into_iter();
    let spec = pieces.next().unwrap_or_default();

    let mut key_parts = Vec::new();
    let mut transforms = Vec::new();
    for segment in split_top_level(spec.trim(), '.') {
        if let Some(open) = segment.find('(') {
            let name = segment[..open].trim();
            let inner = segment[open + 1..]
                .strip_suffix(')')
                .ok_or_else(|| format!("unterminated transform [{segment}]"))?;
            let args = split_top_level(inner, ',')
                .into_iter()
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty())
                .map(|a| match a.split_once('=') {
                    Some((k, v)) if !k.contains(['%', ' ']) => {
                        (Some(k.trim().to_string()), unquote(v.trim()))
                    }
                    _ => (None, unquote(&a)),
                })
                .collect::<Vec<_>>();
            transforms.push(Transform::parse(name, &args)?);
        } else if transforms.is_empty() {
            key_parts.push(segment);
        } else {
            return Err(format!("key segment [{segment}] after a transform"));
        }
    }
    let key = Key::parse(&key_parts.join("."))?;

    let mut column = Column {
        key,
        transforms,
        label: None,
        sort: None,
        reverse: false,
        alias: None,
    };
    for attr in pieces {
        let (name, value) = match attr.split_once('=') {
            Some((n, v)) => (n.trim(), Some(unquote(v.trim()))),
            None => (attr.trim(), None),
        };
        match (name, value) {
            ("label", Some(v)) => column.label = Some(v),
            ("alias", Some(v)) => column.alias = Some(v),
            ("sort", Some(v)) => {
                column.sort = Some(v.parse().map_err(|_| format!("invalid sort order [{v}]"))?)
            }
            ("reverse", None) => column.reverse = true,
            (other, _) => return Err(format!("unknown column attribute [{other}]")),
        }
    }
    Ok(column)
}

/// Split on `sep` outside of parentheses, brackets and quotes.
pub(crate) fn split_top_level(text: &str, sep: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    for c in text.chars() {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                }
                current.push(c);
                continue;
            }
            None if c == '\'' || c == '"' => {
                quote = Some(c);
                current.push(c);
                continue;
            }
            None => {}
        }
        match c {
            '(' | '[' => depth += 1,
            ')' | ']' => depth -= 1,
            _ => {}
        }
        if c == sep && depth == 0 {
            parts.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    parts.push(current);
    parts
}

fn unquote(text: &str) -> String {
    let t = text.trim();
    if t.len() >= 2
        && ((t.starts_with('"') && t.ends_with('"')) || (t.starts_with('\'') && t.ends_with('\'')))
    {
        t[1..t.len() - 1].to_string()
    } else {
        t.to_string()
    }
}

// =========================================================================
// Format spec
// =========================================================================

/// Printer selected by `--format`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatKind {
    Yaml,
    Json,
    Table,
    Value,
    Csv,
    None,
    /// No output, and resources are handed back to the caller.
    Disable,
}

impl FormatKind {
    pub const NAMES: &'static [&'static str] =
        &["yaml", "json", "table", "value", "csv", "none", "disable"];

    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "yaml" => Self::Yaml,
            "json" => Self::Json,
            "table" => Self::Table,
            "value" => Self::Value,
            "csv" => Self::Csv,
            "none" => Self::None,
            "disable" => Self::Disable,
            _ => return None,
        })
    }
}

/// Parsed `--format` value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatSpec {
    pub kind: FormatKind,
    pub attributes: BTreeMap<String, Option<String>>,
    pub projection: Option<Projection>,
}

impl FormatSpec {
    pub fn parse(text: &str) -> Result<Self> {
        let invalid = |reason: String| Error::invalid_argument("--format", text, reason);
        let text = text.trim();
        let name_end = text.find(['[', '(']).unwrap_or(text.len());
        let name = text[..name_end].trim();
        let kind = FormatKind::parse(name).ok_or_else(|| {
            invalid(format!(
                "unknown format [{name}], expected one of: {}",
                FormatKind::NAMES.join(", ")
            ))
        })?;

        let mut rest = &text[name_end..];
        let mut attributes = BTreeMap::new();
        if rest.starts_with('[') {
            let close = matching_close(rest, '[', ']').ok_or_else(|| invalid("unterminated [".to_string()))?;
            for attr in split_top_level(&rest[1..close], ',') {
                let attr = attr.trim();
                if attr.is_empty() {
                    continue;
                }
                match attr.split_once('=') {
                    Some((k, v)) => attributes.insert(k.trim().to_string(), Some(unquote(v))),
                    None => attributes.insert(attr.to_string(), None),
                };
            }
            rest = &rest[close + 1..];
        }

        let mut projection = None;
        if rest.starts_with('(') {
            let close = matching_close(rest, '(', ')').ok_or_else(|| invalid("unterminated (".to_string()))?;
            projection = Some(Projection::parse(&rest[1..close]).map_err(invalid)?);
            rest = &rest[close + 1..];
        }
        if !rest.trim().is_empty() {
            return Err(invalid(format!("unexpected trailing text [{}]", rest.trim())));
        }
        if kind == FormatKind::Csv {
            if let Some(Some(separator)) = attributes.get("separator") {
                if separator.len() != 1 {
                    return Err(invalid(format!("csv separator [{separator}] must be a single ASCII character")));
                }
            }
        }

        Ok(Self {
            kind,
            attributes,
            projection,
        })
    }

    pub fn no_heading(&self) -> bool {
        self.attributes.contains_key("no-heading")
    }

    pub fn separator(&self) -> Option<&str> {
        self.attributes.get("separator").and_then(|v| v.as_deref())
    }
}

fn matching_close(text: &str, open: char, close: char) -> Option<usize> {
    let mut depth = 0;
    let mut quote: Option<char> = None;
    for (i, c) in text.char_indices() {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }
        if c == '\'' || c == '"' {
            quote = Some(c);
        } else if c == open {
            depth += 1;
        } else if c == close {
            depth -= 1;
            if depth == 0 {
                return Some(i);
            }
        }
    }
    None
}
