//! Argument model
//!
//! Flags and positionals are declared as [`ArgDef`]s. Parsing a raw string
//! into a typed [`ArgValue`] is a pure function of the [`ArgType`]; every
//! failure is an [`Error::InvalidArgument`] that prints as
//! `argument <name>: <reason>`.

use crate::config::Environment;
use crate::error::{Error, Result};
use crate::resource::ResourceRef;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const KIB: u64 = 1024;

/// Byte-size units, largest first.
const BYTE_UNITS: &[(&str, u64)] = &[
    ("PB", KIB * KIB * KIB * KIB * KIB),
    ("TB", KIB * KIB * KIB * KIB),
    ("GB", KIB * KIB * KIB),
    ("MB", KIB * KIB),
    ("KB", KIB),
];

/// Duration units, largest first.
const DURATION_UNITS: &[(char, u64)] = &[('d', 86_400), ('h', 3_600), ('m', 60), ('s', 1)];

// =========================================================================
// Types and values
// =========================================================================

/// Value type of an argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgType {
    String,
    Int { min: Option<i64>, max: Option<i64> },
    /// Presence flag; as a positional, `true/false/yes/no/1/0/on/off`.
    Bool,
    Choice(Vec<String>),
    /// `1h30m`, `90s` or plain seconds.
    Duration,
    /// `10GB`, `512MB`, `1KiB` or plain bytes. Units are binary.
    ByteSize,
    /// `k1=v1,k2=v2`; later keys replace earlier ones. `\,`, `\=` and `\\`
    /// escape the separators.
    KeyValueList,
    /// Items split on the delimiter; `\<delimiter>` and `\\` escape it.
    List(char),
    /// `N` or `N-M`.
    Range,
    /// Path with `~` and `$VAR` expanded.
    FilePath,
}

/// A parsed argument value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgValue {
    String(String),
    Int(i64),
    Bool(bool),
    Duration(Duration),
    Bytes(u64),
    KeyValues(Vec<(String, String)>),
    List(Vec<String>),
    Range { start: u64, end: u64 },
    Path(PathBuf),
}

impl ArgType {
    pub fn int() -> Self {
        Self::Int { min: None, max: None }
    }

    pub fn int_at_least(min: i64) -> Self {
        Self::Int {
            min: Some(min),
            max: None,
        }
    }

    pub fn choice<I, S>(choices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Choice(choices.into_iter().map(Into::into).collect())
    }

    /// Parse `raw` for the argument called `name`.
    pub fn parse(&self, name: &str, raw: &str, env: &Environment) -> Result<ArgValue> {
        let invalid = |reason: String| Error::invalid_argument(name, raw, reason);
        match self {
            Self::String => Ok(ArgValue::String(raw.to_string())),
            Self::Int { min, max } => {
                let value: i64 = raw
                    .trim()
                    .parse()
                    .map_err(|_| invalid(format!("invalid integer value: '{raw}'")))?;
                if let Some(min) = min.filter(|&m| value < m) {
                    return Err(invalid(format!(
                        "Value must be greater than or equal to {min}; received: {value}"
                    )));
                }
                if let Some(max) = max.filter(|&m| value > m) {
                    return Err(invalid(format!(
                        "Value must be less than or equal to {max}; received: {value}"
                    )));
                }
                Ok(ArgValue::Int(value))
            }
            Self::Bool => crate::config::properties::parse_bool(raw)
                .map(ArgValue::Bool)
                .ok_or_else(|| invalid(format!("invalid boolean value: '{raw}'"))),
            Self::Choice(choices) => {
                if choices.iter().any(|c| c == raw) {
                    Ok(ArgValue::String(raw.to_string()))
                } else {
                    Err(invalid(format!(
                        "Invalid choice: '{raw}'. Valid choices are [{}].",
                        choices.join(", ")
                    )))
                }
            }
            Self::Duration => parse_duration(raw).map(ArgValue::Duration).map_err(invalid),
            Self::ByteSize => parse_byte_size(raw).map(ArgValue::Bytes).map_err(invalid),
            Self::KeyValueList => parse_key_values(raw).map(ArgValue::KeyValues).map_err(invalid),
            Self::List(delim) => Ok(ArgValue::List(if raw.is_empty() {
                Vec::new()
            } else {
                split_escaped(raw, *delim)
                    .iter()
                    .map(|item| unescape(item, &[*delim]))
                    .collect()
            })),
            Self::Range => parse_range(raw)
                .map(|(start, end)| ArgValue::Range { start, end })
                .map_err(invalid),
            Self::FilePath => Ok(ArgValue::Path(PathBuf::from(expand_path(raw, env)))),
        }
    }

    /// Canonical text of a value; parsing it gives the value back. A list
    /// holding a single empty item has no text of its own and prints like
    /// the empty list.
    pub fn format(&self, value: &ArgValue) -> String {
        match value {
            ArgValue::String(s) => s.clone(),
            ArgValue::Int(i) => i.to_string(),
            ArgValue::Bool(b) => b.to_string(),
            ArgValue::Duration(d) => format_duration(*d),
            ArgValue::Bytes(b) => format_byte_size(*b),
            ArgValue::KeyValues(pairs) => pairs
                .iter()
                .map(|(k, v)| format!("{}={}", escape(k, &[',', '=']), escape(v, &[','])))
                .collect::<Vec<_>>()
                .join(","),
            ArgValue::List(items) => {
                let delim = match self {
                    Self::List(d) => *d,
                    _ => ',',
                };
                items
                    .iter()
                    .map(|item| escape(item, &[delim]))
                    .collect::<Vec<_>>()
                    .join(&delim.to_string())
            }
            ArgValue::Range { start, end } if start == end => start.to_string(),
            ArgValue::Range { start, end } => format!("{start}-{end}"),
            ArgValue::Path(p) => p.display().to_string(),
        }
    }

    /// Choices offered by completion.
    pub fn choices(&self) -> Option<&[String]> {
        match self {
            Self::Choice(c) => Some(c),
            _ => None,
        }
    }
}

pub fn parse_duration(raw: &str) -> std::result::Result<Duration, String> {
    let text = raw.trim().to_lowercase();
    if text.is_empty() {
        return Err("empty duration".to_string());
    }
    if let Ok(seconds) = text.parse::<u64>() {
        return Ok(Duration::from_secs(seconds));
    }
    let mut total = 0u64;
    let mut digits = String::new();
    for c in text.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let scale = DURATION_UNITS
            .iter()
            .find(|(unit, _)| *unit == c)
            .map(|(_, scale)| *scale)
            .ok_or_else(|| format!("Failed to parse duration: {raw}"))?;
        let amount: u64 = digits
            .parse()
            .map_err(|_| format!("Failed to parse duration: {raw}"))?;
        total = amount
            .checked_mul(scale)
            .and_then(|v| total.checked_add(v))
            .ok_or_else(|| format!("Duration too large: {raw}"))?;
        digits.clear();
    }
    if !digits.is_empty() {
        return Err(format!("Failed to parse duration: {raw}"));
    }
    Ok(Duration::from_secs(total))
}

pub fn format_duration(duration: Duration) -> String {
    let mut remaining = duration.as_secs();
    if remaining == 0 {
        return "0s".to_string();
    }
    let mut out = String::new();
    for (unit, scale) in DURATION_UNITS {
        let amount = remaining / scale;
        if amount > 0 {
            out.push_str(&format!("{amount}{unit}"));
            remaining -= amount * scale;
        }
    }
    out
}

pub fn parse_byte_size(raw: &str) -> std::result::Result<u64, String> {
    let text = raw.trim();
    let split = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    let (digits, unit) = text.split_at(split);
    let amount: u64 = digits
        .parse()
        .map_err(|_| format!("Failed to parse binary size: {raw}. Expected an integer with an optional unit such as 10GB."))?;
    let unit = unit.trim().to_uppercase().replace("IB", "B");
    let scale = match unit.as_str() {
        "" | "B" => 1,
        other => {
            let normalized = if other.ends_with('B') {
                other.to_string()
            } else {
                format!("{other}B")
            };
            BYTE_UNITS
                .iter()
                .find(|(name, _)| *name == normalized)
                .map(|(_, scale)| *scale)
                .ok_or_else(|| format!("Failed to parse binary size: {raw}. Unknown unit [{other}]."))?
        }
    };
    amount
        .checked_mul(scale)
        .ok_or_else(|| format!("Binary size too large: {raw}"))
}

pub fn format_byte_size(bytes: u64) -> String {
    for (unit, scale) in BYTE_UNITS {
        if bytes >= *scale && bytes % scale == 0 {
            return format!("{}{unit}", bytes / scale);
        }
    }
    format!("{bytes}B")
}

/// Split on `delim` where it is not preceded by an escaping backslash.
/// Escapes are kept in the pieces.
fn split_escaped(raw: &str, delim: char) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut escaped = false;
    for (i, c) in raw.char_indices() {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == delim {
            pieces.push(&raw[start..i]);
            start = i + c.len_utf8();
        }
    }
    pieces.push(&raw[start..]);
    pieces
}

/// Drop the backslash in front of `\\` and the `special` characters. Any
/// other backslash is literal.
fn unescape(piece: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(piece.len());
    let mut chars = piece.chars().peekable();
    while let Some(c) = chars.next() {
        match chars.peek() {
            Some(&next) if c == '\\' && (next == '\\' || special.contains(&next)) => {
                out.push(next);
                chars.next();
            }
            _ => out.push(c),
        }
    }
    out
}

fn escape(text: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if c == '\\' || special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn parse_key_values(raw: &str) -> std::result::Result<Vec<(String, String)>, String> {
    let mut pairs: Vec<(String, String)> = Vec::new();
    if raw.is_empty() {
        return Ok(pairs);
    }
    for item in split_escaped(raw, ',') {
        let (key, value) = match split_escaped(item, '=').split_first() {
            Some((key, rest)) if !rest.is_empty() => (
                unescape(key, &[',', '=']),
                unescape(&item[key.len() + 1..], &[',']),
            ),
            _ => return Err(format!("Bad syntax for dict arg: [{item}]. Expected KEY=VALUE.")),
        };
        if key.is_empty() {
            return Err(format!("Bad syntax for dict arg: [{item}]. Key is empty."));
        }
        match pairs.iter_mut().find(|(k, _)| *k == key) {
            Some(existing) => existing.1 = value,
            None => pairs.push((key, value)),
        }
    }
    Ok(pairs)
}

fn parse_range(raw: &str) -> std::result::Result<(u64, u64), String> {
    let bad = || format!("Expected a non-negative integer N or a range N-M, received [{raw}].");
    let (start, end) = match raw.split_once('-') {
        Some((a, b)) => (a.trim().parse().map_err(|_| bad())?, b.trim().parse().map_err(|_| bad())?),
        None => {
            let n = raw.trim().parse().map_err(|_| bad())?;
            (n, n)
        }
    };
    if start > end {
        return Err(format!("Range end must not be less than its start, received [{raw}]."));
    }
    Ok((start, end))
}

/// Expand `~` and `$VAR` / `${VAR}` against `env`; unknown variables stay as written.
pub fn expand_path(raw: &str, env: &Environment) -> String {
    shellexpand::full_with_context_no_errors(
        raw,
        || {
            env.get("HOME")
                .map(str::to_string)
                .or_else(|| dirs::home_dir().map(|p| p.to_string_lossy().into_owned()))
        },
        |var| env.get(var).map(str::to_string),
    )
    .into_owned()
}

// =========================================================================
// Definitions
// =========================================================================

/// Completion source for an argument.
pub trait Completer: Send + Sync {
    /// Candidates starting with `prefix`, given the arguments parsed so far.
    fn complete(&self, prefix: &str, parsed: &Namespace) -> Vec<String>;
}

impl<F> Completer for F
where
    F: Fn(&str, &Namespace) -> Vec<String> + Send + Sync,
{
    fn complete(&self, prefix: &str, parsed: &Namespace) -> Vec<String> {
        self(prefix, parsed)
    }
}

/// Declaration of a flag (`--name`) or positional (`NAME`).
#[derive(Clone)]
pub struct ArgDef {
    /// `--zone` for flags, `INSTANCE` for positionals.
    pub name: String,
    /// Namespace key.
    pub dest: String,
    pub kind: ArgType,
    pub help: String,
    /// Raw default, parsed like user input.
    pub default: Option<String>,
    pub required: bool,
    /// Repeated flags accumulate; repeated positionals take one or more values.
    pub repeated: bool,
    pub mutex_group: Option<String>,
    pub hidden: bool,
    pub short: Option<char>,
    pub metavar: Option<String>,
    pub completer: Option<Arc<dyn Completer>>,
}

impl fmt::Debug for ArgDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArgDef")
            .field("name", &self.name)
            .field("dest", &self.dest)
            .field("kind", &self.kind)
            .field("required", &self.required)
            .field("repeated", &self.repeated)
            .finish()
    }
}

fn dest_of(name: &str) -> String {
    name.trim_start_matches('-').to_lowercase().replace('-', "_")
}

impl ArgDef {
    fn new(name: String) -> Self {
        Self {
            dest: dest_of(&name),
            name,
            kind: ArgType::String,
            help: String::new(),
            default: None,
            required: false,
            repeated: false,
            mutex_group: None,
            hidden: false,
            short: None,
            metavar: None,
            completer: None,
        }
    }

    /// A `--flag`.
    pub fn flag(name: &str) -> Self {
        let long = if name.starts_with("--") {
            name.to_string()
        } else {
            format!("--{name}")
        };
        Self::new(long)
    }

    /// A positional.
    pub fn positional(name: &str) -> Self {
        let mut def = Self::new(name.to_uppercase());
        def.required = true;
        def
    }

    pub fn is_flag(&self) -> bool {
        self.name.starts_with("--")
    }

    /// Long name without dashes.
    pub fn long(&self) -> &str {
        self.name.trim_start_matches('-')
    }

    pub fn dest(mut self, dest: &str) -> Self {
        self.dest = dest.to_string();
        self
    }

    pub fn kind(mut self, kind: ArgType) -> Self {
        self.kind = kind;
        self
    }

    /// Presence flag.
    pub fn switch(self) -> Self {
        self.kind(ArgType::Bool)
    }

    pub fn help(mut self, help: &str) -> Self {
        self.help = help.to_string();
        self
    }

    pub fn default_value(mut self, value: &str) -> Self {
        self.default = Some(value.to_string());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn repeated(mut self) -> Self {
        self.repeated = true;
        self
    }

    pub fn mutex(mut self, group: &str) -> Self {
        self.mutex_group = Some(group.to_string());
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn short(mut self, short: char) -> Self {
        self.short = Some(short);
        self
    }

    pub fn metavar(mut self, metavar: &str) -> Self {
        self.metavar = Some(metavar.to_string());
        self
    }

    pub fn completer(mut self, completer: impl Completer + 'static) -> Self {
        self.completer = Some(Arc::new(completer));
        self
    }
}

/// Declaration of a resource argument: a positional parsed into a
/// [`ResourceRef`] of `collection`, plus flags that bind template
/// parameters (`--zone` -> `zone`).
#[derive(Debug, Clone)]
pub struct ResourceArgSpec {
    pub collection: String,
    pub positional: ArgDef,
    /// Template parameter -> flag that can set it.
    pub attributes: Vec<(String, ArgDef)>,
}

impl ResourceArgSpec {
    pub fn new(collection: &str, positional: ArgDef) -> Self {
        Self {
            collection: collection.to_string(),
            positional,
            attributes: Vec::new(),
        }
    }

    /// Bind `param` to a `--flag` of the same name.
    pub fn attribute(mut self, param: &str, help: &str) -> Self {
        let flag = ArgDef::flag(param).help(help);
        self.attributes.push((param.to_string(), flag));
        self
    }

    /// Bind `param` to a differently named flag.
    pub fn attribute_flag(mut self, param: &str, flag: ArgDef) -> Self {
        self.attributes.push((param.to_string(), flag));
        self
    }

    /// Every argument this spec contributes.
    pub fn arg_defs(&self) -> Vec<ArgDef> {
        let mut defs = vec![self.positional.clone()];
        defs.extend(self.attributes.iter().map(|(_, flag)| flag.clone()));
        defs
    }
}

// =========================================================================
// Namespace
// =========================================================================

/// Parsed arguments of one invocation, keyed by destination.
#[derive(Debug, Clone, Default)]
pub struct Namespace {
    values: HashMap<String, Vec<ArgValue>>,
    specified: std::collections::HashSet<String>,
    resources: HashMap<String, Vec<ResourceRef>>,
}

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record values given on the command line.
    pub fn set(&mut self, dest: &str, values: Vec<ArgValue>) {
        self.specified.insert(dest.to_string());
        self.values.insert(dest.to_string(), values);
    }

    /// Record a default.
    pub fn set_default(&mut self, dest: &str, value: ArgValue) {
        self.values.entry(dest.to_string()).or_insert_with(|| vec![value]);
    }

    pub fn set_resources(&mut self, dest: &str, refs: Vec<ResourceRef>) {
        self.resources.insert(dest.to_string(), refs);
    }

    /// Whether the user gave the argument (defaults do not count).
    pub fn is_specified(&self, dest: &str) -> bool {
        self.specified.contains(dest)
    }

    pub fn get(&self, dest: &str) -> Option<&ArgValue> {
        self.values.get(dest).and_then(|v| v.first())
    }

    /// Every value of a repeated argument, in command-line order.
    pub fn get_all(&self, dest: &str) -> &[ArgValue] {
        self.values.get(dest).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn get_str(&self, dest: &str) -> Option<&str> {
        match self.get(dest)? {
            ArgValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Every string value of a repeated argument.
    pub fn get_strings(&self, dest: &str) -> Vec<String> {
        self.get_all(dest)
            .iter()
            .filter_map(|v| match v {
                ArgValue::String(s) => Some(s.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn get_bool(&self, dest: &str) -> bool {
        matches!(self.get(dest), Some(ArgValue::Bool(true)))
    }

    pub fn get_int(&self, dest: &str) -> Option<i64> {
        match self.get(dest)? {
            ArgValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn get_duration(&self, dest: &str) -> Option<Duration> {
        match self.get(dest)? {
            ArgValue::Duration(d) => Some(*d),
            _ => None,
        }
    }

    pub fn get_path(&self, dest: &str) -> Option<&PathBuf> {
        match self.get(dest)? {
            ArgValue::Path(p) => Some(p),
            _ => None,
        }
    }

    pub fn get_list(&self, dest: &str) -> Vec<String> {
        match self.get(dest) {
            Some(ArgValue::List(items)) => items.clone(),
            _ => Vec::new(),
        }
    }

    /// The single resource parsed for `dest`.
    pub fn resource(&self, dest: &str) -> Result<&ResourceRef> {
        self.resources
            .get(dest)
            .and_then(|refs| refs.first())
            .ok_or_else(|| Error::Internal(format!("resource argument [{dest}] was not parsed")))
    }

    /// Every resource parsed for a repeated resource positional.
    pub fn resources(&self, dest: &str) -> &[ResourceRef] {
        self.resources.get(dest).map(Vec::as_slice).unwrap_or_default()
    }
}
