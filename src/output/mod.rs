//! Output pipeline
//!
//! Every command result goes through the same steps before it reaches
//! the terminal: `--filter`, `--sort-by`, `--limit`, then either `--uri`
//! or the `--format` printer.
//!
//! # Module Structure
//!
//! - [`projection`] - Keys, transforms, projections and `--format` specs
//! - [`filter`] - The `--filter` expression language
//! - [`printer`] - yaml, json, table, value, csv, none and disable printers

pub mod filter;
pub mod printer;
pub mod projection;

pub use filter::Filter;
pub use projection::{FormatKind, FormatSpec, Key, Projection};

use crate::console::Console;
use crate::error::{Error, Result};
use futures::stream::{BoxStream, StreamExt};
use serde_json::Value;
use std::cmp::Ordering;

/// Format used for single resources when the command names none.
pub const DEFAULT_SINGLE_FORMAT: &str = "yaml";

/// Everything the pipeline needs from the command line.
#[derive(Debug, Clone)]
pub struct OutputOptions {
    pub format: FormatSpec,
    pub filter: Option<Filter>,
    /// Sort keys with a descending flag, most significant first.
    pub sort_by: Vec<(Key, bool)>,
    pub limit: Option<usize>,
    pub uri: bool,
}

impl OutputOptions {
    /// Build options from raw flag values; `default_format` applies when
    /// `--format` is absent.
    pub fn new(
        format: Option<&str>,
        default_format: &str,
        filter: Option<&str>,
        sort_by: &[String],
        limit: Option<usize>,
        uri: bool,
    ) -> Result<Self> {
        let format = FormatSpec::parse(format.unwrap_or(default_format))?;
        let filter = filter
            .filter(|f| !f.trim().is_empty())
            .map(|f| Filter::parse(f, format.projection.as_ref()))
            .transpose()?;

        let mut keys = Vec::new();
        for raw in sort_by.iter().flat_map(|s| s.split(',')) {
            let raw = raw.trim();
            if raw.is_empty() {
                continue;
            }
            let (name, descending) = match raw.strip_prefix('~') {
                Some(rest) => (rest, true),
                None => (raw, false),
            };
            let key = match format.projection.as_ref().and_then(|p| p.alias(name)) {
                Some(key) => key.clone(),
                None => Key::parse(name).map_err(|reason| Error::invalid_argument("--sort-by", raw, reason))?,
            };
            keys.push((key, descending));
        }
        if keys.is_empty() {
            if let Some(projection) = &format.projection {
                keys = projection.sort_keys();
            }
        }

        Ok(Self {
            format,
            filter,
            sort_by: keys,
            limit,
            uri,
        })
    }

    /// Options for a plain single-resource print.
    pub fn single(format: Option<&str>) -> Result<Self> {
        Self::new(format, DEFAULT_SINGLE_FORMAT, None, &[], None, false)
    }

    /// Limit that may be pushed down to the server. Only valid when no
    /// client-side step can drop or reorder items before the limit applies.
    pub fn server_limit(&self) -> Option<usize> {
        if self.filter.is_none() && self.sort_by.is_empty() {
            self.limit
        } else {
            None
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.format.kind == FormatKind::Disable
    }
}

/// Ordering used by `--sort-by`: missing values first, numbers numerically,
/// everything else by text.
pub fn compare_values(a: &Option<Value>, b: &Option<Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => match (a, b) {
            (Value::Number(x), Value::Number(y)) => x
                .as_f64()
                .partial_cmp(&y.as_f64())
                .unwrap_or(Ordering::Equal),
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Less,
            (_, Value::Null) => Ordering::Greater,
            _ => projection::scalar_text(a).cmp(&projection::scalar_text(b)),
        },
    }
}

/// Stable sort by `keys`.
pub fn sort_items(items: &mut [Value], keys: &[(Key, bool)]) {
    if keys.is_empty() {
        return;
    }
    items.sort_by(|x, y| {
        for (key, descending) in keys {
            let ordering = compare_values(&key.resolve(x), &key.resolve(y));
            let ordering = if *descending { ordering.reverse() } else { ordering };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

/// Drive a result stream through the pipeline. Items are printed as they
/// arrive unless sorting forces buffering. With `--format=disable` nothing
/// is printed and the surviving items are returned.
pub async fn print_stream(
    mut stream: BoxStream<'_, Result<Value>>,
    options: &OutputOptions,
    console: &Console,
) -> Result<Vec<Value>> {
    let mut sink = Sink::new(options, console, false);

    if options.sort_by.is_empty() {
        let mut emitted = 0usize;
        while options.limit.map_or(true, |limit| emitted < limit) {
            let Some(item) = stream.next().await else {
                break;
            };
            let item = item?;
            if options.filter.as_ref().map_or(true, |f| f.matches(&item)) {
                sink.add(item)?;
                emitted += 1;
            }
        }
    } else {
        let mut items = Vec::new();
        while let Some(item) = stream.next().await {
            let item = item?;
            if options.filter.as_ref().map_or(true, |f| f.matches(&item)) {
                items.push(item);
            }
        }
        sort_items(&mut items, &options.sort_by);
        if let Some(limit) = options.limit {
            items.truncate(limit);
        }
        for item in items {
            sink.add(item)?;
        }
    }
    sink.finish()
}

/// Print one resource.
pub fn print_single(item: &Value, options: &OutputOptions, console: &Console) -> Result<()> {
    let mut sink = Sink::new(options, console, true);
    sink.add(item.clone())?;
    sink.finish().map(|_| ())
}

/// Final stage: `--uri`, a printer, or collection for `disable`.
struct Sink<'a> {
    options: &'a OutputOptions,
    console: &'a Console,
    printer: Box<dyn printer::Printer>,
    collected: Vec<Value>,
    missing_uri: usize,
}

impl<'a> Sink<'a> {
    fn new(options: &'a OutputOptions, console: &'a Console, single: bool) -> Self {
        Self {
            options,
            console,
            printer: printer::printer_for(&options.format, console, single),
            collected: Vec::new(),
            missing_uri: 0,
        }
    }

    fn add(&mut self, item: Value) -> Result<()> {
        if self.options.is_disabled() {
            self.collected.push(item);
            return Ok(());
        }
        if self.options.uri {
            return match printer::self_link(&item) {
                Some(link) => self.console.out_line(&link),
                None => {
                    self.missing_uri += 1;
                    Ok(())
                }
            };
        }
        self.printer.add(&item)
    }

    fn finish(mut self) -> Result<Vec<Value>> {
        if self.missing_uri > 0 {
            self.console.warn(&format!(
                "{} item(s) have no URI and were skipped.",
                self.missing_uri
            ))?;
        }
        if !self.options.uri {
            self.printer.finish()?;
        }
        Ok(self.collected)
    }
}
