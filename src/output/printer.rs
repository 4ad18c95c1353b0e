//! Resource printers
//!
//! Each printer receives items one at a time and writes to the console as
//! soon as it can. Only `table` buffers, since column widths depend on
//! every row.

use super::projection::{scalar_text, FormatKind, FormatSpec, Key, Projection};
use crate::console::Console;
use crate::error::{Error, Result};
use serde_json::{Map, Value};

/// Sink for formatted items.
pub trait Printer: Send {
    fn add(&mut self, item: &Value) -> Result<()>;

    /// Flush anything buffered. Called once after the last item.
    fn finish(&mut self) -> Result<()>;
}

/// Build the printer for `spec`. `single` selects the single-resource
/// layout of `json`/`yaml` (no list wrapper, no document separators).
pub fn printer_for(spec: &FormatSpec, console: &Console, single: bool) -> Box<dyn Printer> {
    let console = console.clone();
    let projection = spec.projection.clone();
    match spec.kind {
        FormatKind::Yaml => Box::new(YamlPrinter {
            console,
            projection,
            count: 0,
        }),
        FormatKind::Json => Box::new(JsonPrinter {
            console,
            projection,
            single,
            count: 0,
        }),
        FormatKind::Table => Box::new(TablePrinter {
            console,
            projection,
            no_heading: spec.no_heading(),
            rows: Vec::new(),
        }),
        FormatKind::Value => Box::new(ValuePrinter {
            console,
            projection,
            separator: spec.separator().unwrap_or("\t").to_string(),
        }),
        FormatKind::Csv => {
            let delimiter = spec.separator().and_then(|s| s.bytes().next()).unwrap_or(b',');
            let mut builder = csv::WriterBuilder::new();
            builder.delimiter(delimiter).terminator(csv::Terminator::CRLF);
            Box::new(CsvPrinter {
                console,
                projection,
                builder,
                heading: !spec.no_heading(),
                count: 0,
            })
        }
        FormatKind::None | FormatKind::Disable => Box::new(NullPrinter),
    }
}

/// Recursively sort object keys.
pub fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), sort_keys(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

fn shaped(item: &Value, projection: &Option<Projection>) -> Value {
    match projection {
        Some(p) => p.apply(item),
        None => sort_keys(item),
    }
}

/// Columns taken from the scalar top-level fields of the first item.
fn implicit_projection(item: &Value) -> Projection {
    let keys = item
        .as_object()
        .map(|m| {
            m.iter()
                .filter(|(_, v)| !v.is_object())
                .map(|(k, _)| k.clone())
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    let spec = keys.join(",");
    Projection::parse(&spec).unwrap_or_default()
}

fn cell(value: &Option<Value>, list_separator: &str) -> String {
    match value {
        None => String::new(),
        Some(Value::Array(items)) => items
            .iter()
            .map(scalar_text)
            .collect::<Vec<_>>()
            .join(list_separator),
        Some(other) => scalar_text(other),
    }
}

// =========================================================================
// yaml
// =========================================================================

struct YamlPrinter {
    console: Console,
    projection: Option<Projection>,
    count: usize,
}

impl Printer for YamlPrinter {
    fn add(&mut self, item: &Value) -> Result<()> {
        let text = serde_yaml::to_string(&shaped(item, &self.projection))
            .map_err(|e| Error::Internal(format!("Failed to render YAML: {e}")))?;
        if self.count > 0 {
            self.console.write_out("---\n")?;
        }
        self.count += 1;
        self.console.write_out(&text)
    }

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

// =========================================================================
// json
// =========================================================================

struct JsonPrinter {
    console: Console,
    projection: Option<Projection>,
    single: bool,
    count: usize,
}

impl Printer for JsonPrinter {
    fn add(&mut self, item: &Value) -> Result<()> {
        let text = serde_json::to_string_pretty(&shaped(item, &self.projection))
            .map_err(|e| Error::Internal(format!("Failed to render JSON: {e}")))?;
        if self.single {
            self.count += 1;
            return self.console.write_out(&format!("{text}\n"));
        }
        let indented = text
            .lines()
            .map(|line| format!("  {line}"))
            .collect::<Vec<_>>()
            .join("\n");
        let prefix = if self.count == 0 { "[\n" } else { ",\n" };
        self.count += 1;
        self.console.write_out(&format!("{prefix}{indented}"))
    }

    fn finish(&mut self) -> Result<()> {
        match (self.single, self.count) {
            (true, _) => Ok(()),
            (false, 0) => self.console.write_out("[]\n"),
            (false, _) => self.console.write_out("\n]\n"),
        }
    }
}

// =========================================================================
// table
// =========================================================================

struct TablePrinter {
    console: Console,
    projection: Option<Projection>,
    no_heading: bool,
    rows: Vec<Vec<String>>,
}

impl Printer for TablePrinter {
    fn add(&mut self, item: &Value) -> Result<()> {
        let projection = self
            .projection
            .get_or_insert_with(|| implicit_projection(item));
        self.rows
            .push(projection.row(item).iter().map(|v| cell(v, ",")).collect());
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        let Some(projection) = &self.projection else {
            return Ok(());
        };
        if self.rows.is_empty() {
            return Ok(());
        }
        let mut lines: Vec<Vec<String>> = Vec::with_capacity(self.rows.len() + 1);
        if !self.no_heading {
            lines.push(projection.columns.iter().map(|c| c.heading()).collect());
        }
        lines.append(&mut self.rows);

        let columns = lines.iter().map(Vec::len).max().unwrap_or(0);
        let widths: Vec<usize> = (0..columns)
            .map(|i| {
                lines
                    .iter()
                    .filter_map(|row| row.get(i))
                    .map(|c| c.chars().count())
                    .max()
                    .unwrap_or(0)
            })
            .collect();

        let mut out = String::new();
        for row in &lines {
            let mut line = String::new();
            for (i, value) in row.iter().enumerate() {
                if i + 1 == row.len() {
                    line.push_str(value);
                } else {
                    line.push_str(&format!("{:<width$}  ", value, width = widths[i]));
                }
            }
            out.push_str(line.trim_end());
            out.push('\n');
        }
        self.console.write_out(&out)
    }
}

// =========================================================================
// value / csv
// =========================================================================

struct ValuePrinter {
    console: Console,
    projection: Option<Projection>,
    separator: String,
}

impl Printer for ValuePrinter {
    fn add(&mut self, item: &Value) -> Result<()> {
        let projection = self.projection.get_or_insert_with(|| implicit_projection(item));
        let fields: Vec<String> = projection.row(item).iter().map(|v| cell(v, ";")).collect();
        self.console.write_out(&format!("{}\n", fields.join(&self.separator)))
    }

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// RFC 4180 records with CRLF terminators.
struct CsvPrinter {
    console: Console,
    projection: Option<Projection>,
    builder: csv::WriterBuilder,
    heading: bool,
    count: usize,
}

impl CsvPrinter {
    fn records(&self, records: &[Vec<String>]) -> Result<String> {
        let failed = |e: String| Error::Internal(format!("Failed to write csv record: {e}"));
        let mut writer = self.builder.from_writer(Vec::new());
        for record in records {
            writer.write_record(record).map_err(|e| failed(e.to_string()))?;
        }
        let bytes = writer.into_inner().map_err(|e| failed(e.to_string()))?;
        String::from_utf8(bytes).map_err(|e| failed(e.to_string()))
    }
}

impl Printer for CsvPrinter {
    fn add(&mut self, item: &Value) -> Result<()> {
        let projection = self.projection.get_or_insert_with(|| implicit_projection(item));
        let mut records: Vec<Vec<String>> = Vec::with_capacity(2);
        if self.count == 0 && self.heading {
            records.push(projection.columns.iter().map(|c| c.heading()).collect());
        }
        records.push(projection.row(item).iter().map(|v| cell(v, ";")).collect());
        self.count += 1;
        let text = self.records(&records)?;
        self.console.write_out(&text)
    }

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

struct NullPrinter;

impl Printer for NullPrinter {
    fn add(&mut self, _item: &Value) -> Result<()> {
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Self-link of an item, used by `--uri`.
pub fn self_link(item: &Value) -> Option<String> {
    Key::parse("selfLink")
        .ok()
        .and_then(|k| k.resolve(item))
        .and_then(|v| v.as_str().map(str::to_string))
}
