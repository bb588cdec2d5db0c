//! CSV-backed table with dynamic columns.
//!
//! Every stage output is one of these: a header row followed by one row per
//! title, keyed by the IMDb id in [`ID_COLUMN`]. Cells are JSON values so that
//! list-valued columns (genres, cast, ...) survive a round trip through CSV as
//! JSON arrays. Reading never reinterprets text: a cell is typed only when it
//! would be written back byte for byte.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde_json::{Number, Value};

/// Join key shared by every stage.
pub const ID_COLUMN: &str = "const";

pub type Row = IndexMap<String, Value>;

#[derive(Debug, Clone, Default)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Row>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rows(rows: impl IntoIterator<Item = Row>) -> Self {
        let mut table = Self::new();
        for row in rows {
            table.push(row);
        }
        table
    }

    /// Build an empty table that still carries a header.
    pub fn with_columns(columns: impl IntoIterator<Item = String>) -> Self {
        Self {
            columns: columns.into_iter().collect(),
            rows: Vec::new(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn push(&mut self, row: Row) {
        for key in row.keys() {
            if !self.has_column(key) {
                self.columns.push(key.clone());
            }
        }
        self.rows.push(row);
    }

    /// Drop a column from the header and every row.
    pub fn remove_column(&mut self, name: &str) {
        self.columns.retain(|c| c != name);
        for row in &mut self.rows {
            row.shift_remove(name);
        }
    }

    /// Identifiers in row order, normalized to strings. Rows without an id are skipped.
    pub fn ids(&self) -> Vec<String> {
        self.rows.iter().filter_map(row_id).collect()
    }

    pub fn read_csv(path: &Path) -> Result<Self> {
        let mut rdr = csv::Reader::from_path(path)
            .with_context(|| format!("opening {}", path.display()))?;
        let headers: Vec<String> = rdr
            .headers()
            .with_context(|| format!("reading header of {}", path.display()))?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        let mut table = Table::with_columns(headers.clone());
        for (idx, record) in rdr.records().enumerate() {
            let record =
                record.with_context(|| format!("reading row {} of {}", idx + 1, path.display()))?;
            let row: Row = headers
                .iter()
                .zip(record.iter())
                .map(|(h, raw)| (h.clone(), parse_cell(raw)))
                .collect();
            table.rows.push(row);
        }
        Ok(table)
    }

    /// Write the table to `path` by way of a sibling temp file, so the previous
    /// snapshot stays in place until the new one is complete.
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
        }

        let temp_path = temp_path_for(path);
        {
            let mut wtr = csv::Writer::from_path(&temp_path)
                .with_context(|| format!("creating {}", temp_path.display()))?;
            wtr.write_record(&self.columns)?;
            for row in &self.rows {
                wtr.write_record(
                    self.columns
                        .iter()
                        .map(|c| row.get(c).map(render_cell).unwrap_or_default()),
                )?;
            }
            let file = wtr
                .into_inner()
                .map_err(|e| anyhow::anyhow!("flushing {}: {}", temp_path.display(), e))?;
            file.sync_all()
                .with_context(|| format!("syncing {}", temp_path.display()))?;
        }
        fs::rename(&temp_path, path)
            .with_context(|| format!("replacing {}", path.display()))?;
        Ok(())
    }
}

pub(crate) fn temp_path_for(path: &Path) -> PathBuf {
    match path.file_name() {
        Some(name) => path.with_file_name(format!("{}.tmp", name.to_string_lossy())),
        None => path.with_extension("tmp"),
    }
}

/// The row's identifier as a string. Numeric ids (`1.0`, `42`) are rendered
/// without a fractional part so they compare equal to their text form.
pub fn row_id(row: &Row) -> Option<String> {
    match row.get(ID_COLUMN)? {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => Some(match n.as_f64() {
            Some(f) if n.is_f64() && f.fract() == 0.0 => format!("{}", f as i64),
            _ => n.to_string(),
        }),
        _ => None,
    }
}

/// Whether a cell counts as "no value" (absent column or null).
pub fn is_null(cell: Option<&Value>) -> bool {
    match cell {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(_) => false,
    }
}

/// Type a cell only when rendering the typed value gives back the same text,
/// so a read followed by a write never changes a file.
fn parse_cell(raw: &str) -> Value {
    if raw.is_empty() {
        return Value::Null;
    }
    let typed = if raw.starts_with('[') {
        serde_json::from_str::<Value>(raw)
            .ok()
            .filter(Value::is_array)
    } else if let Ok(i) = raw.parse::<i64>() {
        Some(Value::from(i))
    } else if looks_like_float(raw) {
        raw.parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
    } else {
        None
    };
    match typed {
        Some(value) if render_cell(&value) == raw => value,
        _ => Value::String(raw.to_string()),
    }
}

// `f64::from_str` also accepts "inf", "NaN" and "1e5"; titles like those must stay text.
fn looks_like_float(s: &str) -> bool {
    let body = s.strip_prefix('-').unwrap_or(s);
    let mut dots = 0;
    !body.is_empty()
        && body.chars().all(|c| {
            if c == '.' {
                dots += 1;
                true
            } else {
                c.is_ascii_digit()
            }
        })
        && dots == 1
        && body != "."
}

fn render_cell(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}
