//! Loader for the raw IMDb watchlist export.
//!
//! The export's header names vary between IMDb versions, so columns are taken
//! by position and renamed. Cleaning is limited to typing: dates, numbers and
//! the two comma-joined list columns.

use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use serde_json::Value;
use tracing::info;

use crate::normalization::numeric::{number_cell, parse_number};
use crate::pipeline::table::{Row, Table};

pub const WATCHLIST_COLUMNS: [&str; 18] = [
    "position",
    "const",
    "created",
    "modified",
    "description",
    "title",
    "original_title",
    "url",
    "title_type",
    "imdb_rating",
    "runtime_mins",
    "year",
    "genres",
    "num_votes",
    "release_date",
    "directors",
    "your_rating",
    "date_rated",
];

const DATE_COLUMNS: [&str; 4] = ["created", "modified", "release_date", "date_rated"];
const NUMERIC_COLUMNS: [&str; 6] = [
    "position",
    "imdb_rating",
    "runtime_mins",
    "year",
    "num_votes",
    "your_rating",
];
const LIST_COLUMNS: [&str; 2] = ["genres", "directors"];

pub fn load_watchlist(path: &Path) -> Result<Table> {
    info!(path = %path.display(), "loading watchlist");
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("opening watchlist {}", path.display()))?;

    let header_len = rdr
        .headers()
        .with_context(|| format!("reading watchlist header {}", path.display()))?
        .len();
    if header_len != WATCHLIST_COLUMNS.len() {
        bail!(
            "watchlist {} has {} columns, expected {}",
            path.display(),
            header_len,
            WATCHLIST_COLUMNS.len()
        );
    }

    let mut table = Table::with_columns(WATCHLIST_COLUMNS.iter().map(|c| c.to_string()));
    for (idx, record) in rdr.records().enumerate() {
        let record = record
            .with_context(|| format!("reading watchlist row {} of {}", idx + 1, path.display()))?;
        if record.len() != WATCHLIST_COLUMNS.len() {
            bail!(
                "watchlist row {} has {} fields, expected {}",
                idx + 1,
                record.len(),
                WATCHLIST_COLUMNS.len()
            );
        }
        let row: Row = WATCHLIST_COLUMNS
            .iter()
            .zip(record.iter())
            .map(|(column, raw)| (column.to_string(), clean_cell(column, raw)))
            .collect();
        table.push(row);
    }

    let description_empty = table
        .rows()
        .iter()
        .all(|r| r.get("description").map_or(true, Value::is_null));
    if description_empty {
        table.remove_column("description");
    }

    info!(items = table.len(), "watchlist loaded");
    Ok(table)
}

fn clean_cell(column: &str, raw: &str) -> Value {
    let s = raw.trim();
    if DATE_COLUMNS.contains(&column) {
        return parse_date(s).map_or(Value::Null, |d| Value::String(d.to_string()));
    }
    if NUMERIC_COLUMNS.contains(&column) {
        return number_cell(parse_number(Some(s)));
    }
    if LIST_COLUMNS.contains(&column) {
        let items: Vec<Value> = s
            .split(", ")
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(|item| Value::String(item.to_string()))
            .collect();
        return Value::Array(items);
    }
    if s.is_empty() {
        Value::Null
    } else {
        Value::String(s.to_string())
    }
}

/// `YYYY-MM-DD`, also accepting a trailing time part.
fn parse_date(s: &str) -> Option<NaiveDate> {
    let day = s.get(..10).unwrap_or(s);
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}
