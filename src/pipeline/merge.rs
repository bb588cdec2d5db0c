use indexmap::IndexMap;
use serde_json::Value;

use super::table::Row;

/// A provider's normalized record: column suffix → cell, namespaced by prefix.
///
/// Adapters build one of these per found title; [`merge`] lays it over the
/// base row as `<prefix>_<name>` columns.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderColumns {
    prefix: &'static str,
    cells: IndexMap<String, Value>,
}

impl ProviderColumns {
    pub fn new(prefix: &'static str) -> Self {
        Self {
            prefix,
            cells: IndexMap::new(),
        }
    }

    pub fn prefix(&self) -> &'static str {
        self.prefix
    }

    /// Set `<prefix>_<name>`. Later calls for the same name overwrite earlier ones.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> &mut Self {
        self.cells.insert(self.column(name), value.into());
        self
    }

    /// Set a list-valued column from display names, preserving order.
    pub fn set_list<I, S>(&mut self, name: &str, items: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let list: Vec<Value> = items.into_iter().map(|s| Value::String(s.into())).collect();
        self.cells.insert(self.column(name), Value::Array(list));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.cells.get(&self.column(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.cells.iter()
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    fn column(&self, name: &str) -> String {
        format!("{}_{}", self.prefix, name)
    }
}

/// What a stage writes for a title its provider does not know.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbsentPolicy {
    /// Keep the base row as-is; provider columns stay absent.
    PassThrough,
    /// Set `column` to `value` so the title is recorded as looked-up-and-missing.
    Sentinel {
        column: &'static str,
        value: &'static str,
    },
}

impl AbsentPolicy {
    pub fn apply(self, base: &Row) -> Row {
        match self {
            AbsentPolicy::PassThrough => base.clone(),
            AbsentPolicy::Sentinel { column, value } => {
                let mut row = base.clone();
                row.insert(column.to_string(), Value::from(value));
                row
            }
        }
    }
}

/// Copy `base` and overlay the fetched provider columns. Existing columns are
/// never removed; `None` returns the base row unchanged.
pub fn merge(base: &Row, fetched: Option<&ProviderColumns>) -> Row {
    let mut row = base.clone();
    if let Some(cols) = fetched {
        for (column, value) in cols.iter() {
            row.insert(column.clone(), value.clone());
        }
    }
    row
}
