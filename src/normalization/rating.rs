use std::collections::HashMap;

use serde_json::Value;

/// Maps a rating source label (as sent by the provider) to the column suffix it
/// is stored under.
#[derive(Debug, Clone)]
pub struct RatingAlias {
    pub column: &'static str,
}

impl RatingAlias {
    pub const fn new(column: &'static str) -> Self {
        Self { column }
    }
}

/// Label-driven demultiplexer for heterogeneous rating lists like OMDb's
/// `Ratings: [{"Source": "...", "Value": "..."}]`.
///
/// Labels are matched case-insensitively with spaces folded to underscores.
/// Sources without a registered alias are dropped.
#[derive(Debug, Default, Clone)]
pub struct RatingDemux {
    aliases: HashMap<String, RatingAlias>,
}

impl RatingDemux {
    /// Build a demultiplexer seeded with the three sources OMDb reports.
    pub fn with_defaults() -> Self {
        Self::default()
            .register("Internet Movie Database", RatingAlias::new("rating_imdb"))
            .register(
                "Rotten Tomatoes",
                RatingAlias::new("rating_rotten_tomatoes"),
            )
            .register("Metacritic", RatingAlias::new("rating_metacritic"))
    }

    /// Register or override an alias for a source label.
    pub fn register(mut self, source_label: impl AsRef<str>, alias: RatingAlias) -> Self {
        self.aliases.insert(label_key(source_label.as_ref()), alias);
        self
    }

    /// Column suffix for a source label, if the label is known.
    pub fn column_for(&self, source_label: &str) -> Option<&'static str> {
        self.aliases.get(&label_key(source_label)).map(|a| a.column)
    }

    /// Split a `[{Source, Value}]` array into `(column, value)` pairs in input order.
    /// Entries with an unknown source or no value are skipped.
    pub fn demux(&self, ratings: &Value) -> Vec<(&'static str, String)> {
        let Some(arr) = ratings.as_array() else {
            return Vec::new();
        };
        arr.iter()
            .filter_map(|entry| {
                let source = entry.get("Source").and_then(|v| v.as_str())?;
                let value = entry.get("Value").and_then(|v| v.as_str())?;
                let column = self.column_for(source)?;
                Some((column, value.to_string()))
            })
            .collect()
    }
}

fn label_key(label: &str) -> String {
    label.trim().to_ascii_lowercase().replace(' ', "_")
}
