use std::collections::HashSet;

use super::table::{is_null, row_id, Table};

/// How a stage decides that a destination row is already done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Present in the destination at all. Used when the destination only ever
    /// receives rows that were attempted.
    Presence,
    /// Present with a non-null value in the marker column.
    Marker { column: &'static str },
}

/// Identifiers from `source` that still need processing, in source row order.
///
/// `ledger` holds ids recorded elsewhere as attempted-and-persisted; they count
/// as done whatever the destination says.
pub fn pending(
    source: &Table,
    dest: &Table,
    completion: Completion,
    ledger: Option<&HashSet<String>>,
) -> Vec<String> {
    let done = done_ids(dest, completion);
    let mut seen = HashSet::new();
    source
        .ids()
        .into_iter()
        .filter(|id| seen.insert(id.clone()))
        .filter(|id| !done.contains(id))
        .filter(|id| ledger.map_or(true, |l| !l.contains(id)))
        .collect()
}

fn done_ids(dest: &Table, completion: Completion) -> HashSet<String> {
    if dest.is_empty() {
        return HashSet::new();
    }
    match completion {
        Completion::Presence => dest.ids().into_iter().collect(),
        Completion::Marker { column } => {
            if !dest.has_column(column) {
                return HashSet::new();
            }
            dest.rows()
                .iter()
                .filter(|row| !is_null(row.get(column)))
                .filter_map(row_id)
                .collect()
        }
    }
}
