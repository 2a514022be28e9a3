// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use serde::{Deserialize, Serialize};

use crate::Record;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub column: String,
    pub text: String,
}

impl SearchQuery {
    pub fn new(column: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            text: text.into(),
        }
    }

    pub fn is_blank(&self) -> bool {
        self.text.is_empty()
    }

    /// Case-insensitive substring match on the string form of the column.
    /// Records without the column never match.
    pub fn matches(&self, record: &Record) -> bool {
        if self.is_blank() {
            return true;
        }
        let needle = self.text.to_lowercase();
        record
            .get(&self.column)
            .is_some_and(|value| value.display().to_lowercase().contains(&needle))
    }
}

/// Visible rows, in cache order.
pub fn view<'a>(records: &'a [Record], query: Option<&SearchQuery>) -> Vec<&'a Record> {
    match query {
        Some(query) if !query.is_blank() => records
            .iter()
            .filter(|record| query.matches(record))
            .collect(),
        _ => records.iter().collect(),
    }
}

/// Cache indices of the visible rows, so a visible row maps back to its
/// source row.
pub fn view_indices(records: &[Record], query: Option<&SearchQuery>) -> Vec<usize> {
    records
        .iter()
        .enumerate()
        .filter(|(_, record)| query.is_none_or(|query| query.matches(record)))
        .map(|(index, _)| index)
        .collect()
}
