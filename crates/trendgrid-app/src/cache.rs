// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use std::collections::BTreeMap;

use crate::{GridError, Record, RemoteStore, TableName, TableRows, Value, fetch_table};

/// In-memory rows per table. A table with no entry is "unset": never
/// loaded, evicted, or its last load failed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordCache {
    tables: BTreeMap<TableName, TableRows>,
}

impl RecordCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetches every row of `table` and replaces the cached copy. On failure
    /// the table is left unset rather than holding stale rows.
    pub fn load<S: RemoteStore + ?Sized>(
        &mut self,
        store: &mut S,
        table: &TableName,
    ) -> Result<&[Record], GridError> {
        let fetched = fetch_table(store, table).map_err(|error| format!("{error:#}"));
        self.settle_fetch(table, fetched)?;
        Ok(self.records(table).unwrap_or_default())
    }

    /// Stores the outcome of a fetch-all and returns the row count. A failed
    /// fetch unsets the table.
    pub fn settle_fetch(
        &mut self,
        table: &TableName,
        fetched: Result<TableRows, String>,
    ) -> Result<usize, GridError> {
        match fetched {
            Ok(rows) => {
                let count = rows.records.len();
                self.replace(table.clone(), rows);
                Ok(count)
            }
            Err(message) => {
                self.unset(table);
                Err(GridError::RemoteFetch {
                    table: table.clone(),
                    message,
                })
            }
        }
    }

    pub fn replace(&mut self, table: TableName, rows: impl Into<TableRows>) {
        self.tables.insert(table, rows.into());
    }

    pub fn unset(&mut self, table: &TableName) {
        self.tables.remove(table);
    }

    /// Evicts every table except `keep`.
    pub fn retain_only(&mut self, keep: &TableName) {
        self.tables.retain(|table, _| table == keep);
    }

    pub fn is_loaded(&self, table: &TableName) -> bool {
        self.tables.contains_key(table)
    }

    pub fn records(&self, table: &TableName) -> Option<&[Record]> {
        self.tables.get(table).map(|rows| rows.records.as_slice())
    }

    pub fn record(&self, table: &TableName, row: usize) -> Option<&Record> {
        self.tables.get(table)?.records.get(row)
    }

    /// Declared column order of the table, or the first row's when the
    /// store declared none.
    pub fn columns(&self, table: &TableName) -> Vec<String> {
        let Some(rows) = self.tables.get(table) else {
            return Vec::new();
        };
        if !rows.columns.is_empty() {
            return rows.columns.clone();
        }
        rows.records
            .first()
            .map(|record| record.columns().map(str::to_owned).collect())
            .unwrap_or_default()
    }

    /// Replaces one field and returns the previous value. Returns `None`
    /// when the table, row, or column does not exist.
    pub fn apply(
        &mut self,
        table: &TableName,
        row: usize,
        column: &str,
        value: Value,
    ) -> Option<Value> {
        self.tables
            .get_mut(table)?
            .records
            .get_mut(row)?
            .set(column, value)
    }

    pub fn insert(&mut self, table: &TableName, record: Record) {
        let rows = self.tables.entry(table.clone()).or_default();
        if rows.columns.is_empty() {
            rows.columns = record.columns().map(str::to_owned).collect();
        }
        rows.records.push(record);
    }

    /// Row index of the record whose primary key matches. Rows can move
    /// between a write and its reply (reload, insert), so writes locate
    /// their row through this rather than a stored index.
    pub fn position_of(
        &self,
        table: &TableName,
        primary_key_column: &str,
        primary_key: &Value,
    ) -> Option<usize> {
        self.tables.get(table)?.records.iter().position(|record| {
            record
                .get(primary_key_column)
                .is_some_and(|value| value.same_as(primary_key))
        })
    }
}
