// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::Result;

use crate::{Record, RequestId, TableName, TableRows, Value};

/// Row-level CRUD the grid needs from a durable store.
pub trait RemoteStore {
    fn fetch_all(&mut self, table: &TableName) -> Result<Vec<Record>>;

    /// Declared column order, primary key first. Must work for a table
    /// with no rows.
    fn columns(&mut self, table: &TableName) -> Result<Vec<String>>;

    fn update_field(
        &mut self,
        table: &TableName,
        primary_key_column: &str,
        primary_key: &Value,
        column: &str,
        value: &Value,
    ) -> Result<()>;

    fn insert(&mut self, table: &TableName, record: &Record) -> Result<()>;
}

impl<S: RemoteStore + ?Sized> RemoteStore for Box<S> {
    fn fetch_all(&mut self, table: &TableName) -> Result<Vec<Record>> {
        (**self).fetch_all(table)
    }

    fn columns(&mut self, table: &TableName) -> Result<Vec<String>> {
        (**self).columns(table)
    }

    fn update_field(
        &mut self,
        table: &TableName,
        primary_key_column: &str,
        primary_key: &Value,
        column: &str,
        value: &Value,
    ) -> Result<()> {
        (**self).update_field(table, primary_key_column, primary_key, column, value)
    }

    fn insert(&mut self, table: &TableName, record: &Record) -> Result<()> {
        (**self).insert(table, record)
    }
}

/// Fetches every row of `table` together with its declared columns.
pub fn fetch_table<S: RemoteStore + ?Sized>(
    store: &mut S,
    table: &TableName,
) -> Result<TableRows> {
    let records = store.fetch_all(table)?;
    let columns = store.columns(table)?;
    if columns.is_empty() {
        return Ok(TableRows::from(records));
    }
    Ok(TableRows::new(columns, records))
}

/// A remote call the grid wants made. Runtimes execute these in any way
/// they like and feed the matching [`RemoteCompletion`] back.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteRequest {
    FetchAll {
        id: RequestId,
        table: TableName,
    },
    UpdateField {
        id: RequestId,
        table: TableName,
        primary_key_column: String,
        primary_key: Value,
        column: String,
        value: Value,
    },
    Insert {
        id: RequestId,
        table: TableName,
        record: Record,
    },
}

impl RemoteRequest {
    pub fn id(&self) -> RequestId {
        match self {
            Self::FetchAll { id, .. } | Self::UpdateField { id, .. } | Self::Insert { id, .. } => {
                *id
            }
        }
    }

    pub fn table(&self) -> &TableName {
        match self {
            Self::FetchAll { table, .. }
            | Self::UpdateField { table, .. }
            | Self::Insert { table, .. } => table,
        }
    }

    pub fn execute<S: RemoteStore + ?Sized>(&self, store: &mut S) -> RemoteCompletion {
        let reply = match self {
            Self::FetchAll { table, .. } => {
                RemoteReply::Fetched(fetch_table(store, table).map_err(|error| format!("{error:#}")))
            }
            Self::UpdateField {
                table,
                primary_key_column,
                primary_key,
                column,
                value,
                ..
            } => RemoteReply::Updated(
                store
                    .update_field(table, primary_key_column, primary_key, column, value)
                    .map_err(|error| format!("{error:#}")),
            ),
            Self::Insert { table, record, .. } => RemoteReply::Inserted(
                store
                    .insert(table, record)
                    .map_err(|error| format!("{error:#}")),
            ),
        };
        RemoteCompletion {
            id: self.id(),
            reply,
        }
    }

    /// Completion reporting that the request never reached the store.
    pub fn failed(&self, message: impl Into<String>) -> RemoteCompletion {
        let message = message.into();
        let reply = match self {
            Self::FetchAll { .. } => RemoteReply::Fetched(Err(message)),
            Self::UpdateField { .. } => RemoteReply::Updated(Err(message)),
            Self::Insert { .. } => RemoteReply::Inserted(Err(message)),
        };
        RemoteCompletion {
            id: self.id(),
            reply,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteCompletion {
    pub id: RequestId,
    pub reply: RemoteReply,
}

/// Errors are carried as rendered messages; the grid passes them through
/// without interpreting them.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteReply {
    Fetched(std::result::Result<TableRows, String>),
    Updated(std::result::Result<(), String>),
    Inserted(std::result::Result<(), String>),
}
