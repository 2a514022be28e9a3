// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TableName(String);

impl TableName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TableName {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for TableName {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Real(f64),
    Text(String),
    List(Vec<String>),
}

impl Value {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub fn list<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::List(items.into_iter().map(Into::into).collect())
    }

    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// String form used for display, search, and edit drafts.
    pub fn display(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Bool(value) => value.to_string(),
            Self::Integer(value) => value.to_string(),
            Self::Real(value) => value.to_string(),
            Self::Text(value) => value.clone(),
            Self::List(items) => items.join(","),
        }
    }

    /// Lists compare item-wise; scalars compare by string form so an
    /// untouched `Integer(1)` cell and its `"1"` draft are the same value.
    pub fn same_as(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::List(left), Self::List(right)) => left == right,
            (Self::List(_), _) | (_, Self::List(_)) => false,
            _ => self.display() == other.display(),
        }
    }

    /// Reads a raw scalar draft in the shape of `current`, falling back to
    /// text whenever the draft does not fit that shape losslessly.
    pub fn coerce_like(current: Option<&Self>, raw: &str) -> Self {
        match current {
            Some(Self::Null) if raw.is_empty() => Self::Null,
            Some(Self::Integer(_)) => raw
                .trim()
                .parse::<i64>()
                .map_or_else(|_| Self::text(raw), Self::Integer),
            Some(Self::Real(_)) => raw
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|value| value.is_finite())
                .map_or_else(|| Self::text(raw), Self::Real),
            Some(Self::Bool(_)) => match raw.trim() {
                "true" => Self::Bool(true),
                "false" => Self::Bool(false),
                _ => Self::text(raw),
            },
            _ => Self::text(raw),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display())
    }
}

/// Ordered column → value mapping. The first column is the primary key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    fields: Vec<(String, Value)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: impl Into<String>, value: Value) -> Self {
        self.push(column, value);
        self
    }

    /// Appends a column, or replaces it in place when it already exists.
    pub fn push(&mut self, column: impl Into<String>, value: Value) {
        let column = column.into();
        match self.fields.iter_mut().find(|(name, _)| *name == column) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((column, value)),
        }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    /// Replaces an existing field and returns the previous value. Unknown
    /// columns are left alone.
    pub fn set(&mut self, column: &str, value: Value) -> Option<Value> {
        self.fields
            .iter_mut()
            .find(|(name, _)| name == column)
            .map(|(_, slot)| std::mem::replace(slot, value))
    }

    pub fn primary_key(&self) -> Option<(&str, &Value)> {
        self.fields
            .first()
            .map(|(column, value)| (column.as_str(), value))
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(column, _)| column.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields
            .iter()
            .map(|(column, value)| (column.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, Value)> for Record {
    fn from_iter<T: IntoIterator<Item = (S, Value)>>(iter: T) -> Self {
        let mut record = Self::new();
        for (column, value) in iter {
            record.push(column, value);
        }
        record
    }
}

/// One table's rows plus its declared column order. The columns are
/// known even when there are no rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableRows {
    pub columns: Vec<String>,
    pub records: Vec<Record>,
}

impl TableRows {
    pub fn new(columns: Vec<String>, records: Vec<Record>) -> Self {
        Self { columns, records }
    }
}

/// Columns are taken from the first record.
impl From<Vec<Record>> for TableRows {
    fn from(records: Vec<Record>) -> Self {
        let columns = records
            .first()
            .map(|record| record.columns().map(str::to_owned).collect())
            .unwrap_or_default();
        Self { columns, records }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GridError {
    RemoteFetch { table: TableName, message: String },
    RemoteWrite { table: TableName, message: String },
}

impl GridError {
    pub fn table(&self) -> &TableName {
        match self {
            Self::RemoteFetch { table, .. } | Self::RemoteWrite { table, .. } => table,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::RemoteFetch { message, .. } | Self::RemoteWrite { message, .. } => message,
        }
    }
}

impl fmt::Display for GridError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RemoteFetch { table, message } => write!(f, "load {table} failed: {message}"),
            Self::RemoteWrite { table, message } => {
                write!(f, "write to {table} failed: {message}")
            }
        }
    }
}

impl std::error::Error for GridError {}

#[cfg(test)]
mod tests {
    use super::{GridError, Record, TableName, Value};

    #[test]
    fn display_matches_string_form() {
        assert_eq!(Value::Null.display(), "");
        assert_eq!(Value::Bool(true).display(), "true");
        assert_eq!(Value::Integer(-3).display(), "-3");
        assert_eq!(Value::Real(2.5).display(), "2.5");
        assert_eq!(Value::list(["A", "B"]).display(), "A,B");
    }

    #[test]
    fn same_as_compares_scalars_by_string_form() {
        assert!(Value::Integer(1).same_as(&Value::text("1")));
        assert!(!Value::Integer(1).same_as(&Value::text("01")));
        assert!(Value::list(["A"]).same_as(&Value::list(["A"])));
        assert!(!Value::list(["A", "B"]).same_as(&Value::text("A,B")));
    }

    #[test]
    fn coerce_like_keeps_scalar_shape_when_lossless() {
        assert_eq!(
            Value::coerce_like(Some(&Value::Integer(1)), "42"),
            Value::Integer(42)
        );
        assert_eq!(
            Value::coerce_like(Some(&Value::Integer(1)), "forty"),
            Value::text("forty")
        );
        assert_eq!(
            Value::coerce_like(Some(&Value::Real(1.0)), "2.25"),
            Value::Real(2.25)
        );
        assert_eq!(
            Value::coerce_like(Some(&Value::Bool(false)), "true"),
            Value::Bool(true)
        );
        assert_eq!(Value::coerce_like(Some(&Value::Null), ""), Value::Null);
        assert_eq!(Value::coerce_like(None, "x"), Value::text("x"));
    }

    #[test]
    fn record_keeps_declared_order_and_first_key() {
        let record = Record::new()
            .with("user_id", Value::Integer(1))
            .with("status", Value::text("standard"))
            .with("region", Value::text("Europe"));

        assert_eq!(
            record.columns().collect::<Vec<_>>(),
            vec!["user_id", "status", "region"]
        );
        assert_eq!(
            record.primary_key(),
            Some(("user_id", &Value::Integer(1)))
        );
    }

    #[test]
    fn set_replaces_only_existing_columns() {
        let mut record = Record::new().with("status", Value::text("standard"));

        assert_eq!(
            record.set("status", Value::text("plus")),
            Some(Value::text("standard"))
        );
        assert_eq!(record.set("missing", Value::Null), None);
        assert_eq!(record.len(), 1);
    }

    #[test]
    fn grid_error_messages_name_the_table() {
        let error = GridError::RemoteWrite {
            table: TableName::from("users"),
            message: "permission denied".to_owned(),
        };
        assert_eq!(error.to_string(), "write to users failed: permission denied");
        assert_eq!(error.table().as_str(), "users");
    }
}
