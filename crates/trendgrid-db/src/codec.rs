// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result};
use rusqlite::types::{Value as SqlValue, ValueRef};
use trendgrid_app::Value;

/// Declared type for string-array columns. Contains `TEXT`, so SQLite gives
/// it text affinity; the payload is a JSON array.
pub const LIST_COLUMN_TYPE: &str = "TEXT_ARRAY";
pub const BOOL_COLUMN_TYPE: &str = "BOOLEAN";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Plain,
    List,
    Bool,
}

impl ColumnKind {
    pub fn from_declared_type(declared: &str) -> Self {
        let declared = declared.trim();
        if declared.eq_ignore_ascii_case(LIST_COLUMN_TYPE) {
            Self::List
        } else if declared.eq_ignore_ascii_case(BOOL_COLUMN_TYPE) {
            Self::Bool
        } else {
            Self::Plain
        }
    }
}

pub fn value_from_sql(kind: ColumnKind, raw: ValueRef<'_>) -> Result<Value> {
    Ok(match (kind, raw) {
        (_, ValueRef::Null) => Value::Null,
        (ColumnKind::List, ValueRef::Text(bytes)) => {
            let text = String::from_utf8_lossy(bytes);
            if text.trim().is_empty() {
                Value::List(Vec::new())
            } else {
                let items: Vec<String> = serde_json::from_str(&text)
                    .with_context(|| format!("decode list column value {text:?}"))?;
                Value::List(items)
            }
        }
        (ColumnKind::Bool, ValueRef::Integer(value)) => Value::Bool(value != 0),
        (_, ValueRef::Integer(value)) => Value::Integer(value),
        (_, ValueRef::Real(value)) => Value::Real(value),
        (_, ValueRef::Text(bytes)) => Value::Text(String::from_utf8_lossy(bytes).into_owned()),
        (_, ValueRef::Blob(bytes)) => Value::Text(format!("<{} bytes>", bytes.len())),
    })
}

pub fn value_to_sql(kind: ColumnKind, value: &Value) -> Result<SqlValue> {
    Ok(match (kind, value) {
        (_, Value::Null) => SqlValue::Null,
        (_, Value::Bool(flag)) => SqlValue::Integer(i64::from(*flag)),
        (_, Value::Integer(number)) => SqlValue::Integer(*number),
        (_, Value::Real(number)) => SqlValue::Real(*number),
        (ColumnKind::List, Value::Text(text)) => {
            let items = trendgrid_app::split_list(text);
            SqlValue::Text(serde_json::to_string(&items).context("encode list column value")?)
        }
        (ColumnKind::Bool, Value::Text(text)) => match text.trim() {
            "true" | "1" => SqlValue::Integer(1),
            "false" | "0" => SqlValue::Integer(0),
            _ => SqlValue::Text(text.clone()),
        },
        (_, Value::Text(text)) => SqlValue::Text(text.clone()),
        (_, Value::List(items)) => {
            SqlValue::Text(serde_json::to_string(items).context("encode list column value")?)
        }
    })
}
