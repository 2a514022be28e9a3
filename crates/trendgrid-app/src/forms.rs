// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Result, bail};
use std::collections::BTreeMap;

use crate::{GridSchema, Record, TableName};

/// Typed-in values for a row that does not exist yet. Keys with empty
/// values are dropped, so an untouched form is empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewRowDraft {
    table: Option<TableName>,
    fields: BTreeMap<String, String>,
}

impl NewRowDraft {
    pub fn for_table(table: TableName) -> Self {
        Self {
            table: Some(table),
            fields: BTreeMap::new(),
        }
    }

    pub fn table(&self) -> Option<&TableName> {
        self.table.as_ref()
    }

    pub fn set(&mut self, column: impl Into<String>, value: impl Into<String>) {
        let column = column.into();
        let value = value.into();
        if value.is_empty() {
            self.fields.remove(&column);
        } else {
            self.fields.insert(column, value);
        }
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields.get(column).map(String::as_str)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields
            .iter()
            .map(|(column, value)| (column.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn clear(&mut self) {
        self.fields.clear();
    }

    pub fn validate(&self) -> Result<()> {
        if self.table.is_none() {
            bail!("no table selected -- pick a table before adding a row");
        }
        if self.is_empty() {
            bail!("new row is empty -- fill in at least one field and retry");
        }
        Ok(())
    }

    /// Builds the record to insert, parsing each field the way a committed
    /// edit of that column would be parsed.
    pub fn to_record(&self, schema: &GridSchema) -> Result<Record> {
        self.validate()?;
        let Some(table) = &self.table else {
            bail!("no table selected -- pick a table before adding a row");
        };

        let mut record = Record::new();
        for (column, raw) in &self.fields {
            let descriptor = schema.resolve(table, column);
            if !descriptor.is_editable() {
                bail!("{column} is assigned by the store -- leave it blank");
            }
            record.push(column.clone(), descriptor.parse_draft(raw, None));
        }
        Ok(record)
    }
}
