// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::{TableName, Value};

pub const LIST_DELIMITER: char = ',';

pub const REGIONS: [&str; 6] = [
    "North America",
    "Europe",
    "Asia Pacific",
    "Latin America",
    "Middle East",
    "Africa",
];

pub const BUSINESS_SECTORS: [&str; 8] = [
    "IT & Technology",
    "Food & Beverage",
    "Retail",
    "Healthcare",
    "Education",
    "Manufacturing",
    "Services",
    "Eco & Sustainability",
];

pub const TRANSITION_GOALS: [&str; 5] = [
    "Expand to new markets",
    "Go eco-friendly",
    "Automate processes",
    "Digital transformation",
    "Diversify product line",
];

pub const EXPERIENCE_LEVELS: [&str; 3] = ["Beginner", "Intermediate", "Advanced"];
pub const USER_STATUSES: [&str; 3] = ["standard", "plus", "admin"];
pub const SUBMISSION_STATUSES: [&str; 3] = ["pending", "approved", "rejected"];

pub const DEFAULT_TABLES: [&str; 4] = ["users", "ideas", "user_ideas_submissions", "trendingideas"];
pub const DEFAULT_LOCKED_COLUMNS: [&str; 5] =
    ["id", "user_id", "submission_id", "idea_id", "created_at"];

/// Edit semantics of one (table, column) pair. Option lists borrow from the
/// schema, so repeated lookups hand back the same slices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldDescriptor<'a> {
    Locked,
    FreeText,
    SingleChoice(&'a [String]),
    MultiChoice(&'a [String]),
}

impl<'a> FieldDescriptor<'a> {
    pub const fn is_editable(self) -> bool {
        !matches!(self, Self::Locked)
    }

    pub const fn options(self) -> &'a [String] {
        match self {
            Self::SingleChoice(options) | Self::MultiChoice(options) => options,
            Self::Locked | Self::FreeText => &[],
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Locked => "locked",
            Self::FreeText => "text",
            Self::SingleChoice(_) => "choice",
            Self::MultiChoice(_) => "tags",
        }
    }

    /// Draft text shown when an edit opens on `value`.
    pub fn format_draft(self, value: &Value) -> String {
        value.display()
    }

    /// Turns a committed draft back into a cell value. Multi-choice drafts
    /// are split on the delimiter; everything else keeps the raw text,
    /// shaped like the current value when that is lossless.
    pub fn parse_draft(self, raw: &str, current: Option<&Value>) -> Value {
        match self {
            Self::MultiChoice(_) => Value::List(split_list(raw)),
            Self::Locked | Self::FreeText | Self::SingleChoice(_) => {
                Value::coerce_like(current, raw)
            }
        }
    }

    /// Next single-choice option after `draft`, wrapping in either direction.
    pub fn cycle_option(self, draft: &str, delta: isize) -> Option<String> {
        let Self::SingleChoice(options) = self else {
            return None;
        };
        if options.is_empty() {
            return None;
        }

        let len = options.len() as isize;
        let next = match options.iter().position(|option| option == draft) {
            Some(index) => (index as isize + delta).rem_euclid(len),
            None if delta < 0 => len - 1,
            None => 0,
        };
        Some(options[next as usize].clone())
    }
}

pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(LIST_DELIMITER)
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_owned)
        .collect()
}

pub fn join_list(items: &[String]) -> String {
    items.join(&LIST_DELIMITER.to_string())
}

/// Adds `item` to a delimited draft, or removes it when already present.
pub fn toggle_list_item(draft: &str, item: &str) -> String {
    let mut items = split_list(draft);
    match items.iter().position(|existing| existing == item) {
        Some(index) => {
            items.remove(index);
        }
        None => items.push(item.to_owned()),
    }
    join_list(&items)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceRole {
    pub column: String,
    /// When set, the role applies to this table only.
    #[serde(default)]
    pub table: Option<TableName>,
    pub options: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiChoiceField {
    pub table: TableName,
    pub column: String,
    pub options: Vec<String>,
}

/// Caller-supplied grid configuration: manageable tables, locked columns,
/// single-choice roles, and the one multi-choice field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridSchema {
    pub tables: Vec<TableName>,
    pub locked_columns: Vec<String>,
    #[serde(default)]
    pub choices: Vec<ChoiceRole>,
    #[serde(default)]
    pub multi_choice: Option<MultiChoiceField>,
}

impl Default for GridSchema {
    fn default() -> Self {
        Self::business_trends()
    }
}

impl GridSchema {
    pub fn business_trends() -> Self {
        Self {
            tables: DEFAULT_TABLES.into_iter().map(TableName::from).collect(),
            locked_columns: owned(&DEFAULT_LOCKED_COLUMNS),
            choices: vec![
                role("region", None, &REGIONS),
                role("business_sector", None, &BUSINESS_SECTORS),
                role("transition_goal", None, &TRANSITION_GOALS),
                role("experience_lvl", None, &EXPERIENCE_LEVELS),
                role("status", Some("users"), &USER_STATUSES),
                role(
                    "status",
                    Some("user_ideas_submissions"),
                    &SUBMISSION_STATUSES,
                ),
            ],
            multi_choice: Some(MultiChoiceField {
                table: TableName::from("user_ideas_submissions"),
                column: "tags".to_owned(),
                options: owned(&BUSINESS_SECTORS),
            }),
        }
    }

    pub fn resolve(&self, table: &TableName, column: &str) -> FieldDescriptor<'_> {
        if self.locked_columns.iter().any(|locked| locked == column) {
            return FieldDescriptor::Locked;
        }

        if let Some(multi) = &self.multi_choice
            && multi.table == *table
            && multi.column == column
        {
            return FieldDescriptor::MultiChoice(&multi.options);
        }

        let scoped = self.choices.iter().find(|role| {
            role.column == column && role.table.as_ref().is_some_and(|scope| scope == table)
        });
        let unscoped = || {
            self.choices
                .iter()
                .find(|role| role.column == column && role.table.is_none())
        };
        match scoped.or_else(unscoped) {
            Some(role) => FieldDescriptor::SingleChoice(&role.options),
            None => FieldDescriptor::FreeText,
        }
    }

    pub fn manages(&self, table: &TableName) -> bool {
        self.tables.contains(table)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tables.is_empty() {
            bail!("grid needs at least one table -- list tables under [grid].tables");
        }

        let mut seen = BTreeSet::new();
        for table in &self.tables {
            if !is_plain_identifier(table.as_str()) {
                bail!("table name {:?} must use only letters, digits, and '_'", table.as_str());
            }
            if !seen.insert(table) {
                bail!("table {table} is listed twice");
            }
        }

        for role in &self.choices {
            if role.options.is_empty() {
                bail!("choice column {} has no options", role.column);
            }
            if let Some(table) = &role.table
                && !self.manages(table)
            {
                bail!(
                    "choice column {} is scoped to {table}, which is not a managed table",
                    role.column
                );
            }
        }

        if let Some(multi) = &self.multi_choice {
            if !self.manages(&multi.table) {
                bail!(
                    "multi-choice field {}.{} names an unmanaged table",
                    multi.table,
                    multi.column
                );
            }
            if self.locked_columns.contains(&multi.column) {
                bail!(
                    "multi-choice field {}.{} is also a locked column",
                    multi.table,
                    multi.column
                );
            }
        }

        Ok(())
    }
}

pub fn is_plain_identifier(identifier: &str) -> bool {
    !identifier.is_empty()
        && identifier
            .bytes()
            .all(|byte| byte.is_ascii_alphanumeric() || byte == b'_')
}

fn role(column: &str, table: Option<&str>, options: &[&str]) -> ChoiceRole {
    ChoiceRole {
        column: column.to_owned(),
        table: table.map(TableName::from),
        options: owned(options),
    }
}

fn owned(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| (*value).to_owned()).collect()
}

#[cfg(test)]
mod tests {
    use super::{
        FieldDescriptor, GridSchema, USER_STATUSES, split_list, toggle_list_item,
    };
    use crate::{TableName, Value};

    fn users() -> TableName {
        TableName::from("users")
    }

    fn submissions() -> TableName {
        TableName::from("user_ideas_submissions")
    }

    #[test]
    fn locked_columns_win_on_every_table() {
        let schema = GridSchema::business_trends();
        for table in &schema.tables {
            assert_eq!(schema.resolve(table, "user_id"), FieldDescriptor::Locked);
            assert_eq!(schema.resolve(table, "created_at"), FieldDescriptor::Locked);
        }
    }

    #[test]
    fn status_options_depend_on_table() {
        let schema = GridSchema::business_trends();

        let user_status = schema.resolve(&users(), "status");
        let submission_status = schema.resolve(&submissions(), "status");

        assert_eq!(user_status.options(), USER_STATUSES.map(str::to_owned));
        assert_eq!(
            submission_status.options(),
            ["pending", "approved", "rejected"].map(str::to_owned)
        );
        assert_eq!(
            schema.resolve(&TableName::from("ideas"), "status"),
            FieldDescriptor::FreeText
        );
    }

    #[test]
    fn tags_are_multi_choice_only_on_submissions() {
        let schema = GridSchema::business_trends();

        assert!(matches!(
            schema.resolve(&submissions(), "tags"),
            FieldDescriptor::MultiChoice(_)
        ));
        assert_eq!(
            schema.resolve(&TableName::from("ideas"), "tags"),
            FieldDescriptor::FreeText
        );
    }

    #[test]
    fn unscoped_roles_apply_to_any_table() {
        let schema = GridSchema::business_trends();
        assert!(matches!(
            schema.resolve(&TableName::from("ideas"), "region"),
            FieldDescriptor::SingleChoice(_)
        ));
    }

    #[test]
    fn resolve_is_stable_across_calls() {
        let schema = GridSchema::business_trends();
        let first = schema.resolve(&users(), "region");
        let second = schema.resolve(&users(), "region");
        assert_eq!(first, second);
        assert!(std::ptr::eq(first.options(), second.options()));
    }

    #[test]
    fn multi_choice_draft_parses_into_list() {
        let schema = GridSchema::business_trends();
        let descriptor = schema.resolve(&submissions(), "tags");

        assert_eq!(
            descriptor.parse_draft("A,B,C", None),
            Value::list(["A", "B", "C"])
        );
        assert_eq!(
            descriptor.parse_draft(" A , ,B ", None),
            Value::list(["A", "B"])
        );
    }

    #[test]
    fn cycle_option_wraps_both_ways() {
        let schema = GridSchema::business_trends();
        let descriptor = schema.resolve(&users(), "status");

        assert_eq!(descriptor.cycle_option("admin", 1).as_deref(), Some("standard"));
        assert_eq!(descriptor.cycle_option("standard", -1).as_deref(), Some("admin"));
        assert_eq!(descriptor.cycle_option("unknown", 1).as_deref(), Some("standard"));
        assert_eq!(FieldDescriptor::FreeText.cycle_option("x", 1), None);
    }

    #[test]
    fn toggle_list_item_adds_and_removes() {
        assert_eq!(toggle_list_item("Retail", "Services"), "Retail,Services");
        assert_eq!(toggle_list_item("Retail,Services", "Retail"), "Services");
        assert_eq!(split_list(""), Vec::<String>::new());
    }

    #[test]
    fn validate_rejects_bad_configuration() {
        let mut schema = GridSchema::business_trends();
        assert!(schema.validate().is_ok());

        schema.tables.push(TableName::from("users"));
        assert!(schema.validate().is_err());

        let mut schema = GridSchema::business_trends();
        schema.tables = vec![TableName::from("users; drop")];
        let error = schema.validate().expect_err("unsafe name should fail");
        assert!(error.to_string().contains("letters, digits"));

        let mut schema = GridSchema::business_trends();
        schema.tables.retain(|table| table.as_str() != "user_ideas_submissions");
        assert!(schema.validate().is_err());
    }
}
