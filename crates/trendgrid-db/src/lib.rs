// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

pub mod codec;

use anyhow::{Context, Result, anyhow, bail};
use rusqlite::{Connection, params, params_from_iter};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::debug;
use trendgrid_app::{Record, RemoteStore, TableName, Value, is_plain_identifier};

use crate::codec::{ColumnKind, value_from_sql, value_to_sql};

pub const APP_NAME: &str = "trendgrid";
pub const CREATED_AT_COLUMN: &str = "created_at";

const REQUIRED_SCHEMA: &[(&str, &[&str])] = &[
    (
        "users",
        &[
            "user_id",
            "name",
            "email",
            "status",
            "region",
            "business_sector",
            "transition_goal",
            "experience_lvl",
            "created_at",
        ],
    ),
    (
        "ideas",
        &[
            "id",
            "title",
            "description",
            "business_sector",
            "region",
            "created_at",
        ],
    ),
    (
        "user_ideas_submissions",
        &[
            "submission_id",
            "user_id",
            "title",
            "description",
            "tags",
            "status",
            "created_at",
        ],
    ),
    (
        "trendingideas",
        &["idea_id", "title", "business_sector", "score", "created_at"],
    ),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PragmaColumn {
    pub cid: i32,
    pub name: String,
    pub column_type: String,
    pub not_null: bool,
    pub default_value: Option<String>,
    pub primary_key: i32,
}

impl PragmaColumn {
    pub fn kind(&self) -> ColumnKind {
        ColumnKind::from_declared_type(&self.column_type)
    }
}

/// SQLite-backed remote store. Tables are addressed by name at runtime, so
/// every identifier is checked against the live schema before it reaches
/// SQL text.
pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        let printable = path.to_string_lossy().to_string();
        validate_db_path(&printable)?;
        let conn = Connection::open(path)
            .with_context(|| format!("open database at {}", path.display()))?;
        configure_connection(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory database")?;
        configure_connection(&conn)?;
        Ok(Self { conn })
    }

    pub fn raw_connection(&self) -> &Connection {
        &self.conn
    }

    /// Creates the business-trend tables in an empty database, or checks an
    /// existing one has them.
    pub fn bootstrap(&self) -> Result<()> {
        if has_user_tables(&self.conn)? {
            validate_schema(&self.conn)?;
        } else {
            self.conn
                .execute_batch(include_str!("sql/schema.sql"))
                .context("create schema")?;
        }
        Ok(())
    }

    /// Loads the sample rows used by `--demo`. Only runs against empty
    /// tables.
    pub fn seed_demo_data(&self) -> Result<()> {
        let existing: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
            .context("count users before seeding")?;
        if existing > 0 {
            bail!("database already has users -- demo data only seeds an empty database");
        }
        self.conn
            .execute_batch(include_str!("sql/demo.sql"))
            .context("insert demo rows")
    }

    pub fn table_names(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare(
                "
                SELECT name
                FROM sqlite_master
                WHERE type = 'table'
                  AND name NOT LIKE 'sqlite_%'
                ORDER BY name ASC
                ",
            )
            .context("prepare table names query")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .context("query table names")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("collect table names")
    }

    pub fn table_columns(&self, table: &str) -> Result<Vec<PragmaColumn>> {
        if !is_plain_identifier(table) {
            bail!("invalid table name: {table:?}");
        }

        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info({table})"))
            .with_context(|| format!("inspect columns for {table}"))?;
        let rows = stmt
            .query_map([], |row| {
                let not_null: i32 = row.get(3)?;
                Ok(PragmaColumn {
                    cid: row.get(0)?,
                    name: row.get(1)?,
                    column_type: row.get(2)?,
                    not_null: not_null != 0,
                    default_value: row.get(4)?,
                    primary_key: row.get(5)?,
                })
            })
            .with_context(|| format!("query column info for {table}"))?;
        let columns = rows
            .collect::<rusqlite::Result<Vec<_>>>()
            .with_context(|| format!("collect columns for {table}"))?;
        if columns.is_empty() {
            bail!("relation {table} does not exist");
        }
        Ok(columns)
    }

    pub fn count_rows(&self, table: &str) -> Result<i64> {
        self.table_columns(table)?;
        self.conn
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                row.get(0)
            })
            .with_context(|| format!("count rows in {table}"))
    }
}

impl RemoteStore for Store {
    fn fetch_all(&mut self, table: &TableName) -> Result<Vec<Record>> {
        let columns = self.table_columns(table.as_str())?;
        let order_by = primary_key_column(&columns);
        let select_list = columns
            .iter()
            .map(|column| column.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");

        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {select_list} FROM {table} ORDER BY {order_by} ASC"
            ))
            .with_context(|| format!("prepare fetch of {table}"))?;
        let mut rows = stmt
            .query([])
            .with_context(|| format!("query rows of {table}"))?;

        let mut records = Vec::new();
        while let Some(row) = rows
            .next()
            .with_context(|| format!("scan rows of {table}"))?
        {
            let mut record = Record::new();
            for (index, column) in columns.iter().enumerate() {
                let raw = row
                    .get_ref(index)
                    .with_context(|| format!("read {table}.{}", column.name))?;
                let value = value_from_sql(column.kind(), raw)
                    .with_context(|| format!("decode {table}.{}", column.name))?;
                record.push(column.name.clone(), value);
            }
            records.push(record);
        }
        debug!(%table, rows = records.len(), "fetched table");
        Ok(records)
    }

    fn columns(&mut self, table: &TableName) -> Result<Vec<String>> {
        Ok(self
            .table_columns(table.as_str())?
            .into_iter()
            .map(|column| column.name)
            .collect())
    }

    fn update_field(
        &mut self,
        table: &TableName,
        primary_key_column: &str,
        primary_key: &Value,
        column: &str,
        value: &Value,
    ) -> Result<()> {
        let columns = self.table_columns(table.as_str())?;
        let key = find_column(&columns, table, primary_key_column)?;
        let target = find_column(&columns, table, column)?;

        let bound_value = value_to_sql(target.kind(), value)?;
        let bound_key = value_to_sql(key.kind(), primary_key)?;
        let changed = self
            .conn
            .execute(
                &format!("UPDATE {table} SET {column} = ?1 WHERE {primary_key_column} = ?2"),
                params![bound_value, bound_key],
            )
            .with_context(|| format!("update {table}.{column}"))?;
        if changed == 0 {
            bail!("no {table} row with {primary_key_column} = {primary_key}");
        }
        debug!(%table, column, %primary_key, "updated field");
        Ok(())
    }

    fn insert(&mut self, table: &TableName, record: &Record) -> Result<()> {
        let columns = self.table_columns(table.as_str())?;

        let mut names = Vec::with_capacity(record.len() + 1);
        let mut values = Vec::with_capacity(record.len() + 1);
        for (name, value) in record.iter() {
            let column = find_column(&columns, table, name)?;
            names.push(column.name.clone());
            values.push(value_to_sql(column.kind(), value)?);
        }

        let has_created_at = columns.iter().any(|column| column.name == CREATED_AT_COLUMN);
        if has_created_at && record.get(CREATED_AT_COLUMN).is_none() {
            names.push(CREATED_AT_COLUMN.to_owned());
            values.push(rusqlite::types::Value::Text(now_rfc3339()?));
        }
        if names.is_empty() {
            bail!("insert into {table} needs at least one column");
        }

        let placeholders = (1..=names.len())
            .map(|index| format!("?{index}"))
            .collect::<Vec<_>>()
            .join(", ");
        self.conn
            .execute(
                &format!(
                    "INSERT INTO {table} ({}) VALUES ({placeholders})",
                    names.join(", ")
                ),
                params_from_iter(values),
            )
            .with_context(|| format!("insert into {table}"))?;
        debug!(%table, columns = names.len(), "inserted row");
        Ok(())
    }
}

pub fn default_db_path() -> Result<PathBuf> {
    if let Some(override_path) = env::var_os("TRENDGRID_DB_PATH") {
        return Ok(PathBuf::from(override_path));
    }

    let data_root = dirs::data_local_dir().ok_or_else(|| {
        anyhow!("cannot resolve data directory; set TRENDGRID_DB_PATH to a writable database path")
    })?;

    let app_dir = data_root.join(APP_NAME);
    fs::create_dir_all(&app_dir)
        .with_context(|| format!("create data directory {}", app_dir.display()))?;
    Ok(app_dir.join("trendgrid.db"))
}

pub fn validate_db_path(path: &str) -> Result<()> {
    if path.is_empty() {
        bail!("database path must not be empty");
    }
    if path == ":memory:" {
        return Ok(());
    }

    if let Some(index) = path.find("://")
        && index > 0
    {
        let scheme = &path[..index];
        if scheme.chars().all(char::is_alphabetic) {
            bail!(
                "database path {path:?} looks like a URI ({scheme}://); pass a filesystem path instead"
            );
        }
    }

    if path.starts_with("file:") {
        bail!("database path {path:?} uses file: URI syntax; pass a plain filesystem path");
    }

    if path.contains('?') {
        bail!(
            "database path {path:?} contains '?'; remove query parameters and use a plain file path"
        );
    }

    Ok(())
}

/// The declared primary key, else the first column. The grid keys rows by
/// their first column, so the schema lists keys first.
fn primary_key_column(columns: &[PragmaColumn]) -> &str {
    columns
        .iter()
        .filter(|column| column.primary_key > 0)
        .min_by_key(|column| column.primary_key)
        .or_else(|| columns.first())
        .map_or("rowid", |column| column.name.as_str())
}

fn find_column<'a>(
    columns: &'a [PragmaColumn],
    table: &TableName,
    name: &str,
) -> Result<&'a PragmaColumn> {
    if !is_plain_identifier(name) {
        bail!("invalid column name: {name:?}");
    }
    columns
        .iter()
        .find(|column| column.name == name)
        .ok_or_else(|| anyhow!("column {name} does not exist on {table}"))
}

fn has_user_tables(conn: &Connection) -> Result<bool> {
    let count: i64 = conn
        .query_row(
            "
            SELECT COUNT(*)
            FROM sqlite_master
            WHERE type = 'table'
              AND name NOT LIKE 'sqlite_%'
            ",
            [],
            |row| row.get(0),
        )
        .context("count user tables")?;
    Ok(count > 0)
}

fn validate_schema(conn: &Connection) -> Result<()> {
    for (table, required_columns) in REQUIRED_SCHEMA {
        if !table_exists(conn, table)? {
            bail!(
                "database is missing required table `{table}`; point [storage].db_path at a trendgrid database"
            );
        }

        let columns = column_names(conn, table)?;
        let missing: Vec<&str> = required_columns
            .iter()
            .copied()
            .filter(|column| !columns.iter().any(|existing| existing == column))
            .collect();

        if !missing.is_empty() {
            bail!(
                "table `{table}` is missing required columns: {}; add them before launching",
                missing.join(", ")
            );
        }
    }

    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let exists = conn
        .query_row(
            "
            SELECT EXISTS(
              SELECT 1
              FROM sqlite_master
              WHERE type = 'table' AND name = ?
            )
            ",
            params![table],
            |row| row.get::<_, i64>(0),
        )
        .with_context(|| format!("check table existence for {table}"))?;
    Ok(exists == 1)
}

fn column_names(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({table})"))
        .with_context(|| format!("inspect columns for {table}"))?;
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(1))
        .with_context(|| format!("query column info for {table}"))?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .with_context(|| format!("collect columns for {table}"))
}

fn configure_connection(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        PRAGMA foreign_keys = ON;
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA busy_timeout = 5000;
        ",
    )
    .context("configure sqlite pragmas")
}

fn now_rfc3339() -> Result<String> {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .context("format current timestamp")
}
