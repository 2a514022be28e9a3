// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result, anyhow, bail};
use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use time::format_description::well_known::Rfc3339;
use time::{Date, Duration, Month, OffsetDateTime, Time};
use trendgrid_app::{
    BUSINESS_SECTORS, EXPERIENCE_LEVELS, GridEvent, GridState, REGIONS, Record, RecordCache,
    RemoteStore, SUBMISSION_STATUSES, TRANSITION_GOALS, TableName, TableRows, USER_STATUSES,
    Value,
};

const FIRST_NAMES: [&str; 12] = [
    "Avery", "Jordan", "Taylor", "Riley", "Morgan", "Casey", "Quinn", "Parker", "Kai", "Robin",
    "Hayden", "Rowan",
];
const LAST_NAMES: [&str; 12] = [
    "Walker", "Martin", "Lopez", "Gray", "Young", "Diaz", "Reed", "Turner", "Flores", "Price",
    "Foster", "Brooks",
];

const IDEA_SUBJECTS: [&str; 12] = [
    "refill station",
    "repair cafe",
    "meal kit",
    "tool library",
    "solar kiosk",
    "upcycled furniture",
    "tutoring app",
    "telehealth desk",
    "bike courier",
    "vertical farm",
    "coworking loft",
    "pop-up bakery",
];
const IDEA_ANGLES: [&str; 8] = [
    "Neighborhood",
    "Zero-waste",
    "Subscription",
    "Mobile",
    "Community",
    "Low-cost",
    "Smart",
    "Weekend",
];
const WORDS: [&str; 20] = [
    "local", "demand", "margin", "pilot", "customers", "supply", "growth", "online", "launch",
    "market", "recurring", "partners", "seasonal", "pricing", "delivery", "reuse", "green",
    "small", "shared", "trend",
];

const REFERENCE_YEAR: i32 = 2026;

struct DeterministicRng {
    state: u64,
}

impl DeterministicRng {
    fn new(seed: u64) -> Self {
        let mut state = seed ^ 0x9E37_79B9_7F4A_7C15;
        if state == 0 {
            state = 0xA409_3822_299F_31D0;
        }
        Self { state }
    }

    fn next_u64(&mut self) -> u64 {
        self.state = self
            .state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);

        let mut x = self.state;
        x ^= x >> 13;
        x ^= x << 7;
        x ^= x >> 17;
        x
    }

    fn int_n(&mut self, n: usize) -> usize {
        if n <= 1 {
            return 0;
        }
        (self.next_u64() % (n as u64)) as usize
    }
}

/// Seeded generator of business-trend rows. The same seed always yields the
/// same rows.
pub struct TrendFaker {
    rng: DeterministicRng,
}

impl TrendFaker {
    pub fn new(seed: u64) -> Self {
        let normalized = if seed == 0 { 1 } else { seed };
        Self {
            rng: DeterministicRng::new(normalized),
        }
    }

    pub fn user(&mut self, user_id: i64) -> Record {
        let first = self.pick(&FIRST_NAMES);
        let last = self.pick(&LAST_NAMES);
        Record::new()
            .with("user_id", Value::Integer(user_id))
            .with("name", Value::text(format!("{first} {last}")))
            .with(
                "email",
                Value::text(format!(
                    "{}.{}@example.com",
                    first.to_ascii_lowercase(),
                    last.to_ascii_lowercase()
                )),
            )
            .with("status", Value::text(self.pick(&USER_STATUSES)))
            .with("region", Value::text(self.pick(&REGIONS)))
            .with("business_sector", Value::text(self.pick(&BUSINESS_SECTORS)))
            .with("transition_goal", Value::text(self.pick(&TRANSITION_GOALS)))
            .with("experience_lvl", Value::text(self.pick(&EXPERIENCE_LEVELS)))
            .with("created_at", Value::text(self.created_at()))
    }

    pub fn idea(&mut self, id: i64) -> Record {
        Record::new()
            .with("id", Value::Integer(id))
            .with("title", Value::text(self.title()))
            .with("description", Value::text(self.sentence(6, 12)))
            .with("business_sector", Value::text(self.pick(&BUSINESS_SECTORS)))
            .with("region", Value::text(self.pick(&REGIONS)))
            .with("created_at", Value::text(self.created_at()))
    }

    pub fn submission(&mut self, submission_id: i64, user_id: i64) -> Record {
        let tag_count = 1 + self.rng.int_n(3);
        let mut tags: Vec<&str> = Vec::with_capacity(tag_count);
        while tags.len() < tag_count {
            let tag = self.pick(&BUSINESS_SECTORS);
            if !tags.contains(&tag) {
                tags.push(tag);
            }
        }
        Record::new()
            .with("submission_id", Value::Integer(submission_id))
            .with("user_id", Value::Integer(user_id))
            .with("title", Value::text(self.title()))
            .with("description", Value::text(self.sentence(8, 16)))
            .with("tags", Value::list(tags))
            .with("status", Value::text(self.pick(&SUBMISSION_STATUSES)))
            .with("created_at", Value::text(self.created_at()))
    }

    pub fn trending_idea(&mut self, idea_id: i64) -> Record {
        Record::new()
            .with("idea_id", Value::Integer(idea_id))
            .with("title", Value::text(self.title()))
            .with("business_sector", Value::text(self.pick(&BUSINESS_SECTORS)))
            .with("score", Value::Integer(self.rng.int_n(100) as i64))
            .with("created_at", Value::text(self.created_at()))
    }

    fn title(&mut self) -> String {
        format!("{} {}", self.pick(&IDEA_ANGLES), self.pick(&IDEA_SUBJECTS))
    }

    fn sentence(&mut self, min_words: usize, max_words: usize) -> String {
        let count = min_words + self.rng.int_n(max_words.saturating_sub(min_words) + 1);
        let mut sentence = (0..count)
            .map(|_| self.pick(&WORDS))
            .collect::<Vec<_>>()
            .join(" ");
        if let Some(first) = sentence.get_mut(0..1) {
            first.make_ascii_uppercase();
        }
        sentence.push('.');
        sentence
    }

    fn created_at(&mut self) -> String {
        let start = reference_start();
        let offset = self.rng.int_n(365 * 24 * 60 * 60) as i64;
        (start + Duration::seconds(offset))
            .format(&Rfc3339)
            .unwrap_or_else(|_| fixture_datetime().to_owned())
    }

    fn pick<'a>(&mut self, items: &'a [&'a str]) -> &'a str {
        items[self.rng.int_n(items.len())]
    }
}

/// `count` rows per default table, keyed 1..=count.
pub fn demo_tables(seed: u64, count: i64) -> BTreeMap<TableName, Vec<Record>> {
    let mut faker = TrendFaker::new(seed);
    let mut tables = BTreeMap::new();
    tables.insert(
        TableName::from("users"),
        (1..=count).map(|id| faker.user(id)).collect(),
    );
    tables.insert(
        TableName::from("ideas"),
        (1..=count).map(|id| faker.idea(id)).collect(),
    );
    tables.insert(
        TableName::from("user_ideas_submissions"),
        (1..=count)
            .map(|id| faker.submission(id, 1 + (id * 5) % count.max(1)))
            .collect(),
    );
    tables.insert(
        TableName::from("trendingideas"),
        (1..=count).map(|id| faker.trending_idea(id)).collect(),
    );
    tables
}

/// The `{user_id: 1, status: "standard"}` row used throughout the tests.
pub fn standard_user() -> Record {
    Record::new()
        .with("user_id", Value::Integer(1))
        .with("status", Value::text("standard"))
}

#[derive(Debug, Clone, PartialEq)]
pub enum StoreCall {
    FetchAll(TableName),
    UpdateField {
        table: TableName,
        primary_key_column: String,
        primary_key: Value,
        column: String,
        value: Value,
    },
    Insert {
        table: TableName,
        record: Record,
    },
}

/// In-memory remote store that records every call and fails on demand.
/// Inserts fill a missing integer primary key and `created_at` the way a
/// database default would.
#[derive(Debug, Default)]
pub struct ScriptedStore {
    tables: RecordCache,
    calls: Vec<StoreCall>,
    fetch_failures: VecDeque<String>,
    update_failures: VecDeque<String>,
    insert_failures: VecDeque<String>,
}

impl ScriptedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Columns come from the first record.
    pub fn with_table(mut self, table: &str, records: Vec<Record>) -> Self {
        self.tables.replace(TableName::from(table), records);
        self
    }

    /// A table with declared columns and no rows.
    pub fn with_empty_table(mut self, table: &str, columns: &[&str]) -> Self {
        let columns = columns.iter().map(|column| (*column).to_owned()).collect();
        self.tables
            .replace(TableName::from(table), TableRows::new(columns, Vec::new()));
        self
    }

    pub fn demo(seed: u64) -> Self {
        let mut store = Self::default();
        for (table, records) in demo_tables(seed, 8) {
            store.tables.replace(table, records);
        }
        store
    }

    pub fn fail_next_fetch(&mut self, message: &str) {
        self.fetch_failures.push_back(message.to_owned());
    }

    pub fn fail_next_update(&mut self, message: &str) {
        self.update_failures.push_back(message.to_owned());
    }

    pub fn fail_next_insert(&mut self, message: &str) {
        self.insert_failures.push_back(message.to_owned());
    }

    pub fn calls(&self) -> &[StoreCall] {
        &self.calls
    }

    pub fn updates(&self) -> Vec<&StoreCall> {
        self.calls
            .iter()
            .filter(|call| matches!(call, StoreCall::UpdateField { .. }))
            .collect()
    }

    pub fn writes(&self) -> usize {
        self.calls
            .iter()
            .filter(|call| !matches!(call, StoreCall::FetchAll(_)))
            .count()
    }

    pub fn rows(&self, table: &str) -> &[Record] {
        self.tables
            .records(&TableName::from(table))
            .unwrap_or_default()
    }

    fn ensure_table(&self, table: &TableName) -> Result<()> {
        if !self.tables.is_loaded(table) {
            bail!("relation {table} does not exist");
        }
        Ok(())
    }
}

impl RemoteStore for ScriptedStore {
    fn fetch_all(&mut self, table: &TableName) -> Result<Vec<Record>> {
        self.calls.push(StoreCall::FetchAll(table.clone()));
        if let Some(message) = self.fetch_failures.pop_front() {
            return Err(anyhow!(message));
        }
        self.tables
            .records(table)
            .map(<[Record]>::to_vec)
            .with_context(|| format!("relation {table} does not exist"))
    }

    fn columns(&mut self, table: &TableName) -> Result<Vec<String>> {
        self.ensure_table(table)?;
        Ok(self.tables.columns(table))
    }

    fn update_field(
        &mut self,
        table: &TableName,
        primary_key_column: &str,
        primary_key: &Value,
        column: &str,
        value: &Value,
    ) -> Result<()> {
        self.calls.push(StoreCall::UpdateField {
            table: table.clone(),
            primary_key_column: primary_key_column.to_owned(),
            primary_key: primary_key.clone(),
            column: column.to_owned(),
            value: value.clone(),
        });
        if let Some(message) = self.update_failures.pop_front() {
            return Err(anyhow!(message));
        }

        self.ensure_table(table)?;
        let row = self
            .tables
            .position_of(table, primary_key_column, primary_key)
            .with_context(|| format!("no {table} row with {primary_key_column} = {primary_key}"))?;
        if self.tables.apply(table, row, column, value.clone()).is_none() {
            bail!("column {column} does not exist on {table}");
        }
        Ok(())
    }

    fn insert(&mut self, table: &TableName, record: &Record) -> Result<()> {
        self.calls.push(StoreCall::Insert {
            table: table.clone(),
            record: record.clone(),
        });
        if let Some(message) = self.insert_failures.pop_front() {
            return Err(anyhow!(message));
        }

        let mut columns = self.tables.columns(table);
        if columns.is_empty() {
            columns = record.columns().map(str::to_owned).collect();
        }
        if let Some(unknown) = record
            .columns()
            .find(|column| !columns.iter().any(|known| known.as_str() == *column))
        {
            bail!("column {unknown} does not exist on {table}");
        }

        let next_key = self
            .rows(table.as_str())
            .iter()
            .filter_map(|row| match row.primary_key() {
                Some((_, Value::Integer(key))) => Some(*key),
                _ => None,
            })
            .max()
            .unwrap_or(0)
            + 1;

        let mut inserted = Record::new();
        for (index, column) in columns.iter().enumerate() {
            let value = match record.get(column) {
                Some(value) => value.clone(),
                None if index == 0 => Value::Integer(next_key),
                None if column == "created_at" => Value::text(fixture_datetime()),
                None => Value::Null,
            };
            inserted.push(column.clone(), value);
        }
        self.tables.insert(table, inserted);
        Ok(())
    }
}

/// Runs every request the grid has queued against `store` and feeds the
/// replies back, repeating until the grid stops issuing requests.
pub fn settle(state: &mut GridState, store: &mut impl RemoteStore) -> Vec<GridEvent> {
    let mut events = Vec::new();
    loop {
        let requests = state.take_requests();
        if requests.is_empty() {
            return events;
        }
        for request in requests {
            events.extend(state.complete(request.execute(store)));
        }
    }
}

pub fn temp_db_path() -> Result<(tempfile::TempDir, PathBuf)> {
    let dir = tempfile::tempdir().context("create temp dir")?;
    let db_path = dir.path().join("trendgrid.db");
    Ok((dir, db_path))
}

pub fn fixture_datetime() -> &'static str {
    "2026-02-19T12:34:56Z"
}

fn reference_start() -> OffsetDateTime {
    Date::from_calendar_date(REFERENCE_YEAR, Month::January, 1)
        .map(|date| date.with_time(Time::MIDNIGHT).assume_utc())
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
}
