// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::Result;
use trendgrid_app::{GridIntent, GridSchema, GridState, Record, RemoteStore, TableName, Value};
use trendgrid_db::{Store, validate_db_path};
use trendgrid_testkit::{settle, temp_db_path};

fn demo_store() -> Result<Store> {
    let store = Store::open_memory()?;
    store.bootstrap()?;
    store.seed_demo_data()?;
    Ok(store)
}

#[test]
fn validate_db_path_rejects_uri_forms() {
    assert!(validate_db_path("file:test.db").is_err());
    assert!(validate_db_path("https://example.com/db.sqlite").is_err());
    assert!(validate_db_path("db.sqlite?mode=ro").is_err());
    assert!(validate_db_path("").is_err());
    assert!(validate_db_path("/tmp/trendgrid.db").is_ok());
    assert!(validate_db_path(":memory:").is_ok());
}

#[test]
fn bootstrap_creates_every_default_table() -> Result<()> {
    let store = Store::open_memory()?;
    store.bootstrap()?;

    let names = store.table_names()?;
    for table in GridSchema::business_trends().tables {
        assert!(names.iter().any(|name| name == table.as_str()), "missing {table}");
    }

    store.bootstrap()?;
    Ok(())
}

#[test]
fn bootstrap_rejects_schema_missing_required_column() -> Result<()> {
    let store = Store::open_memory()?;
    store.bootstrap()?;

    store.raw_connection().execute_batch(
        "
            DROP TABLE user_ideas_submissions;
            CREATE TABLE user_ideas_submissions (
              submission_id INTEGER PRIMARY KEY,
              title TEXT NOT NULL,
              created_at TEXT NOT NULL
            );
            ",
    )?;

    let err = store
        .bootstrap()
        .expect_err("schema validation should fail");
    let message = err.to_string();
    assert!(message.contains("table `user_ideas_submissions` is missing required columns"));
    assert!(message.contains("tags"));
    Ok(())
}

#[test]
fn fetch_all_keeps_declared_column_order_and_key_order() -> Result<()> {
    let mut store = demo_store()?;

    let users = store.fetch_all(&TableName::from("users"))?;

    assert_eq!(users.len(), 5);
    assert_eq!(
        users[0].columns().collect::<Vec<_>>(),
        vec![
            "user_id",
            "name",
            "email",
            "status",
            "region",
            "business_sector",
            "transition_goal",
            "experience_lvl",
            "created_at",
        ]
    );
    let keys: Vec<Value> = users
        .iter()
        .filter_map(|record| record.primary_key().map(|(_, value)| value.clone()))
        .collect();
    assert_eq!(keys, (1..=5).map(Value::Integer).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn list_columns_round_trip_through_json() -> Result<()> {
    let mut store = demo_store()?;
    let submissions = TableName::from("user_ideas_submissions");

    let rows = store.fetch_all(&submissions)?;
    assert_eq!(
        rows[0].get("tags"),
        Some(&Value::list(["Retail", "Eco & Sustainability"]))
    );

    store.update_field(
        &submissions,
        "submission_id",
        &Value::Integer(1),
        "tags",
        &Value::list(["Services", "Education"]),
    )?;
    let stored: String = store.raw_connection().query_row(
        "SELECT tags FROM user_ideas_submissions WHERE submission_id = 1",
        [],
        |row| row.get(0),
    )?;
    assert_eq!(stored, r#"["Services","Education"]"#);

    let rows = store.fetch_all(&submissions)?;
    assert_eq!(rows[0].get("tags"), Some(&Value::list(["Services", "Education"])));
    Ok(())
}

#[test]
fn bool_columns_surface_as_bools() -> Result<()> {
    let mut store = demo_store()?;
    let rows = store.fetch_all(&TableName::from("trendingideas"))?;
    assert_eq!(rows[0].get("featured"), Some(&Value::Bool(true)));
    assert_eq!(rows[1].get("featured"), Some(&Value::Bool(false)));
    Ok(())
}

#[test]
fn update_rejects_unknown_identifiers_and_missing_rows() -> Result<()> {
    let mut store = demo_store()?;
    let users = TableName::from("users");

    let err = store
        .update_field(&users, "user_id", &Value::Integer(1), "status; DROP", &Value::Null)
        .expect_err("unsafe column");
    assert!(err.to_string().contains("invalid column name"));

    let err = store
        .update_field(&users, "user_id", &Value::Integer(1), "nickname", &Value::Null)
        .expect_err("unknown column");
    assert!(err.to_string().contains("column nickname does not exist on users"));

    let err = store
        .update_field(&users, "user_id", &Value::Integer(99), "status", &Value::text("plus"))
        .expect_err("missing row");
    assert!(err.to_string().contains("no users row with user_id = 99"));

    let err = store
        .fetch_all(&TableName::from("payments"))
        .expect_err("unknown table");
    assert!(err.to_string().contains("relation payments does not exist"));
    Ok(())
}

#[test]
fn check_constraint_failure_is_a_write_error() -> Result<()> {
    let mut store = demo_store()?;
    let err = store
        .update_field(
            &TableName::from("users"),
            "user_id",
            &Value::Integer(1),
            "status",
            &Value::text("superuser"),
        )
        .expect_err("check constraint");
    assert!(format!("{err:#}").contains("CHECK constraint failed"));
    Ok(())
}

#[test]
fn insert_fills_created_at_and_key() -> Result<()> {
    let mut store = demo_store()?;
    let ideas = TableName::from("ideas");

    store.insert(
        &ideas,
        &Record::new()
            .with("title", Value::text("Repair cafe"))
            .with("region", Value::text("Europe")),
    )?;

    let rows = store.fetch_all(&ideas)?;
    let inserted = rows.last().expect("inserted row");
    assert_eq!(inserted.get("id"), Some(&Value::Integer(5)));
    let created_at = inserted
        .get("created_at")
        .map(Value::display)
        .unwrap_or_default();
    assert!(created_at.contains('T'), "created_at = {created_at}");
    Ok(())
}

#[test]
fn grid_edits_persist_to_disk() -> Result<()> {
    let (_dir, db_path) = temp_db_path()?;
    {
        let store = Store::open(&db_path)?;
        store.bootstrap()?;
        store.seed_demo_data()?;
    }

    let mut store = Store::open(&db_path)?;
    let mut state = GridState::new(GridSchema::business_trends());
    state.dispatch(GridIntent::SelectTable(TableName::from("users")));
    settle(&mut state, &mut store);

    state.dispatch(GridIntent::ActivateCell {
        row: 0,
        column: "status".to_owned(),
    });
    state.dispatch(GridIntent::ChangeDraft("plus".to_owned()));
    state.dispatch(GridIntent::Commit);
    settle(&mut state, &mut store);
    drop(store);

    let reopened = Store::open(&db_path)?;
    let status: String = reopened.raw_connection().query_row(
        "SELECT status FROM users WHERE user_id = 1",
        [],
        |row| row.get(0),
    )?;
    assert_eq!(status, "plus");
    Ok(())
}

#[test]
fn rejected_grid_write_rolls_back() -> Result<()> {
    let mut store = demo_store()?;
    let mut state = GridState::new(GridSchema::business_trends());
    state.dispatch(GridIntent::SelectTable(TableName::from("ideas")));
    settle(&mut state, &mut store);

    store
        .raw_connection()
        .execute_batch("CREATE TRIGGER ideas_read_only BEFORE UPDATE ON ideas BEGIN SELECT RAISE(ABORT, 'ideas are read-only'); END;")?;

    state.dispatch(GridIntent::ActivateCell {
        row: 0,
        column: "title".to_owned(),
    });
    state.dispatch(GridIntent::ChangeDraft("Renamed".to_owned()));
    state.dispatch(GridIntent::Commit);
    settle(&mut state, &mut store);

    let title = state
        .cache()
        .record(&TableName::from("ideas"), 0)
        .and_then(|record| record.get("title"))
        .cloned();
    assert_eq!(title, Some(Value::text("Neighborhood refill station")));
    assert!(
        state
            .status_line()
            .is_some_and(|line| line.contains("ideas are read-only"))
    );
    Ok(())
}

#[test]
fn empty_table_accepts_its_first_row_through_the_grid() -> Result<()> {
    let mut store = Store::open_memory()?;
    store.bootstrap()?;
    let ideas = TableName::from("ideas");
    let mut state = GridState::new(GridSchema::business_trends());
    state.dispatch(GridIntent::SelectTable(ideas.clone()));
    settle(&mut state, &mut store);

    assert!(state.visible_records().is_empty());
    assert_eq!(
        state.columns(),
        vec!["id", "title", "description", "business_sector", "region", "created_at"]
    );

    state.dispatch(GridIntent::ChangeNewRowField {
        column: "title".to_owned(),
        value: "Seed swap".to_owned(),
    });
    state.dispatch(GridIntent::SubmitNewRow);
    settle(&mut state, &mut store);

    let rows = state.visible_records();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("id"), Some(&Value::Integer(1)));
    assert_eq!(rows[0].get("title"), Some(&Value::text("Seed swap")));
    assert_eq!(store.count_rows(ideas.as_str())?, 1);
    Ok(())
}
