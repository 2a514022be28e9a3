// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::{
    CellAddress, CommitOutcome, EditDisposition, EditSession, FieldDescriptor, GridError,
    GridSchema, InsertOutcome, LoadOutcome, NewRowDraft, Reconciler, Record, RecordCache,
    RemoteCompletion, RemoteRequest, RequestId, SearchQuery, SessionTransition, Settlement,
    TableName, Value, WriteSettlement, view, view_indices,
};

#[derive(Debug, Clone, Default, PartialEq)]
pub enum LoadState {
    #[default]
    Idle,
    Loading,
    Loaded,
    Failed(GridError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum GridIntent {
    SelectTable(TableName),
    /// `row` is a position in the visible (filtered) rows.
    ActivateCell { row: usize, column: String },
    ChangeDraft(String),
    Commit,
    Cancel,
    ChangeSearch { column: String, text: String },
    ClearSearch,
    ChangeNewRowField { column: String, value: String },
    SubmitNewRow,
    Refresh,
    SetStatus(String),
    ClearStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GridEvent {
    TableSelected(TableName),
    LoadIssued { table: TableName, id: RequestId },
    Loaded { table: TableName, rows: usize },
    LoadFailed(GridError),
    SessionOpened(CellAddress),
    SessionRefused(CellAddress),
    DraftDiscarded(CellAddress),
    DraftChanged,
    SessionClosed,
    EditUnchanged,
    WriteIssued { cell: CellAddress, id: RequestId },
    WriteSettled(WriteSettlement),
    SearchChanged,
    NewRowChanged,
    NewRowRejected(String),
    InsertIssued { table: TableName, id: RequestId },
    Inserted(TableName),
    InsertFailed(GridError),
    StatusUpdated(String),
    StatusCleared,
}

/// Everything the grid shows, plus the reconciler that keeps it in step
/// with the remote store. Intents go in through [`GridState::dispatch`],
/// remote replies through [`GridState::complete`].
#[derive(Debug)]
pub struct GridState {
    schema: GridSchema,
    active_table: Option<TableName>,
    cache: RecordCache,
    session: EditSession,
    search: Option<SearchQuery>,
    new_row: NewRowDraft,
    load_state: LoadState,
    status_line: Option<String>,
    reconciler: Reconciler,
}

impl GridState {
    pub fn new(schema: GridSchema) -> Self {
        Self::with_reconciler(schema, Reconciler::default())
    }

    pub fn with_timeout(schema: GridSchema, timeout: Duration) -> Self {
        Self::with_reconciler(schema, Reconciler::new(timeout))
    }

    fn with_reconciler(schema: GridSchema, reconciler: Reconciler) -> Self {
        Self {
            schema,
            active_table: None,
            cache: RecordCache::new(),
            session: EditSession::Closed,
            search: None,
            new_row: NewRowDraft::default(),
            load_state: LoadState::Idle,
            status_line: None,
            reconciler,
        }
    }

    pub fn schema(&self) -> &GridSchema {
        &self.schema
    }

    pub fn active_table(&self) -> Option<&TableName> {
        self.active_table.as_ref()
    }

    pub fn cache(&self) -> &RecordCache {
        &self.cache
    }

    pub fn session(&self) -> &EditSession {
        &self.session
    }

    pub fn search(&self) -> Option<&SearchQuery> {
        self.search.as_ref()
    }

    pub fn new_row(&self) -> &NewRowDraft {
        &self.new_row
    }

    pub fn load_state(&self) -> &LoadState {
        &self.load_state
    }

    pub fn status_line(&self) -> Option<&str> {
        self.status_line.as_deref()
    }

    pub fn pending_writes(&self) -> usize {
        self.reconciler.pending_writes()
    }

    pub fn take_requests(&mut self) -> Vec<RemoteRequest> {
        self.reconciler.take_requests()
    }

    pub fn descriptor(&self, column: &str) -> FieldDescriptor<'_> {
        match &self.active_table {
            Some(table) => self.schema.resolve(table, column),
            None => FieldDescriptor::FreeText,
        }
    }

    pub fn columns(&self) -> Vec<String> {
        self.active_table
            .as_ref()
            .map(|table| self.cache.columns(table))
            .unwrap_or_default()
    }

    /// Cache rows currently visible, in cache order.
    pub fn visible_rows(&self) -> Vec<usize> {
        self.active_records()
            .map(|records| view_indices(records, self.search.as_ref()))
            .unwrap_or_default()
    }

    pub fn visible_records(&self) -> Vec<&Record> {
        self.active_records()
            .map(|records| view(records, self.search.as_ref()))
            .unwrap_or_default()
    }

    fn active_records(&self) -> Option<&[Record]> {
        self.cache.records(self.active_table.as_ref()?)
    }

    pub fn dispatch(&mut self, intent: GridIntent) -> Vec<GridEvent> {
        match intent {
            GridIntent::SelectTable(table) => self.select_table(table),
            GridIntent::ActivateCell { row, column } => self.activate_cell(row, column),
            GridIntent::ChangeDraft(draft) => {
                if self.session.change_draft(draft) {
                    vec![GridEvent::DraftChanged]
                } else {
                    Vec::new()
                }
            }
            GridIntent::Commit => self.commit(),
            GridIntent::Cancel => match self.session.cancel() {
                Some(edit) => vec![GridEvent::DraftDiscarded(edit.cell), GridEvent::SessionClosed],
                None => Vec::new(),
            },
            GridIntent::ChangeSearch { column, text } => {
                self.search = Some(SearchQuery::new(column, text));
                vec![GridEvent::SearchChanged]
            }
            GridIntent::ClearSearch => {
                self.search = None;
                vec![GridEvent::SearchChanged]
            }
            GridIntent::ChangeNewRowField { column, value } => {
                self.change_new_row_field(column, value)
            }
            GridIntent::SubmitNewRow => self.submit_new_row(),
            GridIntent::Refresh => match self.active_table.clone() {
                Some(table) => self.begin_load(table),
                None => Vec::new(),
            },
            GridIntent::SetStatus(message) => vec![self.set_status(message)],
            GridIntent::ClearStatus => {
                self.status_line = None;
                vec![GridEvent::StatusCleared]
            }
        }
    }

    /// Feeds a remote reply back into the grid.
    pub fn complete(&mut self, completion: RemoteCompletion) -> Vec<GridEvent> {
        let editing_key = self.editing_primary_key();
        let settlement =
            self.reconciler
                .finish(&mut self.cache, self.active_table.as_ref(), completion);
        match settlement {
            Some(settlement) => self.apply_settlement(settlement, editing_key),
            None => Vec::new(),
        }
    }

    /// Fails requests that have outlived the timeout.
    pub fn expire(&mut self, now: Instant) -> Vec<GridEvent> {
        let editing_key = self.editing_primary_key();
        let settlements =
            self.reconciler
                .expire(&mut self.cache, self.active_table.as_ref(), now);
        settlements
            .into_iter()
            .flat_map(|settlement| self.apply_settlement(settlement, editing_key.clone()))
            .collect()
    }

    fn select_table(&mut self, table: TableName) -> Vec<GridEvent> {
        if !self.schema.manages(&table) {
            return vec![self.set_status(format!(
                "{table} is not a managed table -- add it to [grid].tables"
            ))];
        }

        let mut events = Vec::new();
        if let Some(edit) = self.session.cancel() {
            events.push(GridEvent::DraftDiscarded(edit.cell));
        }
        self.cache.retain_only(&table);
        self.search = None;
        self.new_row = NewRowDraft::for_table(table.clone());
        self.active_table = Some(table.clone());
        events.push(GridEvent::TableSelected(table.clone()));
        events.extend(self.begin_load(table));
        events
    }

    fn begin_load(&mut self, table: TableName) -> Vec<GridEvent> {
        let id = self.reconciler.begin_load(&table);
        self.load_state = LoadState::Loading;
        vec![GridEvent::LoadIssued { table, id }]
    }

    fn activate_cell(&mut self, visible_row: usize, column: String) -> Vec<GridEvent> {
        let Some(table) = self.active_table.clone() else {
            return Vec::new();
        };
        let Some(row) = self.visible_rows().get(visible_row).copied() else {
            return Vec::new();
        };
        let Some(record) = self.cache.record(&table, row) else {
            return Vec::new();
        };
        let Some(current) = record.get(&column).cloned() else {
            return Vec::new();
        };
        let is_primary_key = record
            .primary_key()
            .is_some_and(|(key_column, _)| key_column == column);

        let cell = CellAddress::new(table, row, column);
        let transition = if is_primary_key {
            SessionTransition::RefusedLocked
        } else {
            self.session
                .activate(&self.schema, cell.clone(), Some(&current))
        };
        match transition {
            SessionTransition::Opened => vec![GridEvent::SessionOpened(cell)],
            SessionTransition::Reopened { discarded } => vec![
                GridEvent::DraftDiscarded(discarded.cell),
                GridEvent::SessionOpened(cell),
            ],
            SessionTransition::RefusedLocked => {
                debug!(table = %cell.table, column = %cell.column, "locked cell not editable");
                vec![
                    GridEvent::SessionRefused(cell.clone()),
                    self.set_status(format!("{} is read-only", cell.column)),
                ]
            }
        }
    }

    fn commit(&mut self) -> Vec<GridEvent> {
        let Some(edit) = self.session.commit() else {
            return Vec::new();
        };
        let mut events = vec![GridEvent::SessionClosed];
        match self
            .reconciler
            .commit_edit(&mut self.cache, &self.schema, &edit)
        {
            EditDisposition::Unchanged => events.push(GridEvent::EditUnchanged),
            EditDisposition::Issued { id, .. } => {
                events.push(GridEvent::WriteIssued { cell: edit.cell, id });
            }
            EditDisposition::MissingRow => {
                events.push(self.set_status(
                    "row is no longer loaded -- press r to reload and retry".to_owned(),
                ));
            }
            EditDisposition::Locked => {
                events.push(self.set_status(format!("{} is read-only", edit.cell.column)));
            }
        }
        events
    }

    fn change_new_row_field(&mut self, column: String, value: String) -> Vec<GridEvent> {
        if !self.descriptor(&column).is_editable() {
            return vec![self.set_status(format!("{column} is assigned by the store"))];
        }
        self.new_row.set(column, value);
        vec![GridEvent::NewRowChanged]
    }

    fn submit_new_row(&mut self) -> Vec<GridEvent> {
        let Some(table) = self.active_table.clone() else {
            return Vec::new();
        };
        let record = match self.new_row.to_record(&self.schema) {
            Ok(record) => record,
            Err(error) => {
                let message = error.to_string();
                info!(%table, %message, "new row rejected");
                return vec![
                    GridEvent::NewRowRejected(message.clone()),
                    self.set_status(message),
                ];
            }
        };
        let id = self.reconciler.insert_row(&table, record);
        vec![GridEvent::InsertIssued { table, id }]
    }

    fn apply_settlement(
        &mut self,
        settlement: Settlement,
        editing_key: Option<(String, Value)>,
    ) -> Vec<GridEvent> {
        match settlement {
            Settlement::Load(LoadOutcome::Loaded { table, rows }) => {
                self.load_state = LoadState::Loaded;
                let mut events = vec![GridEvent::Loaded {
                    table: table.clone(),
                    rows,
                }];
                events.extend(self.rebind_session(&table, editing_key));
                events
            }
            Settlement::Load(LoadOutcome::Failed(error)) => {
                self.load_state = LoadState::Failed(error.clone());
                let mut events = Vec::new();
                if let Some(edit) = self.session.cancel() {
                    events.push(GridEvent::DraftDiscarded(edit.cell));
                }
                events.push(self.set_status(error.to_string()));
                events.push(GridEvent::LoadFailed(error));
                events
            }
            Settlement::Load(LoadOutcome::Stale { .. }) => Vec::new(),
            Settlement::Write(settlement) => {
                let mut events = Vec::new();
                if let CommitOutcome::RolledBack(error) = &settlement.outcome {
                    events.push(self.set_status(format!("{error} -- change reverted")));
                }
                events.push(GridEvent::WriteSettled(settlement));
                events
            }
            Settlement::Insert(InsertOutcome::Inserted { table }) => {
                let mut events = vec![
                    GridEvent::Inserted(table.clone()),
                    self.set_status(format!("row added to {table}")),
                ];
                if self.active_table.as_ref() == Some(&table) {
                    self.new_row.clear();
                    events.extend(self.begin_load(table));
                }
                events
            }
            Settlement::Insert(InsertOutcome::Failed(error)) => vec![
                self.set_status(format!("{error} -- the form keeps your input")),
                GridEvent::InsertFailed(error),
            ],
        }
    }

    /// After a reload rows may have moved; follow the edited row by primary
    /// key, or close the edit when the row is gone.
    fn rebind_session(
        &mut self,
        table: &TableName,
        editing_key: Option<(String, Value)>,
    ) -> Vec<GridEvent> {
        let Some(edit) = self.session.active_mut() else {
            return Vec::new();
        };
        if edit.cell.table != *table {
            return Vec::new();
        }

        let row = editing_key.and_then(|(column, value)| {
            self.cache.position_of(table, &column, &value)
        });
        match row {
            Some(row) => {
                edit.cell.row = row;
                Vec::new()
            }
            None => match self.session.cancel() {
                Some(edit) => vec![
                    GridEvent::DraftDiscarded(edit.cell),
                    self.set_status("row being edited was removed".to_owned()),
                ],
                None => Vec::new(),
            },
        }
    }

    fn editing_primary_key(&self) -> Option<(String, Value)> {
        let edit = self.session.active()?;
        let record = self.cache.record(&edit.cell.table, edit.cell.row)?;
        record
            .primary_key()
            .map(|(column, value)| (column.to_owned(), value.clone()))
    }

    fn set_status(&mut self, message: String) -> GridEvent {
        self.status_line = Some(message.clone());
        GridEvent::StatusUpdated(message)
    }
}
