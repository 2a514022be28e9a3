// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::{
    ActiveEdit, GridError, GridSchema, Record, RecordCache, RemoteCompletion, RemoteReply,
    RemoteRequest, RequestId, TableName, TableRows, Value, WriteSeq,
};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    Committed,
    RolledBack(GridError),
    /// A newer commit to the same cell exists, so this reply changes nothing
    /// on screen.
    Superseded,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EditDisposition {
    /// Parsed draft equals the current value; nothing was sent.
    Unchanged,
    Issued { id: RequestId, seq: WriteSeq },
    /// The row or column vanished between activation and commit.
    MissingRow,
    /// Locked by the schema, or the record's own primary key.
    Locked,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WriteSettlement {
    pub table: TableName,
    pub column: String,
    pub primary_key: Value,
    pub seq: WriteSeq,
    pub outcome: CommitOutcome,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    Loaded { table: TableName, rows: usize },
    Failed(GridError),
    /// The reply belongs to a superseded load or an inactive table.
    Stale { table: TableName },
}

#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    Inserted { table: TableName },
    Failed(GridError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Settlement {
    Load(LoadOutcome),
    Write(WriteSettlement),
    Insert(InsertOutcome),
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct CellKey {
    table: TableName,
    primary_key_column: String,
    primary_key: String,
    column: String,
}

#[derive(Debug, Clone)]
struct CellTrack {
    primary_key: Value,
    latest: WriteSeq,
    latest_value: Value,
    confirmed: Value,
    confirmed_seq: WriteSeq,
    in_flight: usize,
}

#[derive(Debug, Clone)]
struct PendingLoad {
    table: TableName,
    issued_at: Instant,
}

#[derive(Debug, Clone)]
struct PendingWrite {
    key: CellKey,
    seq: WriteSeq,
    value: Value,
    issued_at: Instant,
}

#[derive(Debug, Clone)]
struct PendingInsert {
    table: TableName,
    issued_at: Instant,
}

/// Aligns the record cache with what the remote store accepted: issues
/// requests, applies optimistic edits, and settles replies in commit order.
#[derive(Debug)]
pub struct Reconciler {
    timeout: Duration,
    next_request: RequestId,
    loads: BTreeMap<RequestId, PendingLoad>,
    latest_load: BTreeMap<TableName, RequestId>,
    writes: BTreeMap<RequestId, PendingWrite>,
    cells: BTreeMap<CellKey, CellTrack>,
    inserts: BTreeMap<RequestId, PendingInsert>,
    outbox: Vec<RemoteRequest>,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new(DEFAULT_REQUEST_TIMEOUT)
    }
}

impl Reconciler {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            next_request: RequestId::default(),
            loads: BTreeMap::new(),
            latest_load: BTreeMap::new(),
            writes: BTreeMap::new(),
            cells: BTreeMap::new(),
            inserts: BTreeMap::new(),
            outbox: Vec::new(),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Requests issued since the last call, in issue order.
    pub fn take_requests(&mut self) -> Vec<RemoteRequest> {
        std::mem::take(&mut self.outbox)
    }

    pub fn is_loading(&self, table: &TableName) -> bool {
        self.latest_load.contains_key(table)
    }

    pub fn pending_writes(&self) -> usize {
        self.writes.len() + self.inserts.len()
    }

    /// Issues a fetch-all for `table`. Any earlier load of the same table
    /// becomes stale.
    pub fn begin_load(&mut self, table: &TableName) -> RequestId {
        let id = self.issue();
        self.loads.insert(
            id,
            PendingLoad {
                table: table.clone(),
                issued_at: Instant::now(),
            },
        );
        if let Some(previous) = self.latest_load.insert(table.clone(), id) {
            debug!(%table, %previous, %id, "load superseded");
        }
        self.outbox.push(RemoteRequest::FetchAll {
            id,
            table: table.clone(),
        });
        debug!(%table, %id, "load issued");
        id
    }

    /// Parses the draft, skips unchanged values, and otherwise applies the
    /// value to the cache before sending it.
    pub fn commit_edit(
        &mut self,
        cache: &mut RecordCache,
        schema: &GridSchema,
        edit: &ActiveEdit,
    ) -> EditDisposition {
        let cell = &edit.cell;
        let descriptor = schema.resolve(&cell.table, &cell.column);
        if !descriptor.is_editable() {
            return EditDisposition::Locked;
        }

        let Some(record) = cache.record(&cell.table, cell.row) else {
            return EditDisposition::MissingRow;
        };
        let (Some(current), Some((primary_key_column, primary_key))) =
            (record.get(&cell.column), record.primary_key())
        else {
            return EditDisposition::MissingRow;
        };
        if primary_key_column == cell.column {
            return EditDisposition::Locked;
        }

        let parsed = descriptor.parse_draft(&edit.draft, Some(current));
        if parsed.same_as(current) {
            debug!(table = %cell.table, column = %cell.column, "edit unchanged, no write");
            return EditDisposition::Unchanged;
        }

        let key = CellKey {
            table: cell.table.clone(),
            primary_key_column: primary_key_column.to_owned(),
            primary_key: primary_key.display(),
            column: cell.column.clone(),
        };
        let primary_key = primary_key.clone();
        let current = current.clone();

        let track = self.cells.entry(key.clone()).or_insert_with(|| CellTrack {
            primary_key: primary_key.clone(),
            latest: WriteSeq::default(),
            latest_value: current.clone(),
            confirmed: current,
            confirmed_seq: WriteSeq::default(),
            in_flight: 0,
        });
        let seq = track.latest.next();
        track.latest = seq;
        track.latest_value = parsed.clone();
        track.in_flight += 1;

        cache.apply(&cell.table, cell.row, &cell.column, parsed.clone());

        let id = self.issue();
        self.writes.insert(
            id,
            PendingWrite {
                key: key.clone(),
                seq,
                value: parsed.clone(),
                issued_at: Instant::now(),
            },
        );
        self.outbox.push(RemoteRequest::UpdateField {
            id,
            table: cell.table.clone(),
            primary_key_column: key.primary_key_column,
            primary_key,
            column: cell.column.clone(),
            value: parsed,
        });
        debug!(table = %cell.table, column = %cell.column, %id, %seq, "write issued");
        EditDisposition::Issued { id, seq }
    }

    pub fn insert_row(&mut self, table: &TableName, record: Record) -> RequestId {
        let id = self.issue();
        self.inserts.insert(
            id,
            PendingInsert {
                table: table.clone(),
                issued_at: Instant::now(),
            },
        );
        self.outbox.push(RemoteRequest::Insert {
            id,
            table: table.clone(),
            record,
        });
        debug!(%table, %id, "insert issued");
        id
    }

    /// Settles a reply. Replies to requests that already timed out, or that
    /// were never issued here, return `None`.
    pub fn finish(
        &mut self,
        cache: &mut RecordCache,
        active: Option<&TableName>,
        completion: RemoteCompletion,
    ) -> Option<Settlement> {
        let RemoteCompletion { id, reply } = completion;
        match reply {
            RemoteReply::Fetched(result) => self
                .finish_load(cache, active, id, result)
                .map(Settlement::Load),
            RemoteReply::Updated(result) => self
                .finish_write(cache, id, result)
                .map(Settlement::Write),
            RemoteReply::Inserted(result) => self
                .finish_insert(id, result)
                .map(Settlement::Insert),
        }
    }

    pub fn finish_load(
        &mut self,
        cache: &mut RecordCache,
        active: Option<&TableName>,
        id: RequestId,
        result: Result<TableRows, String>,
    ) -> Option<LoadOutcome> {
        let Some(pending) = self.loads.remove(&id) else {
            debug!(%id, "late load reply ignored");
            return None;
        };
        let table = pending.table;

        if self.latest_load.get(&table) != Some(&id) {
            debug!(%table, %id, "stale load discarded");
            return Some(LoadOutcome::Stale { table });
        }
        self.latest_load.remove(&table);
        if active != Some(&table) {
            debug!(%table, %id, "load for inactive table discarded");
            return Some(LoadOutcome::Stale { table });
        }

        Some(match cache.settle_fetch(&table, result) {
            Ok(rows) => {
                self.reapply_in_flight(cache, &table);
                info!(%table, rows, "table loaded");
                LoadOutcome::Loaded { table, rows }
            }
            Err(error) => {
                warn!(%table, message = error.message(), "table load failed");
                LoadOutcome::Failed(error)
            }
        })
    }

    pub fn finish_write(
        &mut self,
        cache: &mut RecordCache,
        id: RequestId,
        result: Result<(), String>,
    ) -> Option<WriteSettlement> {
        let Some(pending) = self.writes.remove(&id) else {
            debug!(%id, "late write reply ignored");
            return None;
        };
        self.settle_write(cache, pending, result)
    }

    /// The caller refetches on success; store-assigned columns are only
    /// known after that.
    pub fn finish_insert(
        &mut self,
        id: RequestId,
        result: Result<(), String>,
    ) -> Option<InsertOutcome> {
        let Some(pending) = self.inserts.remove(&id) else {
            debug!(%id, "late insert reply ignored");
            return None;
        };
        let table = pending.table;
        Some(match result {
            Ok(()) => {
                info!(%table, %id, "row inserted");
                InsertOutcome::Inserted { table }
            }
            Err(message) => {
                warn!(%table, %id, %message, "insert failed");
                InsertOutcome::Failed(GridError::RemoteWrite { table, message })
            }
        })
    }

    /// Fails every request issued more than the timeout before `now`. Their
    /// replies, if they ever arrive, are ignored.
    pub fn expire(
        &mut self,
        cache: &mut RecordCache,
        active: Option<&TableName>,
        now: Instant,
    ) -> Vec<Settlement> {
        let timeout = self.timeout;
        let overdue = |issued_at: Instant| now.saturating_duration_since(issued_at) >= timeout;
        let message = format!("no response within {}", format_timeout(timeout));
        let mut settlements = Vec::new();

        let expired_loads: Vec<RequestId> = self
            .loads
            .iter()
            .filter(|(_, pending)| overdue(pending.issued_at))
            .map(|(id, _)| *id)
            .collect();
        for id in expired_loads {
            warn!(%id, "load timed out");
            if let Some(outcome) = self.finish_load(cache, active, id, Err(message.clone())) {
                settlements.push(Settlement::Load(outcome));
            }
        }

        let expired_writes: Vec<RequestId> = self
            .writes
            .iter()
            .filter(|(_, pending)| overdue(pending.issued_at))
            .map(|(id, _)| *id)
            .collect();
        for id in expired_writes {
            warn!(%id, "write timed out");
            if let Some(settlement) = self.finish_write(cache, id, Err(message.clone())) {
                settlements.push(Settlement::Write(settlement));
            }
        }

        let expired_inserts: Vec<RequestId> = self
            .inserts
            .iter()
            .filter(|(_, pending)| overdue(pending.issued_at))
            .map(|(id, _)| *id)
            .collect();
        for id in expired_inserts {
            warn!(%id, "insert timed out");
            if let Some(outcome) = self.finish_insert(id, Err(message.clone())) {
                settlements.push(Settlement::Insert(outcome));
            }
        }

        settlements
    }

    fn issue(&mut self) -> RequestId {
        self.next_request = self.next_request.next();
        self.next_request
    }

    fn settle_write(
        &mut self,
        cache: &mut RecordCache,
        pending: PendingWrite,
        result: Result<(), String>,
    ) -> Option<WriteSettlement> {
        let key = pending.key;
        let track = self.cells.get_mut(&key)?;
        track.in_flight = track.in_flight.saturating_sub(1);
        let is_latest = pending.seq == track.latest;

        let outcome = match result {
            Ok(()) => {
                if pending.seq > track.confirmed_seq {
                    track.confirmed = pending.value;
                    track.confirmed_seq = pending.seq;
                }
                if is_latest {
                    info!(table = %key.table, column = %key.column, seq = %pending.seq, "write committed");
                    CommitOutcome::Committed
                } else {
                    debug!(table = %key.table, column = %key.column, seq = %pending.seq, "older write confirmed");
                    CommitOutcome::Superseded
                }
            }
            Err(message) if is_latest => {
                let restored = track.confirmed.clone();
                track.latest_value = restored.clone();
                restore_cell(cache, &key, &track.primary_key, restored);
                warn!(table = %key.table, column = %key.column, %message, "write rolled back");
                CommitOutcome::RolledBack(GridError::RemoteWrite {
                    table: key.table.clone(),
                    message,
                })
            }
            Err(message) => {
                debug!(table = %key.table, column = %key.column, %message, "older write failed");
                CommitOutcome::Superseded
            }
        };

        let primary_key = track.primary_key.clone();
        if track.in_flight == 0 {
            let confirmed = track.confirmed.clone();
            self.cells.remove(&key);
            restore_cell(cache, &key, &primary_key, confirmed);
        }

        Some(WriteSettlement {
            table: key.table,
            column: key.column,
            primary_key,
            seq: pending.seq,
            outcome,
        })
    }

    /// A reload can race writes still in flight; keep showing their values.
    fn reapply_in_flight(&self, cache: &mut RecordCache, table: &TableName) {
        for (key, track) in &self.cells {
            if key.table == *table && track.in_flight > 0 {
                restore_cell(cache, key, &track.primary_key, track.latest_value.clone());
            }
        }
    }
}

fn restore_cell(cache: &mut RecordCache, key: &CellKey, primary_key: &Value, value: Value) {
    let Some(row) = cache.position_of(&key.table, &key.primary_key_column, primary_key) else {
        return;
    };
    let unchanged = cache
        .record(&key.table, row)
        .and_then(|record| record.get(&key.column))
        .is_some_and(|current| *current == value);
    if !unchanged {
        cache.apply(&key.table, row, &key.column, value);
    }
}

pub fn format_timeout(timeout: Duration) -> String {
    let millis = timeout.as_millis();
    if millis % 60_000 == 0 && millis > 0 {
        format!("{}m", millis / 60_000)
    } else if millis % 1_000 == 0 {
        format!("{}s", millis / 1_000)
    } else {
        format!("{millis}ms")
    }
}

#[cfg(test)]
mod tests {
    use super::{
        CommitOutcome, EditDisposition, LoadOutcome, Reconciler, Settlement, format_timeout,
    };
    use crate::{
        ActiveEdit, CellAddress, GridSchema, Record, RecordCache, RemoteRequest, TableName, Value,
    };
    use std::time::{Duration, Instant};

    fn users() -> TableName {
        TableName::from("users")
    }

    fn cache_with_user() -> RecordCache {
        let mut cache = RecordCache::new();
        cache.replace(
            users(),
            vec![
                Record::new()
                    .with("user_id", Value::Integer(1))
                    .with("status", Value::text("standard")),
            ],
        );
        cache
    }

    fn status_edit(draft: &str) -> ActiveEdit {
        ActiveEdit {
            cell: CellAddress::new(users(), 0, "status"),
            draft: draft.to_owned(),
        }
    }

    fn status(cache: &RecordCache) -> Option<&Value> {
        cache.record(&users(), 0).and_then(|record| record.get("status"))
    }

    #[test]
    fn commit_applies_optimistically_and_emits_update() {
        let schema = GridSchema::business_trends();
        let mut cache = cache_with_user();
        let mut reconciler = Reconciler::default();

        let disposition = reconciler.commit_edit(&mut cache, &schema, &status_edit("plus"));

        assert!(matches!(disposition, EditDisposition::Issued { .. }));
        assert_eq!(status(&cache), Some(&Value::text("plus")));
        let requests = reconciler.take_requests();
        assert_eq!(requests.len(), 1);
        let RemoteRequest::UpdateField {
            primary_key_column,
            primary_key,
            column,
            value,
            ..
        } = &requests[0]
        else {
            panic!("expected an update, got {requests:?}");
        };
        assert_eq!(primary_key_column, "user_id");
        assert_eq!(primary_key, &Value::Integer(1));
        assert_eq!(column, "status");
        assert_eq!(value, &Value::text("plus"));
    }

    #[test]
    fn unchanged_value_sends_nothing() {
        let schema = GridSchema::business_trends();
        let mut cache = cache_with_user();
        let mut reconciler = Reconciler::default();

        let disposition = reconciler.commit_edit(&mut cache, &schema, &status_edit("standard"));

        assert_eq!(disposition, EditDisposition::Unchanged);
        assert!(reconciler.take_requests().is_empty());
    }

    #[test]
    fn failed_write_restores_previous_value() {
        let schema = GridSchema::business_trends();
        let mut cache = cache_with_user();
        let mut reconciler = Reconciler::default();

        let EditDisposition::Issued { id, .. } =
            reconciler.commit_edit(&mut cache, &schema, &status_edit("admin"))
        else {
            panic!("write should be issued");
        };
        let settlement = reconciler
            .finish_write(&mut cache, id, Err("permission denied".to_owned()))
            .expect("pending write settles");

        assert!(matches!(settlement.outcome, CommitOutcome::RolledBack(_)));
        assert_eq!(status(&cache), Some(&Value::text("standard")));
    }

    #[test]
    fn primary_key_column_is_never_written() {
        let mut schema = GridSchema::business_trends();
        schema.locked_columns.clear();
        let mut cache = cache_with_user();
        let mut reconciler = Reconciler::default();

        let disposition = reconciler.commit_edit(
            &mut cache,
            &schema,
            &ActiveEdit {
                cell: CellAddress::new(users(), 0, "user_id"),
                draft: "7".to_owned(),
            },
        );

        assert_eq!(disposition, EditDisposition::Locked);
        assert!(reconciler.take_requests().is_empty());
        assert_eq!(
            cache.record(&users(), 0).and_then(|record| record.get("user_id")),
            Some(&Value::Integer(1))
        );
    }

    #[test]
    fn newer_commit_wins_over_late_older_reply() {
        let schema = GridSchema::business_trends();
        let mut cache = cache_with_user();
        let mut reconciler = Reconciler::default();

        let EditDisposition::Issued { id: first, .. } =
            reconciler.commit_edit(&mut cache, &schema, &status_edit("plus"))
        else {
            panic!("first write should be issued");
        };
        let EditDisposition::Issued { id: second, .. } =
            reconciler.commit_edit(&mut cache, &schema, &status_edit("admin"))
        else {
            panic!("second write should be issued");
        };

        let newer = reconciler
            .finish_write(&mut cache, second, Ok(()))
            .expect("second settles");
        let older = reconciler
            .finish_write(&mut cache, first, Ok(()))
            .expect("first settles");

        assert_eq!(newer.outcome, CommitOutcome::Committed);
        assert_eq!(older.outcome, CommitOutcome::Superseded);
        assert_eq!(status(&cache), Some(&Value::text("admin")));
    }

    #[test]
    fn failed_newer_write_falls_back_to_confirmed_older_value() {
        let schema = GridSchema::business_trends();
        let mut cache = cache_with_user();
        let mut reconciler = Reconciler::default();

        let EditDisposition::Issued { id: first, .. } =
            reconciler.commit_edit(&mut cache, &schema, &status_edit("plus"))
        else {
            panic!("first write should be issued");
        };
        let EditDisposition::Issued { id: second, .. } =
            reconciler.commit_edit(&mut cache, &schema, &status_edit("admin"))
        else {
            panic!("second write should be issued");
        };

        reconciler.finish_write(&mut cache, second, Err("rejected".to_owned()));
        assert_eq!(status(&cache), Some(&Value::text("standard")));

        reconciler.finish_write(&mut cache, first, Ok(()));
        assert_eq!(status(&cache), Some(&Value::text("plus")));
    }

    #[test]
    fn stale_load_is_discarded() {
        let ideas = TableName::from("ideas");
        let mut cache = RecordCache::new();
        let mut reconciler = Reconciler::default();

        let users_load = reconciler.begin_load(&users());
        let ideas_load = reconciler.begin_load(&ideas);

        let late = reconciler.finish_load(
            &mut cache,
            Some(&ideas),
            users_load,
            Ok(vec![Record::new().with("user_id", Value::Integer(1))].into()),
        );
        assert_eq!(late, Some(LoadOutcome::Stale { table: users() }));
        assert!(!cache.is_loaded(&users()));

        let current = reconciler.finish_load(
            &mut cache,
            Some(&ideas),
            ideas_load,
            Ok(vec![Record::new().with("id", Value::Integer(4))].into()),
        );
        assert_eq!(current, Some(LoadOutcome::Loaded { table: ideas.clone(), rows: 1 }));
    }

    #[test]
    fn timed_out_write_rolls_back_and_ignores_late_success() {
        let schema = GridSchema::business_trends();
        let mut cache = cache_with_user();
        let mut reconciler = Reconciler::new(Duration::from_secs(1));

        let EditDisposition::Issued { id, .. } =
            reconciler.commit_edit(&mut cache, &schema, &status_edit("plus"))
        else {
            panic!("write should be issued");
        };

        let settlements = reconciler.expire(
            &mut cache,
            Some(&users()),
            Instant::now() + Duration::from_secs(2),
        );

        assert_eq!(settlements.len(), 1);
        let Settlement::Write(settlement) = &settlements[0] else {
            panic!("expected a write settlement, got {settlements:?}");
        };
        let CommitOutcome::RolledBack(error) = &settlement.outcome else {
            panic!("expected a rollback, got {:?}", settlement.outcome);
        };
        assert!(error.message().contains("no response within 1s"));
        assert_eq!(status(&cache), Some(&Value::text("standard")));

        assert_eq!(reconciler.finish_write(&mut cache, id, Ok(())), None);
        assert_eq!(status(&cache), Some(&Value::text("standard")));
    }

    #[test]
    fn reload_keeps_in_flight_value() {
        let schema = GridSchema::business_trends();
        let mut cache = cache_with_user();
        let mut reconciler = Reconciler::default();

        reconciler.commit_edit(&mut cache, &schema, &status_edit("plus"));
        let load = reconciler.begin_load(&users());
        reconciler.finish_load(
            &mut cache,
            Some(&users()),
            load,
            Ok(vec![
                Record::new()
                    .with("user_id", Value::Integer(1))
                    .with("status", Value::text("standard")),
            ]
            .into()),
        );

        assert_eq!(status(&cache), Some(&Value::text("plus")));
    }

    #[test]
    fn timeouts_format_in_largest_unit() {
        assert_eq!(format_timeout(Duration::from_secs(15)), "15s");
        assert_eq!(format_timeout(Duration::from_secs(120)), "2m");
        assert_eq!(format_timeout(Duration::from_millis(1500)), "1500ms");
    }
}
