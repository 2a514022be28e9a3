// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use crate::{GridSchema, TableName, Value};

/// A cell by cache row. `row` indexes the table's cached records, not the
/// filtered view.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CellAddress {
    pub table: TableName,
    pub row: usize,
    pub column: String,
}

impl CellAddress {
    pub fn new(table: TableName, row: usize, column: impl Into<String>) -> Self {
        Self {
            table,
            row,
            column: column.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveEdit {
    pub cell: CellAddress,
    pub draft: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum EditSession {
    #[default]
    Closed,
    Editing(ActiveEdit),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionTransition {
    Opened,
    /// Another cell was being edited; its draft was dropped uncommitted.
    Reopened { discarded: ActiveEdit },
    RefusedLocked,
}

impl EditSession {
    pub fn active(&self) -> Option<&ActiveEdit> {
        match self {
            Self::Closed => None,
            Self::Editing(edit) => Some(edit),
        }
    }

    pub fn active_mut(&mut self) -> Option<&mut ActiveEdit> {
        match self {
            Self::Closed => None,
            Self::Editing(edit) => Some(edit),
        }
    }

    pub fn is_editing(&self) -> bool {
        matches!(self, Self::Editing(_))
    }

    /// Opens an edit on `cell` with a draft seeded from `current`. Locked
    /// cells leave the session exactly as it was.
    pub fn activate(
        &mut self,
        schema: &GridSchema,
        cell: CellAddress,
        current: Option<&Value>,
    ) -> SessionTransition {
        let descriptor = schema.resolve(&cell.table, &cell.column);
        if !descriptor.is_editable() {
            return SessionTransition::RefusedLocked;
        }

        let draft = current
            .map(|value| descriptor.format_draft(value))
            .unwrap_or_default();
        let previous = std::mem::replace(self, Self::Editing(ActiveEdit { cell, draft }));
        match previous {
            Self::Closed => SessionTransition::Opened,
            Self::Editing(discarded) => SessionTransition::Reopened { discarded },
        }
    }

    /// Returns false when no edit is open.
    pub fn change_draft(&mut self, draft: impl Into<String>) -> bool {
        match self.active_mut() {
            Some(edit) => {
                edit.draft = draft.into();
                true
            }
            None => false,
        }
    }

    /// Closes the session and hands back the edit to reconcile.
    pub fn commit(&mut self) -> Option<ActiveEdit> {
        match std::mem::take(self) {
            Self::Closed => None,
            Self::Editing(edit) => Some(edit),
        }
    }

    pub fn cancel(&mut self) -> Option<ActiveEdit> {
        self.commit()
    }
}
