// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result, anyhow};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use crossterm::{execute, terminal};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::widgets::{Block, Borders, Cell, Clear, Paragraph, Row, Table, Tabs};
use std::io;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use trendgrid_app::{
    FieldDescriptor, GridEvent, GridIntent, GridState, LoadState, RemoteCompletion, RemoteRequest,
    Value, toggle_list_item,
};

const STATUS_CLEAR_AFTER: Duration = Duration::from_secs(4);
const CURSOR_MARK: &str = "▏";
const FIELD_MARK: &str = "›";

/// Executes remote requests for the grid. The default `spawn_request` runs
/// the request inline and posts the completion; real runtimes hand it to a
/// worker thread instead.
pub trait GridRuntime {
    fn execute(&mut self, request: &RemoteRequest) -> RemoteCompletion;

    fn spawn_request(&mut self, request: RemoteRequest, tx: Sender<InternalEvent>) -> Result<()> {
        let completion = self.execute(&request);
        tx.send(InternalEvent::Remote(completion))
            .map_err(|_| anyhow!("remote completion channel closed"))?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InternalEvent {
    ClearStatus { token: u64 },
    Remote(RemoteCompletion),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum InputMode {
    #[default]
    Grid,
    Search,
    NewRow,
}

#[derive(Debug, Default)]
struct ViewData {
    mode: InputMode,
    cursor_row: usize,
    cursor_col: usize,
    // Highlighted option of a multi-choice field.
    option_cursor: usize,
    search_column: usize,
    new_row_field: usize,
    status_token: u64,
}

pub fn run_app<R: GridRuntime>(state: &mut GridState, runtime: &mut R) -> Result<()> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, terminal::EnterAlternateScreen).context("enter alternate screen")?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;

    let mut view_data = ViewData::default();
    let (internal_tx, internal_rx) = mpsc::channel();

    if state.active_table().is_none()
        && let Some(first) = state.schema().tables.first().cloned()
    {
        dispatch(
            state,
            runtime,
            &mut view_data,
            &internal_tx,
            GridIntent::SelectTable(first),
        );
    }

    let mut result = Ok(());
    loop {
        process_internal_events(state, runtime, &mut view_data, &internal_tx, &internal_rx);

        let expired = state.expire(Instant::now());
        after_events(state, runtime, &mut view_data, &internal_tx, &expired);

        if let Err(error) = terminal.draw(|frame| render(frame, state, &view_data)) {
            result = Err(error).context("draw frame");
            break;
        }

        match event::poll(Duration::from_millis(120)).context("poll event") {
            Ok(false) => {}
            Ok(true) => match event::read().context("read event") {
                Ok(Event::Key(key)) => {
                    if handle_key_event(state, runtime, &mut view_data, &internal_tx, key) {
                        break;
                    }
                }
                Ok(_) => {}
                Err(error) => {
                    result = Err(error);
                    break;
                }
            },
            Err(error) => {
                result = Err(error);
                break;
            }
        }
    }

    disable_raw_mode().context("disable raw mode")?;
    execute!(io::stdout(), terminal::LeaveAlternateScreen).context("leave alternate screen")?;
    result
}

fn process_internal_events<R: GridRuntime>(
    state: &mut GridState,
    runtime: &mut R,
    view_data: &mut ViewData,
    tx: &Sender<InternalEvent>,
    rx: &Receiver<InternalEvent>,
) {
    while let Ok(event) = rx.try_recv() {
        match event {
            InternalEvent::ClearStatus { token } if token == view_data.status_token => {
                state.dispatch(GridIntent::ClearStatus);
            }
            InternalEvent::ClearStatus { .. } => {}
            InternalEvent::Remote(completion) => {
                let events = state.complete(completion);
                after_events(state, runtime, view_data, tx, &events);
            }
        }
    }
}

fn dispatch<R: GridRuntime>(
    state: &mut GridState,
    runtime: &mut R,
    view_data: &mut ViewData,
    tx: &Sender<InternalEvent>,
    intent: GridIntent,
) {
    let events = state.dispatch(intent);
    after_events(state, runtime, view_data, tx, &events);
}

fn after_events<R: GridRuntime>(
    state: &mut GridState,
    runtime: &mut R,
    view_data: &mut ViewData,
    tx: &Sender<InternalEvent>,
    events: &[GridEvent],
) {
    for event in events {
        match event {
            GridEvent::StatusUpdated(_) => bump_status_token(view_data, tx),
            GridEvent::TableSelected(_) => {
                view_data.cursor_row = 0;
                view_data.cursor_col = 0;
                view_data.search_column = 0;
                view_data.new_row_field = 0;
                if view_data.mode == InputMode::Search {
                    view_data.mode = InputMode::Grid;
                }
            }
            GridEvent::SessionOpened(_) => view_data.option_cursor = 0,
            GridEvent::SearchChanged => view_data.cursor_row = 0,
            GridEvent::Inserted(_) if view_data.mode == InputMode::NewRow => {
                view_data.mode = InputMode::Grid;
            }
            _ => {}
        }
    }
    flush_requests(state, runtime, view_data, tx);
    clamp_cursor(state, view_data);
}

fn flush_requests<R: GridRuntime>(
    state: &mut GridState,
    runtime: &mut R,
    view_data: &mut ViewData,
    tx: &Sender<InternalEvent>,
) {
    for request in state.take_requests() {
        let id = request.id();
        debug!(%id, table = %request.table(), "spawn request");
        if let Err(error) = runtime.spawn_request(request, tx.clone()) {
            warn!(%id, error = %format!("{error:#}"), "request not sent");
            emit_status(
                state,
                view_data,
                tx,
                format!("{error:#} -- restart trendgrid and retry"),
            );
        }
    }
}

fn clamp_cursor(state: &GridState, view_data: &mut ViewData) {
    let visible = state.visible_rows();
    let columns = state.columns();
    view_data.cursor_row = view_data.cursor_row.min(visible.len().saturating_sub(1));
    view_data.cursor_col = view_data.cursor_col.min(columns.len().saturating_sub(1));
    view_data.search_column = view_data.search_column.min(columns.len().saturating_sub(1));

    if let Some(edit) = state.session().active()
        && let Some(row) = visible.iter().position(|row| *row == edit.cell.row)
    {
        view_data.cursor_row = row;
        if let Some(col) = columns.iter().position(|column| *column == edit.cell.column) {
            view_data.cursor_col = col;
        }
    }
}

fn schedule_status_clear(internal_tx: &Sender<InternalEvent>, token: u64) {
    let sender = internal_tx.clone();
    thread::spawn(move || {
        thread::sleep(STATUS_CLEAR_AFTER);
        let _ = sender.send(InternalEvent::ClearStatus { token });
    });
}

fn bump_status_token(view_data: &mut ViewData, internal_tx: &Sender<InternalEvent>) {
    view_data.status_token = view_data.status_token.saturating_add(1);
    schedule_status_clear(internal_tx, view_data.status_token);
}

fn emit_status(
    state: &mut GridState,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    message: impl Into<String>,
) {
    state.dispatch(GridIntent::SetStatus(message.into()));
    bump_status_token(view_data, internal_tx);
}

fn handle_key_event<R: GridRuntime>(
    state: &mut GridState,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    key: KeyEvent,
) -> bool {
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        return true;
    }

    if state.session().is_editing() {
        handle_edit_key(state, runtime, view_data, internal_tx, key);
        return false;
    }

    match view_data.mode {
        InputMode::Search => {
            handle_search_key(state, runtime, view_data, internal_tx, key);
            false
        }
        InputMode::NewRow => {
            handle_new_row_key(state, runtime, view_data, internal_tx, key);
            false
        }
        InputMode::Grid => handle_grid_key(state, runtime, view_data, internal_tx, key),
    }
}

fn handle_grid_key<R: GridRuntime>(
    state: &mut GridState,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    key: KeyEvent,
) -> bool {
    match key.code {
        KeyCode::Char('q') => return true,
        KeyCode::Char('j') | KeyCode::Down => {
            view_data.cursor_row = step(view_data.cursor_row, 1, state.visible_rows().len());
        }
        KeyCode::Char('k') | KeyCode::Up => {
            view_data.cursor_row = step(view_data.cursor_row, -1, state.visible_rows().len());
        }
        KeyCode::Char('l') | KeyCode::Right => {
            view_data.cursor_col = step(view_data.cursor_col, 1, state.columns().len());
        }
        KeyCode::Char('h') | KeyCode::Left => {
            view_data.cursor_col = step(view_data.cursor_col, -1, state.columns().len());
        }
        KeyCode::Tab => switch_table(state, runtime, view_data, internal_tx, 1),
        KeyCode::BackTab => switch_table(state, runtime, view_data, internal_tx, -1),
        KeyCode::Enter | KeyCode::Char('i') => {
            let Some(column) = state.columns().get(view_data.cursor_col).cloned() else {
                emit_status(state, view_data, internal_tx, "nothing to edit yet");
                return false;
            };
            let row = view_data.cursor_row;
            dispatch(
                state,
                runtime,
                view_data,
                internal_tx,
                GridIntent::ActivateCell { row, column },
            );
        }
        KeyCode::Char('/') => {
            let Some(column) = search_column_name(state, view_data) else {
                emit_status(
                    state,
                    view_data,
                    internal_tx,
                    "nothing to search -- wait for the table to load",
                );
                return false;
            };
            let text = state
                .search()
                .map(|query| query.text.clone())
                .unwrap_or_default();
            view_data.mode = InputMode::Search;
            dispatch(
                state,
                runtime,
                view_data,
                internal_tx,
                GridIntent::ChangeSearch { column, text },
            );
        }
        KeyCode::Char('c') => cycle_search_column(state, runtime, view_data, internal_tx),
        KeyCode::Char('a') => open_new_row_form(state, view_data, internal_tx),
        KeyCode::Char('r') => {
            dispatch(state, runtime, view_data, internal_tx, GridIntent::Refresh);
        }
        KeyCode::Esc if state.search().is_some() => {
            dispatch(state, runtime, view_data, internal_tx, GridIntent::ClearSearch);
        }
        _ => {}
    }
    false
}

fn handle_edit_key<R: GridRuntime>(
    state: &mut GridState,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    key: KeyEvent,
) {
    match key.code {
        KeyCode::Enter => {
            dispatch(state, runtime, view_data, internal_tx, GridIntent::Commit);
            return;
        }
        KeyCode::Esc => {
            dispatch(state, runtime, view_data, internal_tx, GridIntent::Cancel);
            return;
        }
        _ => {}
    }

    let Some(edit) = state.session().active() else {
        return;
    };
    let descriptor = state.descriptor(&edit.cell.column);
    let next = edited_text(descriptor, &edit.draft, &mut view_data.option_cursor, key);
    if let Some(draft) = next {
        dispatch(
            state,
            runtime,
            view_data,
            internal_tx,
            GridIntent::ChangeDraft(draft),
        );
    }
}

/// Applies one key to a field's text. Choice fields cycle or toggle their
/// options; every other key edits the text directly.
fn edited_text(
    descriptor: FieldDescriptor<'_>,
    text: &str,
    option_cursor: &mut usize,
    key: KeyEvent,
) -> Option<String> {
    match (key.code, descriptor) {
        (KeyCode::Left, FieldDescriptor::SingleChoice(_)) => descriptor.cycle_option(text, -1),
        (KeyCode::Right | KeyCode::Char(' '), FieldDescriptor::SingleChoice(_)) => {
            descriptor.cycle_option(text, 1)
        }
        (KeyCode::Left, FieldDescriptor::MultiChoice(options)) => {
            *option_cursor = wrap(*option_cursor, -1, options.len());
            None
        }
        (KeyCode::Right, FieldDescriptor::MultiChoice(options)) => {
            *option_cursor = wrap(*option_cursor, 1, options.len());
            None
        }
        (KeyCode::Char(' '), FieldDescriptor::MultiChoice(options)) => options
            .get(*option_cursor)
            .map(|option| toggle_list_item(text, option)),
        (KeyCode::Backspace, _) => {
            let mut next = text.to_owned();
            next.pop()?;
            Some(next)
        }
        (KeyCode::Char(ch), _) if !key.modifiers.contains(KeyModifiers::CONTROL) => {
            Some(format!("{text}{ch}"))
        }
        _ => None,
    }
}

fn handle_search_key<R: GridRuntime>(
    state: &mut GridState,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    key: KeyEvent,
) {
    match key.code {
        KeyCode::Enter => view_data.mode = InputMode::Grid,
        KeyCode::Esc => {
            view_data.mode = InputMode::Grid;
            dispatch(state, runtime, view_data, internal_tx, GridIntent::ClearSearch);
        }
        KeyCode::Backspace | KeyCode::Char(_) => {
            let Some(query) = state.search() else {
                view_data.mode = InputMode::Grid;
                return;
            };
            let column = query.column.clone();
            let mut text = query.text.clone();
            match key.code {
                KeyCode::Char(ch) => text.push(ch),
                _ => {
                    text.pop();
                }
            }
            dispatch(
                state,
                runtime,
                view_data,
                internal_tx,
                GridIntent::ChangeSearch { column, text },
            );
        }
        _ => {}
    }
}

fn cycle_search_column<R: GridRuntime>(
    state: &mut GridState,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
) {
    let count = state.columns().len();
    if count == 0 {
        return;
    }
    view_data.search_column = wrap(view_data.search_column, 1, count);
    let Some(column) = search_column_name(state, view_data) else {
        return;
    };
    match state.search().map(|query| query.text.clone()) {
        Some(text) => {
            dispatch(
                state,
                runtime,
                view_data,
                internal_tx,
                GridIntent::ChangeSearch { column, text },
            );
        }
        None => emit_status(
            state,
            view_data,
            internal_tx,
            format!("search column: {column}"),
        ),
    }
}

fn search_column_name(state: &GridState, view_data: &ViewData) -> Option<String> {
    state.columns().get(view_data.search_column).cloned()
}

fn switch_table<R: GridRuntime>(
    state: &mut GridState,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    delta: isize,
) {
    let tables = &state.schema().tables;
    if tables.is_empty() {
        return;
    }
    let next = match state
        .active_table()
        .and_then(|active| tables.iter().position(|table| table == active))
    {
        Some(index) => wrap(index, delta, tables.len()),
        None => 0,
    };
    let table = tables[next].clone();
    dispatch(
        state,
        runtime,
        view_data,
        internal_tx,
        GridIntent::SelectTable(table),
    );
}

fn new_row_columns(state: &GridState) -> Vec<String> {
    state
        .columns()
        .into_iter()
        .filter(|column| state.descriptor(column).is_editable())
        .collect()
}

fn open_new_row_form(
    state: &mut GridState,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
) {
    let Some(table) = state.active_table().cloned() else {
        emit_status(state, view_data, internal_tx, "no table selected");
        return;
    };
    if new_row_columns(state).is_empty() {
        emit_status(
            state,
            view_data,
            internal_tx,
            format!("{table} has no editable columns loaded -- press r to reload"),
        );
        return;
    }
    view_data.mode = InputMode::NewRow;
    view_data.new_row_field = 0;
    view_data.option_cursor = 0;
}

fn handle_new_row_key<R: GridRuntime>(
    state: &mut GridState,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    key: KeyEvent,
) {
    let columns = new_row_columns(state);
    match key.code {
        KeyCode::Esc => {
            view_data.mode = InputMode::Grid;
            return;
        }
        KeyCode::Enter => {
            dispatch(state, runtime, view_data, internal_tx, GridIntent::SubmitNewRow);
            return;
        }
        KeyCode::Tab | KeyCode::Down => {
            view_data.new_row_field = wrap(view_data.new_row_field, 1, columns.len());
            view_data.option_cursor = 0;
            return;
        }
        KeyCode::BackTab | KeyCode::Up => {
            view_data.new_row_field = wrap(view_data.new_row_field, -1, columns.len());
            view_data.option_cursor = 0;
            return;
        }
        _ => {}
    }

    let Some(column) = columns.get(view_data.new_row_field).cloned() else {
        return;
    };
    let current = state.new_row().get(&column).unwrap_or_default().to_owned();
    let descriptor = state.descriptor(&column);
    let next = edited_text(descriptor, &current, &mut view_data.option_cursor, key);
    if let Some(value) = next {
        dispatch(
            state,
            runtime,
            view_data,
            internal_tx,
            GridIntent::ChangeNewRowField { column, value },
        );
    }
}

fn step(current: usize, delta: isize, len: usize) -> usize {
    if len == 0 {
        return 0;
    }
    current.saturating_add_signed(delta).min(len - 1)
}

fn wrap(current: usize, delta: isize, len: usize) -> usize {
    if len == 0 {
        return 0;
    }
    (current as isize + delta).rem_euclid(len as isize) as usize
}

fn render(frame: &mut ratatui::Frame<'_>, state: &GridState, view_data: &ViewData) {
    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(1),
            Constraint::Length(1),
            Constraint::Length(2),
        ])
        .split(frame.area());

    let tables = &state.schema().tables;
    let selected = state
        .active_table()
        .and_then(|active| tables.iter().position(|table| table == active))
        .unwrap_or(0);
    let tab_titles = tables
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<String>>();
    let tabs = Tabs::new(tab_titles)
        .block(Block::default().title("trendgrid").borders(Borders::ALL))
        .style(Style::default().fg(Color::White))
        .highlight_style(
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        )
        .select(selected);
    frame.render_widget(tabs, layout[0]);

    render_table(frame, layout[1], state, view_data);

    let search_style = if view_data.mode == InputMode::Search {
        Style::default().fg(Color::Cyan)
    } else {
        Style::default().fg(Color::DarkGray)
    };
    let search = Paragraph::new(search_line_text(state, view_data)).style(search_style);
    frame.render_widget(search, layout[2]);

    let status_widget = Paragraph::new(status_text(state, view_data))
        .style(Style::default().fg(Color::Yellow))
        .block(Block::default().borders(Borders::TOP));
    frame.render_widget(status_widget, layout[3]);

    if view_data.mode == InputMode::NewRow {
        let area = centered_rect(60, 60, frame.area());
        frame.render_widget(Clear, area);
        let title = state
            .active_table()
            .map(|table| format!("new {table} row"))
            .unwrap_or_else(|| "new row".to_owned());
        let form = Paragraph::new(new_row_overlay_text(state, view_data))
            .block(Block::default().title(title).borders(Borders::ALL));
        frame.render_widget(form, area);
    }
}

fn render_table(
    frame: &mut ratatui::Frame<'_>,
    area: Rect,
    state: &GridState,
    view_data: &ViewData,
) {
    let block = Block::default()
        .title(table_title(state))
        .borders(Borders::ALL);
    let columns = state.columns();
    let has_rows = state
        .active_table()
        .and_then(|table| state.cache().records(table))
        .is_some_and(|records| !records.is_empty());
    if columns.is_empty() || !has_rows {
        let empty = Paragraph::new(empty_table_text(state)).block(block);
        frame.render_widget(empty, area);
        return;
    }

    let header_cells = columns.iter().map(|column| {
        let mut style = Style::default().add_modifier(Modifier::BOLD);
        style = if state.descriptor(column).is_editable() {
            style.fg(Color::White)
        } else {
            style.fg(Color::DarkGray)
        };
        Cell::from(header_label(state, column)).style(style)
    });
    let header = Row::new(header_cells);

    let active_edit = state.session().active();
    let visible = state.visible_rows();
    let records = state.visible_records();
    let rows = records
        .iter()
        .zip(visible.iter())
        .enumerate()
        .map(|(row_index, (record, cache_row))| {
            let selected_row = row_index == view_data.cursor_row;
            let cells = columns
                .iter()
                .enumerate()
                .map(|(column_index, column)| {
                    let editing = active_edit
                        .filter(|edit| edit.cell.row == *cache_row && edit.cell.column == *column);
                    let text = match editing {
                        Some(edit) => format!("{}{CURSOR_MARK}", edit.draft),
                        None => record.get(column).map(Value::display).unwrap_or_default(),
                    };
                    let mut style = Style::default();
                    if selected_row {
                        style = style.bg(Color::DarkGray);
                    }
                    if selected_row && column_index == view_data.cursor_col {
                        style = Style::default()
                            .fg(Color::Black)
                            .bg(Color::Cyan)
                            .add_modifier(Modifier::BOLD);
                    }
                    if editing.is_some() {
                        style = Style::default()
                            .fg(Color::Black)
                            .bg(Color::Yellow)
                            .add_modifier(Modifier::BOLD);
                    }
                    Cell::from(text).style(style)
                })
                .collect::<Vec<_>>();
            Row::new(cells)
        });

    let widths = vec![Constraint::Min(8); columns.len()];
    let table = Table::new(rows, widths)
        .header(header)
        .column_spacing(1)
        .block(block);
    frame.render_widget(table, area);
}

fn header_label(state: &GridState, column: &str) -> String {
    match state.descriptor(column) {
        FieldDescriptor::SingleChoice(_) => format!("{column} ▾"),
        FieldDescriptor::MultiChoice(_) => format!("{column} ▾▾"),
        FieldDescriptor::Locked | FieldDescriptor::FreeText => column.to_owned(),
    }
}

fn table_title(state: &GridState) -> String {
    let Some(table) = state.active_table() else {
        return "no table".to_owned();
    };
    let total = state.cache().records(table).map_or(0, |records| records.len());
    let mut title = format!("{table} {}/{total}", state.visible_rows().len());
    if matches!(state.load_state(), LoadState::Loading) {
        title.push_str(" loading");
    }
    let pending = state.pending_writes();
    if pending > 0 {
        title.push_str(&format!(" saving {pending}"));
    }
    title
}

fn empty_table_text(state: &GridState) -> String {
    match state.load_state() {
        LoadState::Idle => "press tab to pick a table".to_owned(),
        LoadState::Loading => "loading...".to_owned(),
        LoadState::Loaded => "no rows -- press a to add one".to_owned(),
        LoadState::Failed(error) => format!("{error} -- press r to retry"),
    }
}

fn search_line_text(state: &GridState, view_data: &ViewData) -> String {
    match state.search() {
        Some(query) => {
            let cursor = if view_data.mode == InputMode::Search {
                CURSOR_MARK
            } else {
                ""
            };
            format!("/ {}: {}{cursor}", query.column, query.text)
        }
        None => match search_column_name(state, view_data) {
            Some(column) => format!("/ search {column}"),
            None => String::new(),
        },
    }
}

fn status_text(state: &GridState, view_data: &ViewData) -> String {
    let (mode, hints) = if let Some(edit) = state.session().active() {
        let hints = match state.descriptor(&edit.cell.column) {
            FieldDescriptor::SingleChoice(_) => "enter save | esc cancel | space/←/→ cycle".to_owned(),
            FieldDescriptor::MultiChoice(options) => {
                let option = options
                    .get(view_data.option_cursor)
                    .map(String::as_str)
                    .unwrap_or_default();
                format!("enter save | esc cancel | ←/→ pick | space toggle {option}")
            }
            FieldDescriptor::Locked | FieldDescriptor::FreeText => {
                "enter save | esc cancel".to_owned()
            }
        };
        ("EDIT", hints)
    } else {
        match view_data.mode {
            InputMode::Grid => (
                "NAV",
                "h/j/k/l move | tab table | enter edit | / search | c column | a add | r reload | q quit"
                    .to_owned(),
            ),
            InputMode::Search => ("SEARCH", "type to filter | enter keep | esc clear".to_owned()),
            InputMode::NewRow => (
                "FORM",
                "tab/↑/↓ field | space/←/→ options | enter add | esc close".to_owned(),
            ),
        }
    };
    match state.status_line() {
        Some(status) => format!("{mode} | {status} | {hints}"),
        None => format!("{mode} | {hints}"),
    }
}

fn new_row_overlay_text(state: &GridState, view_data: &ViewData) -> String {
    let mut lines = Vec::new();
    for (index, column) in new_row_columns(state).iter().enumerate() {
        let selected = index == view_data.new_row_field;
        let marker = if selected { FIELD_MARK } else { " " };
        let value = state.new_row().get(column).unwrap_or_default();
        lines.push(format!("{marker} {column}: {value}"));

        if !selected {
            continue;
        }
        let options = state.descriptor(column).options();
        if options.is_empty() {
            continue;
        }
        let listed = options
            .iter()
            .enumerate()
            .map(|(option_index, option)| {
                if matches!(state.descriptor(column), FieldDescriptor::MultiChoice(_))
                    && option_index == view_data.option_cursor
                {
                    format!("[{option}]")
                } else {
                    option.clone()
                }
            })
            .collect::<Vec<_>>()
            .join(" / ");
        lines.push(format!("    {listed}"));
    }
    lines.join("\n")
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

#[cfg(test)]
mod tests {
    use super::{
        GridRuntime, InputMode, InternalEvent, ViewData, handle_key_event,
        new_row_overlay_text, process_internal_events, search_line_text, status_text, step,
        wrap,
    };
    use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
    use std::sync::mpsc::{self, Receiver, Sender};
    use trendgrid_app::{
        GridIntent, GridSchema, GridState, RemoteCompletion, RemoteRequest, TableName, Value,
        toggle_list_item,
    };
    use trendgrid_testkit::{ScriptedStore, StoreCall, TrendFaker, standard_user};

    struct TestRuntime {
        store: ScriptedStore,
    }

    impl GridRuntime for TestRuntime {
        fn execute(&mut self, request: &RemoteRequest) -> RemoteCompletion {
            request.execute(&mut self.store)
        }
    }

    struct Harness {
        state: GridState,
        runtime: TestRuntime,
        view_data: ViewData,
        tx: Sender<InternalEvent>,
        rx: Receiver<InternalEvent>,
    }

    impl Harness {
        fn new(store: ScriptedStore, table: &str) -> Self {
            let (tx, rx) = mpsc::channel();
            let mut harness = Self {
                state: GridState::new(GridSchema::business_trends()),
                runtime: TestRuntime { store },
                view_data: ViewData::default(),
                tx,
                rx,
            };
            let events = harness
                .state
                .dispatch(GridIntent::SelectTable(TableName::from(table)));
            super::after_events(
                &mut harness.state,
                &mut harness.runtime,
                &mut harness.view_data,
                &harness.tx,
                &events,
            );
            harness.drain();
            harness
        }

        fn drain(&mut self) {
            process_internal_events(
                &mut self.state,
                &mut self.runtime,
                &mut self.view_data,
                &self.tx,
                &self.rx,
            );
        }

        fn press(&mut self, code: KeyCode) -> bool {
            let quit = handle_key_event(
                &mut self.state,
                &mut self.runtime,
                &mut self.view_data,
                &self.tx,
                KeyEvent::new(code, KeyModifiers::NONE),
            );
            self.drain();
            quit
        }

        fn type_text(&mut self, text: &str) {
            for ch in text.chars() {
                self.press(KeyCode::Char(ch));
            }
        }

        fn cell(&self, row: usize, column: &str) -> Option<Value> {
            let table = self.state.active_table()?;
            self.state.cache().record(table, row)?.get(column).cloned()
        }
    }

    fn user_harness() -> Harness {
        Harness::new(
            ScriptedStore::new().with_table("users", vec![standard_user()]),
            "users",
        )
    }

    #[test]
    fn right_cycles_status_and_enter_commits() {
        let mut harness = user_harness();

        harness.press(KeyCode::Char('l'));
        harness.press(KeyCode::Enter);
        assert!(harness.state.session().is_editing());
        harness.press(KeyCode::Right);
        harness.press(KeyCode::Enter);

        assert!(!harness.state.session().is_editing());
        assert_eq!(
            harness.runtime.store.updates(),
            vec![&StoreCall::UpdateField {
                table: TableName::from("users"),
                primary_key_column: "user_id".to_owned(),
                primary_key: Value::Integer(1),
                column: "status".to_owned(),
                value: Value::text("plus"),
            }]
        );
        assert_eq!(harness.cell(0, "status"), Some(Value::text("plus")));
    }

    #[test]
    fn enter_on_locked_column_reports_read_only() {
        let mut harness = user_harness();

        harness.press(KeyCode::Enter);

        assert!(!harness.state.session().is_editing());
        let status = status_text(&harness.state, &harness.view_data);
        assert!(status.contains("user_id is read-only"), "{status}");
    }

    #[test]
    fn escape_discards_typed_draft() {
        let mut harness = user_harness();

        harness.press(KeyCode::Char('l'));
        harness.press(KeyCode::Char('i'));
        harness.type_text("qjk");
        assert_eq!(
            harness.state.session().active().map(|edit| edit.draft.as_str()),
            Some("standardqjk")
        );
        let quit = harness.press(KeyCode::Esc);

        assert!(!quit);
        assert!(!harness.state.session().is_editing());
        assert_eq!(harness.runtime.store.writes(), 0);
        assert_eq!(harness.cell(0, "status"), Some(Value::text("standard")));
    }

    #[test]
    fn q_quits_only_outside_edits() {
        let mut harness = user_harness();
        assert!(harness.press(KeyCode::Char('q')));

        harness.press(KeyCode::Char('l'));
        harness.press(KeyCode::Enter);
        assert!(!harness.press(KeyCode::Char('q')));
    }

    #[test]
    fn slash_filters_and_escape_clears() {
        let mut harness = Harness::new(ScriptedStore::demo(4), "users");
        let total = harness.state.visible_rows().len();
        assert!(total > 1);

        harness.press(KeyCode::Char('/'));
        assert_eq!(harness.view_data.mode, InputMode::Search);
        harness.type_text("zzzz");
        assert!(harness.state.visible_rows().is_empty());
        assert_eq!(
            search_line_text(&harness.state, &harness.view_data),
            "/ user_id: zzzz▏"
        );

        for _ in 0..4 {
            harness.press(KeyCode::Backspace);
        }
        assert_eq!(harness.state.visible_rows().len(), total);

        harness.press(KeyCode::Esc);
        assert_eq!(harness.view_data.mode, InputMode::Grid);
        assert!(harness.state.search().is_none());
    }

    #[test]
    fn c_moves_active_search_to_next_column() {
        let mut harness = Harness::new(ScriptedStore::demo(4), "users");

        harness.press(KeyCode::Char('/'));
        harness.type_text("1");
        harness.press(KeyCode::Enter);
        harness.press(KeyCode::Char('c'));

        let query = harness.state.search().expect("search stays active");
        assert_eq!(query.column, "name");
        assert_eq!(query.text, "1");
    }

    #[test]
    fn tab_and_backtab_switch_tables() {
        let mut harness = Harness::new(ScriptedStore::demo(4), "users");

        harness.press(KeyCode::Tab);
        assert_eq!(harness.state.active_table(), Some(&TableName::from("ideas")));
        assert!(harness.state.cache().is_loaded(&TableName::from("ideas")));

        harness.press(KeyCode::BackTab);
        harness.press(KeyCode::BackTab);
        assert_eq!(
            harness.state.active_table(),
            Some(&TableName::from("trendingideas"))
        );
    }

    #[test]
    fn new_row_form_submits_and_closes() {
        let mut harness = user_harness();

        harness.press(KeyCode::Char('a'));
        assert_eq!(harness.view_data.mode, InputMode::NewRow);
        harness.press(KeyCode::Right);
        harness.press(KeyCode::Right);
        assert!(new_row_overlay_text(&harness.state, &harness.view_data).contains("› status: plus"));
        harness.press(KeyCode::Enter);

        assert_eq!(harness.view_data.mode, InputMode::Grid);
        assert_eq!(harness.runtime.store.rows("users").len(), 2);
        assert_eq!(harness.state.visible_rows().len(), 2);
        assert!(harness.state.new_row().is_empty());
    }

    #[test]
    fn empty_table_takes_first_row_from_form() {
        let mut harness = Harness::new(
            ScriptedStore::new().with_empty_table("ideas", &["id", "title", "created_at"]),
            "ideas",
        );
        assert!(harness.state.visible_rows().is_empty());

        harness.press(KeyCode::Char('a'));
        assert_eq!(harness.view_data.mode, InputMode::NewRow);
        harness.type_text("Swap");
        harness.press(KeyCode::Enter);

        assert_eq!(harness.view_data.mode, InputMode::Grid);
        assert_eq!(harness.state.visible_rows(), vec![0]);
        assert_eq!(harness.cell(0, "title"), Some(Value::text("Swap")));
        assert_eq!(harness.cell(0, "id"), Some(Value::Integer(1)));
    }

    #[test]
    fn empty_new_row_stays_open_without_calls() {
        let mut harness = user_harness();
        let calls = harness.runtime.store.calls().len();

        harness.press(KeyCode::Char('a'));
        harness.press(KeyCode::Enter);

        assert_eq!(harness.view_data.mode, InputMode::NewRow);
        assert_eq!(harness.runtime.store.calls().len(), calls);
        let status = status_text(&harness.state, &harness.view_data);
        assert!(status.contains("new row is empty"), "{status}");
    }

    #[test]
    fn space_toggles_highlighted_tag() {
        let mut faker = TrendFaker::new(3);
        let submission = faker.submission(1, 1);
        let original = submission
            .get("tags")
            .map(Value::display)
            .expect("tags column");
        let mut harness = Harness::new(
            ScriptedStore::new().with_table("user_ideas_submissions", vec![submission]),
            "user_ideas_submissions",
        );

        for _ in 0..4 {
            harness.press(KeyCode::Char('l'));
        }
        harness.press(KeyCode::Enter);
        harness.press(KeyCode::Right);
        harness.press(KeyCode::Char(' '));

        let options = harness.state.descriptor("tags").options().to_vec();
        let expected = toggle_list_item(&original, &options[1]);
        assert_eq!(
            harness.state.session().active().map(|edit| edit.draft.clone()),
            Some(expected)
        );
        let status = status_text(&harness.state, &harness.view_data);
        assert!(status.contains(&format!("space toggle {}", options[1])), "{status}");
    }

    #[test]
    fn failed_write_surfaces_in_status_line() {
        let mut harness = user_harness();
        harness
            .runtime
            .store
            .fail_next_update("permission denied for table users");

        harness.press(KeyCode::Char('l'));
        harness.press(KeyCode::Enter);
        harness.press(KeyCode::Right);
        harness.press(KeyCode::Enter);

        assert_eq!(harness.cell(0, "status"), Some(Value::text("standard")));
        let status = status_text(&harness.state, &harness.view_data);
        assert!(status.contains("permission denied"), "{status}");
        assert!(status.contains("change reverted"), "{status}");
    }

    #[test]
    fn stale_clear_status_token_is_ignored() {
        let mut harness = user_harness();
        harness.press(KeyCode::Enter);
        let token = harness.view_data.status_token;
        assert!(harness.state.status_line().is_some());

        harness
            .tx
            .send(InternalEvent::ClearStatus { token: token - 1 })
            .expect("channel open");
        harness.drain();
        assert!(harness.state.status_line().is_some());

        harness
            .tx
            .send(InternalEvent::ClearStatus { token })
            .expect("channel open");
        harness.drain();
        assert!(harness.state.status_line().is_none());
    }

    #[test]
    fn cursor_steps_clamp_and_wrap() {
        assert_eq!(step(0, -1, 3), 0);
        assert_eq!(step(2, 1, 3), 2);
        assert_eq!(step(1, 1, 0), 0);
        assert_eq!(wrap(0, -1, 4), 3);
        assert_eq!(wrap(3, 1, 4), 0);
    }
}
