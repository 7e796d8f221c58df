//! Captures structured `tracing` events as column tables, one table per target.
//!
//! Columns come from event fields; the schema is whatever the events carry.
//! Capture is scoped to a closure on the current thread, so parallel tests never
//! see each other's events.
//!
//! # Usage
//!
//! ```ignore
//! // In search code:
//! tracing::info!(target: "tabu_iteration", iteration, objective, best);
//!
//! // In a test:
//! let (outcome, trace) = instrument::capture(|| run_search());
//! let objectives = trace.table("tabu_iteration").unwrap().f64s("objective").unwrap();
//! let frames = trace.to_frames();
//! ```

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::Path;

use polars::prelude::*;
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Record};
use tracing::{Event, Id, Level, Metadata, Subscriber};

// === COLUMNS ===

/// Values of one field across every row of a table.
#[derive(Debug, Clone, PartialEq)]
pub enum TraceColumn {
    U64(Vec<u64>),
    I64(Vec<i64>),
    F64(Vec<f64>),
    Bool(Vec<bool>),
    Str(Vec<String>),
}

/// A single field value from one event.
#[derive(Debug, Clone, PartialEq)]
enum Cell {
    U64(u64),
    I64(i64),
    F64(f64),
    Bool(bool),
    Str(String),
}

impl TraceColumn {
    fn empty_like(cell: &Cell, rows: usize) -> Self {
        match cell {
            Cell::U64(_) => TraceColumn::U64(vec![0; rows]),
            Cell::I64(_) => TraceColumn::I64(vec![0; rows]),
            Cell::F64(_) => TraceColumn::F64(vec![f64::NAN; rows]),
            Cell::Bool(_) => TraceColumn::Bool(vec![false; rows]),
            Cell::Str(_) => TraceColumn::Str(vec![String::new(); rows]),
        }
    }

    /// Appends `cell` if the types line up; a mismatched cell is left to padding.
    fn push(&mut self, cell: Cell) {
        match (self, cell) {
            (TraceColumn::U64(v), Cell::U64(x)) => v.push(x),
            (TraceColumn::I64(v), Cell::I64(x)) => v.push(x),
            (TraceColumn::F64(v), Cell::F64(x)) => v.push(x),
            (TraceColumn::Bool(v), Cell::Bool(x)) => v.push(x),
            (TraceColumn::Str(v), Cell::Str(x)) => v.push(x),
            _ => {}
        }
    }

    fn pad_to(&mut self, rows: usize) {
        match self {
            TraceColumn::U64(v) => v.resize(rows, 0),
            TraceColumn::I64(v) => v.resize(rows, 0),
            TraceColumn::F64(v) => v.resize(rows, f64::NAN),
            TraceColumn::Bool(v) => v.resize(rows, false),
            TraceColumn::Str(v) => v.resize(rows, String::new()),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TraceColumn::U64(v) => v.len(),
            TraceColumn::I64(v) => v.len(),
            TraceColumn::F64(v) => v.len(),
            TraceColumn::Bool(v) => v.len(),
            TraceColumn::Str(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// === TABLES ===

/// All events of one target. Fields missing from a row are padded
/// (zero, NaN, false or empty string).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TraceTable {
    columns: BTreeMap<String, TraceColumn>,
    rows: usize,
}

impl TraceTable {
    fn push_row(&mut self, cells: Vec<(&'static str, Cell)>) {
        for (name, cell) in cells {
            let rows = self.rows;
            self.columns
                .entry(name.to_string())
                .or_insert_with(|| TraceColumn::empty_like(&cell, rows))
                .push(cell);
        }
        self.rows += 1;
        for column in self.columns.values_mut() {
            column.pad_to(self.rows);
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn column(&self, name: &str) -> Option<&TraceColumn> {
        self.columns.get(name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    pub fn u64s(&self, name: &str) -> Option<&[u64]> {
        match self.columns.get(name)? {
            TraceColumn::U64(v) => Some(v),
            _ => None,
        }
    }

    pub fn f64s(&self, name: &str) -> Option<&[f64]> {
        match self.columns.get(name)? {
            TraceColumn::F64(v) => Some(v),
            _ => None,
        }
    }

    pub fn bools(&self, name: &str) -> Option<&[bool]> {
        match self.columns.get(name)? {
            TraceColumn::Bool(v) => Some(v),
            _ => None,
        }
    }

    pub fn strs(&self, name: &str) -> Option<&[String]> {
        match self.columns.get(name)? {
            TraceColumn::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn to_frame(&self) -> PolarsResult<DataFrame> {
        let columns = self
            .columns
            .iter()
            .map(|(name, col)| match col {
                TraceColumn::U64(v) => Column::new(name.into(), v),
                TraceColumn::I64(v) => Column::new(name.into(), v),
                TraceColumn::F64(v) => Column::new(name.into(), v),
                TraceColumn::Bool(v) => Column::new(name.into(), v),
                TraceColumn::Str(v) => Column::new(name.into(), v),
            })
            .collect();
        DataFrame::new(columns)
    }
}

/// Every table captured during one `capture` call, keyed by event target.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Trace {
    tables: BTreeMap<String, TraceTable>,
}

impl Trace {
    pub fn table(&self, target: &str) -> Option<&TraceTable> {
        self.tables.get(target)
    }

    pub fn targets(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    /// Rows recorded under `target`, zero if it never fired.
    pub fn count(&self, target: &str) -> usize {
        self.tables.get(target).map_or(0, TraceTable::rows)
    }

    pub fn to_frames(&self) -> PolarsResult<BTreeMap<String, DataFrame>> {
        self.tables
            .iter()
            .map(|(target, table)| Ok((target.clone(), table.to_frame()?)))
            .collect()
    }

    /// Writes `{dir}/{target}.parquet` for every table.
    pub fn write_parquet(&self, dir: &Path) -> PolarsResult<()> {
        std::fs::create_dir_all(dir).map_err(io_error)?;
        for (target, mut frame) in self.to_frames()? {
            let file = std::fs::File::create(dir.join(format!("{target}.parquet"))).map_err(io_error)?;
            ParquetWriter::new(file).finish(&mut frame)?;
        }
        Ok(())
    }
}

fn io_error(error: std::io::Error) -> PolarsError {
    PolarsError::IO {
        error: error.into(),
        msg: None,
    }
}

// === SUBSCRIBER ===

thread_local! {
    static ACTIVE: RefCell<Trace> = RefCell::default();
}

struct CellVisitor {
    cells: Vec<(&'static str, Cell)>,
}

impl Visit for CellVisitor {
    fn record_u64(&mut self, field: &Field, value: u64) {
        self.cells.push((field.name(), Cell::U64(value)));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.cells.push((field.name(), Cell::I64(value)));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.cells.push((field.name(), Cell::F64(value)));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.cells.push((field.name(), Cell::Bool(value)));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.cells.push((field.name(), Cell::Str(value.to_string())));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.cells.push((field.name(), Cell::Str(format!("{value:?}"))));
    }
}

/// Records events at `max_level` or more severe into the thread's active trace.
/// Spans are ignored.
pub struct TraceSubscriber {
    max_level: Level,
}

impl TraceSubscriber {
    pub fn new(max_level: Level) -> Self {
        Self { max_level }
    }
}

impl Subscriber for TraceSubscriber {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.is_event() && *metadata.level() <= self.max_level
    }

    fn new_span(&self, _span: &Attributes<'_>) -> Id {
        Id::from_u64(1)
    }

    fn record(&self, _span: &Id, _values: &Record<'_>) {}

    fn record_follows_from(&self, _span: &Id, _follows: &Id) {}

    fn event(&self, event: &Event<'_>) {
        let mut visitor = CellVisitor { cells: Vec::new() };
        event.record(&mut visitor);
        let target = event.metadata().target();
        ACTIVE.with(|trace| {
            let mut trace = trace.borrow_mut();
            if !trace.tables.contains_key(target) {
                trace.tables.insert(target.to_string(), TraceTable::default());
            }
            if let Some(table) = trace.tables.get_mut(target) {
                table.push_row(visitor.cells);
            }
        });
    }

    fn enter(&self, _span: &Id) {}

    fn exit(&self, _span: &Id) {}
}

// === CAPTURE ===

/// Run `f` with info-level events captured; returns its result and the trace.
pub fn capture<R>(f: impl FnOnce() -> R) -> (R, Trace) {
    capture_at(Level::INFO, f)
}

/// Like `capture`, recording events up to `max_level` (e.g. `Level::DEBUG`).
pub fn capture_at<R>(max_level: Level, f: impl FnOnce() -> R) -> (R, Trace) {
    // Nested captures keep the outer trace intact
    let outer = ACTIVE.with(|trace| std::mem::take(&mut *trace.borrow_mut()));
    let result = tracing::subscriber::with_default(TraceSubscriber::new(max_level), f);
    let captured = ACTIVE.with(|trace| std::mem::replace(&mut *trace.borrow_mut(), outer));
    (result, captured)
}
