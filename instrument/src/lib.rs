//! Columnar capture of simulation data events.
//!
//! Simulation code emits plain `tracing` events with a data target; the
//! [`ColumnSubscriber`] turns each event into one row of a per-target table.
//! Columns appear the first time a field is seen and are padded with defaults
//! so every column in a table stays the same length.
//!
//! ```ignore
//! // In simulation code:
//! tracing::info!(target: "period", period, price_1, price_2, stay);
//!
//! // In a test or binary:
//! let mut rec = instrument::ScopedRecorder::new("traces/run_7", Format::Csv)
//!     .with_targets(&["period", "run"]);
//! session.run();
//! let frames = rec.frames();
//! // rec drops -> writes traces/run_7/period.csv, run.csv
//! ```

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use polars::prelude::*;
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Record};
use tracing::subscriber::DefaultGuard;
use tracing::{Event, Id, Metadata, Subscriber};

// ============================================================================
// Columns and tables
// ============================================================================

/// A column of typed values.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedColumn {
    U64(Vec<u64>),
    I64(Vec<i64>),
    F64(Vec<f64>),
    Bool(Vec<bool>),
    Str(Vec<String>),
}

/// A single recorded field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    U64(u64),
    I64(i64),
    F64(f64),
    Bool(bool),
    Str(String),
}

impl TypedColumn {
    /// Empty-valued column of `value`'s type, pre-padded to `rows`.
    fn padded_for(value: &Value, rows: usize) -> Self {
        match value {
            Value::U64(_) => TypedColumn::U64(vec![0; rows]),
            Value::I64(_) => TypedColumn::I64(vec![0; rows]),
            Value::F64(_) => TypedColumn::F64(vec![0.0; rows]),
            Value::Bool(_) => TypedColumn::Bool(vec![false; rows]),
            Value::Str(_) => TypedColumn::Str(vec![String::new(); rows]),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TypedColumn::U64(v) => v.len(),
            TypedColumn::I64(v) => v.len(),
            TypedColumn::F64(v) => v.len(),
            TypedColumn::Bool(v) => v.len(),
            TypedColumn::Str(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn pad_to(&mut self, rows: usize) {
        let missing = rows.saturating_sub(self.len());
        match self {
            TypedColumn::U64(v) => v.extend(std::iter::repeat_n(0, missing)),
            TypedColumn::I64(v) => v.extend(std::iter::repeat_n(0, missing)),
            TypedColumn::F64(v) => v.extend(std::iter::repeat_n(0.0, missing)),
            TypedColumn::Bool(v) => v.extend(std::iter::repeat_n(false, missing)),
            TypedColumn::Str(v) => v.extend(std::iter::repeat_n(String::new(), missing)),
        }
    }

    /// Append a value of this column's type. A value of another type is
    /// coerced when lossless-enough (ints to floats, anything to strings) and
    /// otherwise padded.
    fn push(&mut self, value: Value) {
        match (self, value) {
            (TypedColumn::U64(v), Value::U64(x)) => v.push(x),
            (TypedColumn::I64(v), Value::I64(x)) => v.push(x),
            (TypedColumn::I64(v), Value::U64(x)) => v.push(x as i64),
            (TypedColumn::F64(v), Value::F64(x)) => v.push(x),
            (TypedColumn::F64(v), Value::U64(x)) => v.push(x as f64),
            (TypedColumn::F64(v), Value::I64(x)) => v.push(x as f64),
            (TypedColumn::Bool(v), Value::Bool(x)) => v.push(x),
            (TypedColumn::Str(v), Value::Str(x)) => v.push(x),
            (TypedColumn::Str(v), other) => v.push(format!("{other:?}")),
            _ => {}
        }
    }

    fn to_column(&self, name: &str) -> Column {
        match self {
            TypedColumn::U64(v) => Column::new(name.into(), v),
            TypedColumn::I64(v) => Column::new(name.into(), v),
            TypedColumn::F64(v) => Column::new(name.into(), v),
            TypedColumn::Bool(v) => Column::new(name.into(), v),
            TypedColumn::Str(v) => Column::new(name.into(), v),
        }
    }
}

/// Rows of one event target. Columns keep the order fields were first seen.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<(String, TypedColumn)>,
    rows: usize,
}

impl Table {
    pub fn row_count(&self) -> usize {
        self.rows
    }

    pub fn column(&self, name: &str) -> Option<&TypedColumn> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, col)| col)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(n, _)| n.as_str())
    }

    /// Append one row. Columns missing from `fields` get a default value.
    pub fn push_row(&mut self, fields: Vec<(String, Value)>) {
        for (name, value) in fields {
            let rows = self.rows;
            let idx = match self.columns.iter().position(|(n, _)| *n == name) {
                Some(idx) => idx,
                None => {
                    let col = TypedColumn::padded_for(&value, rows);
                    self.columns.push((name, col));
                    self.columns.len() - 1
                }
            };
            let col = &mut self.columns[idx].1;
            if col.len() == rows {
                col.push(value);
            }
        }
        self.rows += 1;
        for (_, col) in &mut self.columns {
            col.pad_to(self.rows);
        }
    }

    pub fn to_dataframe(&self) -> PolarsResult<DataFrame> {
        DataFrame::new(
            self.columns
                .iter()
                .map(|(name, col)| col.to_column(name))
                .collect(),
        )
    }
}

/// Tables keyed by event target.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    pub tables: BTreeMap<String, Table>,
}

impl Recorder {
    pub fn to_dataframes(&self) -> PolarsResult<BTreeMap<String, DataFrame>> {
        self.tables
            .iter()
            .map(|(name, table)| Ok((name.clone(), table.to_dataframe()?)))
            .collect()
    }
}

thread_local! {
    static RECORDER: RefCell<Recorder> = RefCell::default();
}

/// Take everything recorded on this thread.
pub fn drain() -> Recorder {
    RECORDER.with(|r| std::mem::take(&mut *r.borrow_mut()))
}

/// Discard everything recorded on this thread.
pub fn clear() {
    RECORDER.with(|r| *r.borrow_mut() = Recorder::default());
}

// ============================================================================
// Subscriber
// ============================================================================

#[derive(Default)]
struct FieldCollector {
    fields: Vec<(String, Value)>,
}

impl FieldCollector {
    fn put(&mut self, field: &Field, value: Value) {
        self.fields.push((field.name().to_string(), value));
    }
}

impl Visit for FieldCollector {
    fn record_u64(&mut self, field: &Field, value: u64) {
        self.put(field, Value::U64(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.put(field, Value::I64(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.put(field, Value::F64(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.put(field, Value::Bool(value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, Value::Str(value.to_string()));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.put(field, Value::Str(format!("{value:?}")));
    }
}

/// Collects INFO-or-above events into the thread-local [`Recorder`].
///
/// With no target filter every qualifying event is recorded under its target.
#[derive(Debug, Clone, Default)]
pub struct ColumnSubscriber {
    targets: Option<Vec<String>>,
}

impl ColumnSubscriber {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only record events whose target is in `targets`.
    pub fn with_targets(targets: &[&str]) -> Self {
        Self {
            targets: Some(targets.iter().map(|t| t.to_string()).collect()),
        }
    }

    fn wants(&self, target: &str) -> bool {
        self.targets
            .as_ref()
            .is_none_or(|targets| targets.iter().any(|t| t == target))
    }
}

impl Subscriber for ColumnSubscriber {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.is_event()
            && *metadata.level() <= tracing::Level::INFO
            && self.wants(metadata.target())
    }

    fn new_span(&self, _span: &Attributes<'_>) -> Id {
        Id::from_u64(1)
    }

    fn record(&self, _span: &Id, _values: &Record<'_>) {}

    fn record_follows_from(&self, _span: &Id, _follows: &Id) {}

    fn event(&self, event: &Event<'_>) {
        let mut collector = FieldCollector::default();
        event.record(&mut collector);
        let target = event.metadata().target().to_string();
        RECORDER.with(|r| {
            r.borrow_mut()
                .tables
                .entry(target)
                .or_default()
                .push_row(collector.fields);
        });
    }

    fn enter(&self, _span: &Id) {}

    fn exit(&self, _span: &Id) {}
}

// ============================================================================
// Output
// ============================================================================

/// On-disk table format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    #[default]
    Csv,
    Parquet,
}

impl Format {
    pub fn extension(self) -> &'static str {
        match self {
            Format::Csv => "csv",
            Format::Parquet => "parquet",
        }
    }
}

fn io_error(e: std::io::Error) -> PolarsError {
    PolarsError::IO {
        error: e.into(),
        msg: None,
    }
}

/// Write each frame to `{dir}/{name}.{ext}`. Returns the written paths.
pub fn write_tables(
    frames: &mut BTreeMap<String, DataFrame>,
    dir: &Path,
    format: Format,
) -> PolarsResult<Vec<PathBuf>> {
    std::fs::create_dir_all(dir).map_err(io_error)?;
    let mut written = Vec::with_capacity(frames.len());
    for (name, df) in frames.iter_mut() {
        let path = dir.join(format!("{name}.{}", format.extension()));
        let file = File::create(&path).map_err(io_error)?;
        match format {
            Format::Csv => CsvWriter::new(file).include_header(true).finish(df)?,
            Format::Parquet => {
                ParquetWriter::new(file).finish(df)?;
            }
        }
        written.push(path);
    }
    Ok(written)
}

/// Records data events on the current thread for its lifetime and writes the
/// tables to `dir` when dropped.
///
/// Events emitted on other threads (e.g. rayon workers) are not captured.
pub struct ScopedRecorder {
    dir: PathBuf,
    format: Format,
    frames: Option<BTreeMap<String, DataFrame>>,
    guard: Option<DefaultGuard>,
}

impl ScopedRecorder {
    pub fn new(dir: impl Into<PathBuf>, format: Format) -> Self {
        Self::install(dir.into(), format, ColumnSubscriber::new())
    }

    /// Like [`ScopedRecorder::new`], recording only the given targets.
    pub fn with_targets(dir: impl Into<PathBuf>, format: Format, targets: &[&str]) -> Self {
        Self::install(dir.into(), format, ColumnSubscriber::with_targets(targets))
    }

    fn install(dir: PathBuf, format: Format, subscriber: ColumnSubscriber) -> Self {
        clear();
        let guard = tracing::subscriber::set_default(subscriber);
        Self {
            dir,
            format,
            frames: None,
            guard: Some(guard),
        }
    }

    /// Stop recording and return the collected frames. Later calls return the
    /// same frames.
    pub fn frames(&mut self) -> &BTreeMap<String, DataFrame> {
        self.guard.take();
        self.frames.get_or_insert_with(|| {
            drain().to_dataframes().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "dropping recorded tables");
                BTreeMap::new()
            })
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl Drop for ScopedRecorder {
    fn drop(&mut self) {
        self.frames();
        let Some(mut frames) = self.frames.take() else {
            return;
        };
        if frames.is_empty() {
            return;
        }
        match write_tables(&mut frames, &self.dir, self.format) {
            Ok(paths) => tracing::info!(
                tables = paths.len(),
                dir = %self.dir.display(),
                "wrote recorded tables"
            ),
            Err(e) => tracing::error!(
                error = %e,
                dir = %self.dir.display(),
                "failed to write recorded tables"
            ),
        }
    }
}
