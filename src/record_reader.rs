//! Header-driven tabular record reader.
//!
//! Columns are looked up by header name first and fall back to a fixed
//! position when the header does not carry that name. Structurally broken
//! rows are counted and skipped. An I/O failure ends iteration and is kept
//! so the caller can fail the source through `ensure_complete`.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use log::{debug, warn};

/// Open tabular source with resolved header positions.
pub struct RecordReader<R: Read> {
    label: String,
    reader: csv::Reader<R>,
    header_positions: HashMap<String, usize>,
    rows_read: usize,
    rows_skipped: usize,
    read_error: Option<String>,
}

/// One data row, exposing header-resolved field access.
pub struct Row {
    record: csv::StringRecord,
    position: usize,
}

impl RecordReader<BufReader<File>> {
    /// Opens `path` and consumes its header row.
    pub fn open(path: &Path) -> Result<Self, String> {
        let file = File::open(path)
            .map_err(|error| format!("Failed to open {}: {error}", path.display()))?;
        Self::from_reader(path.display().to_string(), BufReader::new(file))
    }
}

impl<R: Read> RecordReader<R> {
    /// Wraps any reader; `label` only appears in log and error messages.
    pub fn from_reader(label: impl Into<String>, inner: R) -> Result<Self, String> {
        let label = label.into();
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::Headers)
            .from_reader(inner);
        let headers = reader
            .headers()
            .map_err(|error| format!("Failed to read header of {label}: {error}"))?
            .clone();
        let header_positions = headers
            .iter()
            .enumerate()
            .map(|(index, name)| (name.trim_start_matches('\u{feff}').to_string(), index))
            .collect();
        Ok(Self {
            label,
            reader,
            header_positions,
            rows_read: 0,
            rows_skipped: 0,
            read_error: None,
        })
    }

    /// Position of `name` in the header, or `fallback` if the header lacks it.
    pub fn column(&self, name: &str, fallback: usize) -> usize {
        self.header_positions
            .get(name)
            .copied()
            .unwrap_or(fallback)
    }

    /// Next readable row. Rows the tokenizer rejects are skipped and counted;
    /// an I/O error ends iteration and is recorded.
    pub fn next_row(&mut self) -> Option<Row> {
        if self.read_error.is_some() {
            return None;
        }
        loop {
            let mut record = csv::StringRecord::new();
            match self.reader.read_record(&mut record) {
                Ok(true) => {
                    self.rows_read += 1;
                    return Some(Row {
                        record,
                        position: self.rows_read,
                    });
                }
                Ok(false) => return None,
                Err(error) => {
                    if matches!(error.kind(), csv::ErrorKind::Io(_)) {
                        warn!(
                            "{}: read failed after row {}: {error}",
                            self.label, self.rows_read
                        );
                        self.read_error = Some(error.to_string());
                        return None;
                    }
                    self.rows_read += 1;
                    self.rows_skipped += 1;
                    debug!(
                        "{}: skipping malformed row {}: {error}",
                        self.label, self.rows_read
                    );
                }
            }
        }
    }

    /// Records that a row was rejected by the caller's own validation.
    pub fn skip_row(&mut self, row: &Row, reason: &str) {
        self.rows_skipped += 1;
        debug!("{}: skipping row {}: {reason}", self.label, row.position());
    }

    /// `Err` when iteration stopped on an I/O failure rather than at the end
    /// of the source.
    pub fn ensure_complete(&self) -> Result<(), String> {
        match &self.read_error {
            Some(error) => Err(format!(
                "Failed to read {} after row {}: {error}",
                self.label, self.rows_read
            )),
            None => Ok(()),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn rows_read(&self) -> usize {
        self.rows_read
    }

    pub fn rows_skipped(&self) -> usize {
        self.rows_skipped
    }
}

impl Row {
    /// Raw field at `index`, if the row is that long.
    pub fn field(&self, index: usize) -> Option<&str> {
        self.record.get(index)
    }

    /// Trimmed field parsed as `T`; `None` when missing, empty or unparseable.
    pub fn parse<T: std::str::FromStr>(&self, index: usize) -> Option<T> {
        let raw = self.field(index)?.trim();
        if raw.is_empty() {
            return None;
        }
        raw.parse().ok()
    }

    /// One-based data row position, for diagnostics.
    pub fn position(&self) -> usize {
        self.position
    }
}
