//! Newline-delimited JSON collection writer.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::Serialize;

/// Appends one JSON document per line to an underlying writer.
pub struct NdjsonWriter<W: Write> {
    label: String,
    writer: BufWriter<W>,
    written: usize,
}

impl NdjsonWriter<File> {
    /// Creates (truncating) the collection file at `path`.
    pub fn create(path: &Path) -> Result<Self, String> {
        let file = File::create(path)
            .map_err(|error| format!("Failed to create {}: {error}", path.display()))?;
        Ok(Self::new(path.display().to_string(), file))
    }
}

impl<W: Write> NdjsonWriter<W> {
    pub fn new(label: impl Into<String>, inner: W) -> Self {
        Self {
            label: label.into(),
            writer: BufWriter::new(inner),
            written: 0,
        }
    }

    pub fn write<T: Serialize>(&mut self, document: &T) -> Result<(), String> {
        serde_json::to_writer(&mut self.writer, document)
            .map_err(|error| format!("Failed to write document to {}: {error}", self.label))?;
        self.writer
            .write_all(b"\n")
            .map_err(|error| format!("Failed to write to {}: {error}", self.label))?;
        self.written += 1;
        Ok(())
    }

    /// Flushes buffered output and returns the inner writer with the count.
    pub fn finish(self) -> Result<(W, usize), String> {
        let written = self.written;
        let label = self.label;
        let inner = self
            .writer
            .into_inner()
            .map_err(|error| format!("Failed to flush {label}: {}", error.error()))?;
        Ok((inner, written))
    }
}
