//! CSV Row Source
//!
//! Reads a provenance feed with a header row naming the columns
//! (`left`, `left_type`, `concept`, `right`, `right_type`,
//! `relation_type`, `user_id`). Columns may appear in any order, optional
//! ones may be missing entirely, and records may be shorter than the
//! header. A record that cannot be decoded is yielded as a malformed
//! [`SourceRow`] so it shows up in the batch report.

use crate::ingest::error::SourceError;
use crate::models::{RawRow, SourceRow};
use csv::{Reader, ReaderBuilder, StringRecord, Trim};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Column names understood by the normalizer
pub const FEED_COLUMNS: [&str; 7] = [
    "left",
    "left_type",
    "concept",
    "right",
    "right_type",
    "relation_type",
    "user_id",
];

/// Header-aware CSV reader yielding [`SourceRow`]s
pub struct CsvRowSource<R: Read> {
    reader: Reader<R>,
    headers: StringRecord,
}

impl CsvRowSource<File> {
    /// Open a local CSV file and read its header
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| SourceError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_reader(file)
    }
}

impl<R: Read> CsvRowSource<R> {
    /// Wrap any reader and read its header
    pub fn from_reader(input: R) -> Result<Self, SourceError> {
        let mut reader = ReaderBuilder::new()
            .flexible(true)
            .trim(Trim::All)
            .from_reader(input);
        let headers = reader.headers()?.clone();

        let known = headers
            .iter()
            .filter(|h| FEED_COLUMNS.contains(h))
            .count();
        if known == 0 {
            tracing::warn!(
                "CSV header has none of the expected columns {:?}; every row will fail",
                FEED_COLUMNS
            );
        }

        Ok(Self { reader, headers })
    }

    /// Header as read from the source
    pub fn headers(&self) -> &StringRecord {
        &self.headers
    }

    /// Consume the source as an iterator of rows
    pub fn rows(self) -> CsvRows<R> {
        CsvRows {
            reader: self.reader,
            headers: self.headers,
            record: StringRecord::new(),
            done: false,
        }
    }
}

/// Iterator over the records of a [`CsvRowSource`]
pub struct CsvRows<R: Read> {
    reader: Reader<R>,
    headers: StringRecord,
    record: StringRecord,
    done: bool,
}

impl<R: Read> Iterator for CsvRows<R> {
    type Item = SourceRow;

    fn next(&mut self) -> Option<SourceRow> {
        if self.done {
            return None;
        }

        match self.reader.read_record(&mut self.record) {
            Ok(true) => {
                let line = self.record.position().map_or(0, |p| p.line());
                match self.record.deserialize::<RawRow>(Some(&self.headers)) {
                    Ok(row) => Some(SourceRow::new(line, row)),
                    Err(e) => Some(SourceRow::malformed(line, e.to_string())),
                }
            }
            Ok(false) => {
                self.done = true;
                None
            }
            Err(e) => {
                let line = e.position().map_or(0, |p| p.line());
                // An I/O failure leaves the reader in an unknown state
                if e.is_io_error() {
                    self.done = true;
                }
                Some(SourceRow::malformed(line, e.to_string()))
            }
        }
    }
}
