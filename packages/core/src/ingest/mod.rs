//! Row Ingest
//!
//! Turns feed records into merge requests:
//!
//! - [`csv_source`] - reading rows (with source line numbers) from CSV
//! - [`normalizer`] - coercing a raw row into a `MergeRequest`

pub mod csv_source;
pub mod error;
pub mod normalizer;

pub use csv_source::{CsvRowSource, CsvRows, FEED_COLUMNS};
pub use error::{NormalizationError, SourceError};
pub use normalizer::normalize;
