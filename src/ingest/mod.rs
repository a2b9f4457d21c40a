//! Numeric-file ingestion
//!
//! Reads files of comma-separated integer keys (whitespace-tolerant,
//! one or many lines) for bulk insertion by the driver.

use std::path::Path;

use csv::ReaderBuilder;
use thiserror::Error;

use crate::tree::Key;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Cannot read file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Malformed input: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Not an integer key: {0:?}")]
    InvalidNumber(String),
}

pub type IngestResult<T> = Result<T, IngestError>;

/// Read every comma-separated integer in the file, in file order
pub fn read_keys_from_path<P: AsRef<Path>>(path: P) -> IngestResult<Vec<Key>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true) // Allow varying number of fields per row
        .trim(csv::Trim::All)
        .from_path(path)?;

    let mut keys = Vec::new();
    for result in reader.records() {
        let record = result?;
        for field in record.iter() {
            if field.is_empty() {
                continue;
            }
            let key = field
                .parse::<Key>()
                .map_err(|_| IngestError::InvalidNumber(field.to_string()))?;
            keys.push(key);
        }
    }

    Ok(keys)
}
