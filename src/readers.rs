//! Flat-file source readers.
//!
//! Missing files are an expected state (ingestion has not run yet) and come
//! back as `Ok(None)`. Unreadable or unparseable content is an error.

use std::fs::File;
use std::io::ErrorKind;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// One untyped row, header name to value. CSV cells arrive as strings.
type RawRecord = Map<String, Value>;

fn open(path: &Path) -> Result<Option<File>> {
    match File::open(path) {
        Ok(file) => Ok(Some(file)),
        Err(err) if err.kind() == ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "source file not present");
            Ok(None)
        }
        Err(source) => Err(Error::Io {
            path: path.display().to_string(),
            source,
        }),
    }
}

fn typed_row<T: DeserializeOwned>(path: &Path, row: RawRecord) -> Result<T> {
    serde_json::from_value(Value::Object(row)).map_err(|source| Error::Json {
        path: path.display().to_string(),
        source,
    })
}

/// Reads a CSV export into typed rows. Every record must have exactly as
/// many cells as the header row.
pub fn read_csv<T: DeserializeOwned>(path: &Path) -> Result<Option<Vec<T>>> {
    let Some(file) = open(path)? else {
        return Ok(None);
    };

    let csv_error = |source| Error::Csv {
        path: path.display().to_string(),
        source,
    };

    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(file);
    let headers = reader.headers().map_err(csv_error)?.clone();

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result.map_err(csv_error)?;
        let row: RawRecord = headers
            .iter()
            .zip(record.iter())
            .map(|(header, cell)| (header.to_string(), Value::String(cell.to_string())))
            .collect();
        rows.push(typed_row(path, row)?);
    }

    tracing::debug!(path = %path.display(), rows = rows.len(), "loaded csv");
    Ok(Some(rows))
}

pub fn read_json(path: &Path) -> Result<Option<Value>> {
    let Some(file) = open(path)? else {
        return Ok(None);
    };

    let value = serde_json::from_reader(std::io::BufReader::new(file)).map_err(|source| {
        Error::Json {
            path: path.display().to_string(),
            source,
        }
    })?;
    Ok(Some(value))
}

/// Reads a JSON export of a flat dataset: either a top-level array of
/// objects, or an object holding that array under `rows` or `data`.
pub fn read_json_rows<T: DeserializeOwned>(path: &Path) -> Result<Option<Vec<T>>> {
    let Some(value) = read_json(path)? else {
        return Ok(None);
    };

    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut object) => match object.remove("rows").or_else(|| object.remove("data")) {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(Error::InvalidInput(format!(
                    "{} has no row array",
                    path.display()
                )))
            }
        },
        _ => {
            return Err(Error::InvalidInput(format!(
                "{} is not a row array",
                path.display()
            )))
        }
    };

    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| match item {
            Value::Object(row) => typed_row(path, row),
            other => Err(Error::InvalidInput(format!(
                "{} row {index} is not an object: {other}",
                path.display()
            ))),
        })
        .collect::<Result<Vec<T>>>()
        .map(Some)
}

/// Reads `<dir>/<stem>.csv`, falling back to `<dir>/<stem>.json`.
pub fn read_dataset<T: DeserializeOwned>(dir: &Path, stem: &str) -> Result<Option<Vec<T>>> {
    if let Some(rows) = read_csv(&dir.join(format!("{stem}.csv")))? {
        return Ok(Some(rows));
    }
    read_json_rows(&dir.join(format!("{stem}.json")))
}
