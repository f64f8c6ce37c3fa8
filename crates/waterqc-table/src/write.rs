use std::fs;
use std::path::Path;

use polars::prelude::*;

use crate::errors::TableError;

pub fn write_csv(df: &DataFrame, path: &Path) -> Result<(), TableError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|source| TableError::Persist {
                path: path.to_path_buf(),
                source,
            })?;
        }
    }

    let file = fs::File::create(path).map_err(|source| TableError::Persist {
        path: path.to_path_buf(),
        source,
    })?;
    let mut out = df.clone();
    CsvWriter::new(file)
        .include_header(true)
        .finish(&mut out)
        .map_err(|source| TableError::Write {
            path: path.to_path_buf(),
            source,
        })
}

/// Write through a sibling temp file and rename, so an interrupted process
/// never leaves a half-written table behind.
pub fn write_csv_atomic(df: &DataFrame, path: &Path) -> Result<(), TableError> {
    let tmp = path.with_extension("csv.tmp");
    write_csv(df, &tmp)?;
    fs::rename(&tmp, path).map_err(|source| TableError::Persist {
        path: path.to_path_buf(),
        source,
    })
}
