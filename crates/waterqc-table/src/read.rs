use std::fs;
use std::io::Cursor;
use std::path::Path;

use polars::prelude::*;

use crate::errors::TableError;

/// Guess the cell separator from the header line. Biosensor vendor exports
/// are semicolon-delimited, everything else is comma-delimited.
pub fn sniff_delimiter(content: &[u8]) -> u8 {
    let first_line = content.split(|byte| *byte == b'\n').next().unwrap_or(&[]);
    let semicolons = first_line.iter().filter(|byte| **byte == b';').count();
    let commas = first_line.iter().filter(|byte| **byte == b',').count();
    if semicolons > commas {
        b';'
    } else {
        b','
    }
}

/// Read a delimited file with the separator sniffed from its header line.
pub fn read_delimited(path: &Path) -> Result<DataFrame, TableError> {
    let content = read_bytes(path)?;
    let separator = sniff_delimiter(&content);
    read_frame(path, &content, separator)
}

/// Read a delimited file with a fixed separator.
pub fn read_delimited_with_separator(path: &Path, separator: u8) -> Result<DataFrame, TableError> {
    let content = read_bytes(path)?;
    read_frame(path, &content, separator)
}

fn read_bytes(path: &Path) -> Result<Vec<u8>, TableError> {
    fs::read(path).map_err(|source| TableError::Read {
        path: path.to_path_buf(),
        source,
    })
}

// Every column is read as text so raw cell formatting (decimal places
// included) survives a read/modify/write cycle.
fn read_frame(path: &Path, content: &[u8], separator: u8) -> Result<DataFrame, TableError> {
    let parse_options = CsvParseOptions::default().with_separator(separator);
    let mut df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .with_parse_options(parse_options)
        .into_reader_with_file_handle(Cursor::new(content))
        .finish()
        .map_err(|source| TableError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    trim_header_names(&mut df).map_err(|source| TableError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(df)
}

fn trim_header_names(df: &mut DataFrame) -> PolarsResult<()> {
    let trimmed: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|name| name.trim().to_string())
        .collect();
    df.set_column_names(trimmed)
}

pub fn column_names(df: &DataFrame) -> Vec<String> {
    df.get_column_names()
        .iter()
        .map(|name| name.to_string())
        .collect()
}
