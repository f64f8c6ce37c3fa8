use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use polars::prelude::*;

use waterqc_table::read::read_delimited_with_separator;
use waterqc_table::timestamp::parse_timestamp;
use waterqc_table::write::write_csv_atomic;

use crate::checks::{FAIL, PASS};
use crate::error::Result;

/// Percent of PASS and percent of FAIL among the PASS/FAIL cells of each
/// column, as a two-row frame sharing the input schema. Columns without any
/// PASS/FAIL cells stay empty.
pub fn percentage_rows(df: &DataFrame) -> Result<DataFrame> {
    let mut pass_row = Vec::with_capacity(df.width());
    let mut fail_row = Vec::with_capacity(df.width());

    for column in df.get_columns() {
        let values = column.str()?;
        let mut pass = 0usize;
        let mut fail = 0usize;
        for idx in 0..values.len() {
            match values.get(idx) {
                Some(value) if value == PASS => pass += 1,
                Some(value) if value == FAIL => fail += 1,
                _ => {}
            }
        }
        let total = pass + fail;
        if total == 0 {
            pass_row.push(String::new());
            fail_row.push(String::new());
        } else {
            pass_row.push(format!("{:.2}", pass as f64 / total as f64 * 100.0));
            fail_row.push(format!("{:.2}", fail as f64 / total as f64 * 100.0));
        }
    }

    let columns: Vec<Column> = df
        .get_column_names()
        .iter()
        .zip(pass_row.into_iter().zip(fail_row))
        .map(|(name, (pass, fail))| Series::new((*name).clone(), vec![pass, fail]).into())
        .collect();
    Ok(DataFrame::new(columns)?)
}

/// The flagged table with its two percentage summary rows prepended.
pub fn prepend_percentage_rows(df: &DataFrame) -> Result<DataFrame> {
    let summary = percentage_rows(df)?;
    Ok(summary.vstack(df)?)
}

/// Derive the trusted subset: rows whose `overall_dq_check` is PASS, with
/// every other `*_flag` column dropped. Percentage rows and the metadata row
/// fall out of the filter along the way.
pub fn build_cleaned(flagged: &DataFrame) -> Result<DataFrame> {
    let has_overall = flagged
        .get_column_names()
        .iter()
        .any(|name| name.as_str() == "overall_dq_check");
    if !has_overall {
        return Ok(flagged.clone());
    }

    let overall = flagged.column("overall_dq_check")?.str()?;
    let mask_values: Vec<bool> = (0..overall.len())
        .map(|idx| overall.get(idx) == Some(PASS))
        .collect();
    let mask = BooleanChunked::from_slice("mask".into(), &mask_values);
    let filtered = flagged.filter(&mask)?;

    let keep: Vec<String> = filtered
        .get_column_names()
        .iter()
        .filter(|name| !name.ends_with("_flag") || name.as_str() == "overall_dq_check")
        .map(|name| name.to_string())
        .collect();
    Ok(filtered.select(keep)?)
}

/// Stable sort by a textual timestamp column; rows whose timestamp does not
/// parse keep their relative order at the end.
pub fn sort_by_timestamp_column(df: &DataFrame, column: &str) -> Result<DataFrame> {
    let values = df.column(column)?.str()?;
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by_key(|&idx| {
        let raw = values.get(idx).unwrap_or("");
        match parse_timestamp(raw, None) {
            Some(timestamp) => (false, timestamp),
            None => (true, NaiveDateTime::MAX),
        }
    });

    let indices: Vec<IdxSize> = order.into_iter().map(|idx| idx as IdxSize).collect();
    Ok(df.take(&IdxCa::from_vec("idx".into(), indices))?)
}

/// Drop duplicate rows by the given key columns, keeping the first
/// occurrence.
pub fn dedup_keep_first(df: &DataFrame, key_columns: &[&str]) -> Result<DataFrame> {
    let mut columns = Vec::with_capacity(key_columns.len());
    for name in key_columns {
        columns.push(df.column(name)?.str()?);
    }

    let mut seen = HashSet::new();
    let mut keep: Vec<IdxSize> = Vec::with_capacity(df.height());
    for idx in 0..df.height() {
        let key: Vec<String> = columns
            .iter()
            .map(|column| column.get(idx).unwrap_or("").to_string())
            .collect();
        if seen.insert(key) {
            keep.push(idx as IdxSize);
        }
    }
    Ok(df.take(&IdxCa::from_vec("idx".into(), keep))?)
}

/// Reproject a frame onto a fixed column order, filling absent columns with
/// empty text.
pub fn conform_columns(df: &DataFrame, column_order: &[&str]) -> Result<DataFrame> {
    let height = df.height();
    let mut columns: Vec<Column> = Vec::with_capacity(column_order.len());
    for name in column_order {
        match df.column(name) {
            Ok(column) => columns.push(column.clone()),
            Err(_) => {
                columns.push(Series::new((*name).into(), vec![String::new(); height]).into())
            }
        }
    }
    Ok(DataFrame::new(columns)?)
}

/// One synthetic unit row on top of the data rows.
pub fn prepend_unit_row(df: &DataFrame, units: &[&str]) -> Result<DataFrame> {
    let columns: Vec<Column> = df
        .get_column_names()
        .iter()
        .zip(units)
        .map(|(name, unit)| Series::new((*name).clone(), vec![unit.to_string()]).into())
        .collect();
    let unit_frame = DataFrame::new(columns)?;
    Ok(unit_frame.vstack(df)?)
}

fn empty_frame(column_order: &[&str]) -> Result<DataFrame> {
    let columns: Vec<Column> = column_order
        .iter()
        .map(|name| Series::new((*name).into(), Vec::<String>::new()).into())
        .collect();
    Ok(DataFrame::new(columns)?)
}

/// The general-file transaction: read the full existing state (skipping the
/// leading unit row), merge the new rows, deduplicate by key, sort by the
/// primary timestamp and rewrite atomically. Callers must serialize
/// concurrent writers externally.
pub fn update_general_file(
    general_path: &Path,
    new_rows: &DataFrame,
    column_order: &[&str],
    units: &[&str],
    dedup_keys: &[&str],
    sort_column: &str,
) -> Result<PathBuf> {
    let existing = if general_path.exists() {
        let df = read_delimited_with_separator(general_path, b',')?;
        let data = if df.height() > 0 {
            df.slice(1, df.height() - 1)
        } else {
            df
        };
        conform_columns(&data, column_order)?
    } else {
        empty_frame(column_order)?
    };

    let incoming = conform_columns(new_rows, column_order)?;
    let merged = existing.vstack(&incoming)?;
    let merged = dedup_keep_first(&merged, dedup_keys)?;
    let merged = sort_by_timestamp_column(&merged, sort_column)?;

    let with_unit = prepend_unit_row(&merged, units)?;
    write_csv_atomic(&with_unit, general_path)?;
    Ok(general_path.to_path_buf())
}
