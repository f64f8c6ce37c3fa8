use std::path::Path;

use chrono::NaiveDateTime;
use polars::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use waterqc_table::read::{column_names, read_delimited, read_delimited_with_separator};
use waterqc_table::resolve::match_raw_column;
use waterqc_table::timestamp::{format_timestamp, parse_epoch_seconds, parse_timestamp};
use waterqc_table::write::write_csv_atomic;

use crate::checks::is_missing;
use crate::error::Result;
use crate::matcher::{assign_nearest, matched_count, MatchPolicy};

/// Columns appended to the primary table.
pub const SECONDARY_TIMESTAMP_COLUMN: &str = "Biosensor TimeStamp (UTC)";
pub const SECONDARY_ACTIVITY_COLUMN: &str = "Activity";
pub const SECONDARY_SAMPLE_COLUMN: &str = "Sample Numb";

/// Columns required of the vendor results file.
const UID_COLUMN: &str = "UID";
const ACTIVITY_SOURCE_COLUMN: &str = "mU";
const SAMPLE_SOURCE_COLUMN: &str = "activeSample";

/// The narrow-band fluorescence channel logs on its own cadence and can land
/// on rows without any probe measurement; those strays get relocated.
const TRYPTOPHAN_COLUMN: &str = "TRP RFU";
/// Modem diagnostics; never counts as measurement data.
const SIGNAL_STRENGTH_COLUMN: &str = "Signal strength";

const TIMESTAMP_CANDIDATES: &[&str] = &[
    "TimeStamp",
    "Timestamp",
    "Time",
    "Time (UTC)",
    "Timestamp (UTC)",
    "Time_UTC",
];

/// Probe channels that mark a row as a real measurement row.
const PRIMARY_MEASUREMENT_COLUMNS: &[&str] = &[
    "BGA PC RFU",
    "BGA PC ug/L",
    "Chlorophyll RFU",
    "Chlorophyll ug/L",
    "Cond uS/cm",
    "fDOM QSU",
    "fDOM RFU",
    "pH",
    "SpCond uS/cm",
    "Temp C",
    "Turbidity",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InjectSummary {
    pub merged_rows: usize,
    pub total_secondary_rows: usize,
    pub relocated_values: usize,
    pub dropped_rows: usize,
}

/// Merge biosensor readings into a primary export in place. The table is
/// always rewritten with the three injected columns appended (empty when
/// nothing merges) so downstream consumers see a stable schema.
pub fn inject_biosensor(primary_path: &Path, secondary_path: Option<&Path>) -> Result<InjectSummary> {
    let df = read_delimited(primary_path)?;
    let mut summary = InjectSummary::default();

    let headers = column_names(&df);
    let original_columns: Vec<String> = headers
        .iter()
        .filter(|name| !is_injected_column(name.as_str()))
        .cloned()
        .collect();

    let mut df = ensure_injected_columns(df)?;

    let Some(timestamp_column) =
        match_raw_column(&original_columns, TIMESTAMP_CANDIDATES).map(str::to_string)
    else {
        warn!(
            "no timestamp column found in {}; leaving biosensor columns empty",
            primary_path.display()
        );
        return finish(&mut df, primary_path, &original_columns, summary);
    };

    let (relocated_df, relocated, dropped) = relocate_stray_tryptophan(df, &timestamp_column)?;
    let mut df = relocated_df;
    summary.relocated_values = relocated;
    summary.dropped_rows = dropped;

    let primary_ts = parse_column_timestamps(&df, &timestamp_column)?;
    let valid: Vec<(usize, NaiveDateTime)> = primary_ts
        .iter()
        .enumerate()
        .filter_map(|(idx, ts)| ts.map(|ts| (idx, ts)))
        .collect();
    if valid.is_empty() {
        warn!(
            "no valid timestamps in {}; leaving biosensor columns empty",
            primary_path.display()
        );
        return finish(&mut df, primary_path, &original_columns, summary);
    }

    let Some(secondary_path) = secondary_path else {
        info!("no biosensor file provided; leaving biosensor columns empty");
        return finish(&mut df, primary_path, &original_columns, summary);
    };

    let secondary = match read_delimited_with_separator(secondary_path, b';') {
        Ok(secondary) => secondary,
        Err(err) => {
            warn!("failed to read biosensor CSV {}: {err}", secondary_path.display());
            return finish(&mut df, primary_path, &original_columns, summary);
        }
    };
    let secondary_headers = column_names(&secondary);
    let missing_required = [UID_COLUMN, ACTIVITY_SOURCE_COLUMN, SAMPLE_SOURCE_COLUMN]
        .iter()
        .any(|required| !secondary_headers.iter().any(|name| name == required));
    if missing_required {
        warn!(
            "biosensor CSV {} is missing required columns (UID, mU, activeSample)",
            secondary_path.display()
        );
        return finish(&mut df, primary_path, &original_columns, summary);
    }

    // Only biosensor rows inside the primary time range are candidates.
    let range_start = valid.iter().map(|(_, ts)| *ts).min().unwrap_or(NaiveDateTime::MIN);
    let range_end = valid.iter().map(|(_, ts)| *ts).max().unwrap_or(NaiveDateTime::MAX);
    let uid = secondary.column(UID_COLUMN)?.str()?;
    let mut secondary_rows = Vec::new();
    let mut secondary_ts = Vec::new();
    for idx in 0..secondary.height() {
        let Some(ts) = parse_epoch_seconds(uid.get(idx).unwrap_or("")) else {
            continue;
        };
        if ts < range_start || ts > range_end {
            continue;
        }
        secondary_rows.push(idx);
        secondary_ts.push(ts);
    }
    summary.total_secondary_rows = secondary_ts.len();
    if secondary_ts.is_empty() {
        info!(
            "no biosensor rows within {} to {}; leaving columns empty",
            format_timestamp(range_start),
            format_timestamp(range_end)
        );
        return finish(&mut df, primary_path, &original_columns, summary);
    }

    // Prefer rows that carry probe measurements; an export with none falls
    // back to every valid-timestamp row.
    let measurement_flags = measurement_row_flags(&df, &original_columns)?;
    let mut candidates: Vec<(usize, NaiveDateTime)> = valid
        .iter()
        .copied()
        .filter(|(idx, _)| measurement_flags[*idx])
        .collect();
    if candidates.is_empty() {
        debug!("no measurement rows found; matching against all valid rows");
        candidates = valid;
    }
    let candidate_ts: Vec<NaiveDateTime> = candidates.iter().map(|(_, ts)| *ts).collect();

    let assignments = assign_nearest(&candidate_ts, &secondary_ts, MatchPolicy::BestReplace);
    summary.merged_rows = matched_count(&assignments);

    let height = df.height();
    let mut injected_ts = column_values(&df, SECONDARY_TIMESTAMP_COLUMN, height)?;
    let mut injected_activity = column_values(&df, SECONDARY_ACTIVITY_COLUMN, height)?;
    let mut injected_sample = column_values(&df, SECONDARY_SAMPLE_COLUMN, height)?;

    let activity = secondary.column(ACTIVITY_SOURCE_COLUMN)?.str()?;
    let sample = secondary.column(SAMPLE_SOURCE_COLUMN)?.str()?;
    for (slot, (candidate_idx, _)) in assignments.iter().zip(&candidates) {
        let Some(assignment) = slot else { continue };
        let source_row = secondary_rows[assignment.secondary];
        injected_ts[*candidate_idx] = format_timestamp(secondary_ts[assignment.secondary]);
        injected_activity[*candidate_idx] = activity.get(source_row).unwrap_or("").to_string();
        injected_sample[*candidate_idx] = sample.get(source_row).unwrap_or("").to_string();
    }

    df.replace(
        SECONDARY_TIMESTAMP_COLUMN,
        Series::new(SECONDARY_TIMESTAMP_COLUMN.into(), injected_ts),
    )?;
    df.replace(
        SECONDARY_ACTIVITY_COLUMN,
        Series::new(SECONDARY_ACTIVITY_COLUMN.into(), injected_activity),
    )?;
    df.replace(
        SECONDARY_SAMPLE_COLUMN,
        Series::new(SECONDARY_SAMPLE_COLUMN.into(), injected_sample),
    )?;

    finish(&mut df, primary_path, &original_columns, summary)
}

fn is_injected_column(name: &str) -> bool {
    name == SECONDARY_TIMESTAMP_COLUMN
        || name == SECONDARY_ACTIVITY_COLUMN
        || name == SECONDARY_SAMPLE_COLUMN
}

fn ensure_injected_columns(mut df: DataFrame) -> Result<DataFrame> {
    let height = df.height();
    let present = column_names(&df);
    let mut additions: Vec<Column> = Vec::new();
    for name in [
        SECONDARY_TIMESTAMP_COLUMN,
        SECONDARY_ACTIVITY_COLUMN,
        SECONDARY_SAMPLE_COLUMN,
    ] {
        if !present.iter().any(|existing| existing == name) {
            additions.push(Series::new(name.into(), vec![String::new(); height]).into());
        }
    }
    if !additions.is_empty() {
        df.hstack_mut(&additions)?;
    }
    Ok(df)
}

/// Write the table back with the injected columns appended after the
/// original layout.
fn finish(
    df: &mut DataFrame,
    path: &Path,
    original_columns: &[String],
    summary: InjectSummary,
) -> Result<InjectSummary> {
    let mut order: Vec<String> = original_columns.to_vec();
    order.extend(
        [
            SECONDARY_TIMESTAMP_COLUMN,
            SECONDARY_ACTIVITY_COLUMN,
            SECONDARY_SAMPLE_COLUMN,
        ]
        .map(String::from),
    );
    let ordered = df.select(order)?;
    write_csv_atomic(&ordered, path)?;
    Ok(summary)
}

fn parse_column_timestamps(df: &DataFrame, column: &str) -> Result<Vec<Option<NaiveDateTime>>> {
    let values = df.column(column)?.str()?;
    Ok((0..values.len())
        .map(|idx| parse_timestamp(values.get(idx).unwrap_or(""), None))
        .collect())
}

fn column_values(df: &DataFrame, column: &str, height: usize) -> Result<Vec<String>> {
    match df.column(column) {
        Ok(col) => {
            let values = col.str()?;
            Ok((0..height)
                .map(|idx| values.get(idx).unwrap_or("").to_string())
                .collect())
        }
        Err(_) => Ok(vec![String::new(); height]),
    }
}

/// True per row when any probe measurement channel holds a value.
fn measurement_row_flags(df: &DataFrame, headers: &[String]) -> Result<Vec<bool>> {
    let mut measurement_columns = Vec::new();
    for canonical in PRIMARY_MEASUREMENT_COLUMNS {
        if let Some(actual) = match_raw_column(headers, &[*canonical]) {
            measurement_columns.push(df.column(actual)?.str()?.clone());
        }
    }

    Ok((0..df.height())
        .map(|idx| {
            measurement_columns
                .iter()
                .any(|column| !is_missing(column.get(idx).unwrap_or("")))
        })
        .collect())
}

/// Move stray fluorescence readings onto the nearest measurement row that
/// lacks one, then drop donor rows that end up carrying nothing but their
/// timestamp (signal strength does not count as data). Returns the table,
/// the relocation count and the dropped-row count.
fn relocate_stray_tryptophan(
    df: DataFrame,
    timestamp_column: &str,
) -> Result<(DataFrame, usize, usize)> {
    let headers = column_names(&df);
    let Some(tryptophan_column) =
        match_raw_column(&headers, &[TRYPTOPHAN_COLUMN]).map(str::to_string)
    else {
        return Ok((df, 0, 0));
    };
    let signal_column = match_raw_column(&headers, &[SIGNAL_STRENGTH_COLUMN]).map(str::to_string);

    let timestamps = parse_column_timestamps(&df, timestamp_column)?;
    let measurement_flags = measurement_row_flags(&df, &headers)?;
    let height = df.height();
    let mut tryptophan_values = column_values(&df, &tryptophan_column, height)?;

    let mut relocated = 0usize;
    let mut dropped_rows: Vec<usize> = Vec::new();

    for donor in 0..height {
        if measurement_flags[donor] || is_missing(&tryptophan_values[donor]) {
            continue;
        }
        let Some(donor_ts) = timestamps[donor] else { continue };

        // Nearest measurement row still missing a fluorescence value; an
        // existing value is never overwritten.
        let mut target: Option<(usize, i64)> = None;
        for (idx, flag) in measurement_flags.iter().enumerate() {
            if !flag || !is_missing(&tryptophan_values[idx]) {
                continue;
            }
            let Some(ts) = timestamps[idx] else { continue };
            let distance = (ts - donor_ts).num_milliseconds().abs();
            if target.is_none_or(|(_, current)| distance < current) {
                target = Some((idx, distance));
            }
        }
        let Some((target_idx, _)) = target else { continue };

        tryptophan_values[target_idx] = std::mem::take(&mut tryptophan_values[donor]);
        relocated += 1;

        if donor_row_is_empty(
            &df,
            donor,
            timestamp_column,
            &tryptophan_column,
            signal_column.as_deref(),
        )? {
            dropped_rows.push(donor);
        }
    }

    if relocated == 0 {
        return Ok((df, 0, 0));
    }

    let mut df = df;
    df.replace(
        &tryptophan_column,
        Series::new(tryptophan_column.as_str().into(), tryptophan_values),
    )?;

    let dropped = dropped_rows.len();
    if dropped > 0 {
        let keep: Vec<IdxSize> = (0..height)
            .filter(|idx| !dropped_rows.contains(idx))
            .map(|idx| idx as IdxSize)
            .collect();
        df = df.take(&IdxCa::from_vec("idx".into(), keep))?;
        debug!("dropped {dropped} emptied stray rows after relocation");
    }

    Ok((df, relocated, dropped))
}

/// True when nothing but the timestamp, the relocated column and signal
/// strength is populated.
fn donor_row_is_empty(
    df: &DataFrame,
    row: usize,
    timestamp_column: &str,
    tryptophan_column: &str,
    signal_column: Option<&str>,
) -> Result<bool> {
    for column in df.get_columns() {
        let name = column.name().as_str();
        if name == timestamp_column || name == tryptophan_column {
            continue;
        }
        if signal_column.is_some_and(|signal| signal == name) {
            continue;
        }
        let values = column.str()?;
        if !is_missing(values.get(row).unwrap_or("")) {
            return Ok(false);
        }
    }
    Ok(true)
}
