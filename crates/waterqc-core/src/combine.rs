use std::fs;
use std::path::{Path, PathBuf};

use polars::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

use waterqc_table::model::{Origin, CLEANED_PREFIX};
use waterqc_table::read::read_delimited;
use waterqc_table::timestamp::parse_timestamp;
use waterqc_table::write::write_csv;

use crate::checks::is_missing;
use crate::error::{PipelineError, Result};
use crate::matcher::{assign_nearest, matched_count, MatchPolicy};
use crate::outputs::{
    conform_columns, prepend_unit_row, sort_by_timestamp_column, update_general_file,
};

pub const TIMESTAMP_COLUMN: &str = "TimeStamp";
pub const ORIGIN_COLUMN: &str = "Origin";
pub const ACTIVITY_COLUMN: &str = "Activity - Biosensor";
pub const SONDE_TIMESTAMP_COLUMN: &str = "Sonde TimeStamp";
pub const BIOSENSOR_TIMESTAMP_COLUMN: &str = "Biosensor TimeStamp";

/// Schema of combined outputs. Fixed so every period file and the general
/// file line up column-for-column regardless of which channels a particular
/// export carried.
pub const COLUMN_ORDER: &[&str] = &[
    TIMESTAMP_COLUMN,
    ORIGIN_COLUMN,
    ACTIVITY_COLUMN,
    "BGA PC RFU",
    "BGA PC ug/L",
    "Chlorophyll RFU",
    "Chlorophyll ug/L",
    "Cond uS/cm",
    "fDOM QSU",
    "fDOM RFU",
    "TRP RFU",
    "pH",
    "Signal strength",
    "SpCond uS/cm",
    "Temp C",
    "Turbidity",
];

const UNIT_VALUES: &[&str] = &[
    "dd-mm-yyyy hh:mm:ss",
    "",
    "mMFU/100ml",
    "RFU",
    "ug/L",
    "RFU",
    "ug/L",
    "uS/cm",
    "QSU",
    "RFU",
    "RFU",
    "pH",
    "dBm",
    "uS/cm",
    "C",
    "NTU",
];

pub fn measurement_columns() -> Vec<&'static str> {
    COLUMN_ORDER
        .iter()
        .copied()
        .filter(|name| *name != TIMESTAMP_COLUMN && *name != ORIGIN_COLUMN)
        .collect()
}

pub fn aligned_column_order() -> Vec<&'static str> {
    let mut order = vec![SONDE_TIMESTAMP_COLUMN, BIOSENSOR_TIMESTAMP_COLUMN];
    order.extend(measurement_columns());
    order
}

fn aligned_unit_values() -> Vec<&'static str> {
    let mut units = vec![UNIT_VALUES[0], UNIT_VALUES[0]];
    units.extend(
        COLUMN_ORDER
            .iter()
            .zip(UNIT_VALUES)
            .filter(|(name, _)| **name != TIMESTAMP_COLUMN && **name != ORIGIN_COLUMN)
            .map(|(_, unit)| *unit),
    );
    units
}

pub type PeriodKey = (String, String);

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FusionStats {
    pub total_secondary_rows: usize,
    pub matched_rows: usize,
    pub unmatched_rows: usize,
    pub unmatched_percentage: f64,
}

impl FusionStats {
    fn new(total: usize, matched: usize) -> Self {
        let unmatched = total - matched;
        Self {
            total_secondary_rows: total,
            matched_rows: matched,
            unmatched_rows: unmatched,
            unmatched_percentage: if total == 0 {
                0.0
            } else {
                unmatched as f64 / total as f64 * 100.0
            },
        }
    }
}

/// Period pairs of cleaned files that share a `<start>_to_<end>` key.
pub fn find_pairs(input_dir: &Path) -> Result<Vec<(PeriodKey, PathBuf, PathBuf)>> {
    let sonde = collect_period_files(input_dir, Origin::Sonde)?;
    let biosensor = collect_period_files(input_dir, Origin::Biosensor)?;

    let mut pairs = Vec::new();
    for (key, sonde_path) in &sonde {
        if let Some((_, biosensor_path)) = biosensor.iter().find(|(other, _)| other == key) {
            pairs.push((key.clone(), sonde_path.clone(), biosensor_path.clone()));
        }
    }
    pairs.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(pairs)
}

fn collect_period_files(input_dir: &Path, origin: Origin) -> Result<Vec<(PeriodKey, PathBuf)>> {
    let prefix = format!("{CLEANED_PREFIX}{}_", origin.as_str());
    let pattern = input_dir.join(format!("{prefix}*_to_*.csv"));
    let pattern = pattern.to_string_lossy().into_owned();

    let mut files = Vec::new();
    for entry in glob::glob(&pattern)
        .map_err(|err| PipelineError::Validation(format!("bad period glob: {err}")))?
    {
        let Ok(path) = entry else { continue };
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        if let Some(key) = period_key(&name, &prefix) {
            files.push((key, path));
        }
    }
    Ok(files)
}

fn period_key(file_name: &str, prefix: &str) -> Option<PeriodKey> {
    let rest = file_name.strip_prefix(prefix)?.strip_suffix(".csv")?;
    let (start, end) = rest.split_once("_to_")?;
    let valid = |part: &str| part.len() == 8 && part.chars().all(|c| c.is_ascii_digit());
    (valid(start) && valid(end)).then(|| (start.to_string(), end.to_string()))
}

/// Fallback when no period pairs exist: the most recently modified cleaned
/// file of each origin.
pub fn find_latest_pair(input_dir: &Path) -> Result<(Option<PathBuf>, Option<PathBuf>)> {
    let mut latest_sonde: Option<(std::time::SystemTime, PathBuf)> = None;
    let mut latest_biosensor: Option<(std::time::SystemTime, PathBuf)> = None;

    for entry in fs::read_dir(input_dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().to_lowercase()) else {
            continue;
        };
        if !name.starts_with(CLEANED_PREFIX) || !name.ends_with(".csv") {
            continue;
        }
        let Ok(modified) = path.metadata().and_then(|meta| meta.modified()) else {
            continue;
        };
        let slot = if name.contains("sonde") {
            &mut latest_sonde
        } else if name.contains("biosensor") {
            &mut latest_biosensor
        } else {
            continue;
        };
        if slot.as_ref().is_none_or(|(when, _)| modified > *when) {
            *slot = Some((modified, path));
        }
    }

    Ok((
        latest_sonde.map(|(_, path)| path),
        latest_biosensor.map(|(_, path)| path),
    ))
}

fn require_column(df: &DataFrame, path: &Path, column: &str) -> Result<()> {
    let present = df
        .get_column_names()
        .iter()
        .any(|name| name.as_str() == column);
    if present {
        Ok(())
    } else {
        Err(PipelineError::Validation(format!(
            "expected '{column}' column in {}",
            path.display()
        )))
    }
}

fn keep_rows(df: &DataFrame, keep: impl Fn(usize) -> bool) -> Result<DataFrame> {
    let mask_values: Vec<bool> = (0..df.height()).map(keep).collect();
    let mask = BooleanChunked::from_slice("mask".into(), &mask_values);
    Ok(df.filter(&mask)?)
}

/// A cleaned sonde table reshaped onto the combined schema.
pub fn load_cleaned_sonde(path: &Path) -> Result<DataFrame> {
    let df = read_delimited(path)?;
    require_column(&df, path, TIMESTAMP_COLUMN)?;

    let timestamps = df.column(TIMESTAMP_COLUMN)?.str()?.clone();
    let df = keep_rows(&df, |idx| !is_missing(timestamps.get(idx).unwrap_or("")))?;

    let mut conformed = conform_columns(&df, COLUMN_ORDER)?;
    let height = conformed.height();
    conformed.replace(
        ORIGIN_COLUMN,
        Series::new(ORIGIN_COLUMN.into(), vec![Origin::Sonde.as_str(); height]),
    )?;
    Ok(conformed)
}

/// A cleaned biosensor table reshaped onto the combined schema. The station
/// export names its columns `Time (UTC)` / `Activity`; both are remapped.
pub fn load_cleaned_biosensor(path: &Path) -> Result<DataFrame> {
    let mut df = read_delimited(path)?;
    if df
        .get_column_names()
        .iter()
        .any(|name| name.as_str() == "Time (UTC)")
    {
        df.rename("Time (UTC)", TIMESTAMP_COLUMN.into())?;
    }
    if df
        .get_column_names()
        .iter()
        .any(|name| name.as_str() == "Activity")
    {
        df.rename("Activity", ACTIVITY_COLUMN.into())?;
    }
    require_column(&df, path, TIMESTAMP_COLUMN)?;

    let timestamps = df.column(TIMESTAMP_COLUMN)?.str()?.clone();
    let activity = match df.column(ACTIVITY_COLUMN) {
        Ok(column) => Some(column.str()?.clone()),
        Err(_) => None,
    };
    let df = keep_rows(&df, |idx| {
        let ts_missing = is_missing(timestamps.get(idx).unwrap_or(""));
        let activity_missing = activity
            .as_ref()
            .map_or(true, |col| is_missing(col.get(idx).unwrap_or("")));
        !(ts_missing && activity_missing)
    })?;

    let mut conformed = conform_columns(&df, COLUMN_ORDER)?;
    let height = conformed.height();
    conformed.replace(
        ORIGIN_COLUMN,
        Series::new(ORIGIN_COLUMN.into(), vec![Origin::Biosensor.as_str(); height]),
    )?;
    Ok(conformed)
}

/// Both cleaned tables on one timeline, sorted by timestamp (stable; rows
/// with unparseable timestamps sink to the end).
pub fn combine_pair(sonde_path: &Path, biosensor_path: &Path) -> Result<DataFrame> {
    let sonde = load_cleaned_sonde(sonde_path)?;
    let biosensor = load_cleaned_biosensor(biosensor_path)?;
    let merged = sonde.vstack(&biosensor)?;
    sort_by_timestamp_column(&merged, TIMESTAMP_COLUMN)
}

/// Fold the biosensor rows of a combined table into the sonde timeline.
/// Each biosensor row claims the nearest unassigned sonde row; unmatched
/// biosensor rows are dropped and counted in the statistics.
pub fn align_combined(combined: &DataFrame) -> Result<(DataFrame, FusionStats)> {
    let aligned_order = aligned_column_order();
    if combined.height() == 0 {
        let columns: Vec<Column> = aligned_order
            .iter()
            .map(|name| Series::new((*name).into(), Vec::<String>::new()).into())
            .collect();
        return Ok((DataFrame::new(columns)?, FusionStats::new(0, 0)));
    }

    let origins = combined.column(ORIGIN_COLUMN)?.str()?;
    let timestamps = combined.column(TIMESTAMP_COLUMN)?.str()?;

    let mut sonde_rows = Vec::new();
    let mut sonde_ts = Vec::new();
    let mut biosensor_rows = Vec::new();
    let mut biosensor_ts = Vec::new();
    for idx in 0..combined.height() {
        let Some(ts) = parse_timestamp(timestamps.get(idx).unwrap_or(""), None) else {
            continue;
        };
        match origins.get(idx) {
            Some(origin) if origin == Origin::Sonde.as_str() => {
                sonde_rows.push(idx);
                sonde_ts.push(ts);
            }
            Some(origin) if origin == Origin::Biosensor.as_str() => {
                biosensor_rows.push(idx);
                biosensor_ts.push(ts);
            }
            _ => {}
        }
    }

    let assignments = assign_nearest(&sonde_ts, &biosensor_ts, MatchPolicy::FirstCome);
    let stats = FusionStats::new(biosensor_ts.len(), matched_count(&assignments));

    let mut columns: Vec<Column> = Vec::with_capacity(aligned_order.len());

    let sonde_timestamps: Vec<String> = sonde_rows
        .iter()
        .map(|&idx| timestamps.get(idx).unwrap_or("").to_string())
        .collect();
    columns.push(Series::new(SONDE_TIMESTAMP_COLUMN.into(), sonde_timestamps).into());

    let biosensor_timestamps: Vec<String> = assignments
        .iter()
        .map(|slot| match slot {
            Some(assignment) => timestamps
                .get(biosensor_rows[assignment.secondary])
                .unwrap_or("")
                .to_string(),
            None => String::new(),
        })
        .collect();
    columns.push(Series::new(BIOSENSOR_TIMESTAMP_COLUMN.into(), biosensor_timestamps).into());

    for name in measurement_columns() {
        let source = combined.column(name)?.str()?;
        let values: Vec<String> = sonde_rows
            .iter()
            .zip(&assignments)
            .map(|(&sonde_idx, slot)| {
                if let Some(assignment) = slot {
                    let biosensor_value = source
                        .get(biosensor_rows[assignment.secondary])
                        .unwrap_or("");
                    if !biosensor_value.is_empty() {
                        return biosensor_value.to_string();
                    }
                }
                source.get(sonde_idx).unwrap_or("").to_string()
            })
            .collect();
        columns.push(Series::new(name.into(), values).into());
    }

    let aligned = DataFrame::new(columns)?;
    let aligned = sort_by_timestamp_column(&aligned, SONDE_TIMESTAMP_COLUMN)?;
    Ok((aligned, stats))
}

pub fn write_period_file(output_dir: &Path, key: &PeriodKey, rows: &DataFrame) -> Result<PathBuf> {
    let path = output_dir.join(format!("combined_data_{}_to_{}.csv", key.0, key.1));
    write_with_unit_row(rows, &path, UNIT_VALUES)
}

pub fn write_latest_file(output_dir: &Path, rows: &DataFrame) -> Result<PathBuf> {
    let path = output_dir.join("combined_data_latest.csv");
    write_with_unit_row(rows, &path, UNIT_VALUES)
}

pub fn write_aligned_period_file(
    output_dir: &Path,
    key: &PeriodKey,
    rows: &DataFrame,
) -> Result<PathBuf> {
    let path = output_dir.join(format!("aligned_data_{}_to_{}.csv", key.0, key.1));
    write_with_unit_row(rows, &path, &aligned_unit_values())
}

pub fn write_aligned_latest_file(output_dir: &Path, rows: &DataFrame) -> Result<PathBuf> {
    let path = output_dir.join("aligned_data_latest.csv");
    write_with_unit_row(rows, &path, &aligned_unit_values())
}

fn write_with_unit_row(rows: &DataFrame, path: &Path, units: &[&str]) -> Result<PathBuf> {
    let with_unit = prepend_unit_row(rows, units)?;
    write_csv(&with_unit, path)?;
    Ok(path.to_path_buf())
}

pub fn update_combined_general(output_dir: &Path, new_rows: &DataFrame) -> Result<PathBuf> {
    update_general_file(
        &output_dir.join("combined_data_general.csv"),
        new_rows,
        COLUMN_ORDER,
        UNIT_VALUES,
        &[TIMESTAMP_COLUMN, ORIGIN_COLUMN],
        TIMESTAMP_COLUMN,
    )
}

pub fn update_aligned_general(output_dir: &Path, new_rows: &DataFrame) -> Result<PathBuf> {
    update_general_file(
        &output_dir.join("aligned_data_general.csv"),
        new_rows,
        &aligned_column_order(),
        &aligned_unit_values(),
        &[SONDE_TIMESTAMP_COLUMN],
        SONDE_TIMESTAMP_COLUMN,
    )
}

/// Combine every period pair found in `cleaned_dir` (falling back to the
/// latest cleaned file per origin), writing period/latest artifacts and
/// updating both general files. A malformed pair is logged and skipped.
pub fn combine_cleaned(cleaned_dir: &Path, output_dir: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(output_dir)?;
    let mut outputs = Vec::new();

    let pairs = find_pairs(cleaned_dir)?;
    if !pairs.is_empty() {
        for (key, sonde_path, biosensor_path) in pairs {
            let combined = match combine_pair(&sonde_path, &biosensor_path) {
                Ok(combined) => combined,
                Err(err) => {
                    warn!(
                        "skipping pair {}_to_{}: {err}",
                        key.0, key.1
                    );
                    continue;
                }
            };
            outputs.push(write_period_file(output_dir, &key, &combined)?);
            outputs.push(update_combined_general(output_dir, &combined)?);

            let (aligned, stats) = align_combined(&combined)?;
            log_stats(&key, &stats);
            outputs.push(write_aligned_period_file(output_dir, &key, &aligned)?);
            outputs.push(update_aligned_general(output_dir, &aligned)?);
        }
        return Ok(outputs);
    }

    let (sonde_path, biosensor_path) = find_latest_pair(cleaned_dir)?;
    if let (Some(sonde_path), Some(biosensor_path)) = (sonde_path, biosensor_path) {
        let combined = combine_pair(&sonde_path, &biosensor_path)?;
        outputs.push(write_latest_file(output_dir, &combined)?);
        outputs.push(update_combined_general(output_dir, &combined)?);

        let (aligned, stats) = align_combined(&combined)?;
        info!(
            "aligned latest pair: {}",
            serde_json::to_string(&stats).unwrap_or_default()
        );
        outputs.push(write_aligned_latest_file(output_dir, &aligned)?);
        outputs.push(update_aligned_general(output_dir, &aligned)?);
    }
    Ok(outputs)
}

fn log_stats(key: &PeriodKey, stats: &FusionStats) {
    info!(
        "aligned period {}_to_{}: {}",
        key.0,
        key.1,
        serde_json::to_string(stats).unwrap_or_default()
    );
}
