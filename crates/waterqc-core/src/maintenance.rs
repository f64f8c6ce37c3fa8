use std::path::Path;

use chrono::NaiveDateTime;
use polars::prelude::*;
use tracing::{debug, warn};

use waterqc_table::resolve::normalize_name;
use waterqc_table::timestamp::parse_timestamp;

use crate::checks::{FAIL, PASS};

pub const EXCLUDE_COLUMN: &str = "Exclude from Analysis";
pub const START_COLUMN: &str = "Start (UTC)";
pub const END_COLUMN: &str = "End (UTC)";

/// The diary is filled in by hand; the format is fixed by convention.
pub const DIARY_TIMESTAMP_FORMAT: &str = "%d/%m/%Y %H:%M";

/// Closed interval, inclusive at both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaintenancePeriod {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl MaintenancePeriod {
    pub fn contains(&self, timestamp: NaiveDateTime) -> bool {
        self.start <= timestamp && timestamp <= self.end
    }
}

/// Load exclusion periods from the operator diary. An absent or unreadable
/// diary means no exclusions, not an error. Rows count only when the
/// exclusion field says "yes"; a missing end collapses the period to its
/// start.
pub fn load_maintenance_periods(diary_path: &Path) -> Vec<MaintenancePeriod> {
    let mut reader = match csv::ReaderBuilder::new().flexible(true).from_path(diary_path) {
        Ok(reader) => reader,
        Err(_) => {
            debug!("no maintenance diary at {}", diary_path.display());
            return Vec::new();
        }
    };

    let headers = match reader.headers() {
        Ok(headers) => headers.clone(),
        Err(err) => {
            warn!("unreadable maintenance diary {}: {err}", diary_path.display());
            return Vec::new();
        }
    };

    let position = |wanted: &str| {
        let wanted = normalize_name(wanted);
        headers
            .iter()
            .position(|header| normalize_name(header) == wanted)
    };
    let (Some(exclude_idx), Some(start_idx)) = (position(EXCLUDE_COLUMN), position(START_COLUMN))
    else {
        warn!(
            "maintenance diary {} is missing its exclusion or start column",
            diary_path.display()
        );
        return Vec::new();
    };
    let end_idx = position(END_COLUMN);

    let mut periods = Vec::new();
    for record in reader.records().flatten() {
        let exclude = record.get(exclude_idx).unwrap_or("").trim().to_ascii_lowercase();
        if exclude != "yes" {
            continue;
        }

        let start_raw = record.get(start_idx).unwrap_or("");
        let Some(start) = parse_timestamp(start_raw, Some(DIARY_TIMESTAMP_FORMAT)) else {
            continue;
        };
        let end = end_idx
            .and_then(|idx| record.get(idx))
            .and_then(|raw| parse_timestamp(raw, Some(DIARY_TIMESTAMP_FORMAT)))
            .unwrap_or(start);

        periods.push(MaintenancePeriod { start, end });
    }
    periods
}

/// One maintenance flag per row. Unparseable timestamps pass (fail-open);
/// the metadata row gets an empty flag.
pub fn flag_maintenance(
    timestamps: Option<&StringChunked>,
    height: usize,
    periods: &[MaintenancePeriod],
    metadata_index: Option<usize>,
) -> Vec<String> {
    (0..height)
        .map(|idx| {
            if metadata_index == Some(idx) {
                return String::new();
            }
            let raw = timestamps.and_then(|column| column.get(idx)).unwrap_or("");
            match parse_timestamp(raw, None) {
                Some(timestamp) if !periods.is_empty() => {
                    if periods.iter().any(|period| period.contains(timestamp)) {
                        FAIL.to_string()
                    } else {
                        PASS.to_string()
                    }
                }
                _ => PASS.to_string(),
            }
        })
        .collect()
}
