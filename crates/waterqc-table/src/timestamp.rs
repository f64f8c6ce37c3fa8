use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

// Day-first first: both instrument families ship European-style timestamps,
// ISO variants only show up in hand-edited files.
static DATETIME_FORMATS: &[&str] = &[
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
    "%d-%m-%Y %H:%M:%S",
    "%d-%m-%Y %H:%M",
    "%d.%m.%Y %H:%M:%S",
    "%d.%m.%Y %H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
];

static DATE_FORMATS: &[&str] = &["%d/%m/%Y", "%d-%m-%Y", "%d.%m.%Y", "%Y-%m-%d"];

/// Parse a cell into a naive timestamp. An explicit format is tried first,
/// then the day-first fallback list. `None` means the cell holds no
/// recognizable timestamp; callers decide whether that is an error.
pub fn parse_timestamp(value: &str, explicit_format: Option<&str>) -> Option<NaiveDateTime> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Some(fmt) = explicit_format {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Some(parsed);
        }
    }

    for fmt in DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Some(parsed);
        }
    }

    for fmt in DATE_FORMATS {
        if let Ok(parsed) = NaiveDate::parse_from_str(trimmed, fmt) {
            return parsed.and_hms_opt(0, 0, 0);
        }
    }

    None
}

/// Interpret a numeric cell as UTC epoch seconds (the biosensor's `UID`).
pub fn parse_epoch_seconds(value: &str) -> Option<NaiveDateTime> {
    let seconds = value.trim().parse::<f64>().ok()?;
    if !seconds.is_finite() {
        return None;
    }
    DateTime::<Utc>::from_timestamp(seconds as i64, 0).map(|dt| dt.naive_utc())
}

/// The display format used when a timestamp is written back into a table.
pub fn format_timestamp(timestamp: NaiveDateTime) -> String {
    timestamp.format("%d-%m-%Y %H:%M:%S").to_string()
}
