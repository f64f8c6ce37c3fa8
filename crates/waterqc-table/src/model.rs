use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::TableError;

/// Raw exports start with this stem; flagged/cleaned outputs swap it out.
pub const RAW_PREFIX: &str = "raw_data_";
pub const FLAGGED_PREFIX: &str = "flagged_data_";
pub const CLEANED_PREFIX: &str = "cleaned_data_";

/// Operator-maintained maintenance diary, expected next to the raw files.
pub const DIARY_FILENAME: &str = "maintenance_diary.csv";

/// The two sensor families the station delivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Origin {
    Sonde,
    Biosensor,
}

impl Origin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::Sonde => "Sonde",
            Origin::Biosensor => "Biosensor",
        }
    }

    fn token(&self) -> &'static str {
        match self {
            Origin::Sonde => "sonde",
            Origin::Biosensor => "biosensor",
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a file by the origin token in its name. When a name carries both
/// tokens the earlier occurrence wins and a warning is emitted.
pub fn detect_origin(path: &Path) -> Option<Origin> {
    let name = path.file_name()?.to_string_lossy().to_lowercase();
    let sonde = name.find(Origin::Sonde.token());
    let biosensor = name.find(Origin::Biosensor.token());

    match (sonde, biosensor) {
        (Some(s), Some(b)) => {
            let chosen = if s <= b { Origin::Sonde } else { Origin::Biosensor };
            warn!(
                "filename contains both origin tokens; choosing {chosen} for {}",
                path.display()
            );
            Some(chosen)
        }
        (Some(_), None) => Some(Origin::Sonde),
        (None, Some(_)) => Some(Origin::Biosensor),
        (None, None) => None,
    }
}

/// Eligible raw CSVs in an intake directory: `.csv`, not the diary, and with
/// a detectable origin. Sorted for deterministic processing order.
pub fn list_raw_files(input_dir: &Path) -> Result<Vec<PathBuf>, TableError> {
    let entries = fs::read_dir(input_dir).map_err(|source| TableError::Read {
        path: input_dir.to_path_buf(),
        source,
    })?;

    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| TableError::Read {
            path: input_dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().to_lowercase()) else {
            continue;
        };
        if !name.ends_with(".csv") || name == DIARY_FILENAME.to_lowercase() {
            continue;
        }
        if detect_origin(&path).is_none() {
            continue;
        }
        paths.push(path);
    }
    paths.sort();
    Ok(paths)
}

pub fn flagged_output_path(input: &Path, output_dir: &Path) -> PathBuf {
    prefixed_output_path(input, output_dir, FLAGGED_PREFIX)
}

pub fn cleaned_output_path(input: &Path, output_dir: &Path) -> PathBuf {
    prefixed_output_path(input, output_dir, CLEANED_PREFIX)
}

fn prefixed_output_path(input: &Path, output_dir: &Path, prefix: &str) -> PathBuf {
    let base = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let renamed = match base.strip_prefix(RAW_PREFIX) {
        Some(rest) => format!("{prefix}{rest}"),
        None => format!("{prefix}{base}"),
    };
    output_dir.join(renamed)
}
