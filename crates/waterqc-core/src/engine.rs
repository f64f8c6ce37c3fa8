use std::collections::HashMap;
use std::path::{Path, PathBuf};

use polars::prelude::*;
use tracing::{debug, info, warn};

use waterqc_table::model::{
    cleaned_output_path, detect_origin, flagged_output_path, list_raw_files, Origin,
    DIARY_FILENAME,
};
use waterqc_table::read::{column_names, read_delimited};
use waterqc_table::resolve::{match_raw_column, normalize_name};
use waterqc_table::timestamp::parse_timestamp;
use waterqc_table::write::write_csv;

use crate::checks::{evaluate_parameter, FAIL, PASS};
use crate::config::{applicable_checks, ParameterRule, RuleSet};
use crate::error::Result;
use crate::maintenance::{flag_maintenance, load_maintenance_periods};
use crate::outputs::{build_cleaned, prepend_percentage_rows};

/// Sonde exports duplicate some channels in a second unit; the duplicated
/// columns are dropped before any rules run so only the governed unit is
/// flagged.
const SONDE_EXCLUDED_COLUMNS: &[&str] = &["bgapcugl", "chlorophyllugl", "fdomqsu"];

#[derive(Debug, Clone)]
pub struct ProcessedFile {
    pub flagged: PathBuf,
    pub cleaned: PathBuf,
}

/// Per-file QC runner. The rule file is reloaded on every call so edits
/// between runs take effect immediately.
pub struct QcEngine {
    config_path: PathBuf,
    input_dir: PathBuf,
    output_dir: PathBuf,
}

impl QcEngine {
    pub fn new(config_path: PathBuf, input_dir: PathBuf, output_dir: PathBuf) -> Self {
        Self {
            config_path,
            input_dir,
            output_dir,
        }
    }

    /// One pass over the intake directory. Per-file failures are logged and
    /// skipped so a single malformed upload cannot stall the batch.
    pub fn process_directory_once(&self) -> Result<Vec<ProcessedFile>> {
        let mut processed = Vec::new();
        for path in list_raw_files(&self.input_dir)? {
            match self.process_file(&path) {
                Ok(Some(outputs)) => processed.push(outputs),
                Ok(None) => {}
                Err(err) => warn!("failed to process {}: {err}", path.display()),
            }
        }
        Ok(processed)
    }

    /// Run the full rule pipeline over one raw file. `Ok(None)` means the
    /// file was skipped (unknown origin, no parameters, no matching
    /// columns) and produced no output.
    pub fn process_file(&self, path: &Path) -> Result<Option<ProcessedFile>> {
        let Some(origin) = detect_origin(path) else {
            return Ok(None);
        };

        let rule_set = RuleSet::load(&self.config_path)?;
        let params = rule_set.parameters_for_origin(origin);
        if params.is_empty() {
            debug!("no parameters configured for origin {origin}");
            return Ok(None);
        }

        let df = read_delimited(path)?;
        let mut df = drop_excluded_columns(df, origin);

        let headers = column_names(&df);
        let mapping = map_columns(&headers, &params);
        if mapping.is_empty() {
            warn!(
                "skipping QC for {} (origin {origin}): no raw columns matched the rule set",
                path.display()
            );
            return Ok(None);
        }

        let timestamp_param = rule_set.timestamp_parameter(origin);
        let timestamp_column = timestamp_param
            .and_then(|param| mapping.get(param.key.as_str()))
            .cloned();
        let timestamp_format =
            timestamp_param.and_then(|param| param.rules.timestamp_format.as_deref());
        let metadata_index =
            metadata_row_index(&df, timestamp_column.as_deref(), timestamp_format)?;

        let height = df.height();
        let timestamps = match &timestamp_column {
            Some(name) => Some(df.column(name)?.str()?.clone()),
            None => None,
        };
        let periods = load_maintenance_periods(&self.input_dir.join(DIARY_FILENAME));
        let maintenance_flags =
            flag_maintenance(timestamps.as_ref(), height, &periods, metadata_index);

        let mut new_columns: HashMap<String, Vec<String>> = HashMap::new();
        let origin_column: Vec<String> = (0..height)
            .map(|idx| {
                if metadata_index == Some(idx) {
                    String::new()
                } else {
                    origin.as_str().to_string()
                }
            })
            .collect();
        new_columns.insert("origin".to_string(), origin_column);

        for param in &params {
            let Some(column_name) = mapping.get(param.key.as_str()) else {
                continue;
            };
            let column = df.column(column_name)?.str()?;
            let flags = evaluate_parameter(column, param, &rule_set, metadata_index);
            for (name, values) in flags.flag_columns {
                new_columns.insert(name, values);
            }
            new_columns.insert(format!("{}_qc_flag", param.key), flags.qc_flags);
        }

        new_columns.insert("maintenance_flag".to_string(), maintenance_flags);

        let flag_names: Vec<String> = new_columns
            .keys()
            .filter(|name| name.as_str() != "origin")
            .cloned()
            .collect();
        let overall: Vec<String> = (0..height)
            .map(|idx| {
                if metadata_index == Some(idx) {
                    return String::new();
                }
                let failed = flag_names.iter().any(|name| new_columns[name][idx] == FAIL);
                if failed { FAIL } else { PASS }.to_string()
            })
            .collect();
        new_columns.insert("overall_dq_check".to_string(), overall);

        let append_order = flag_column_order(&params, &mapping, &rule_set);
        let mut flag_series: Vec<Column> = Vec::with_capacity(append_order.len());
        for name in &append_order {
            let values = new_columns
                .remove(name)
                .unwrap_or_else(|| vec![String::new(); height]);
            flag_series.push(Series::new(name.as_str().into(), values).into());
        }
        df.hstack_mut(&flag_series)?;

        let flagged = prepend_percentage_rows(&df)?;
        let flagged_path = flagged_output_path(path, &self.output_dir);
        write_csv(&flagged, &flagged_path)?;

        let cleaned = build_cleaned(&flagged)?;
        let cleaned_path = cleaned_output_path(path, &self.output_dir);
        write_csv(&cleaned, &cleaned_path)?;

        info!(
            "flagged {} ({} rows) -> {}",
            path.display(),
            height,
            flagged_path.display()
        );
        Ok(Some(ProcessedFile {
            flagged: flagged_path,
            cleaned: cleaned_path,
        }))
    }
}

fn drop_excluded_columns(df: DataFrame, origin: Origin) -> DataFrame {
    if origin != Origin::Sonde {
        return df;
    }
    let to_drop: Vec<String> = column_names(&df)
        .into_iter()
        .filter(|name| SONDE_EXCLUDED_COLUMNS.contains(&normalize_name(name).as_str()))
        .collect();
    if to_drop.is_empty() {
        return df;
    }
    info!(
        "dropping duplicated-unit columns for {}: {}",
        Origin::Sonde,
        to_drop.join(", ")
    );
    df.drop_many(to_drop)
}

fn map_columns(headers: &[String], params: &[&ParameterRule]) -> HashMap<String, String> {
    let mut mapping = HashMap::new();
    for param in params {
        match match_raw_column(headers, &param.raw_columns) {
            Some(column) => {
                mapping.insert(param.key.clone(), column.to_string());
            }
            None => debug!("no raw column matched parameter '{}'", param.key),
        }
    }
    mapping
}

/// Row 0 is a pass-through metadata row when its timestamp cell fails to
/// parse (typical for exports that carry a unit row under the header).
fn metadata_row_index(
    df: &DataFrame,
    timestamp_column: Option<&str>,
    timestamp_format: Option<&str>,
) -> Result<Option<usize>> {
    let Some(name) = timestamp_column else {
        return Ok(None);
    };
    if df.height() == 0 {
        return Ok(None);
    }
    let column = df.column(name)?.str()?;
    let first = column.get(0).unwrap_or("");
    Ok(if parse_timestamp(first, timestamp_format).is_none() {
        Some(0)
    } else {
        None
    })
}

/// The fixed flag-column layout: origin, overall, maintenance, then each
/// parameter's applicable check flags followed by its aggregate flag, in
/// rule-set declaration order.
fn flag_column_order(
    params: &[&ParameterRule],
    mapping: &HashMap<String, String>,
    rule_set: &RuleSet,
) -> Vec<String> {
    let mut order = vec![
        "origin".to_string(),
        "overall_dq_check".to_string(),
        "maintenance_flag".to_string(),
    ];
    for param in params {
        if !mapping.contains_key(param.key.as_str()) {
            continue;
        }
        for check in applicable_checks(param, rule_set) {
            order.push(format!("{}_{}_flag", param.key, check.label()));
        }
        order.push(format!("{}_qc_flag", param.key));
    }
    order
}
