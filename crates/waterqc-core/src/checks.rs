use polars::prelude::*;

use crate::config::{applicable_checks, CheckKind, ParameterRule, RuleSet};

pub const PASS: &str = "PASS";
pub const FAIL: &str = "FAIL";

/// The single missing-value predicate every check consults before parsing.
pub fn is_missing(value: &str) -> bool {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return true;
    }
    matches!(
        trimmed.to_ascii_lowercase().as_str(),
        "na" | "nan" | "none"
    )
}

pub fn to_float(value: &str) -> Option<f64> {
    if is_missing(value) {
        return None;
    }
    value.trim().parse::<f64>().ok()
}

/// Decimal places as written in the cell, not as parsed.
pub fn count_decimals(value: &str) -> usize {
    match value.trim().rsplit_once('.') {
        Some((_, fraction)) => fraction.len(),
        None => 0,
    }
}

fn pass_fail(ok: bool) -> &'static str {
    if ok {
        PASS
    } else {
        FAIL
    }
}

fn value_text(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(text) => Some(text.clone()),
        serde_yaml::Value::Number(number) => Some(number.to_string()),
        serde_yaml::Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

fn value_number(value: &serde_yaml::Value) -> Option<f64> {
    match value {
        serde_yaml::Value::Number(number) => number.as_f64(),
        serde_yaml::Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

/// Cross-row state for one parameter. The spike reference only moves on
/// valid numeric values; the flatline run breaks on anything non-numeric.
#[derive(Debug, Default)]
struct ParamState {
    previous_numeric: Option<f64>,
    run_value: Option<f64>,
    run_length: usize,
}

impl ParamState {
    fn reset(&mut self) {
        *self = Self::default();
    }
}

pub struct ParameterFlags {
    /// `(<key>_<check>_flag, values)` in check order.
    pub flag_columns: Vec<(String, Vec<String>)>,
    /// `<key>_qc_flag` values: FAIL when any check failed on the row.
    pub qc_flags: Vec<String>,
}

/// Evaluate every applicable check for one parameter over a column, one pass
/// in file order. The metadata row (when present) gets empty flags and
/// resets all cross-row state.
pub fn evaluate_parameter(
    column: &StringChunked,
    param: &ParameterRule,
    rule_set: &RuleSet,
    metadata_index: Option<usize>,
) -> ParameterFlags {
    let checks = applicable_checks(param, rule_set);
    let height = column.len();
    let missing_ok = param.rules.allow_nulls;

    let mut flag_columns: Vec<(String, Vec<String>)> = checks
        .iter()
        .map(|check| {
            (
                format!("{}_{}_flag", param.key, check.label()),
                Vec::with_capacity(height),
            )
        })
        .collect();
    let mut qc_flags = Vec::with_capacity(height);
    let mut state = ParamState::default();

    for idx in 0..height {
        if metadata_index == Some(idx) {
            for (_, values) in &mut flag_columns {
                values.push(String::new());
            }
            qc_flags.push(String::new());
            state.reset();
            continue;
        }

        let raw = column.get(idx).unwrap_or("");
        let missing = is_missing(raw);
        let numeric = if missing { None } else { to_float(raw) };
        let mut row_failed = false;

        for (check, (_, values)) in checks.iter().zip(flag_columns.iter_mut()) {
            let flag = evaluate_check(*check, raw, missing, numeric, param, missing_ok, &mut state);
            if flag == FAIL {
                row_failed = true;
            }
            values.push(flag.to_string());
        }

        qc_flags.push(if row_failed { FAIL } else { PASS }.to_string());
    }

    ParameterFlags {
        flag_columns,
        qc_flags,
    }
}

fn evaluate_check(
    check: CheckKind,
    raw: &str,
    missing: bool,
    numeric: Option<f64>,
    param: &ParameterRule,
    missing_ok: bool,
    state: &mut ParamState,
) -> &'static str {
    let rules = &param.rules;
    match check {
        CheckKind::Completeness => pass_fail(!missing),
        CheckKind::Numeric => pass_fail(numeric.is_some() || missing_ok),
        CheckKind::Format => match numeric {
            None => pass_fail(missing_ok),
            Some(_) => {
                let decimal_max = rules.decimal_max.unwrap_or(0) as usize;
                pass_fail(count_decimals(raw) <= decimal_max)
            }
        },
        CheckKind::Range => match numeric {
            None => pass_fail(missing_ok),
            Some(value) => {
                let too_low = rules.min_value.is_some_and(|min| value < min);
                let too_high = rules.max_value.is_some_and(|max| value > max);
                pass_fail(!too_low && !too_high)
            }
        },
        CheckKind::Nonnegative => match numeric {
            None => pass_fail(missing_ok),
            Some(value) => pass_fail(value >= 0.0),
        },
        CheckKind::Spike => match (numeric, rules.max_delta_per_step) {
            (Some(value), Some(threshold)) => {
                let flag = match state.previous_numeric {
                    Some(previous) => pass_fail((value - previous).abs() <= threshold),
                    None => PASS,
                };
                state.previous_numeric = Some(value);
                flag
            }
            // Missing and non-numeric cells neither fail nor move the
            // reference used for the next comparison.
            _ => PASS,
        },
        CheckKind::Flatline => match numeric {
            None => {
                state.run_value = None;
                state.run_length = 0;
                PASS
            }
            Some(value) => {
                if state.run_value == Some(value) {
                    state.run_length += 1;
                } else {
                    state.run_length = 1;
                }
                state.run_value = Some(value);
                let threshold = rules.streak_threshold.unwrap_or(0);
                pass_fail(!(threshold > 0 && state.run_length >= threshold))
            }
        },
        CheckKind::AllowedValues => {
            if missing {
                return pass_fail(missing_ok);
            }
            let allowed = rules.allowed_values.as_deref().unwrap_or(&[]);
            let raw_text = raw.trim();
            let raw_number = to_float(raw_text);
            let matched = allowed.iter().any(|candidate| {
                if value_text(candidate).is_some_and(|text| text == raw_text) {
                    return true;
                }
                match (raw_number, value_number(candidate)) {
                    (Some(observed), Some(expected)) => observed == expected,
                    _ => false,
                }
            });
            pass_fail(matched)
        }
    }
}
