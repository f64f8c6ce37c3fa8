use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use serde::Deserialize;
use waterqc_table::Origin;

use crate::error::{PipelineError, Result};

/// The check kinds the engine knows how to evaluate. `label` feeds the flag
/// column names (`<key>_<label>_flag`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    Completeness,
    Numeric,
    Format,
    Range,
    Nonnegative,
    Spike,
    Flatline,
    AllowedValues,
}

impl CheckKind {
    pub fn label(&self) -> &'static str {
        match self {
            CheckKind::Completeness => "completeness",
            CheckKind::Numeric => "numeric",
            CheckKind::Format => "format",
            CheckKind::Range => "range",
            CheckKind::Nonnegative => "nonnegative",
            CheckKind::Spike => "spike",
            CheckKind::Flatline => "flatline",
            CheckKind::AllowedValues => "allowed_values",
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RuleAttributes {
    pub numeric_required: bool,
    pub allow_nulls: bool,
    pub decimal_max: Option<u32>,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub nonnegative_required: bool,
    pub max_delta_per_step: Option<f64>,
    pub streak_threshold: Option<usize>,
    pub allowed_values: Option<Vec<serde_yaml::Value>>,
    pub timestamp_format: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ParameterRule {
    pub key: String,
    pub origin: Origin,
    #[serde(default)]
    pub raw_columns: Vec<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub rules: RuleAttributes,
}

/// The full rule set: global check toggles plus parameter definitions in
/// declaration order. Declaration order drives the flag-column layout of
/// flagged tables, which is why `parameters` is a sequence, not a map.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuleSet {
    #[serde(default)]
    pub checks: HashMap<CheckKind, bool>,
    #[serde(default)]
    pub parameters: Vec<ParameterRule>,
}

impl RuleSet {
    /// Load and validate a rule file. Callers reload on every processing
    /// call so edits between runs take effect without a restart.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let rule_set: RuleSet = serde_yaml::from_str(&text)?;
        rule_set.validate()?;
        Ok(rule_set)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for param in &self.parameters {
            if !seen.insert(param.key.as_str()) {
                return Err(PipelineError::Validation(format!(
                    "duplicate parameter key '{}'",
                    param.key
                )));
            }
        }
        for origin in [Origin::Sonde, Origin::Biosensor] {
            let designated = self
                .parameters
                .iter()
                .filter(|p| p.origin == origin && p.rules.timestamp_format.is_some())
                .count();
            if designated > 1 {
                return Err(PipelineError::Validation(format!(
                    "origin {origin} declares {designated} timestamp parameters, expected at most one"
                )));
            }
        }
        Ok(())
    }

    pub fn enabled(&self, kind: CheckKind) -> bool {
        self.checks.get(&kind).copied().unwrap_or(false)
    }

    pub fn parameters_for_origin(&self, origin: Origin) -> Vec<&ParameterRule> {
        self.parameters
            .iter()
            .filter(|param| param.origin == origin)
            .collect()
    }

    /// The parameter whose `timestamp_format` designates the origin's
    /// timestamp column.
    pub fn timestamp_parameter(&self, origin: Origin) -> Option<&ParameterRule> {
        self.parameters
            .iter()
            .find(|param| param.origin == origin && param.rules.timestamp_format.is_some())
    }
}

/// The checks that actually run for a parameter: global toggle on and the
/// matching rule attribute declared. `allowed_values` bypasses the toggle
/// map entirely.
pub fn applicable_checks(param: &ParameterRule, rule_set: &RuleSet) -> Vec<CheckKind> {
    let rules = &param.rules;
    let mut checks = Vec::new();

    if rule_set.enabled(CheckKind::Numeric) && rules.numeric_required {
        checks.push(CheckKind::Numeric);
    }
    if rule_set.enabled(CheckKind::Completeness) && !rules.allow_nulls {
        checks.push(CheckKind::Completeness);
    }
    if rule_set.enabled(CheckKind::Format) && rules.decimal_max.is_some() {
        checks.push(CheckKind::Format);
    }
    if rule_set.enabled(CheckKind::Range)
        && (rules.min_value.is_some() || rules.max_value.is_some())
    {
        checks.push(CheckKind::Range);
    }
    if rule_set.enabled(CheckKind::Nonnegative) && rules.nonnegative_required {
        checks.push(CheckKind::Nonnegative);
    }
    if rule_set.enabled(CheckKind::Spike) && rules.max_delta_per_step.is_some() {
        checks.push(CheckKind::Spike);
    }
    if rule_set.enabled(CheckKind::Flatline) && rules.streak_threshold.is_some_and(|t| t > 0) {
        checks.push(CheckKind::Flatline);
    }
    if rules.allowed_values.is_some() {
        checks.push(CheckKind::AllowedValues);
    }
    checks
}
