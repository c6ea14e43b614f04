//! Data-quality rules: parsing, SQL planning and outcome classification.
//!
//! Rules arrive as the `data_quality_checks` mapping elicited from the user:
//! `rule_name -> {"type": .., "column": .., "values": [..], "table": ..}`.
//! Every identifier is validated before it is interpolated into SQL.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::core::types::{ValidationOutcome, ValidationStatus};

static DATASET_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$").expect("dataset name regex"));
static TABLE_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_]+$").expect("table name regex"));
static PROJECT_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_-]+$").expect("project id regex"));

/// Dataset names start with a letter or underscore and contain letters, digits and underscores.
pub fn valid_dataset_name(name: &str) -> bool {
    DATASET_NAME_RE.is_match(name)
}

/// Table names contain letters, digits and underscores.
pub fn valid_table_name(name: &str) -> bool {
    TABLE_NAME_RE.is_match(name)
}

pub fn valid_project_id(id: &str) -> bool {
    PROJECT_ID_RE.is_match(id)
}

/// What a rule checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleKind {
    NotNull { column: String },
    Unique { column: String },
    AcceptedValues { column: String, values: Vec<String> },
    /// Rule type outside the supported set.
    Unknown { kind: String },
    /// Structurally broken rule definition.
    Invalid { reason: String },
}

/// A named data-quality rule, optionally pinned to a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualityRule {
    pub name: String,
    pub kind: RuleKind,
    pub table: Option<String>,
}

/// Parse the `data_quality_checks` mapping, one rule per key (in key order).
pub fn parse_rules(checks: &Map<String, Value>) -> Vec<QualityRule> {
    checks
        .iter()
        .map(|(name, details)| QualityRule {
            name: name.clone(),
            kind: parse_kind(details),
            table: details
                .get("table")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
        .collect()
}

fn parse_kind(details: &Value) -> RuleKind {
    let Some(object) = details.as_object() else {
        return RuleKind::Invalid {
            reason: "rule definition must be an object".to_string(),
        };
    };
    let Some(kind) = object.get("type").and_then(Value::as_str) else {
        return RuleKind::Invalid {
            reason: "rule definition is missing 'type'".to_string(),
        };
    };
    let column = object.get("column").and_then(Value::as_str).map(str::to_string);
    let require_column = |column: Option<String>| {
        column.ok_or_else(|| RuleKind::Invalid {
            reason: format!("'{kind}' rule is missing 'column'"),
        })
    };

    match kind {
        "not_null" => match require_column(column) {
            Ok(column) => RuleKind::NotNull { column },
            Err(invalid) => invalid,
        },
        "unique" => match require_column(column) {
            Ok(column) => RuleKind::Unique { column },
            Err(invalid) => invalid,
        },
        "accepted_values" => {
            let column = match require_column(column) {
                Ok(column) => column,
                Err(invalid) => return invalid,
            };
            let values: Vec<String> = object
                .get("values")
                .and_then(Value::as_array)
                .map(|values| values.iter().filter_map(scalar_to_string).collect())
                .unwrap_or_default();
            if values.is_empty() {
                return RuleKind::Invalid {
                    reason: "'accepted_values' rule needs at least one value".to_string(),
                };
            }
            RuleKind::AcceptedValues { column, values }
        }
        other => RuleKind::Unknown {
            kind: other.to_string(),
        },
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Outcome to record without querying, for rules that cannot be evaluated.
pub fn unevaluable_outcome(rule: &QualityRule) -> Option<ValidationOutcome> {
    let details = match &rule.kind {
        RuleKind::Unknown { kind } => format!("Unknown validation rule type: {kind}"),
        RuleKind::Invalid { reason } => reason.clone(),
        _ => return None,
    };
    Some(ValidationOutcome {
        rule: rule.name.clone(),
        result: ValidationStatus::Error,
        details,
    })
}

/// Build a `SELECT COUNT(*) AS violations ..` query for `rule` against `table`.
///
/// `table` is `table`, `dataset.table` or `project.dataset.table`.
pub fn rule_query(rule: &QualityRule, table: &str) -> Result<String, String> {
    let table = quote_table(table)?;
    match &rule.kind {
        RuleKind::NotNull { column } => {
            let column = checked_column(column)?;
            Ok(format!(
                "SELECT COUNT(*) AS violations FROM {table} WHERE {column} IS NULL"
            ))
        }
        RuleKind::Unique { column } => {
            let column = checked_column(column)?;
            Ok(format!(
                "SELECT COUNT(*) AS violations FROM (SELECT {column} FROM {table} GROUP BY {column} HAVING COUNT(*) > 1)"
            ))
        }
        RuleKind::AcceptedValues { column, values } => {
            let column = checked_column(column)?;
            let quoted: Vec<String> = values.iter().map(|v| quote_literal(v)).collect();
            Ok(format!(
                "SELECT COUNT(*) AS violations FROM {table} WHERE {column} NOT IN ({})",
                quoted.join(", ")
            ))
        }
        RuleKind::Unknown { kind } => Err(format!("Unknown validation rule type: {kind}")),
        RuleKind::Invalid { reason } => Err(reason.clone()),
    }
}

/// Classify a violation count for `rule`.
pub fn outcome_for(rule: &QualityRule, violations: u64) -> ValidationOutcome {
    let result = if violations == 0 {
        ValidationStatus::Passed
    } else {
        ValidationStatus::Failed
    };
    let details = match &rule.kind {
        RuleKind::NotNull { column } => {
            format!("{violations} null values found in column '{column}'")
        }
        RuleKind::Unique { column } => {
            format!("{violations} duplicate values found in column '{column}'")
        }
        RuleKind::AcceptedValues { column, .. } => {
            format!("{violations} values not in accepted values in column '{column}'")
        }
        RuleKind::Unknown { .. } | RuleKind::Invalid { .. } => {
            format!("{violations} violations")
        }
    };
    ValidationOutcome {
        rule: rule.name.clone(),
        result,
        details,
    }
}

fn checked_column(column: &str) -> Result<&str, String> {
    if valid_dataset_name(column) {
        Ok(column)
    } else {
        Err(format!("invalid column name '{column}'"))
    }
}

fn quote_table(table: &str) -> Result<String, String> {
    let parts: Vec<&str> = table.split('.').collect();
    let valid = match parts.as_slice() {
        [table] => valid_table_name(table),
        [dataset, table] => valid_dataset_name(dataset) && valid_table_name(table),
        [project, dataset, table] => {
            valid_project_id(project) && valid_dataset_name(dataset) && valid_table_name(table)
        }
        _ => false,
    };
    if !valid {
        return Err(format!("invalid table name '{table}'"));
    }
    Ok(format!("`{table}`"))
}

fn quote_literal(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{escaped}'")
}
