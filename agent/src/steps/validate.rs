//! Data-quality validation of the produced tables.

use anyhow::Result;
use tracing::{info, warn};

use super::Services;
use crate::core::rules::{
    QualityRule, outcome_for, parse_rules, rule_query, unevaluable_outcome,
};
use crate::core::state::{ConversationState, NextAction, StateUpdate};
use crate::core::types::{Message, ValidationOutcome, ValidationStatus};
use crate::io::warehouse::count;

pub fn validate_data(state: &ConversationState, services: &Services<'_>) -> Result<StateUpdate> {
    let rules = parse_rules(&state.data_quality_checks);
    let default_dataset = services.config.dataform.default_dataset.as_str();
    let default_table = state
        .target_tables
        .first()
        .map(|table| table.qualified_name_or(default_dataset));

    let outcomes: Vec<ValidationOutcome> = rules
        .iter()
        .map(|rule| evaluate(rule, default_table.as_deref(), services))
        .collect();

    let passed = outcomes
        .iter()
        .filter(|o| o.result == ValidationStatus::Passed)
        .count();
    info!(rules = outcomes.len(), passed, "data validated");

    let mut lines = vec![format!(
        "Data validation: {passed} of {} rule(s) passed.",
        outcomes.len()
    )];
    lines.extend(
        outcomes
            .iter()
            .map(|o| format!("- {}: {} ({})", o.rule, o.result.as_str(), o.details)),
    );

    Ok(StateUpdate {
        validation_results: Some(outcomes),
        ..StateUpdate::goto(NextAction::AskForFurtherInput)
    }
    .with_message(Message::agent(lines.join("\n"))))
}

fn evaluate(
    rule: &QualityRule,
    default_table: Option<&str>,
    services: &Services<'_>,
) -> ValidationOutcome {
    if let Some(outcome) = unevaluable_outcome(rule) {
        return outcome;
    }
    let error = |details: String| ValidationOutcome {
        rule: rule.name.clone(),
        result: ValidationStatus::Error,
        details,
    };

    let Some(table) = rule.table.as_deref().or(default_table) else {
        return error("no table to validate".to_string());
    };
    let sql = match rule_query(rule, table) {
        Ok(sql) => sql,
        Err(reason) => return error(reason),
    };
    match count(services.warehouse, &sql) {
        Ok(violations) => outcome_for(rule, violations),
        Err(err) => {
            warn!(rule = %rule.name, error = %format!("{err:#}"), "validation query failed");
            error(format!("{err:#}"))
        }
    }
}
