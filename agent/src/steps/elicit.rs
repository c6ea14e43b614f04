//! Schema elicitation: structure the request and ground it in the warehouse.

use anyhow::{Context, Result};
use tracing::{info, warn};

use super::Services;
use crate::core::rules::{valid_dataset_name, valid_table_name};
use crate::core::state::{ConversationState, NextAction, StateUpdate};
use crate::core::structured::StructuredParser;
use crate::core::types::{ElicitedRequest, Message, TableSpec};
use crate::io::warehouse::{find_relevant_dataset, table_columns};

pub(crate) const EMPTY_REQUEST_REPLY: &str =
    "Please describe the data pipeline you would like to build.";

pub fn elicit_schema(state: &ConversationState, services: &Services<'_>) -> Result<StateUpdate> {
    let request = state.input.trim();
    if request.is_empty() {
        return Ok(StateUpdate::goto(NextAction::AskForFurtherInput)
            .with_message(Message::agent(EMPTY_REQUEST_REPLY)));
    }

    let prompt = services.prompts.structure_request(request, &state.messages)?;
    let elicited: ElicitedRequest = services
        .repair()
        .call_structured(&prompt, &StructuredParser::elicited_request())
        .context("structure transformation request")?;

    if let Some(error) = elicited.error.as_deref().map(str::trim).filter(|e| !e.is_empty()) {
        warn!(error, "request could not be structured");
        return Ok(StateUpdate::goto(NextAction::AskForFurtherInput).with_message(
            Message::agent(format!("I could not turn that into a pipeline: {error}")),
        ));
    }

    let mut questions: Vec<String> = elicited
        .follow_up_questions
        .iter()
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .collect();
    let source_tables = ground_source_tables(elicited.source_tables, services, &mut questions);

    let summary = format!(
        "Understood: {} source table(s), {} target table(s), {} data quality check(s).",
        source_tables.len(),
        elicited.target_tables.len(),
        elicited.data_quality_checks.len()
    );
    let next = if questions.is_empty() {
        NextAction::GenerateCode
    } else {
        NextAction::AskClarifications
    };
    info!(next = %next, open_questions = questions.len(), "schema elicited");

    Ok(StateUpdate {
        source_tables: Some(source_tables),
        target_tables: Some(elicited.target_tables),
        intermediate_tables: Some(elicited.intermediate_tables),
        transformations: Some(elicited.transformations),
        data_quality_checks: Some(elicited.data_quality_checks),
        missing_information: Some(questions),
        ..StateUpdate::goto(next)
    }
    .with_message(Message::agent(summary)))
}

/// Fill in missing datasets and columns from the warehouse.
///
/// Tables that cannot be located add a follow-up question. Warehouse failures
/// leave the table as elicited.
fn ground_source_tables(
    tables: Vec<TableSpec>,
    services: &Services<'_>,
    questions: &mut Vec<String>,
) -> Vec<TableSpec> {
    let project_id = services.config.project_id.as_str();
    if project_id.is_empty() {
        warn!("project_id is not configured, skipping warehouse lookups");
        return tables;
    }

    tables
        .into_iter()
        .map(|mut table| {
            if table.dataset.as_deref().is_none_or(str::is_empty) {
                match find_relevant_dataset(services.warehouse, project_id, &table.name) {
                    Ok(Some(dataset)) => table.dataset = Some(dataset),
                    Ok(None) => {
                        questions.push(format!(
                            "Which dataset contains the source table '{}'?",
                            table.name
                        ));
                        return table;
                    }
                    Err(err) => {
                        warn!(table = %table.name, error = %format!("{err:#}"), "dataset lookup failed");
                        return table;
                    }
                }
            }

            let Some(dataset) = table.dataset.clone() else {
                return table;
            };
            if !table.columns.is_empty()
                || !valid_dataset_name(&dataset)
                || !valid_table_name(&table.name)
            {
                return table;
            }
            match table_columns(services.warehouse, project_id, &dataset, &table.name) {
                Ok(columns) if columns.is_empty() => questions.push(format!(
                    "I could not find the table '{dataset}.{}'. Please confirm its dataset and name.",
                    table.name
                )),
                Ok(columns) => table.columns = columns,
                Err(err) => {
                    warn!(table = %table.name, error = %format!("{err:#}"), "column lookup failed");
                }
            }
            table
        })
        .collect()
}
