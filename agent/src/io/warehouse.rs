//! BigQuery access: raw queries plus the information-schema helpers used to
//! enrich elicited table specs.

use anyhow::{Context, Result, anyhow};
use regex::Regex;
use serde_json::{Map, Value};
use tracing::{debug, info, instrument};

use crate::core::rules::{valid_dataset_name, valid_project_id, valid_table_name};
use crate::core::types::ColumnSpec;
use crate::io::config::AgentConfig;
use crate::io::process::Tool;

/// One result row, keyed by column name.
pub type Row = Map<String, Value>;

/// Something that can run a SQL query and return its rows.
pub trait Warehouse {
    fn query(&self, sql: &str) -> Result<Vec<Row>>;
}

/// Warehouse backed by the `bq` command-line tool.
#[derive(Debug, Clone)]
pub struct BqWarehouse {
    tool: Tool,
    project_id: String,
}

impl BqWarehouse {
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            tool: Tool::new(
                "warehouse query",
                &config.warehouse.command,
                config.warehouse.timeout_secs,
                config.warehouse.output_limit_bytes,
            ),
            project_id: config.project_id.clone(),
        }
    }
}

impl Warehouse for BqWarehouse {
    #[instrument(skip_all, fields(sql_bytes = sql.len()))]
    fn query(&self, sql: &str) -> Result<Vec<Row>> {
        let mut args = Vec::with_capacity(2);
        if !self.project_id.is_empty() {
            args.push(format!("--project_id={}", self.project_id));
        }
        args.push(sql.to_string());

        let run = self
            .tool
            .run(&args, None, None)
            .context("run warehouse query")?;
        let stdout = run.complete_stdout()?;
        let rows = parse_rows(&stdout)?;
        debug!(rows = rows.len(), "query finished");
        Ok(rows)
    }
}

/// Parse `--format=json` output. An empty result prints nothing.
pub fn parse_rows(stdout: &str) -> Result<Vec<Row>> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let value: Value = serde_json::from_str(trimmed).context("parse query output")?;
    let Value::Array(items) = value else {
        return Err(anyhow!("query output is not a JSON array"));
    };
    items
        .into_iter()
        .map(|item| match item {
            Value::Object(row) => Ok(row),
            other => Err(anyhow!("query row is not an object: {other}")),
        })
        .collect()
}

fn string_column(rows: Vec<Row>, column: &str) -> Vec<String> {
    rows.into_iter()
        .filter_map(|row| row.get(column).and_then(Value::as_str).map(str::to_string))
        .collect()
}

fn checked_project(project_id: &str) -> Result<()> {
    if valid_project_id(project_id) {
        Ok(())
    } else {
        Err(anyhow!("invalid project id '{project_id}'"))
    }
}

fn checked_dataset(dataset: &str) -> Result<()> {
    if valid_dataset_name(dataset) {
        Ok(())
    } else {
        Err(anyhow!("invalid dataset name '{dataset}'"))
    }
}

/// Datasets visible in the project's US region.
pub fn list_datasets(warehouse: &dyn Warehouse, project_id: &str) -> Result<Vec<String>> {
    checked_project(project_id)?;
    let rows = warehouse.query(&format!(
        "SELECT schema_name FROM `{project_id}.region-us.INFORMATION_SCHEMA.SCHEMATA`"
    ))?;
    Ok(string_column(rows, "schema_name"))
}

pub fn list_tables(
    warehouse: &dyn Warehouse,
    project_id: &str,
    dataset: &str,
) -> Result<Vec<String>> {
    checked_project(project_id)?;
    checked_dataset(dataset)?;
    let rows = warehouse.query(&format!(
        "SELECT table_name FROM `{project_id}.{dataset}.INFORMATION_SCHEMA.TABLES`"
    ))?;
    Ok(string_column(rows, "table_name"))
}

/// Columns of `dataset.table`; empty when the table does not exist.
pub fn table_columns(
    warehouse: &dyn Warehouse,
    project_id: &str,
    dataset: &str,
    table: &str,
) -> Result<Vec<ColumnSpec>> {
    checked_project(project_id)?;
    checked_dataset(dataset)?;
    if !valid_table_name(table) {
        return Err(anyhow!("invalid table name '{table}'"));
    }
    let rows = warehouse.query(&format!(
        "SELECT column_name, data_type FROM `{project_id}.{dataset}.INFORMATION_SCHEMA.COLUMNS` WHERE table_name = '{table}'"
    ))?;
    Ok(rows
        .into_iter()
        .filter_map(|row| {
            let name = row.get("column_name")?.as_str()?.to_string();
            let data_type = row
                .get("data_type")
                .and_then(Value::as_str)
                .map(str::to_string);
            Some(ColumnSpec {
                name,
                data_type,
                description: None,
            })
        })
        .collect())
}

/// First dataset holding a table that matches `table_pattern`.
///
/// `*` in the pattern matches any run of characters; the match is anchored at
/// the start of the table name.
#[instrument(skip(warehouse))]
pub fn find_relevant_dataset(
    warehouse: &dyn Warehouse,
    project_id: &str,
    table_pattern: &str,
) -> Result<Option<String>> {
    let pattern = wildcard_regex(table_pattern)?;
    for dataset in list_datasets(warehouse, project_id)? {
        if !valid_dataset_name(&dataset) {
            debug!(dataset = %dataset, "skipping dataset with unsupported name");
            continue;
        }
        let tables = list_tables(warehouse, project_id, &dataset)?;
        if let Some(table) = tables.iter().find(|t| pattern.is_match(t)) {
            info!(table = %table, dataset = %dataset, "found table");
            return Ok(Some(dataset));
        }
    }
    Ok(None)
}

fn wildcard_regex(pattern: &str) -> Result<Regex> {
    let body = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&format!("^{body}")).with_context(|| format!("table pattern '{pattern}'"))
}

/// Run a single-row `COUNT(*) AS violations` query.
///
/// `bq` renders integers as strings, so both shapes are accepted.
pub fn count(warehouse: &dyn Warehouse, sql: &str) -> Result<u64> {
    let rows = warehouse.query(sql)?;
    let row = rows
        .first()
        .ok_or_else(|| anyhow!("count query returned no rows"))?;
    let value = row
        .get("violations")
        .or_else(|| row.values().next())
        .ok_or_else(|| anyhow!("count query returned an empty row"))?;
    match value {
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| anyhow!("count is not a non-negative integer: {n}")),
        Value::String(s) => s
            .trim()
            .parse::<u64>()
            .with_context(|| format!("count is not an integer: '{s}'")),
        other => Err(anyhow!("unexpected count value: {other}")),
    }
}
