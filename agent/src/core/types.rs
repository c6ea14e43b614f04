//! Shared value types threaded through the conversation.
//!
//! These types define stable contracts between the workflow steps and the
//! external services. They carry no behavior beyond small accessors and must
//! keep their serialized shape stable, since the model is asked to emit them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Author of a conversational message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Human,
    Agent,
    System,
}

impl Role {
    /// Prefix used when echoing a message to the console.
    pub fn prefix(self) -> &'static str {
        match self {
            Role::Human => "Human",
            Role::Agent => "AI",
            Role::System => "System",
        }
    }
}

/// A role-tagged message in the conversational timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn human(content: impl Into<String>) -> Self {
        Self {
            role: Role::Human,
            content: content.into(),
        }
    }

    pub fn agent(content: impl Into<String>) -> Self {
        Self {
            role: Role::Agent,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// One column of a table schema fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Table descriptor: a name plus whatever schema fragments are known so far.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub columns: Vec<ColumnSpec>,
}

impl TableSpec {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dataset: None,
            description: None,
            columns: Vec::new(),
        }
    }

    /// `dataset.table` when the dataset is known, otherwise the bare table name.
    pub fn qualified_name(&self) -> String {
        self.qualified_name_or("")
    }

    /// Like [`qualified_name`](Self::qualified_name), with `default_dataset`
    /// standing in for a missing dataset.
    pub fn qualified_name_or(&self, default_dataset: &str) -> String {
        let dataset = self
            .dataset
            .as_deref()
            .filter(|d| !d.is_empty())
            .unwrap_or(default_dataset);
        if dataset.is_empty() {
            self.name.clone()
        } else {
            format!("{dataset}.{}", self.name)
        }
    }
}

/// A candidate pipeline source file (`{"path": .., "content": ..}` on the wire).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataformFile {
    pub path: String,
    #[serde(default)]
    pub content: String,
}

impl DataformFile {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

/// A structural error reported by the remote compiler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilationError {
    pub message: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub stack: String,
}

/// Normalized summary of a compilation that finished without errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilationSummary {
    pub name: String,
    pub workspace: String,
    pub errors: Vec<CompilationError>,
}

/// Result classification of a data-quality rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ValidationStatus {
    Passed,
    Failed,
    Error,
}

impl ValidationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ValidationStatus::Passed => "PASSED",
            ValidationStatus::Failed => "FAILED",
            ValidationStatus::Error => "ERROR",
        }
    }
}

/// Outcome of evaluating one data-quality rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub rule: String,
    pub result: ValidationStatus,
    pub details: String,
}

/// `{"files": [...]}` as emitted by the model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSet {
    #[serde(default)]
    pub files: Vec<DataformFile>,
}

/// A natural-language request structured into tables, transforms and checks.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ElicitedRequest {
    pub source_tables: Vec<TableSpec>,
    pub target_tables: Vec<TableSpec>,
    pub intermediate_tables: Vec<TableSpec>,
    pub transformations: Map<String, Value>,
    pub data_quality_checks: Map<String, Value>,
    /// Questions the model could not answer from the request alone.
    pub follow_up_questions: Vec<String>,
    /// Set when the request cannot be turned into a pipeline at all.
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Clarifications {
    pub follow_up_questions: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualified_name_includes_dataset_when_known() {
        let mut table = TableSpec::named("orders");
        assert_eq!(table.qualified_name(), "orders");
        table.dataset = Some("sales".to_string());
        assert_eq!(table.qualified_name(), "sales.orders");
    }

    #[test]
    fn qualified_name_or_falls_back_to_default_dataset() {
        let mut table = TableSpec::named("fct_orders");
        assert_eq!(table.qualified_name_or("dataform"), "dataform.fct_orders");
        table.dataset = Some(String::new());
        assert_eq!(table.qualified_name_or("dataform"), "dataform.fct_orders");
        table.dataset = Some("marts".to_string());
        assert_eq!(table.qualified_name_or("dataform"), "marts.fct_orders");
    }

    #[test]
    fn column_type_uses_wire_name() {
        let column: ColumnSpec =
            serde_json::from_str(r#"{"name":"id","type":"INT64"}"#).expect("parse column");
        assert_eq!(column.data_type.as_deref(), Some("INT64"));
    }

    #[test]
    fn file_content_defaults_to_empty() {
        let file: DataformFile =
            serde_json::from_str(r#"{"path":"definitions/a.sqlx"}"#).expect("parse file");
        assert_eq!(file.content, "");
    }

    #[test]
    fn validation_status_serializes_uppercase() {
        let json = serde_json::to_string(&ValidationStatus::Passed).expect("serialize");
        assert_eq!(json, "\"PASSED\"");
    }
}
