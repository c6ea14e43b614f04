//! Parsing structured (JSON) model output.
//!
//! Model responses are free text. Before parsing, a fenced block (three
//! backticks plus an optional language tag) is unwrapped. Parsing then checks,
//! in order: JSON syntax, JSON Schema conformance (Draft 2020-12), and the typed
//! shape. Each failure produces a message meant to be shown back to the model.

use std::marker::PhantomData;
use std::sync::LazyLock;

use anyhow::{Context, Result, anyhow, bail};
use jsonschema::{Draft, Validator};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::core::types::{Clarifications, ElicitedRequest, FileSet};

const DATAFORM_FILES_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/schemas/dataform_files.schema.json"
));
const ELICITED_REQUEST_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/schemas/elicited_request.schema.json"
));
const CLARIFICATIONS_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/schemas/clarifications.schema.json"
));

static FENCED_BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_+-]*[ \t]*\r?\n?(.*?)```").expect("fenced block regex")
});

/// Return the body of the first fenced block, or the trimmed text when unfenced.
pub fn strip_code_fences(raw: &str) -> String {
    if let Some(caps) = FENCED_BLOCK_RE.captures(raw) {
        if let Some(body) = caps.get(1) {
            return body.as_str().trim().to_string();
        }
    }
    let trimmed = raw.trim();
    // Unterminated fence: drop the opening line and any trailing backticks.
    if let Some(rest) = trimmed.strip_prefix("```") {
        let body = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
        return body.trim_end_matches('`').trim().to_string();
    }
    trimmed.to_string()
}

/// Schema-checked parser producing `T` from model text.
pub struct StructuredParser<T> {
    validator: Validator,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> StructuredParser<T> {
    /// Compile `schema_src` (a JSON Schema document) into a parser.
    pub fn new(schema_src: &str) -> Result<Self> {
        let schema: Value = serde_json::from_str(schema_src).context("parse json schema")?;
        let validator = jsonschema::options()
            .with_draft(Draft::Draft202012)
            .build(&schema)
            .map_err(|err| anyhow!("compile json schema: {err}"))?;
        Ok(Self {
            validator,
            _marker: PhantomData,
        })
    }

    /// Parse already fence-stripped text.
    pub fn parse(&self, text: &str) -> Result<T> {
        let value: Value = serde_json::from_str(text).context("response is not valid JSON")?;
        let messages: Vec<String> = self
            .validator
            .iter_errors(&value)
            .map(|err| err.to_string())
            .collect();
        if !messages.is_empty() {
            bail!("schema validation failed:\n- {}", messages.join("\n- "));
        }
        serde_json::from_value(value).context("response does not match the expected shape")
    }
}

impl StructuredParser<FileSet> {
    pub fn dataform_files() -> Self {
        Self::new(DATAFORM_FILES_SCHEMA).expect("dataform_files schema should be valid")
    }
}

impl StructuredParser<ElicitedRequest> {
    pub fn elicited_request() -> Self {
        Self::new(ELICITED_REQUEST_SCHEMA).expect("elicited_request schema should be valid")
    }
}

impl StructuredParser<Clarifications> {
    pub fn clarifications() -> Self {
        Self::new(CLARIFICATIONS_SCHEMA).expect("clarifications schema should be valid")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::rules::{parse_rules, unevaluable_outcome};
    use crate::core::types::ValidationStatus;
    use serde::Deserialize;

    const FILES_SCHEMA: &str = r#"{
        "type": "object",
        "required": ["files"],
        "properties": {
            "files": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["path"],
                    "properties": {"path": {"type": "string"}, "content": {"type": "string"}}
                }
            }
        }
    }"#;

    #[derive(Debug, Deserialize)]
    struct Files {
        files: Vec<crate::core::types::DataformFile>,
    }

    #[test]
    fn strips_language_tagged_fence() {
        let raw = "Here you go:\n```json\n{\"a\": 1}\n```\nthanks";
        assert_eq!(strip_code_fences(raw), "{\"a\": 1}");
    }

    #[test]
    fn strips_bare_fence() {
        assert_eq!(strip_code_fences("```\n[1, 2]\n```"), "[1, 2]");
    }

    #[test]
    fn leaves_unfenced_text_trimmed() {
        assert_eq!(strip_code_fences("  {\"a\": 1}\n"), "{\"a\": 1}");
    }

    #[test]
    fn handles_unterminated_fence() {
        assert_eq!(strip_code_fences("```json\n{\"a\": 1}\n``"), "{\"a\": 1}");
    }

    #[test]
    fn parser_accepts_conforming_json() {
        let parser: StructuredParser<Files> = StructuredParser::new(FILES_SCHEMA).expect("schema");
        let parsed = parser
            .parse(r#"{"files":[{"path":"a.sqlx","content":"select 1"}]}"#)
            .expect("parse");
        assert_eq!(parsed.files.len(), 1);
        assert_eq!(parsed.files[0].path, "a.sqlx");
    }

    #[test]
    fn parser_reports_syntax_errors() {
        let parser: StructuredParser<Files> = StructuredParser::new(FILES_SCHEMA).expect("schema");
        let err = parser.parse("{files: [").unwrap_err();
        assert!(err.to_string().contains("not valid JSON"));
    }

    #[test]
    fn parser_reports_schema_violations() {
        let parser: StructuredParser<Files> = StructuredParser::new(FILES_SCHEMA).expect("schema");
        let err = parser.parse(r#"{"files":[{"content":"x"}]}"#).unwrap_err();
        assert!(err.to_string().contains("schema validation failed"));
    }

    #[test]
    fn embedded_schemas_compile_and_parse() {
        let files = StructuredParser::dataform_files()
            .parse(r#"{"files":[{"path":"definitions/a.sqlx","content":""}]}"#)
            .expect("files");
        assert_eq!(files.files[0].path, "definitions/a.sqlx");

        let request = StructuredParser::elicited_request()
            .parse(
                r#"{
                    "source_tables": [{"name": "orders", "dataset": "raw"}],
                    "data_quality_checks": {"id_not_null": {"type": "not_null", "column": "id"}},
                    "follow_up_questions": []
                }"#,
            )
            .expect("request");
        assert_eq!(request.source_tables[0].qualified_name(), "raw.orders");
        assert!(request.target_tables.is_empty());
        assert_eq!(request.error, None);

        let err = StructuredParser::clarifications()
            .parse(r#"{"follow_up_questions": []}"#)
            .unwrap_err();
        assert!(err.to_string().contains("schema validation failed"));
    }

    #[test]
    fn check_without_type_is_left_to_rule_parsing() {
        let request = StructuredParser::elicited_request()
            .parse(r#"{"data_quality_checks": {"id_check": {"column": "id"}}}"#)
            .expect("request");
        let rules = parse_rules(&request.data_quality_checks);
        let outcome = unevaluable_outcome(&rules[0]).expect("unevaluable rule");
        assert_eq!(outcome.rule, "id_check");
        assert_eq!(outcome.result, ValidationStatus::Error);
        assert_eq!(outcome.details, "rule definition is missing 'type'");
    }
}
