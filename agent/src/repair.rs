//! Response Repair Loop: ask the model, parse, and feed parse failures back.
//!
//! The loop keeps going until the parser accepts a response. With the default
//! [`RepairPolicy`] there is no attempt bound, so a model that never produces
//! parseable output stalls the turn. Setting `max_attempts` turns that case
//! into a [`RepairExhaustedError`].

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::core::structured::{StructuredParser, strip_code_fences};
use crate::io::model::Model;
use crate::io::prompt::PromptEngine;

/// Attempt policy for [`ResponseRepair`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepairPolicy {
    /// Total model calls allowed, including the first. `None` is unbounded.
    pub max_attempts: Option<u32>,
}

/// Raised when a bounded policy runs out of attempts.
#[derive(Debug, Error)]
#[error("model response could not be parsed after {attempts} attempts: {last_error}")]
pub struct RepairExhaustedError {
    pub attempts: u32,
    pub last_error: String,
}

pub struct ResponseRepair<'a> {
    model: &'a dyn Model,
    prompts: &'a PromptEngine,
    policy: RepairPolicy,
}

impl<'a> ResponseRepair<'a> {
    pub fn new(model: &'a dyn Model, prompts: &'a PromptEngine, policy: RepairPolicy) -> Self {
        Self {
            model,
            prompts,
            policy,
        }
    }

    /// Send `prompt` and parse the response with `parse`, trying the text as
    /// sent before the body of a fenced block.
    ///
    /// Each failure sends a repair prompt built from the original prompt, the
    /// raw response and the parse error. Model call failures are not repaired
    /// and propagate immediately.
    pub fn call_and_parse<T, P>(&self, prompt: &str, parse: P) -> Result<T>
    where
        P: Fn(&str) -> Result<T>,
    {
        let mut request = prompt.to_string();
        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            let raw = self.model.generate(&request).context("model call")?;
            let error = match parse_raw_or_fenced(&raw, &parse) {
                Ok(value) => {
                    if attempts > 1 {
                        info!(attempts, "model response repaired");
                    }
                    return Ok(value);
                }
                Err(err) => format!("{err:#}"),
            };
            warn!(attempt = attempts, error = %error, "model response did not parse");

            if self.policy.max_attempts.is_some_and(|max| attempts >= max) {
                return Err(RepairExhaustedError {
                    attempts,
                    last_error: error,
                }
                .into());
            }
            request = self.prompts.fix_json_parse_errors(prompt, &raw, &error)?;
            debug!(attempt = attempts + 1, "sending repair prompt");
        }
    }

    /// [`call_and_parse`](Self::call_and_parse) with a schema-checked parser.
    pub fn call_structured<T: DeserializeOwned>(
        &self,
        prompt: &str,
        parser: &StructuredParser<T>,
    ) -> Result<T> {
        self.call_and_parse(prompt, |text| parser.parse(text))
    }
}

/// Parse the response as sent, falling back to the body of its first fenced block.
///
/// A fence inside a JSON string value must not truncate an otherwise valid
/// response, so the unstripped text wins when it parses.
fn parse_raw_or_fenced<T, P>(raw: &str, parse: &P) -> Result<T>
where
    P: Fn(&str) -> Result<T>,
{
    let trimmed = raw.trim();
    parse(trimmed).or_else(|err| {
        let stripped = strip_code_fences(raw);
        if stripped == trimmed {
            Err(err)
        } else {
            parse(&stripped)
        }
    })
}
