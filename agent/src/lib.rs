//! Conversational agent that turns data-pipeline requests into compiling
//! Dataform code.
//!
//! A turn runs a small task graph: the request is structured into tables and
//! checks, code is generated and split into files, the files are uploaded and
//! compiled with automatic repair, and the produced tables are validated. The
//! crate keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (state, merging, routing, parsing,
//!   rule planning). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting adapters (config, child processes, model,
//!   Dataform, BigQuery, prompts). Behind traits so tests can script them.
//!
//! Orchestration modules ([`repair`], [`compile`], [`steps`], [`workflow`],
//! [`session`]) combine the two.

pub mod compile;
pub mod core;
pub mod io;
pub mod logging;
pub mod repair;
pub mod session;
pub mod steps;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod workflow;
