//! Side-effecting adapters: configuration, child processes and the external
//! services the workflow talks to.

pub mod config;
pub mod dataform;
pub mod model;
pub mod process;
pub mod prompt;
pub mod warehouse;
