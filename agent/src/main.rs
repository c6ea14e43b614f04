//! Interactive Dataform pipeline agent.
//!
//! Reads pipeline requests from stdin and answers on stdout. Configuration is
//! read from `$DATAFORM_AGENT_CONFIG` or `dataform-agent.toml`.

use std::io;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use dataform_agent::io::config::{config_path_from_env, load_config};
use dataform_agent::io::dataform::CliWorkspace;
use dataform_agent::io::model::CommandModel;
use dataform_agent::io::prompt::PromptEngine;
use dataform_agent::io::warehouse::BqWarehouse;
use dataform_agent::logging;
use dataform_agent::session::Session;
use dataform_agent::steps::Services;
use dataform_agent::workflow::Workflow;

#[derive(Parser)]
#[command(
    name = "dataform-agent",
    version,
    about = "Turn data-pipeline requests into compiling Dataform code"
)]
struct Cli {}

fn main() {
    if let Err(err) = run() {
        eprintln!("{:#}", err);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let _cli = Cli::parse();
    logging::init();

    let config_path = config_path_from_env();
    let config = load_config(&config_path)
        .with_context(|| format!("load config {}", config_path.display()))?;
    info!(
        project = %config.project_id,
        workspace = %config.workspace,
        "configuration loaded"
    );

    let model = CommandModel::new(&config.model);
    let workspace = CliWorkspace::new(&config);
    let warehouse = BqWarehouse::new(&config);
    let prompts = PromptEngine::new();
    let services = Services {
        model: &model,
        workspace: &workspace,
        warehouse: &warehouse,
        prompts: &prompts,
        config: &config,
    };

    let stdin = io::stdin();
    let stdout = io::stdout();
    Session::new(Workflow::new(services), stdin.lock(), stdout.lock()).run()
}
