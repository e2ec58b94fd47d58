//! `attestor` command-line runner.

use attestor_core::ExecutionContext;
use attestor_orchestrator::{OrchestrationContext, OrchestratorConfig};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "attestor", about = "Attestor: multi-agent compliance assessment")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "attestor.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow against a fresh agent team for a project
    Run {
        #[arg(short, long)]
        workflow: String,
        #[arg(short, long)]
        project: String,
        /// Initial input as a JSON object
        #[arg(short, long, default_value = "{}")]
        input: String,
    },
    /// List registered workflows
    Workflows,
    /// List agent templates
    Templates,
    /// Build a project team and print per-agent health
    Health {
        #[arg(short, long)]
        project: String,
    },
}

/// Read the config file, falling back to defaults when it does not exist.
fn load_config(path: &Path) -> anyhow::Result<OrchestratorConfig> {
    if !path.exists() {
        info!(path = %path.display(), "Config file not found, using defaults");
        return Ok(OrchestratorConfig::default());
    }
    Ok(OrchestratorConfig::load(path)?)
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    let ctx = OrchestrationContext::init(config)?;

    let outcome = run(&ctx, cli.command).await;
    ctx.shutdown().await;
    outcome
}

async fn run(ctx: &OrchestrationContext, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Run {
            workflow,
            project,
            input,
        } => {
            let input: serde_json::Value = serde_json::from_str(&input)
                .map_err(|e| anyhow::anyhow!("--input is not valid JSON: {e}"))?;
            let team = ctx.factory().create_project_agent_team(&project).await?;
            info!(project = %project, agents = team.len(), "Project team ready");

            let result = ctx
                .orchestrator()
                .execute_workflow(&workflow, &project, ExecutionContext::new(&project), input)
                .await;
            ctx.factory().destroy_project_agent_team(&project).await?;
            print_json(&result?)
        }
        Commands::Workflows => print_json(&ctx.orchestrator().list_workflows()),
        Commands::Templates => print_json(&ctx.factory().list_templates()),
        Commands::Health { project } => {
            ctx.factory().create_project_agent_team(&project).await?;
            let reports = ctx.registry().health_check(None).await?;
            let reports: std::collections::BTreeMap<_, _> = reports.into_iter().collect();
            print_json(&reports)?;
            print_json(&ctx.health().await)
        }
    }
}
