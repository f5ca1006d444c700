//! Accretion CLI
//!
//! The `accretion` command manages the builder stacks of a multi-region
//! layer deployment, tracked in a deployment file.
//!
//! ## Commands
//!
//! - `init`: create a deployment file and deploy `Core` stacks
//! - `add-regions`: register more regions and bring every region up to date
//! - `add-builders`: deploy missing builder stacks where `Core` exists
//! - `update`: upsert every stack and upload fresh workers
//! - `destroy`: tear every stack down
//! - `publish`: request a layer build in every region
//! - `status`: show the deployment file

use std::path::{Path, PathBuf};
use std::sync::Arc;

use accretion_core::{
    init_tracing, DeploymentLedger, Deployer, DirectoryTemplates, FanOutConfig, FanOutReport,
    LayerRequest, LifecycleConfig, LogFormat, RegionStatus, Services, SlotChange, WorkersBundle,
};
use accretion_remote::HttpControlPlane;
use accretion_state::FsLedgerStore;
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "accretion")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Multi-region dependency layer deployments", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines and reports
    #[arg(long, global = true)]
    json: bool,

    /// Directory holding Core.json, ArtifactBuilder.json and LayerBuilder.json
    #[arg(
        long,
        global = true,
        env = "ACCRETION_TEMPLATES_DIR",
        default_value = "templates"
    )]
    templates: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct WorkersArg {
    /// Zip of the builder workers, uploaded to every region
    #[arg(long, env = "ACCRETION_WORKERS_ZIP")]
    workers: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a deployment file and deploy Core stacks
    Init {
        /// Deployment file to create (or extend)
        deployment_file: PathBuf,

        /// Regions to deploy into
        #[arg(required = true)]
        regions: Vec<String>,
    },

    /// Register more regions, then update every region
    AddRegions {
        deployment_file: PathBuf,

        #[arg(required = true)]
        regions: Vec<String>,

        #[command(flatten)]
        workers: WorkersArg,
    },

    /// Deploy missing builder stacks in regions that have Core
    AddBuilders {
        deployment_file: PathBuf,

        #[command(flatten)]
        workers: WorkersArg,
    },

    /// Upsert every stack and upload fresh workers
    Update {
        deployment_file: PathBuf,

        #[command(flatten)]
        workers: WorkersArg,
    },

    /// Destroy every stack in every region
    Destroy { deployment_file: PathBuf },

    /// Request a layer build in every region with an artifact builder
    Publish {
        deployment_file: PathBuf,

        /// Layer request (JSON)
        request_file: PathBuf,
    },

    /// Show the stacks recorded in a deployment file
    Status { deployment_file: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let format = if cli.json {
        LogFormat::Json
    } else {
        LogFormat::Text
    };
    init_tracing(format, level);

    let client = Arc::new(
        HttpControlPlane::from_env().context("Failed to configure control-plane client")?,
    );
    info!(endpoint = %client.config().endpoint, "control plane configured");
    let services = Services {
        control: client.clone(),
        objects: client.clone(),
        workflows: client,
    };
    let deployer = |file: &Path| build_deployer(file, services.clone(), &cli.templates);

    let report = match cli.command {
        Commands::Init {
            deployment_file,
            regions,
        } => cmd_init(&deployer(&deployment_file), &regions).await?,
        Commands::AddRegions {
            deployment_file,
            regions,
            workers,
        } => cmd_add_regions(&deployer(&deployment_file), &regions, &workers.workers).await?,
        Commands::AddBuilders {
            deployment_file,
            workers,
        } => cmd_add_builders(&deployer(&deployment_file), &workers.workers).await?,
        Commands::Update {
            deployment_file,
            workers,
        } => cmd_update(&deployer(&deployment_file), &workers.workers).await?,
        Commands::Destroy { deployment_file } => cmd_destroy(&deployer(&deployment_file)).await?,
        Commands::Publish {
            deployment_file,
            request_file,
        } => cmd_publish(&deployer(&deployment_file), &request_file).await?,
        Commands::Status { deployment_file } => {
            let ledger = cmd_status(&deployer(&deployment_file))?;
            println!("{}", render_status(&ledger, cli.json)?);
            return Ok(());
        }
    };

    println!("{}", render_report(&report, cli.json)?);
    ensure_success(&report)
}

fn build_deployer(deployment_file: &Path, services: Services, templates: &Path) -> Deployer {
    Deployer::new(
        Arc::new(FsLedgerStore::new(deployment_file)),
        services,
        Arc::new(DirectoryTemplates::new(templates)),
        LifecycleConfig::from_env(),
        FanOutConfig::from_env(),
    )
}

fn load_workers(path: &Path) -> Result<WorkersBundle> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read workers zip {}", path.display()))?;
    anyhow::ensure!(!bytes.is_empty(), "workers zip {} is empty", path.display());
    Ok(WorkersBundle::new(bytes))
}

fn load_request(path: &Path) -> Result<LayerRequest> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read layer request {}", path.display()))?;
    LayerRequest::from_json(&raw)
        .with_context(|| format!("Invalid layer request {}", path.display()))
}

async fn cmd_init(deployer: &Deployer, regions: &[String]) -> Result<FanOutReport> {
    deployer
        .init(regions)
        .await
        .context("Failed to initialize deployment")
}

async fn cmd_add_regions(
    deployer: &Deployer,
    regions: &[String],
    workers: &Path,
) -> Result<FanOutReport> {
    let bundle = load_workers(workers)?;
    deployer
        .add_regions(regions, &bundle)
        .await
        .context("Failed to add regions")
}

async fn cmd_add_builders(deployer: &Deployer, workers: &Path) -> Result<FanOutReport> {
    let bundle = load_workers(workers)?;
    deployer
        .add_builders(&bundle)
        .await
        .context("Failed to add builders")
}

async fn cmd_update(deployer: &Deployer, workers: &Path) -> Result<FanOutReport> {
    let bundle = load_workers(workers)?;
    deployer
        .update_all(&bundle)
        .await
        .context("Failed to update deployment")
}

async fn cmd_destroy(deployer: &Deployer) -> Result<FanOutReport> {
    deployer
        .destroy()
        .await
        .context("Failed to destroy deployment")
}

async fn cmd_publish(deployer: &Deployer, request_file: &Path) -> Result<FanOutReport> {
    let request = load_request(request_file)?;
    info!(project = %request.name, "requesting layer build");
    deployer
        .publish(&request)
        .await
        .context("Failed to request layer build")
}

fn cmd_status(deployer: &Deployer) -> Result<DeploymentLedger> {
    deployer.status().context("Failed to read deployment file")
}

fn describe_change(change: &SlotChange) -> String {
    match change {
        SlotChange::Created { slot, stack_id } => format!("{slot} created: {stack_id}"),
        SlotChange::Updated { slot, stack_id } => format!("{slot} updated: {stack_id}"),
        SlotChange::Unchanged { slot, stack_id } => format!("{slot} unchanged: {stack_id}"),
        SlotChange::Destroyed { slot, stack_id } => format!("{slot} destroyed: {stack_id}"),
        SlotChange::WorkflowStarted { slot, execution_id } => {
            format!("{slot} build started: {execution_id}")
        }
    }
}

/// Per-region summary, or the report itself as JSON.
fn render_report(report: &FanOutReport, json: bool) -> Result<String> {
    if json {
        return Ok(serde_json::to_string_pretty(report)?);
    }

    let mut lines = Vec::new();
    for outcome in &report.outcomes {
        let status = match &outcome.status {
            RegionStatus::Completed { .. } => "ok".to_string(),
            RegionStatus::Skipped { reason } => format!("skipped ({reason})"),
            RegionStatus::Failed { kind, error, .. } => {
                format!("FAILED [{}] {error}", kind.as_str())
            }
        };
        lines.push(format!("{:<16} {status}", outcome.region));
        for change in outcome.changes() {
            lines.push(format!("    {}", describe_change(change)));
        }
    }
    lines.push(format!(
        "{}: {} completed, {} skipped, {} failed",
        report.operation,
        report.completed(),
        report.skipped(),
        report.failed()
    ));
    Ok(lines.join("\n"))
}

fn render_status(ledger: &DeploymentLedger, json: bool) -> Result<String> {
    if json {
        return Ok(serde_json::to_string_pretty(ledger)?);
    }
    if ledger.is_empty() {
        return Ok("No regions registered.".to_string());
    }

    let mut lines = Vec::new();
    for (region, record) in ledger.iter() {
        lines.push(region.to_string());
        if record.is_empty() {
            lines.push("    (no stacks)".to_string());
        }
        for (slot, stack_id) in record.stacks() {
            lines.push(format!("    {:<16} {stack_id}", slot.as_str()));
        }
    }
    Ok(lines.join("\n"))
}

/// Non-zero exit when any region failed.
fn ensure_success(report: &FanOutReport) -> Result<()> {
    anyhow::ensure!(
        report.is_success(),
        "{} failed in {} of {} regions",
        report.operation,
        report.failed(),
        report.outcomes.len()
    );
    Ok(())
}
