use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::{self, Write};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::filter::LevelFilter;

use crossrole::aws::{ProfileSessionProvider, StsRoleAssumer};
use crossrole::commands::{ConfigArgs, DeleteCommand, DeployCommand, PlanCommand, ValidateCommand};
use crossrole::common::Config;
use crossrole::plan::{build_plan, AccessPlan};
use crossrole::reconciler::Reconciler;
use crossrole::stack::{CloudFormationDeployer, DeployOptions};
use crossrole::validator::{CallerIdentityProbe, Validator};

#[derive(Parser)]
#[command(
    name = "crossrole",
    about = "Provision and validate cross account IAM role access",
    version = env!("CARGO_PKG_VERSION"),
    author = "ktruck"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the stack templates the config would deploy
    Plan(PlanCommand),
    /// Deploy grantee and owner stacks, then validate the trust
    Deploy(DeployCommand),
    /// Assume every granted owner role and print who we are
    Validate(ValidateCommand),
    /// Delete grantee and owner stacks
    Delete(DeleteCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let max_level = log_filter(cli.verbose, &cli.log_level)?;
    tracing_subscriber::fmt().with_max_level(max_level).init();

    print_banner();

    match cli.command {
        Commands::Plan(cmd) => plan(cmd).await?,
        Commands::Deploy(cmd) => deploy(cmd).await?,
        Commands::Validate(cmd) => validate(cmd).await?,
        Commands::Delete(cmd) => delete(cmd).await?,
    }

    Ok(())
}

/// `--verbose` wins over `--log-level`
fn log_filter(verbose: bool, log_level: &str) -> Result<LevelFilter> {
    if verbose {
        return Ok(LevelFilter::DEBUG);
    }
    log_level
        .parse::<LevelFilter>()
        .with_context(|| format!("invalid log level {:?}", log_level))
}

async fn load(args: &ConfigArgs) -> Result<(Config, AccessPlan)> {
    let config = Config::load(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    let region = args.region.clone().unwrap_or_else(|| config.aws_region.clone());
    info!("Using config {} in {}", args.config.display(), region);

    let provider = ProfileSessionProvider::new(region);
    let plan = build_plan(&config, &provider).await?;
    Ok((config, plan))
}

async fn plan(cmd: PlanCommand) -> Result<()> {
    let (_, plan) = load(&cmd.config).await?;
    let reconciler = Reconciler::new(
        Arc::new(CloudFormationDeployer::new()),
        DeployOptions::default(),
    );

    let planned = reconciler.plan(&plan.graph, &plan.grantees, &plan.owners)?;
    if planned.is_empty() {
        println!("Nothing to deploy");
    }
    for stack in planned {
        println!("# {} {} -> stack {}", stack.kind, stack.id, stack.stack_name);
        println!("{}", serde_json::to_string_pretty(&stack.template)?);
    }
    Ok(())
}

async fn deploy(cmd: DeployCommand) -> Result<()> {
    let (config, plan) = load(&cmd.config).await?;
    let reconciler = Reconciler::new(
        Arc::new(CloudFormationDeployer::new()),
        cmd.stack.deploy_options(),
    );

    let tags = config.cross_account_iam_permission.tags.clone();
    let report = reconciler
        .deploy(&plan.graph, &plan.grantees, &plan.owners, Some(tags))
        .await?;
    println!("✅ {} stack(s) reconciled", report.entities.len());

    if !cmd.skip_validate {
        run_validation(&plan, None).await?;
    }
    Ok(())
}

async fn validate(cmd: ValidateCommand) -> Result<()> {
    let (_, plan) = load(&cmd.config).await?;
    run_validation(&plan, cmd.duration_seconds).await
}

async fn run_validation(plan: &AccessPlan, duration_seconds: Option<i32>) -> Result<()> {
    let validator = Validator::new(Arc::new(StsRoleAssumer::new(duration_seconds)));
    let exercised = validator
        .validate(&plan.graph, &plan.grantees, &CallerIdentityProbe)
        .await?;
    println!("✅ {} cross account assume role(s) verified", exercised);
    Ok(())
}

async fn delete(cmd: DeleteCommand) -> Result<()> {
    let (_, plan) = load(&cmd.config).await?;
    let reconciler = Reconciler::new(
        Arc::new(CloudFormationDeployer::new()),
        cmd.stack.deploy_options(),
    );
    let report = reconciler
        .delete(&plan.graph, &plan.grantees, &plan.owners)
        .await?;
    println!("🗑️  {} stack(s) removed", report.entities.len());
    Ok(())
}

fn print_banner() {
    println!();
    println!("🔗 Cross Account IAM Role Access");
    println!();
    let _ = io::stdout().flush();
}
