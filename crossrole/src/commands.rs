use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::stack::DeployOptions;

#[derive(Parser, Debug, Clone)]
pub struct ConfigArgs {
    /// Path to the cross account permission config (YAML or JSON)
    #[arg(short, long, env = "CROSSROLE_CONFIG", default_value = "config.yml")]
    pub config: PathBuf,

    /// Override the AWS region from the config file
    #[arg(long, env = "AWS_REGION")]
    pub region: Option<String>,
}

#[derive(Parser, Debug, Clone)]
pub struct StackArgs {
    /// Seconds to wait for each stack to reach a terminal state
    #[arg(long, default_value = "60")]
    pub timeout: u64,

    /// Seconds between stack status polls
    #[arg(long, default_value = "5")]
    pub poll_interval: u64,

    /// Keep a stack whose creation failed instead of deleting it
    #[arg(long)]
    pub keep_failed: bool,
}

impl StackArgs {
    pub fn deploy_options(&self) -> DeployOptions {
        DeployOptions {
            include_named_iam: true,
            on_failure_delete: !self.keep_failed,
            timeout: Duration::from_secs(self.timeout),
            poll_interval: Duration::from_secs(self.poll_interval),
        }
    }
}

#[derive(Parser, Debug, Clone)]
pub struct PlanCommand {
    #[command(flatten)]
    pub config: ConfigArgs,
}

#[derive(Parser, Debug, Clone)]
pub struct DeployCommand {
    #[command(flatten)]
    pub config: ConfigArgs,

    #[command(flatten)]
    pub stack: StackArgs,

    /// Do not assume the owner roles after deploying
    #[arg(long)]
    pub skip_validate: bool,
}

#[derive(Parser, Debug, Clone)]
pub struct ValidateCommand {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Lifetime in seconds of the assumed role sessions
    #[arg(long)]
    pub duration_seconds: Option<i32>,
}

#[derive(Parser, Debug, Clone)]
pub struct DeleteCommand {
    #[command(flatten)]
    pub config: ConfigArgs,

    #[command(flatten)]
    pub stack: StackArgs,
}
