use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::aws::AwsSession;
use crate::error::AccessResult;

mod cloudformation;

pub use cloudformation::CloudFormationDeployer;

/// Deploys and removes infrastructure stacks, blocking until each reaches a
/// terminal state
#[async_trait]
pub trait StackDeployer: Send + Sync {
    /// Create or update `stack_name` so that it matches `template_body`.
    /// Deploying an unchanged template must be a no-op.
    async fn deploy_stack(
        &self,
        session: &AwsSession,
        stack_name: &str,
        template_body: &str,
        tags: &BTreeMap<String, String>,
        options: &DeployOptions,
    ) -> AccessResult<StackOutcome>;

    async fn remove_stack(
        &self,
        session: &AwsSession,
        stack_name: &str,
        options: &DeployOptions,
    ) -> AccessResult<StackOutcome>;
}

/// Behaviour flags passed through to the stack collaborator
#[derive(Debug, Clone)]
pub struct DeployOptions {
    /// Acknowledge that the template creates named IAM resources
    pub include_named_iam: bool,

    /// Delete a stack whose creation failed instead of leaving it rolled back
    pub on_failure_delete: bool,

    /// How long to wait for a stack to reach a terminal state
    pub timeout: Duration,

    pub poll_interval: Duration,
}

impl Default for DeployOptions {
    fn default() -> Self {
        Self {
            include_named_iam: true,
            on_failure_delete: true,
            timeout: Duration::from_secs(60),
            poll_interval: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackOutcome {
    Created,
    Updated,
    /// Live stack already matched the template
    Unchanged,
    Deleted,
    /// Nothing to remove
    AlreadyAbsent,
}

impl fmt::Display for StackOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Unchanged => "unchanged",
            Self::Deleted => "deleted",
            Self::AlreadyAbsent => "already absent",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackPhase {
    InProgress,
    Succeeded,
    Failed,
}

/// Classify a CloudFormation stack status string
pub fn classify_status(status: &str) -> StackPhase {
    if status.ends_with("_IN_PROGRESS") {
        return StackPhase::InProgress;
    }
    match status {
        "ROLLBACK_COMPLETE" | "UPDATE_ROLLBACK_COMPLETE" | "IMPORT_ROLLBACK_COMPLETE" => {
            StackPhase::Failed
        }
        s if s.ends_with("_COMPLETE") => StackPhase::Succeeded,
        _ => StackPhase::Failed,
    }
}
