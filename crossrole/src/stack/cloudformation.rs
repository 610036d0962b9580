use async_trait::async_trait;
use aws_sdk_cloudformation::error::DisplayErrorContext;
use aws_sdk_cloudformation::types::{Capability, OnFailure, Tag};
use aws_sdk_cloudformation::Client as CfnClient;
use std::collections::BTreeMap;
use std::future::Future;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::{classify_status, DeployOptions, StackDeployer, StackOutcome, StackPhase};
use crate::aws::AwsSession;
use crate::common::template::fingerprint_body;
use crate::error::{AccessError, AccessResult};

const NO_UPDATES_MESSAGE: &str = "No updates are to be performed";

/// Observed state of a live stack
#[derive(Debug, Clone, PartialEq, Eq)]
struct StackState {
    status: String,
    reason: Option<String>,
}

impl StackState {
    fn describe(&self) -> String {
        match &self.reason {
            Some(reason) => format!("{} ({})", self.status, reason),
            None => self.status.clone(),
        }
    }
}

/// What `deploy_stack` does with a stack given its current state
#[derive(Debug, Clone, PartialEq, Eq)]
enum DeployAction {
    Create,
    /// A stack that failed its first create can only be deleted
    Recreate,
    Busy(String),
    Update,
}

fn deploy_action(state: Option<&StackState>) -> DeployAction {
    match state {
        None => DeployAction::Create,
        Some(s) if s.status == "ROLLBACK_COMPLETE" => DeployAction::Recreate,
        Some(s) if classify_status(&s.status) == StackPhase::InProgress => {
            DeployAction::Busy(s.status.clone())
        }
        Some(_) => DeployAction::Update,
    }
}

/// Whether the live template already matches the one being deployed
fn templates_match(live_body: &str, template_body: &str) -> bool {
    fingerprint_body(live_body) == fingerprint_body(template_body)
}

fn is_no_updates_error(message: &str) -> bool {
    message.contains(NO_UPDATES_MESSAGE)
}

/// Map the state a stack settled in to the outcome of the operation that was
/// waiting for status `done`. `None` means the stack no longer exists.
fn settled(
    stack_name: &str,
    state: Option<StackState>,
    done: &str,
    outcome: StackOutcome,
) -> AccessResult<StackOutcome> {
    match state {
        Some(state) if state.status == done => Ok(outcome),
        Some(state) => Err(AccessError::remote_reconcile(stack_name, state.describe())),
        None => match outcome {
            StackOutcome::Deleted => Ok(outcome),
            StackOutcome::Created => Err(AccessError::remote_reconcile(
                stack_name,
                "creation failed and the stack was deleted",
            )),
            _ => Err(AccessError::remote_reconcile(
                stack_name,
                "stack disappeared during update",
            )),
        },
    }
}

/// Poll `describe` until the stack leaves every `*_IN_PROGRESS` status or
/// `options.timeout` elapses
async fn wait_until_settled<F, Fut>(
    stack_name: &str,
    options: &DeployOptions,
    mut describe: F,
) -> AccessResult<Option<StackState>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AccessResult<Option<StackState>>>,
{
    let deadline = Instant::now() + options.timeout;
    loop {
        let state = describe().await?;
        match &state {
            Some(s) if classify_status(&s.status) == StackPhase::InProgress => {
                debug!("Stack {} is {}", stack_name, s.status);
            }
            _ => return Ok(state),
        }

        if Instant::now() >= deadline {
            return Err(AccessError::timeout(stack_name, options.timeout.as_secs()));
        }
        sleep(options.poll_interval).await;
    }
}

/// StackDeployer backed by AWS CloudFormation
#[derive(Clone, Default)]
pub struct CloudFormationDeployer;

impl CloudFormationDeployer {
    pub fn new() -> Self {
        Self
    }

    async fn describe(
        &self,
        client: &CfnClient,
        stack_name: &str,
    ) -> AccessResult<Option<StackState>> {
        match client.describe_stacks().stack_name(stack_name).send().await {
            Ok(output) => Ok(output.stacks().first().map(|stack| StackState {
                status: stack
                    .stack_status()
                    .map(|s| s.as_str().to_string())
                    .unwrap_or_default(),
                reason: stack.stack_status_reason().map(str::to_string),
            })),
            Err(e) => {
                let message = DisplayErrorContext(&e).to_string();
                if message.contains("does not exist") {
                    Ok(None)
                } else {
                    Err(AccessError::aws(format!(
                        "DescribeStacks {} failed: {}",
                        stack_name, message
                    )))
                }
            }
        }
    }

    async fn wait(
        &self,
        client: &CfnClient,
        stack_name: &str,
        options: &DeployOptions,
    ) -> AccessResult<Option<StackState>> {
        wait_until_settled(stack_name, options, move || self.describe(client, stack_name)).await
    }

    fn capabilities(options: &DeployOptions) -> Vec<Capability> {
        let mut capabilities = vec![Capability::CapabilityIam];
        if options.include_named_iam {
            capabilities.push(Capability::CapabilityNamedIam);
        }
        capabilities
    }

    fn tags(tags: &BTreeMap<String, String>) -> Vec<Tag> {
        tags.iter()
            .map(|(key, value)| Tag::builder().key(key).value(value).build())
            .collect()
    }

    async fn create(
        &self,
        client: &CfnClient,
        stack_name: &str,
        template_body: &str,
        tags: &BTreeMap<String, String>,
        options: &DeployOptions,
    ) -> AccessResult<StackOutcome> {
        let on_failure = if options.on_failure_delete {
            OnFailure::Delete
        } else {
            OnFailure::Rollback
        };

        client
            .create_stack()
            .stack_name(stack_name)
            .template_body(template_body)
            .set_capabilities(Some(Self::capabilities(options)))
            .set_tags(Some(Self::tags(tags)))
            .on_failure(on_failure)
            .client_request_token(Uuid::new_v4().to_string())
            .send()
            .await
            .map_err(|e| {
                AccessError::remote_reconcile(stack_name, DisplayErrorContext(&e).to_string())
            })?;
        info!("Creating stack {}", stack_name);

        let state = self.wait(client, stack_name, options).await?;
        settled(stack_name, state, "CREATE_COMPLETE", StackOutcome::Created)
    }

    async fn update(
        &self,
        client: &CfnClient,
        stack_name: &str,
        template_body: &str,
        tags: &BTreeMap<String, String>,
        options: &DeployOptions,
    ) -> AccessResult<StackOutcome> {
        let live_body = client
            .get_template()
            .stack_name(stack_name)
            .send()
            .await
            .map_err(|e| {
                AccessError::aws(format!(
                    "GetTemplate {} failed: {}",
                    stack_name,
                    DisplayErrorContext(&e)
                ))
            })?
            .template_body()
            .map(str::to_string)
            .unwrap_or_default();

        if templates_match(&live_body, template_body) {
            info!("Stack {} is up to date", stack_name);
            return Ok(StackOutcome::Unchanged);
        }

        let result = client
            .update_stack()
            .stack_name(stack_name)
            .template_body(template_body)
            .set_capabilities(Some(Self::capabilities(options)))
            .set_tags(Some(Self::tags(tags)))
            .client_request_token(Uuid::new_v4().to_string())
            .send()
            .await;
        if let Err(e) = result {
            let message = DisplayErrorContext(&e).to_string();
            if is_no_updates_error(&message) {
                info!("Stack {} is up to date", stack_name);
                return Ok(StackOutcome::Unchanged);
            }
            return Err(AccessError::remote_reconcile(stack_name, message));
        }
        info!("Updating stack {}", stack_name);

        let state = self.wait(client, stack_name, options).await?;
        settled(stack_name, state, "UPDATE_COMPLETE", StackOutcome::Updated)
    }

    async fn delete(
        &self,
        client: &CfnClient,
        stack_name: &str,
        options: &DeployOptions,
    ) -> AccessResult<StackOutcome> {
        client
            .delete_stack()
            .stack_name(stack_name)
            .client_request_token(Uuid::new_v4().to_string())
            .send()
            .await
            .map_err(|e| {
                AccessError::remote_reconcile(stack_name, DisplayErrorContext(&e).to_string())
            })?;
        info!("Deleting stack {}", stack_name);

        let state = self.wait(client, stack_name, options).await?;
        settled(stack_name, state, "DELETE_COMPLETE", StackOutcome::Deleted)
    }
}

#[async_trait]
impl StackDeployer for CloudFormationDeployer {
    #[instrument(
        skip(self, session, template_body, tags, options),
        fields(account = %session.account_id())
    )]
    async fn deploy_stack(
        &self,
        session: &AwsSession,
        stack_name: &str,
        template_body: &str,
        tags: &BTreeMap<String, String>,
        options: &DeployOptions,
    ) -> AccessResult<StackOutcome> {
        let client = CfnClient::new(session.config());
        let state = self.describe(&client, stack_name).await?;

        match deploy_action(state.as_ref()) {
            DeployAction::Create => {
                self.create(&client, stack_name, template_body, tags, options)
                    .await
            }
            DeployAction::Recreate => {
                warn!(
                    "Stack {} is in ROLLBACK_COMPLETE, recreating it",
                    stack_name
                );
                self.delete(&client, stack_name, options).await?;
                self.create(&client, stack_name, template_body, tags, options)
                    .await
            }
            DeployAction::Busy(status) => Err(AccessError::remote_reconcile(
                stack_name,
                format!("stack is busy ({})", status),
            )),
            DeployAction::Update => {
                self.update(&client, stack_name, template_body, tags, options)
                    .await
            }
        }
    }

    #[instrument(skip(self, session, options), fields(account = %session.account_id()))]
    async fn remove_stack(
        &self,
        session: &AwsSession,
        stack_name: &str,
        options: &DeployOptions,
    ) -> AccessResult<StackOutcome> {
        let client = CfnClient::new(session.config());

        if self.describe(&client, stack_name).await?.is_none() {
            info!("Stack {} does not exist, nothing to delete", stack_name);
            return Ok(StackOutcome::AlreadyAbsent);
        }
        self.delete(&client, stack_name, options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    fn state(status: &str) -> StackState {
        StackState {
            status: status.to_string(),
            reason: None,
        }
    }

    fn fast_options(timeout: Duration) -> DeployOptions {
        DeployOptions {
            timeout,
            poll_interval: Duration::from_millis(1),
            ..DeployOptions::default()
        }
    }

    #[test]
    fn test_capabilities_follow_options() {
        let mut options = DeployOptions::default();
        assert_eq!(
            CloudFormationDeployer::capabilities(&options),
            vec![Capability::CapabilityIam, Capability::CapabilityNamedIam]
        );

        options.include_named_iam = false;
        assert_eq!(
            CloudFormationDeployer::capabilities(&options),
            vec![Capability::CapabilityIam]
        );
    }

    #[test]
    fn test_tags_are_converted_in_key_order() {
        let mut tags = BTreeMap::new();
        tags.insert("team".to_string(), "platform".to_string());
        tags.insert(
            "meta:created_by".to_string(),
            "cross-account-iam-role-access-manager".to_string(),
        );

        let converted = CloudFormationDeployer::tags(&tags);
        let keys: Vec<Option<&str>> = converted.iter().map(|t| t.key()).collect();
        assert_eq!(keys, vec![Some("meta:created_by"), Some("team")]);
        assert_eq!(converted[1].value(), Some("platform"));
    }

    #[test]
    fn test_stack_state_description() {
        let state = StackState {
            status: "ROLLBACK_COMPLETE".to_string(),
            reason: Some("Role already exists".to_string()),
        };
        assert_eq!(state.describe(), "ROLLBACK_COMPLETE (Role already exists)");
    }

    #[test]
    fn test_deploy_action_per_state() {
        assert_eq!(deploy_action(None), DeployAction::Create);
        assert_eq!(
            deploy_action(Some(&state("ROLLBACK_COMPLETE"))),
            DeployAction::Recreate
        );
        assert_eq!(
            deploy_action(Some(&state("UPDATE_IN_PROGRESS"))),
            DeployAction::Busy("UPDATE_IN_PROGRESS".to_string())
        );
        assert_eq!(
            deploy_action(Some(&state("UPDATE_COMPLETE_CLEANUP_IN_PROGRESS"))),
            DeployAction::Busy("UPDATE_COMPLETE_CLEANUP_IN_PROGRESS".to_string())
        );
        assert_eq!(
            deploy_action(Some(&state("CREATE_COMPLETE"))),
            DeployAction::Update
        );
        // a failed update can be retried in place
        assert_eq!(
            deploy_action(Some(&state("UPDATE_ROLLBACK_COMPLETE"))),
            DeployAction::Update
        );
    }

    #[test]
    fn test_unchanged_template_detection() {
        let live = r#"{"Resources": {}, "AWSTemplateFormatVersion": "2010-09-09"}"#;
        let same = r#"{"AWSTemplateFormatVersion":"2010-09-09","Resources":{}}"#;
        let changed = r#"{"AWSTemplateFormatVersion":"2010-09-09","Resources":{"A":{}}}"#;
        assert!(templates_match(live, same));
        assert!(!templates_match(live, changed));

        assert!(is_no_updates_error(
            "ValidationError: No updates are to be performed."
        ));
        assert!(!is_no_updates_error("ValidationError: Template format error"));
    }

    #[test]
    fn test_settled_outcomes() {
        assert_eq!(
            settled("s", Some(state("CREATE_COMPLETE")), "CREATE_COMPLETE", StackOutcome::Created)
                .unwrap(),
            StackOutcome::Created
        );
        assert_eq!(
            settled("s", None, "DELETE_COMPLETE", StackOutcome::Deleted).unwrap(),
            StackOutcome::Deleted
        );

        let err = settled(
            "s",
            Some(StackState {
                status: "UPDATE_ROLLBACK_COMPLETE".to_string(),
                reason: Some("Access denied".to_string()),
            }),
            "UPDATE_COMPLETE",
            StackOutcome::Updated,
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Stack s failed to reconcile: UPDATE_ROLLBACK_COMPLETE (Access denied)"
        );

        let err = settled("s", None, "CREATE_COMPLETE", StackOutcome::Created).unwrap_err();
        assert!(matches!(err, AccessError::RemoteReconcile { .. }));
    }

    #[tokio::test]
    async fn test_wait_polls_until_terminal() {
        let states = Mutex::new(VecDeque::from(vec![
            Some(state("CREATE_IN_PROGRESS")),
            Some(state("CREATE_IN_PROGRESS")),
            Some(state("CREATE_COMPLETE")),
        ]));
        let calls = AtomicUsize::new(0);

        let settled_state = wait_until_settled("s", &fast_options(Duration::from_secs(5)), || {
            calls.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Ok(states.lock().unwrap().pop_front().flatten()))
        })
        .await
        .unwrap();

        assert_eq!(settled_state, Some(state("CREATE_COMPLETE")));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_wait_reports_deleted_stack() {
        let states = Mutex::new(VecDeque::from(vec![Some(state("DELETE_IN_PROGRESS")), None]));

        let settled_state = wait_until_settled("s", &fast_options(Duration::from_secs(5)), || {
            std::future::ready(Ok(states.lock().unwrap().pop_front().flatten()))
        })
        .await
        .unwrap();

        assert_eq!(settled_state, None);
    }

    #[tokio::test]
    async fn test_wait_times_out() {
        let err = wait_until_settled("slow-stack", &fast_options(Duration::ZERO), || {
            std::future::ready(Ok(Some(state("UPDATE_IN_PROGRESS"))))
        })
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            AccessError::Timeout { ref stack_name, .. } if stack_name == "slow-stack"
        ));
    }
}
