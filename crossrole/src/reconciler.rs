use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, instrument};

use crate::aws::AwsSession;
use crate::common::Template;
use crate::error::{AccessError, AccessResult, StackFailure};
use crate::graph::{AccessGraph, GranteeId, OwnerId};
use crate::stack::{DeployOptions, StackDeployer, StackOutcome};

pub const CREATED_BY_TAG_KEY: &str = "meta:created_by";
pub const CREATED_BY_TAG_VALUE: &str = "cross-account-iam-role-access-manager";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Grantee,
    Owner,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Grantee => f.write_str("grantee"),
            Self::Owner => f.write_str("owner"),
        }
    }
}

/// Where an entity ended up in a reconcile run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityState {
    /// Graph state requires no stack, nothing was submitted
    NoInfraNeeded,
    Deployed(StackOutcome),
    /// `kind` is the `AccessError::kind` of the failure
    Failed {
        kind: &'static str,
        message: String,
    },
}

impl EntityState {
    fn failed(e: &AccessError) -> Self {
        Self::Failed {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EntityReport {
    pub kind: EntityKind,
    pub id: String,
    pub stack_name: String,
    pub state: EntityState,
}

#[derive(Debug, Clone, Default)]
pub struct ReconcileReport {
    pub entities: Vec<EntityReport>,
}

impl ReconcileReport {
    pub fn failures(&self) -> Vec<StackFailure> {
        self.entities
            .iter()
            .filter_map(|entity| match &entity.state {
                EntityState::Failed { kind, message } => Some(StackFailure {
                    stack_name: entity.stack_name.clone(),
                    kind: *kind,
                    message: message.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, state: &EntityState) -> usize {
        self.entities.iter().filter(|e| &e.state == state).count()
    }

    fn into_result(self) -> AccessResult<Self> {
        let failures = self.failures();
        if failures.is_empty() {
            Ok(self)
        } else {
            Err(AccessError::ReconcileFailed { failures })
        }
    }
}

/// A stack that would be deployed, as computed from the current graph
#[derive(Debug, Clone)]
pub struct PlannedStack {
    pub kind: EntityKind,
    pub id: String,
    pub stack_name: String,
    pub template: Template,
}

/// One pending submission: which entity, through which session
struct Submission<'a> {
    kind: EntityKind,
    id: String,
    stack_name: &'a str,
    session: &'a AwsSession,
    template: AccessResult<Template>,
}

/// Turns access graph state into stack deploy and remove calls
pub struct Reconciler {
    deployer: Arc<dyn StackDeployer>,
    options: DeployOptions,
}

impl Reconciler {
    pub fn new(deployer: Arc<dyn StackDeployer>, options: DeployOptions) -> Self {
        Self { deployer, options }
    }

    /// Templates for every listed entity that currently needs a stack
    pub fn plan(
        &self,
        graph: &AccessGraph,
        grantees: &[GranteeId],
        owners: &[OwnerId],
    ) -> AccessResult<Vec<PlannedStack>> {
        let mut planned = Vec::new();
        for id in grantees {
            let grantee = graph.grantee(*id);
            if grantee.needs_infrastructure() {
                planned.push(PlannedStack {
                    kind: EntityKind::Grantee,
                    id: grantee.id(),
                    stack_name: grantee.stack_name.clone(),
                    template: grantee.template()?,
                });
            }
        }
        for id in owners {
            let owner = graph.owner(*id);
            if owner.needs_infrastructure() {
                planned.push(PlannedStack {
                    kind: EntityKind::Owner,
                    id: owner.id(),
                    stack_name: owner.stack_name.clone(),
                    template: owner.template(),
                });
            }
        }
        Ok(planned)
    }

    /// Deploy grantee stacks, then owner stacks. Every entity is attempted;
    /// if any failed the error lists all of them.
    #[instrument(skip_all, fields(grantees = grantees.len(), owners = owners.len()))]
    pub async fn deploy(
        &self,
        graph: &AccessGraph,
        grantees: &[GranteeId],
        owners: &[OwnerId],
        tags: Option<BTreeMap<String, String>>,
    ) -> AccessResult<ReconcileReport> {
        let mut tags = tags.unwrap_or_default();
        tags.insert(
            CREATED_BY_TAG_KEY.to_string(),
            CREATED_BY_TAG_VALUE.to_string(),
        );

        let mut report = ReconcileReport::default();
        let mut submissions = Vec::new();

        for id in grantees {
            let grantee = graph.grantee(*id);
            if grantee.needs_infrastructure() {
                let entity = grantee.entity();
                submissions.push(Submission {
                    kind: EntityKind::Grantee,
                    id: grantee.id(),
                    stack_name: &entity.stack_name,
                    session: &entity.session,
                    template: grantee.template(),
                });
            } else {
                info!("Grantee {} needs no infrastructure", grantee.id());
                report.entities.push(EntityReport {
                    kind: EntityKind::Grantee,
                    id: grantee.id(),
                    stack_name: grantee.stack_name.clone(),
                    state: EntityState::NoInfraNeeded,
                });
            }
        }
        self.submit_all(submissions.drain(..), &tags, &mut report)
            .await;

        for id in owners {
            let owner = graph.owner(*id);
            if owner.needs_infrastructure() {
                let entity = owner.entity();
                submissions.push(Submission {
                    kind: EntityKind::Owner,
                    id: owner.id(),
                    stack_name: &entity.stack_name,
                    session: &entity.session,
                    template: Ok(owner.template()),
                });
            } else {
                info!("Owner {} needs no infrastructure", owner.id());
                report.entities.push(EntityReport {
                    kind: EntityKind::Owner,
                    id: owner.id(),
                    stack_name: owner.stack_name.clone(),
                    state: EntityState::NoInfraNeeded,
                });
            }
        }
        self.submit_all(submissions.drain(..), &tags, &mut report)
            .await;

        report.into_result()
    }

    async fn submit_all<'a>(
        &self,
        submissions: impl Iterator<Item = Submission<'a>>,
        tags: &BTreeMap<String, String>,
        report: &mut ReconcileReport,
    ) {
        for submission in submissions {
            let Submission {
                kind,
                id,
                stack_name,
                session,
                template,
            } = submission;

            let result = match template {
                Ok(template) => self.submit(kind, stack_name, session, &template, tags).await,
                Err(e) => Err(e),
            };
            let state = match result {
                Ok(outcome) => {
                    info!("✅ {} {} stack {} {}", kind, id, stack_name, outcome);
                    EntityState::Deployed(outcome)
                }
                Err(e) => {
                    error!("❌ {} {} stack {} failed: {}", kind, id, stack_name, e);
                    EntityState::failed(&e)
                }
            };
            report.entities.push(EntityReport {
                kind,
                id,
                stack_name: stack_name.to_string(),
                state,
            });
        }
    }

    async fn submit(
        &self,
        kind: EntityKind,
        stack_name: &str,
        session: &AwsSession,
        template: &Template,
        tags: &BTreeMap<String, String>,
    ) -> AccessResult<StackOutcome> {
        let body = template.to_json()?;
        info!(
            "Deploying {} stack {} to account {} (template {})",
            kind,
            stack_name,
            session.account_id(),
            template.fingerprint()?
        );
        self.deployer
            .deploy_stack(session, stack_name, &body, tags, &self.options)
            .await
    }

    /// Remove every listed stack regardless of current graph state
    #[instrument(skip_all, fields(grantees = grantees.len(), owners = owners.len()))]
    pub async fn delete(
        &self,
        graph: &AccessGraph,
        grantees: &[GranteeId],
        owners: &[OwnerId],
    ) -> AccessResult<ReconcileReport> {
        let targets = grantees
            .iter()
            .map(|id| {
                let grantee = graph.grantee(*id).entity();
                (EntityKind::Grantee, grantee.id(), &grantee.stack_name, &grantee.session)
            })
            .chain(owners.iter().map(|id| {
                let owner = graph.owner(*id).entity();
                (EntityKind::Owner, owner.id(), &owner.stack_name, &owner.session)
            }));

        let mut report = ReconcileReport::default();
        for (kind, id, stack_name, session) in targets {
            let state = match self
                .deployer
                .remove_stack(session, stack_name, &self.options)
                .await
            {
                Ok(outcome) => {
                    info!("🗑️  {} {} stack {} {}", kind, id, stack_name, outcome);
                    EntityState::Deployed(outcome)
                }
                Err(e) => {
                    error!("❌ {} {} stack {} failed to delete: {}", kind, id, stack_name, e);
                    EntityState::failed(&e)
                }
            };
            report.entities.push(EntityReport {
                kind,
                id,
                stack_name: stack_name.clone(),
                state,
            });
        }

        report.into_result()
    }
}
