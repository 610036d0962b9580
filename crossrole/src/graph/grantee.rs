use std::collections::BTreeMap;
use std::ops::Deref;

use super::owner::Owner;
use super::{AccessGraph, GranteeId};
use crate::aws::AwsSession;
use crate::common::template::{ManagedPolicyProperties, Resource, GRANTEE_RESOURCE_KEY};
use crate::common::{IamArn, PolicyDocument, Template};
use crate::error::AccessResult;

/// An identity that needs to assume roles in owner accounts.
///
/// The managed policy letting it do so lives in the grantee's own account
/// and is provisioned through `stack_name`.
#[derive(Debug, Clone)]
pub struct Grantee {
    /// Session used to deploy the grantee stack
    pub session: AwsSession,
    pub stack_name: String,
    /// What is being granted access
    pub iam_arn: IamArn,
    /// Name of the managed policy attached to `iam_arn`
    pub policy_name: String,
    /// Session acting as `iam_arn` when validating
    pub validation_session: Option<AwsSession>,
}

impl Grantee {
    pub fn new(
        session: AwsSession,
        stack_name: impl Into<String>,
        iam_arn: IamArn,
        policy_name: impl Into<String>,
    ) -> Self {
        Self {
            session,
            stack_name: stack_name.into(),
            iam_arn,
            policy_name: policy_name.into(),
            validation_session: None,
        }
    }

    pub fn with_validation_session(mut self, session: AwsSession) -> Self {
        self.validation_session = Some(session);
        self
    }

    pub fn id(&self) -> String {
        self.iam_arn.arn()
    }

    pub fn policy_arn(&self) -> String {
        IamArn::policy(self.session.account_id(), &self.policy_name).arn()
    }

    /// Session that should perform the assume role probe
    pub fn probe_session(&self) -> &AwsSession {
        self.validation_session.as_ref().unwrap_or(&self.session)
    }
}

/// A grantee together with its current place in the access graph
#[derive(Clone, Copy)]
pub struct GranteeView<'g> {
    pub(super) graph: &'g AccessGraph,
    pub(super) id: GranteeId,
}

impl<'g> GranteeView<'g> {
    pub fn index(&self) -> GranteeId {
        self.id
    }

    /// The underlying grantee, borrowed for the lifetime of the graph
    pub fn entity(&self) -> &'g Grantee {
        self.graph.grantee_entity(self.id)
    }

    /// Owners this grantee has been granted into, ordered by role ARN
    pub fn owners(&self) -> Vec<&'g Owner> {
        let mut owners: Vec<&Owner> = self
            .graph
            .owners_of(self.id)
            .map(|owner| self.graph.owner_entity(owner))
            .collect();
        owners.sort_by_key(|owner| owner.role_arn());
        owners
    }

    /// Allows `sts:AssumeRole` on every granted owner role
    pub fn policy_document(&self) -> PolicyDocument {
        PolicyDocument::assume_roles(self.owners().iter().map(|o| o.role_arn()).collect())
    }

    /// A root grantee needs no managed policy, the account already delegates
    /// to its own IAM entities
    pub fn needs_infrastructure(&self) -> bool {
        if self.graph.owners_of(self.id).next().is_none() {
            return false;
        }
        !self.iam_arn.is_root()
    }

    pub fn template(&self) -> AccessResult<Template> {
        if !self.needs_infrastructure() {
            return Ok(Template::empty());
        }

        let property_name = self.iam_arn.attachment_property_name()?;
        let name = self.iam_arn.name().unwrap_or_default().to_string();
        let mut attachments = BTreeMap::new();
        attachments.insert(property_name.to_string(), vec![name]);

        Ok(Template::empty().with_resource(
            GRANTEE_RESOURCE_KEY,
            Resource::ManagedPolicy(ManagedPolicyProperties {
                managed_policy_name: self.policy_name.clone(),
                policy_document: self.policy_document(),
                attachments,
            }),
        ))
    }
}

impl Deref for GranteeView<'_> {
    type Target = Grantee;

    fn deref(&self) -> &Self::Target {
        self.entity()
    }
}
