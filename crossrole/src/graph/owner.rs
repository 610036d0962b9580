use std::ops::Deref;

use super::grantee::Grantee;
use super::{AccessGraph, OwnerId};
use crate::aws::AwsSession;
use crate::common::template::{InlinePolicy, Resource, RoleProperties, OWNER_RESOURCE_KEY};
use crate::common::{IamArn, PolicyDocument, Template};

/// An account exposing a role that grantees from other accounts may assume
#[derive(Debug, Clone)]
pub struct Owner {
    /// Session used to deploy the owner stack
    pub session: AwsSession,
    pub stack_name: String,
    pub role_name: String,
    pub policy_name: String,
    /// Permissions a grantee receives once it has assumed the role
    pub policy_document: serde_json::Value,
}

impl Owner {
    pub fn new(
        session: AwsSession,
        stack_name: impl Into<String>,
        role_name: impl Into<String>,
        policy_name: impl Into<String>,
        policy_document: serde_json::Value,
    ) -> Self {
        Self {
            session,
            stack_name: stack_name.into(),
            role_name: role_name.into(),
            policy_name: policy_name.into(),
            policy_document,
        }
    }

    pub fn id(&self) -> String {
        self.role_arn()
    }

    pub fn role_arn(&self) -> String {
        IamArn::role(self.session.account_id(), &self.role_name).arn()
    }

    pub fn policy_arn(&self) -> String {
        IamArn::policy(self.session.account_id(), &self.policy_name).arn()
    }

    fn inline_policy_name(&self) -> String {
        format!("{}-policy", self.role_name)
    }
}

/// An owner together with its current place in the access graph
#[derive(Clone, Copy)]
pub struct OwnerView<'g> {
    pub(super) graph: &'g AccessGraph,
    pub(super) id: OwnerId,
}

impl<'g> OwnerView<'g> {
    pub fn index(&self) -> OwnerId {
        self.id
    }

    /// The underlying owner, borrowed for the lifetime of the graph
    pub fn entity(&self) -> &'g Owner {
        self.graph.owner_entity(self.id)
    }

    /// Grantees allowed to assume this role, ordered by ARN
    pub fn grantees(&self) -> Vec<&'g Grantee> {
        let mut grantees: Vec<&Grantee> = self
            .graph
            .grantees_of(self.id)
            .map(|grantee| self.graph.grantee_entity(grantee))
            .collect();
        grantees.sort_by_key(|grantee| grantee.id());
        grantees
    }

    /// Trust policy naming every granted principal. The principal list must
    /// stay sorted, otherwise redeploying an unchanged graph shows up as a
    /// template change.
    pub fn trusted_entities_document(&self) -> PolicyDocument {
        PolicyDocument::trust(self.grantees().iter().map(|g| g.id()).collect())
    }

    pub fn needs_infrastructure(&self) -> bool {
        self.graph.grantees_of(self.id).next().is_some()
    }

    pub fn template(&self) -> Template {
        if !self.needs_infrastructure() {
            return Template::empty();
        }

        Template::empty().with_resource(
            OWNER_RESOURCE_KEY,
            Resource::Role(RoleProperties {
                role_name: self.role_name.clone(),
                assume_role_policy_document: self.trusted_entities_document(),
                policies: vec![InlinePolicy {
                    policy_name: self.inline_policy_name(),
                    policy_document: self.policy_document.clone(),
                }],
            }),
        )
    }
}

impl Deref for OwnerView<'_> {
    type Target = Owner;

    fn deref(&self) -> &Self::Target {
        self.entity()
    }
}
