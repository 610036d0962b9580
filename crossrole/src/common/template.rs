use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use super::document::PolicyDocument;
use crate::error::AccessResult;

pub const TEMPLATE_FORMAT_VERSION: &str = "2010-09-09";
pub const GRANTEE_RESOURCE_KEY: &str = "GranteeIamPolicy";
pub const OWNER_RESOURCE_KEY: &str = "OwnerIamRole";

/// CloudFormation template with the handful of IAM resources we manage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    #[serde(rename = "AWSTemplateFormatVersion")]
    pub format_version: String,
    #[serde(rename = "Resources")]
    pub resources: BTreeMap<String, Resource>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "Type", content = "Properties")]
pub enum Resource {
    #[serde(rename = "AWS::IAM::ManagedPolicy")]
    ManagedPolicy(ManagedPolicyProperties),
    #[serde(rename = "AWS::IAM::Role")]
    Role(RoleProperties),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ManagedPolicyProperties {
    pub managed_policy_name: String,
    pub policy_document: PolicyDocument,
    /// Keyed by `Groups`, `Roles` or `Users`
    #[serde(flatten)]
    pub attachments: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RoleProperties {
    pub role_name: String,
    pub assume_role_policy_document: PolicyDocument,
    pub policies: Vec<InlinePolicy>,
}

/// Inline role policy; the document is caller supplied and kept verbatim
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InlinePolicy {
    pub policy_name: String,
    pub policy_document: serde_json::Value,
}

impl Default for Template {
    fn default() -> Self {
        Self::empty()
    }
}

impl Template {
    pub fn empty() -> Self {
        Self {
            format_version: TEMPLATE_FORMAT_VERSION.to_string(),
            resources: BTreeMap::new(),
        }
    }

    pub fn with_resource(mut self, key: impl Into<String>, resource: Resource) -> Self {
        self.resources.insert(key.into(), resource);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Template body submitted to CloudFormation
    pub fn to_json(&self) -> AccessResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// SHA-256 of the canonical JSON rendering
    pub fn fingerprint(&self) -> AccessResult<String> {
        Ok(fingerprint_body(&self.to_json()?))
    }
}

/// Fingerprint of any template body, normalized through `serde_json::Value`
/// when it parses as JSON so key order and whitespace do not matter
pub fn fingerprint_body(body: &str) -> String {
    let canonical = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| serde_json::to_string(&value).ok())
        .unwrap_or_else(|| body.to_string());
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}
