use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use super::arn::IamArn;
use crate::error::{AccessError, AccessResult};

/// Top level configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Cross account trust between the devops account and workload accounts
    pub cross_account_iam_permission: CrossAccountIamPermission,

    /// AWS region used when building sessions
    #[serde(default = "default_aws_region")]
    pub aws_region: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossAccountIamPermission {
    pub devops_aws_account: DevOpsAwsAccount,

    pub workload_aws_accounts: Vec<WorkloadAwsAccount>,

    /// Extra stack tags, `meta:created_by` is always added on deploy
    #[serde(default)]
    pub tags: BTreeMap<String, String>,

    /// Refuse to deploy when an account appears twice on either side
    #[serde(default)]
    pub ensure_unique_accounts: bool,
}

/// The account running CI/CD; its grantee identity assumes roles elsewhere
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevOpsAwsAccount {
    pub aws_profile: String,

    pub stack_name: String,

    pub grantee: GranteeDef,

    pub grantee_policy_name: String,

    /// Profile whose credentials act as the grantee when validating,
    /// defaults to `aws_profile`
    #[serde(default)]
    pub validation_aws_profile: Option<String>,
}

/// One workload environment (sbx, tst, prd, ...) exposing an assumable role
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadAwsAccount {
    pub env_name: String,

    pub aws_profile: String,

    /// Expected account of `aws_profile`, checked before any deploy
    pub aws_account_id: String,

    pub stack_name: String,

    pub owner_role_name: String,

    pub owner_policy_name: String,

    /// Permissions granted to whoever assumes the owner role
    pub owner_policy_document: serde_json::Value,
}

/// Kind of identity granted access; `policy` is not a principal and so is
/// not accepted here
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GranteeKind {
    Root,
    Group,
    User,
    Role,
}

impl GranteeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Root => "root",
            Self::Group => "group",
            Self::User => "user",
            Self::Role => "role",
        }
    }
}

impl FromStr for GranteeKind {
    type Err = AccessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "root" => Ok(Self::Root),
            "group" => Ok(Self::Group),
            "user" => Ok(Self::User),
            "role" => Ok(Self::Role),
            other => Err(AccessError::unsupported_variant(other, "grantee type")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GranteeDef {
    /// One of `root`, `group`, `user`, `role`
    #[serde(rename = "type")]
    pub kind: String,

    /// `{}` for root, `{"name": ...}` otherwise
    #[serde(default)]
    pub kwargs: BTreeMap<String, String>,
}

impl GranteeDef {
    pub fn kind(&self) -> AccessResult<GranteeKind> {
        self.kind.parse()
    }

    /// Build the grantee ARN for the account its profile resolved to
    pub fn to_arn(&self, account: &str) -> AccessResult<IamArn> {
        let kind = self.kind()?;
        match kind {
            GranteeKind::Root => IamArn::new(kind.as_str(), account, None),
            _ => IamArn::new(kind.as_str(), account, Some(self.name()?)),
        }
    }

    fn name(&self) -> AccessResult<&str> {
        match self.kwargs.get("name") {
            Some(name) if !name.is_empty() => Ok(name),
            _ => Err(AccessError::config(format!(
                "grantee of type {:?} requires kwargs.name",
                self.kind
            ))),
        }
    }
}

impl Config {
    /// Load from a YAML or JSON file
    pub fn load(path: impl AsRef<Path>) -> AccessResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> AccessResult<Self> {
        let config: Self = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> AccessResult<()> {
        let permission = &self.cross_account_iam_permission;
        let devops = &permission.devops_aws_account;
        if devops.grantee.kind()? != GranteeKind::Root {
            devops.grantee.name()?;
        }
        if permission.workload_aws_accounts.is_empty() {
            return Err(AccessError::config("workload_aws_accounts is empty"));
        }
        for workload in &permission.workload_aws_accounts {
            if workload.aws_account_id.is_empty() {
                return Err(AccessError::config(format!(
                    "workload {:?} has no aws_account_id",
                    workload.env_name
                )));
            }
            // owner role and policy names end up in ARNs
            IamArn::new("role", &workload.aws_account_id, Some(&workload.owner_role_name))?;
            IamArn::new("policy", &workload.aws_account_id, Some(&workload.owner_policy_name))?;
        }
        Ok(())
    }
}

fn default_aws_region() -> String {
    "us-east-1".to_string()
}
