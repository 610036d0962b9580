use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use crate::error::{AccessError, AccessResult};

/// An account scoped IAM identity, addressed by its canonical ARN string
#[derive(Debug, Clone)]
pub enum IamArn {
    /// The whole account, `arn:aws:iam::{account}:root`
    Root { account: String },
    Group { account: String, name: String },
    User { account: String, name: String },
    Role { account: String, name: String },
    Policy { account: String, name: String },
}

impl IamArn {
    /// Checked constructor. Rejects any account or name that would render a
    /// canonical string `parse` cannot read back.
    pub fn new(kind: &str, account: &str, name: Option<&str>) -> AccessResult<Self> {
        let rendered = match name {
            Some(name) => format!("arn:aws:iam::{}:{}/{}", account, kind, name),
            None => format!("arn:aws:iam::{}:{}", account, kind),
        };
        if account.is_empty() {
            return Err(AccessError::parse(rendered, "missing account id"));
        }
        if account.contains(':') {
            return Err(AccessError::parse(rendered, "account id contains ':'"));
        }
        if let Some(name) = name {
            if name.is_empty() {
                return Err(AccessError::parse(rendered, "missing name"));
            }
            if name.contains(':') {
                return Err(AccessError::parse(rendered, "name contains ':'"));
            }
        }

        match (kind, name) {
            ("root", None) => Ok(Self::root(account)),
            ("group", Some(name)) => Ok(Self::group(account, name)),
            ("user", Some(name)) => Ok(Self::user(account, name)),
            ("role", Some(name)) => Ok(Self::role(account, name)),
            ("policy", Some(name)) => Ok(Self::policy(account, name)),
            ("root", Some(_)) => Err(AccessError::parse(rendered, "root takes no name")),
            (kind, None) if is_named_kind(kind) => {
                Err(AccessError::parse(rendered, "missing name"))
            }
            (other, _) => Err(AccessError::parse(
                rendered,
                format!("unknown resource type {:?}", other),
            )),
        }
    }

    pub fn root(account: impl Into<String>) -> Self {
        Self::Root {
            account: account.into(),
        }
    }

    pub fn group(account: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Group {
            account: account.into(),
            name: name.into(),
        }
    }

    pub fn user(account: impl Into<String>, name: impl Into<String>) -> Self {
        Self::User {
            account: account.into(),
            name: name.into(),
        }
    }

    pub fn role(account: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Role {
            account: account.into(),
            name: name.into(),
        }
    }

    pub fn policy(account: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Policy {
            account: account.into(),
            name: name.into(),
        }
    }

    /// Parse a canonical IAM ARN string
    ///
    /// The name of a named variant is everything after the first `/` of the
    /// resource field, so path-qualified names keep their inner slashes.
    pub fn parse(input: &str) -> AccessResult<Self> {
        let fields: Vec<&str> = input.split(':').collect();
        if fields.len() != 6 {
            return Err(AccessError::parse(
                input,
                format!("expected 6 colon separated fields, found {}", fields.len()),
            ));
        }

        let (partition, service, region, account, resource) =
            (fields[1], fields[2], fields[3], fields[4], fields[5]);
        if fields[0] != "arn" || partition != "aws" || service != "iam" {
            return Err(AccessError::parse(input, "not an arn:aws:iam ARN"));
        }
        if !region.is_empty() {
            return Err(AccessError::parse(input, "IAM ARNs carry no region"));
        }
        if account.is_empty() {
            return Err(AccessError::parse(input, "missing account id"));
        }

        if resource == "root" {
            return Self::new("root", account, None);
        }

        let (kind, name) = resource
            .split_once('/')
            .ok_or_else(|| AccessError::parse(input, "resource must be root or {type}/{name}"))?;
        Self::new(kind, account, Some(name))
    }

    pub fn account(&self) -> &str {
        match self {
            Self::Root { account }
            | Self::Group { account, .. }
            | Self::User { account, .. }
            | Self::Role { account, .. }
            | Self::Policy { account, .. } => account,
        }
    }

    /// The entity name, `None` for the account root
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Root { .. } => None,
            Self::Group { name, .. }
            | Self::User { name, .. }
            | Self::Role { name, .. }
            | Self::Policy { name, .. } => Some(name),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Root { .. } => "root",
            Self::Group { .. } => "group",
            Self::User { .. } => "user",
            Self::Role { .. } => "role",
            Self::Policy { .. } => "policy",
        }
    }

    pub fn is_root(&self) -> bool {
        matches!(self, Self::Root { .. })
    }

    /// The canonical ARN string
    pub fn arn(&self) -> String {
        match self.name() {
            None => format!("arn:aws:iam::{}:root", self.account()),
            Some(name) => format!("arn:aws:iam::{}:{}/{}", self.account(), self.kind(), name),
        }
    }

    /// Name of the `AWS::IAM::ManagedPolicy` property that attaches a policy
    /// to this identity
    pub fn attachment_property_name(&self) -> AccessResult<&'static str> {
        match self {
            Self::Group { .. } => Ok("Groups"),
            Self::Role { .. } => Ok("Roles"),
            Self::User { .. } => Ok("Users"),
            Self::Root { .. } | Self::Policy { .. } => Err(AccessError::unsupported_variant(
                self.kind(),
                "managed policy attachment",
            )),
        }
    }
}

fn is_named_kind(kind: &str) -> bool {
    matches!(kind, "group" | "user" | "role" | "policy")
}

impl fmt::Display for IamArn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.arn())
    }
}

impl FromStr for IamArn {
    type Err = AccessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl PartialEq for IamArn {
    fn eq(&self, other: &Self) -> bool {
        self.arn() == other.arn()
    }
}

impl Eq for IamArn {}

impl Hash for IamArn {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.arn().hash(state);
    }
}

impl PartialOrd for IamArn {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IamArn {
    fn cmp(&self, other: &Self) -> Ordering {
        self.arn().cmp(&other.arn())
    }
}

impl Serialize for IamArn {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.arn())
    }
}

impl<'de> Deserialize<'de> for IamArn {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
