use serde::{Deserialize, Serialize};

pub const POLICY_VERSION: &str = "2012-10-17";
pub const ASSUME_ROLE_ACTION: &str = "sts:AssumeRole";

/// IAM policy document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    pub version: String,
    pub statement: Vec<Statement>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Statement {
    pub effect: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<Principal>,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    #[serde(rename = "AWS")]
    pub aws: Vec<String>,
}

impl PolicyDocument {
    /// Allows assuming every role in `role_arns`
    pub fn assume_roles(role_arns: Vec<String>) -> Self {
        Self {
            version: POLICY_VERSION.to_string(),
            statement: vec![Statement {
                effect: "Allow".to_string(),
                principal: None,
                action: ASSUME_ROLE_ACTION.to_string(),
                resource: Some(role_arns),
            }],
        }
    }

    /// Trust policy letting `principals` assume the role it is attached to.
    /// The principal list is sorted so that the rendered document does not
    /// depend on insertion order.
    pub fn trust(mut principals: Vec<String>) -> Self {
        principals.sort();
        Self {
            version: POLICY_VERSION.to_string(),
            statement: vec![Statement {
                effect: "Allow".to_string(),
                principal: Some(Principal { aws: principals }),
                action: ASSUME_ROLE_ACTION.to_string(),
                resource: None,
            }],
        }
    }
}
