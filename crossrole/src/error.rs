use thiserror::Error;

/// A single stack that could not be reconciled during a multi-entity run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFailure {
    pub stack_name: String,
    /// `AccessError::kind` of the underlying error
    pub kind: &'static str,
    pub message: String,
}

impl std::fmt::Display for StackFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.stack_name, self.message)
    }
}

/// Errors that can occur while provisioning cross account access
#[derive(Error, Debug)]
pub enum AccessError {
    #[error("Invalid IAM ARN {input:?}: {reason}")]
    Parse { input: String, reason: String },

    #[error("Unsupported variant {variant} for {operation}")]
    UnsupportedVariant { variant: String, operation: String },

    #[error(
        "The aws account id of aws profile {profile:?} is {actual:?}, expected {expected:?}"
    )]
    ValidationMismatch {
        profile: String,
        expected: String,
        actual: String,
    },

    #[error("Duplicate account id {account} in {side} list")]
    DuplicateAccount { side: String, account: String },

    #[error("Duplicate {kind} {id} in access graph")]
    DuplicateEntity { kind: String, id: String },

    #[error("Stack {stack_name} failed to reconcile: {message}")]
    RemoteReconcile { stack_name: String, message: String },

    #[error("Stack {stack_name} did not reach a terminal state within {seconds}s")]
    Timeout { stack_name: String, seconds: u64 },

    #[error("{} stack(s) failed to reconcile: {}", .failures.len(), join_failures(.failures))]
    ReconcileFailed { failures: Vec<StackFailure> },

    #[error("Failed to assume role {role_arn}: {message}")]
    AssumeRejected { role_arn: String, message: String },

    #[error("AWS call failed: {message}")]
    Aws { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Serialization/deserialization error: {source}")]
    Serde {
        #[from]
        source: serde_json::Error,
    },

    #[error("Config file parse error: {source}")]
    Yaml {
        #[from]
        source: serde_yaml::Error,
    },

    #[error("IO error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

fn join_failures(failures: &[StackFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl AccessError {
    /// Stable name of the variant, kept when an error is reduced to a report
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Parse { .. } => "parse",
            Self::UnsupportedVariant { .. } => "unsupported_variant",
            Self::ValidationMismatch { .. } => "validation_mismatch",
            Self::DuplicateAccount { .. } => "duplicate_account",
            Self::DuplicateEntity { .. } => "duplicate_entity",
            Self::RemoteReconcile { .. } => "remote_reconcile",
            Self::Timeout { .. } => "timeout",
            Self::ReconcileFailed { .. } => "reconcile_failed",
            Self::AssumeRejected { .. } => "assume_rejected",
            Self::Aws { .. } => "aws",
            Self::Config { .. } => "config",
            Self::Serde { .. } => "serde",
            Self::Yaml { .. } => "yaml",
            Self::Io { .. } => "io",
        }
    }

    pub fn parse(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Parse {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn unsupported_variant(variant: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::UnsupportedVariant {
            variant: variant.into(),
            operation: operation.into(),
        }
    }

    pub fn validation_mismatch(
        profile: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::ValidationMismatch {
            profile: profile.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    pub fn duplicate_account(side: impl Into<String>, account: impl Into<String>) -> Self {
        Self::DuplicateAccount {
            side: side.into(),
            account: account.into(),
        }
    }

    pub fn duplicate_entity(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self::DuplicateEntity {
            kind: kind.into(),
            id: id.into(),
        }
    }

    pub fn remote_reconcile(stack_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RemoteReconcile {
            stack_name: stack_name.into(),
            message: message.into(),
        }
    }

    pub fn timeout(stack_name: impl Into<String>, seconds: u64) -> Self {
        Self::Timeout {
            stack_name: stack_name.into(),
            seconds,
        }
    }

    pub fn assume_rejected(role_arn: impl Into<String>, message: impl Into<String>) -> Self {
        Self::AssumeRejected {
            role_arn: role_arn.into(),
            message: message.into(),
        }
    }

    pub fn aws(message: impl Into<String>) -> Self {
        Self::Aws {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

pub type AccessResult<T> = Result<T, AccessError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconcile_failed_lists_every_stack() {
        let err = AccessError::ReconcileFailed {
            failures: vec![
                StackFailure {
                    stack_name: "grantee-stack".to_string(),
                    kind: "remote_reconcile",
                    message: "ROLLBACK_COMPLETE".to_string(),
                },
                StackFailure {
                    stack_name: "owner-stack".to_string(),
                    kind: "assume_rejected",
                    message: "access denied".to_string(),
                },
            ],
        };

        let message = err.to_string();
        assert!(message.starts_with("2 stack(s) failed"));
        assert!(message.contains("grantee-stack: ROLLBACK_COMPLETE"));
        assert!(message.contains("owner-stack: access denied"));
    }

    #[test]
    fn test_validation_mismatch_message() {
        let err = AccessError::validation_mismatch("prd", "222222222222", "333333333333");
        assert_eq!(
            err.to_string(),
            concat!(
                "The aws account id of aws profile \"prd\" is \"333333333333\", ",
                "expected \"222222222222\""
            )
        );
    }
}
