use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_credential_types::provider::SharedCredentialsProvider;
use aws_credential_types::Credentials;
use aws_sdk_iam::Client as IamClient;
use aws_sdk_sts::error::DisplayErrorContext;
use aws_sdk_sts::Client as StsClient;
use chrono::Utc;
use std::time::SystemTime;
use tracing::{debug, info};
use uuid::Uuid;

use crate::common::IamArn;
use crate::error::{AccessError, AccessResult};

const UNKNOWN_ACCOUNT_ALIAS: &str = "unknown-account-alias";

/// Authenticated handle for one AWS account
#[derive(Clone, Debug)]
pub struct AwsSession {
    account_id: String,
    profile: Option<String>,
    config: SdkConfig,
}

/// Result of STS GetCallerIdentity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub account: String,
    pub arn: String,
    pub user_id: String,
}

/// Who a session is, for diagnostics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountInfo {
    pub account_id: String,
    pub account_alias: String,
    pub principal_arn: String,
}

impl AwsSession {
    /// Wrap an already loaded SDK config; no AWS call is made
    pub fn from_parts(account_id: impl Into<String>, config: SdkConfig) -> Self {
        Self {
            account_id: account_id.into(),
            profile: None,
            config,
        }
    }

    /// Load credentials for a named profile (or the default chain) and
    /// resolve the account they belong to
    pub async fn from_profile(profile: Option<&str>, region: &str) -> AccessResult<Self> {
        let region_provider =
            RegionProviderChain::first_try(Region::new(region.to_string())).or_default_provider();
        let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(region_provider);
        if let Some(profile) = profile {
            loader = loader.profile_name(profile);
        }
        let config = loader.load().await;

        let identity = fetch_caller_identity(&config).await?;
        debug!(
            "Resolved profile {:?} to account {}",
            profile, identity.account
        );

        Ok(Self {
            account_id: identity.account,
            profile: profile.map(str::to_string),
            config,
        })
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn profile(&self) -> Option<&str> {
        self.profile.as_deref()
    }

    pub fn config(&self) -> &SdkConfig {
        &self.config
    }

    pub async fn caller_identity(&self) -> AccessResult<CallerIdentity> {
        fetch_caller_identity(&self.config).await
    }

    /// Account id, alias and principal ARN of this session
    pub async fn account_info(&self) -> AccessResult<AccountInfo> {
        let identity = self.caller_identity().await?;
        let aliases = IamClient::new(&self.config)
            .list_account_aliases()
            .send()
            .await
            .map_err(|e| {
                AccessError::aws(format!("ListAccountAliases failed: {}", DisplayErrorContext(&e)))
            })?;
        let account_alias = aliases
            .account_aliases()
            .first()
            .cloned()
            .unwrap_or_else(|| UNKNOWN_ACCOUNT_ALIAS.to_string());

        Ok(AccountInfo {
            account_id: identity.account,
            account_alias,
            principal_arn: identity.arn,
        })
    }
}

async fn fetch_caller_identity(config: &SdkConfig) -> AccessResult<CallerIdentity> {
    let identity = StsClient::new(config)
        .get_caller_identity()
        .send()
        .await
        .map_err(|e| {
            AccessError::aws(format!("GetCallerIdentity failed: {}", DisplayErrorContext(&e)))
        })?;

    let account = identity
        .account()
        .ok_or_else(|| AccessError::aws("GetCallerIdentity returned no account"))?;
    Ok(CallerIdentity {
        account: account.to_string(),
        arn: identity.arn().unwrap_or_default().to_string(),
        user_id: identity.user_id().unwrap_or_default().to_string(),
    })
}

/// Turns a profile name into a session, on demand
#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn session(&self, profile: &str) -> AccessResult<AwsSession>;
}

/// Loads sessions from the shared AWS config/credentials files
pub struct ProfileSessionProvider {
    region: String,
}

impl ProfileSessionProvider {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
        }
    }
}

#[async_trait]
impl SessionProvider for ProfileSessionProvider {
    async fn session(&self, profile: &str) -> AccessResult<AwsSession> {
        AwsSession::from_profile(Some(profile), &self.region).await
    }
}

/// Performs the cross account assume role call
#[async_trait]
pub trait RoleAssumer: Send + Sync {
    async fn assume_role(&self, session: &AwsSession, role_arn: &str) -> AccessResult<AwsSession>;
}

/// STS backed implementation of RoleAssumer
pub struct StsRoleAssumer {
    duration_seconds: Option<i32>,
}

impl StsRoleAssumer {
    pub fn new(duration_seconds: Option<i32>) -> Self {
        Self { duration_seconds }
    }
}

impl Default for StsRoleAssumer {
    fn default() -> Self {
        Self::new(None)
    }
}

#[async_trait]
impl RoleAssumer for StsRoleAssumer {
    async fn assume_role(&self, session: &AwsSession, role_arn: &str) -> AccessResult<AwsSession> {
        let target = IamArn::parse(role_arn)?;

        let response = StsClient::new(session.config())
            .assume_role()
            .role_arn(role_arn)
            .role_session_name(role_session_name())
            .set_duration_seconds(self.duration_seconds)
            .send()
            .await
            .map_err(|e| {
                AccessError::assume_rejected(role_arn, DisplayErrorContext(&e).to_string())
            })?;

        let creds = response
            .credentials()
            .ok_or_else(|| AccessError::assume_rejected(role_arn, "no credentials returned"))?;
        let expires_after = SystemTime::try_from(*creds.expiration()).ok();
        let credentials = Credentials::new(
            creds.access_key_id(),
            creds.secret_access_key(),
            Some(creds.session_token().to_string()),
            expires_after,
            "AssumeRole",
        );

        let config = session
            .config()
            .to_builder()
            .credentials_provider(SharedCredentialsProvider::new(credentials))
            .build();

        info!("Assumed role {}", role_arn);
        Ok(AwsSession {
            account_id: target.account().to_string(),
            profile: session.profile.clone(),
            config,
        })
    }
}

/// Timestamped and suffixed so concurrent validations never share a session name
fn role_session_name() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "crossrole-{}-{}",
        Utc::now().format("%Y%m%dT%H%M%S"),
        &suffix[..8]
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_parts_keeps_account() {
        let session = AwsSession::from_parts("111111111111", SdkConfig::builder().build());
        assert_eq!(session.account_id(), "111111111111");
        assert_eq!(session.profile(), None);
    }

    #[test]
    fn test_role_session_name_is_valid() {
        let name = role_session_name();
        assert!(name.starts_with("crossrole-"));
        // STS limits session names to 64 characters of [\w+=,.@-]
        assert!(name.len() <= 64);
        assert!(name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "+=,.@-_".contains(c)));
        assert_ne!(name, role_session_name());
    }

    #[tokio::test]
    async fn test_assume_role_rejects_non_iam_arn() {
        let session = AwsSession::from_parts("111111111111", SdkConfig::builder().build());
        let err = StsRoleAssumer::default()
            .assume_role(&session, "not-an-arn")
            .await
            .unwrap_err();
        assert!(matches!(err, AccessError::Parse { .. }));
    }
}
