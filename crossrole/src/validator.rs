use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, instrument};

use crate::aws::{AwsSession, RoleAssumer};
use crate::error::AccessResult;
use crate::graph::{AccessGraph, GranteeId};

/// Caller supplied check run with each assumed owner session
#[async_trait]
pub trait ApiProbe: Send + Sync {
    async fn probe(&self, session: &AwsSession) -> AccessResult<()>;
}

/// Logs who the assumed session is
pub struct CallerIdentityProbe;

#[async_trait]
impl ApiProbe for CallerIdentityProbe {
    async fn probe(&self, session: &AwsSession) -> AccessResult<()> {
        let info = session.account_info().await?;
        info!(
            "    now we are on account {} ({}), using principal {}",
            info.account_id, info.account_alias, info.principal_arn
        );
        Ok(())
    }
}

/// Exercises deployed trust relationships by assuming every granted role
pub struct Validator {
    assumer: Arc<dyn RoleAssumer>,
    verbose: bool,
}

impl Validator {
    pub fn new(assumer: Arc<dyn RoleAssumer>) -> Self {
        Self {
            assumer,
            verbose: true,
        }
    }

    /// Skip the identity lookup of each grantee before probing
    pub fn quiet(mut self) -> Self {
        self.verbose = false;
        self
    }

    /// Assume each owner role a grantee has been granted into and run `probe`
    /// with the resulting session. Only edges present in the graph are
    /// exercised. The first rejection is returned as is.
    #[instrument(skip_all, fields(grantees = grantees.len()))]
    pub async fn validate(
        &self,
        graph: &AccessGraph,
        grantees: &[GranteeId],
        probe: &dyn ApiProbe,
    ) -> AccessResult<usize> {
        info!("Verify cross account assume role ...");
        let mut exercised = 0;

        for id in grantees {
            let grantee = graph.grantee(*id);
            let session = grantee.probe_session();

            if self.verbose {
                let account = session.account_info().await?;
                info!(
                    "We are on grantee account {} ({}), using principal {}",
                    grantee.session.account_id(),
                    account.account_alias,
                    account.principal_arn
                );
            }

            for owner in grantee.owners() {
                let role_arn = owner.role_arn();
                info!("  Try to assume role {} on owner account ...", role_arn);
                let assumed = self.assumer.assume_role(session, &role_arn).await?;
                probe.probe(&assumed).await?;
                exercised += 1;
            }
        }

        Ok(exercised)
    }
}
