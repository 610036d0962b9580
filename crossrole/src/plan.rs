use tracing::info;

use crate::aws::SessionProvider;
use crate::common::Config;
use crate::error::{AccessError, AccessResult};
use crate::graph::{ensure_no_duplicate_accounts, AccessGraph, Grantee, GranteeId, Owner, OwnerId};

/// Access graph built from a configuration file: one devops grantee granted
/// into every workload owner
#[derive(Debug)]
pub struct AccessPlan {
    pub graph: AccessGraph,
    pub grantees: Vec<GranteeId>,
    pub owners: Vec<OwnerId>,
}

/// Resolve every profile named in `config` and build the access graph.
///
/// Owner accounts are checked against their declared account id before
/// anything is returned, so a misconfigured profile never reaches deploy.
pub async fn build_plan(
    config: &Config,
    provider: &dyn SessionProvider,
) -> AccessResult<AccessPlan> {
    let permission = &config.cross_account_iam_permission;
    let devops = &permission.devops_aws_account;

    let grantee_session = provider.session(&devops.aws_profile).await?;
    let iam_arn = devops.grantee.to_arn(grantee_session.account_id())?;
    info!("Grantee {} (profile {})", iam_arn, devops.aws_profile);

    let mut grantee = Grantee::new(
        grantee_session.clone(),
        &devops.stack_name,
        iam_arn,
        &devops.grantee_policy_name,
    );
    grantee = match &devops.validation_aws_profile {
        Some(profile) if profile != &devops.aws_profile => {
            grantee.with_validation_session(provider.session(profile).await?)
        }
        _ => grantee.with_validation_session(grantee_session),
    };

    let mut graph = AccessGraph::new();
    let grantee_id = graph.add_grantee(grantee)?;

    let mut owners = Vec::new();
    for workload in &permission.workload_aws_accounts {
        let session = provider.session(&workload.aws_profile).await?;
        if session.account_id() != workload.aws_account_id {
            return Err(AccessError::validation_mismatch(
                &workload.aws_profile,
                &workload.aws_account_id,
                session.account_id(),
            ));
        }

        let owner_id = graph.add_owner(Owner::new(
            session,
            &workload.stack_name,
            &workload.owner_role_name,
            &workload.owner_policy_name,
            workload.owner_policy_document.clone(),
        ))?;
        graph.grant(owner_id, grantee_id);
        info!(
            "Owner {} ({}) trusts the grantee",
            graph.owner(owner_id).role_arn(),
            workload.env_name
        );
        owners.push(owner_id);
    }

    let grantees = vec![grantee_id];
    if permission.ensure_unique_accounts {
        ensure_no_duplicate_accounts(&graph, &grantees, &owners)?;
    }

    Ok(AccessPlan {
        graph,
        grantees,
        owners,
    })
}
