//! Bipartite access relation between grantees and owners.
//!
//! Entities live in two arenas owned by [`AccessGraph`] and the relation is
//! kept as index pairs, once per direction, so each side can derive its own
//! document without holding references to the other.

use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;

use crate::error::{AccessError, AccessResult};

mod grantee;
mod owner;

pub use grantee::{Grantee, GranteeView};
pub use owner::{Owner, OwnerView};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GranteeId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OwnerId(usize);

#[derive(Debug, Default)]
pub struct AccessGraph {
    grantees: Vec<Grantee>,
    owners: Vec<Owner>,
    grantee_index: HashMap<String, GranteeId>,
    owner_index: HashMap<String, OwnerId>,
    // Both sets always hold the same edges
    by_owner: BTreeSet<(OwnerId, GranteeId)>,
    by_grantee: BTreeSet<(GranteeId, OwnerId)>,
}

impl AccessGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_grantee(&mut self, grantee: Grantee) -> AccessResult<GranteeId> {
        let key = grantee.id();
        if self.grantee_index.contains_key(&key) {
            return Err(AccessError::duplicate_entity("grantee", key));
        }
        let id = GranteeId(self.grantees.len());
        self.grantees.push(grantee);
        self.grantee_index.insert(key, id);
        Ok(id)
    }

    pub fn add_owner(&mut self, owner: Owner) -> AccessResult<OwnerId> {
        let key = owner.id();
        if self.owner_index.contains_key(&key) {
            return Err(AccessError::duplicate_entity("owner", key));
        }
        let id = OwnerId(self.owners.len());
        self.owners.push(owner);
        self.owner_index.insert(key, id);
        Ok(id)
    }

    /// Allow `grantee` to assume the role of `owner`. Returns false when the
    /// edge already existed.
    pub fn grant(&mut self, owner: OwnerId, grantee: GranteeId) -> bool {
        let inserted = self.by_owner.insert((owner, grantee));
        if inserted {
            self.by_grantee.insert((grantee, owner));
            debug!(
                "Granted {} -> {}",
                self.grantees[grantee.0].id(),
                self.owners[owner.0].id()
            );
        }
        inserted
    }

    /// Remove the edge between `owner` and `grantee`. Returns false when
    /// there was nothing to remove.
    pub fn revoke(&mut self, owner: OwnerId, grantee: GranteeId) -> bool {
        let removed = self.by_owner.remove(&(owner, grantee));
        if removed {
            self.by_grantee.remove(&(grantee, owner));
            debug!(
                "Revoked {} -> {}",
                self.grantees[grantee.0].id(),
                self.owners[owner.0].id()
            );
        }
        removed
    }

    pub fn is_granted(&self, owner: OwnerId, grantee: GranteeId) -> bool {
        self.by_owner.contains(&(owner, grantee))
    }

    pub fn grantee(&self, id: GranteeId) -> GranteeView<'_> {
        GranteeView { graph: self, id }
    }

    pub fn owner(&self, id: OwnerId) -> OwnerView<'_> {
        OwnerView { graph: self, id }
    }

    pub fn find_grantee(&self, canonical_id: &str) -> Option<GranteeId> {
        self.grantee_index.get(canonical_id).copied()
    }

    pub fn find_owner(&self, canonical_id: &str) -> Option<OwnerId> {
        self.owner_index.get(canonical_id).copied()
    }

    pub fn grantee_ids(&self) -> Vec<GranteeId> {
        (0..self.grantees.len()).map(GranteeId).collect()
    }

    pub fn owner_ids(&self) -> Vec<OwnerId> {
        (0..self.owners.len()).map(OwnerId).collect()
    }

    /// Every edge as `(owner role ARN, grantee ARN)`, sorted
    pub fn edges(&self) -> Vec<(String, String)> {
        let mut edges: Vec<(String, String)> = self
            .by_owner
            .iter()
            .map(|(owner, grantee)| (self.owners[owner.0].id(), self.grantees[grantee.0].id()))
            .collect();
        edges.sort();
        edges
    }

    pub(crate) fn grantee_entity(&self, id: GranteeId) -> &Grantee {
        &self.grantees[id.0]
    }

    pub(crate) fn owner_entity(&self, id: OwnerId) -> &Owner {
        &self.owners[id.0]
    }

    pub(crate) fn owners_of(&self, grantee: GranteeId) -> impl Iterator<Item = OwnerId> + '_ {
        self.by_grantee
            .range((grantee, OwnerId(0))..=(grantee, OwnerId(usize::MAX)))
            .map(|(_, owner)| *owner)
    }

    pub(crate) fn grantees_of(&self, owner: OwnerId) -> impl Iterator<Item = GranteeId> + '_ {
        self.by_owner
            .range((owner, GranteeId(0))..=(owner, GranteeId(usize::MAX)))
            .map(|(_, grantee)| *grantee)
    }
}

/// Fails when an account shows up more than once among the listed grantees,
/// or more than once among the listed owners
pub fn ensure_no_duplicate_accounts(
    graph: &AccessGraph,
    grantees: &[GranteeId],
    owners: &[OwnerId],
) -> AccessResult<()> {
    let mut seen = HashSet::new();
    for id in grantees {
        let account = graph.grantee(*id).session.account_id().to_string();
        if !seen.insert(account.clone()) {
            return Err(AccessError::duplicate_account("grantee", account));
        }
    }

    let mut seen = HashSet::new();
    for id in owners {
        let account = graph.owner(*id).session.account_id().to_string();
        if !seen.insert(account.clone()) {
            return Err(AccessError::duplicate_account("owner", account));
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::aws::AwsSession;
    use crate::common::IamArn;
    use aws_config::SdkConfig;
    use serde_json::json;

    pub(crate) fn session(account: &str) -> AwsSession {
        AwsSession::from_parts(account, SdkConfig::builder().build())
    }

    pub(crate) fn owner(account: &str, role_name: &str) -> Owner {
        Owner::new(
            session(account),
            format!("{}-stack", role_name),
            role_name,
            format!("{}-policy", role_name),
            json!({
                "Version": "2012-10-17",
                "Statement": [{"Effect": "Allow", "Action": "*", "Resource": "*"}],
            }),
        )
    }

    pub(crate) fn grantee(iam_arn: IamArn) -> Grantee {
        let account = iam_arn.account().to_string();
        Grantee::new(
            session(&account),
            format!("grantee-{}", account),
            iam_arn,
            "cross_account_deployer_policy",
        )
    }

    #[test]
    fn test_root_grantee_scenario() {
        let mut graph = AccessGraph::new();
        let o = graph.add_owner(owner("222222222222", "deployer")).unwrap();
        let g = graph
            .add_grantee(grantee(IamArn::root("111111111111")))
            .unwrap();

        assert!(graph.grant(o, g));

        let owner = graph.owner(o);
        assert!(owner.needs_infrastructure());
        let doc = serde_json::to_value(owner.trusted_entities_document()).unwrap();
        assert_eq!(
            doc["Statement"][0]["Principal"]["AWS"],
            json!(["arn:aws:iam::111111111111:root"])
        );

        let grantee = graph.grantee(g);
        assert!(!grantee.needs_infrastructure());
        assert!(grantee.template().unwrap().is_empty());
        assert_eq!(graph.edges().len(), 1);
    }

    #[test]
    fn test_grant_is_idempotent() {
        let mut graph = AccessGraph::new();
        let o = graph.add_owner(owner("222222222222", "deployer")).unwrap();
        let g = graph
            .add_grantee(grantee(IamArn::user("111111111111", "alice")))
            .unwrap();

        assert!(graph.grant(o, g));
        let once = graph.edges();
        let doc_once = graph.owner(o).trusted_entities_document();

        assert!(!graph.grant(o, g));
        assert_eq!(graph.edges(), once);
        assert_eq!(graph.owner(o).trusted_entities_document(), doc_once);
        assert_eq!(graph.grantee(g).owners().len(), 1);
    }

    #[test]
    fn test_revoke_restores_previous_state() {
        let mut graph = AccessGraph::new();
        let o = graph.add_owner(owner("222222222222", "deployer")).unwrap();
        let g = graph
            .add_grantee(grantee(IamArn::role("111111111111", "ci")))
            .unwrap();

        assert!(!graph.owner(o).needs_infrastructure());
        assert!(!graph.grantee(g).needs_infrastructure());

        graph.grant(o, g);
        assert!(graph.owner(o).needs_infrastructure());
        assert!(graph.grantee(g).needs_infrastructure());

        assert!(graph.revoke(o, g));
        assert!(!graph.owner(o).needs_infrastructure());
        assert!(!graph.grantee(g).needs_infrastructure());
        assert!(!graph.is_granted(o, g));
        assert!(graph.edges().is_empty());

        // revoking an absent edge is a no-op
        assert!(!graph.revoke(o, g));
    }

    #[test]
    fn test_relation_is_symmetric() {
        let mut graph = AccessGraph::new();
        let o1 = graph.add_owner(owner("222222222222", "deployer")).unwrap();
        let o2 = graph.add_owner(owner("333333333333", "deployer")).unwrap();
        let g1 = graph
            .add_grantee(grantee(IamArn::root("111111111111")))
            .unwrap();
        let g2 = graph
            .add_grantee(grantee(IamArn::user("444444444444", "bob")))
            .unwrap();

        graph.grant(o1, g1);
        graph.grant(o2, g1);
        graph.grant(o2, g2);
        graph.revoke(o1, g1);

        for o in graph.owner_ids() {
            for g in graph.grantee_ids() {
                let from_owner = graph
                    .owner(o)
                    .grantees()
                    .iter()
                    .any(|x| x.id() == graph.grantee(g).id());
                let from_grantee = graph
                    .grantee(g)
                    .owners()
                    .iter()
                    .any(|x| x.id() == graph.owner(o).id());
                assert_eq!(from_owner, from_grantee);
            }
        }
    }

    #[test]
    fn test_trust_document_ignores_grant_order() {
        let build = |order: [usize; 2]| {
            let mut graph = AccessGraph::new();
            let o = graph.add_owner(owner("222222222222", "deployer")).unwrap();
            let arns = [
                IamArn::user("999999999999", "zed"),
                IamArn::root("111111111111"),
            ];
            let ids: Vec<GranteeId> = arns
                .iter()
                .map(|arn| graph.add_grantee(grantee(arn.clone())).unwrap())
                .collect();
            for i in order {
                graph.grant(o, ids[i]);
            }
            graph.owner(o).trusted_entities_document()
        };

        let ab = build([0, 1]);
        let ba = build([1, 0]);
        assert_eq!(ab, ba);
        assert_eq!(
            ab.statement[0].principal.as_ref().unwrap().aws,
            vec![
                "arn:aws:iam::111111111111:root".to_string(),
                "arn:aws:iam::999999999999:user/zed".to_string(),
            ]
        );
    }

    #[test]
    fn test_grantee_without_owners_needs_nothing() {
        let mut graph = AccessGraph::new();
        let g = graph
            .add_grantee(grantee(IamArn::group("111111111111", "devs")))
            .unwrap();

        let view = graph.grantee(g);
        assert!(!view.needs_infrastructure());
        assert!(view.template().unwrap().resources.is_empty());

        let doc = view.policy_document();
        assert_eq!(doc.statement[0].resource, Some(vec![]));
    }

    #[test]
    fn test_grantee_template_attaches_managed_policy() {
        let mut graph = AccessGraph::new();
        let o1 = graph.add_owner(owner("333333333333", "deployer")).unwrap();
        let o2 = graph.add_owner(owner("222222222222", "deployer")).unwrap();
        let g = graph
            .add_grantee(grantee(IamArn::user("111111111111", "alice")))
            .unwrap();
        graph.grant(o1, g);
        graph.grant(o2, g);

        let tpl = serde_json::to_value(graph.grantee(g).template().unwrap()).unwrap();
        assert_eq!(
            tpl,
            json!({
                "AWSTemplateFormatVersion": "2010-09-09",
                "Resources": {
                    "GranteeIamPolicy": {
                        "Type": "AWS::IAM::ManagedPolicy",
                        "Properties": {
                            "ManagedPolicyName": "cross_account_deployer_policy",
                            "PolicyDocument": {
                                "Version": "2012-10-17",
                                "Statement": [{
                                    "Effect": "Allow",
                                    "Action": "sts:AssumeRole",
                                    "Resource": [
                                        "arn:aws:iam::222222222222:role/deployer",
                                        "arn:aws:iam::333333333333:role/deployer",
                                    ],
                                }],
                            },
                            "Users": ["alice"],
                        },
                    },
                },
            })
        );
    }

    #[test]
    fn test_policy_grantee_cannot_be_attached() {
        let mut graph = AccessGraph::new();
        let o = graph.add_owner(owner("222222222222", "deployer")).unwrap();
        let g = graph
            .add_grantee(grantee(IamArn::policy("111111111111", "p")))
            .unwrap();
        graph.grant(o, g);

        let err = graph.grantee(g).template().unwrap_err();
        assert!(matches!(err, AccessError::UnsupportedVariant { .. }));
    }

    #[test]
    fn test_owner_template() {
        let mut graph = AccessGraph::new();
        let o = graph.add_owner(owner("222222222222", "deployer")).unwrap();
        assert!(graph.owner(o).template().is_empty());

        let g = graph
            .add_grantee(grantee(IamArn::role("111111111111", "ci")))
            .unwrap();
        graph.grant(o, g);

        let tpl = serde_json::to_value(graph.owner(o).template()).unwrap();
        let props = &tpl["Resources"]["OwnerIamRole"]["Properties"];
        assert_eq!(tpl["Resources"]["OwnerIamRole"]["Type"], "AWS::IAM::Role");
        assert_eq!(props["RoleName"], "deployer");
        assert_eq!(
            props["AssumeRolePolicyDocument"]["Statement"][0]["Principal"]["AWS"],
            json!(["arn:aws:iam::111111111111:role/ci"])
        );
        assert_eq!(props["Policies"][0]["PolicyName"], "deployer-policy");
        assert_eq!(props["Policies"][0]["PolicyDocument"]["Statement"][0]["Action"], "*");
    }

    #[test]
    fn test_derived_arns() {
        let mut graph = AccessGraph::new();
        let o = graph.add_owner(owner("222222222222", "deployer")).unwrap();
        let g = graph
            .add_grantee(grantee(IamArn::root("111111111111")))
            .unwrap();

        let owner = graph.owner(o);
        assert_eq!(owner.id(), "arn:aws:iam::222222222222:role/deployer");
        assert_eq!(owner.role_arn(), owner.id());
        assert_eq!(
            owner.policy_arn(),
            "arn:aws:iam::222222222222:policy/deployer-policy"
        );

        let grantee = graph.grantee(g);
        assert_eq!(grantee.id(), "arn:aws:iam::111111111111:root");
        assert_eq!(
            grantee.policy_arn(),
            "arn:aws:iam::111111111111:policy/cross_account_deployer_policy"
        );
    }

    #[test]
    fn test_duplicate_entities_rejected() {
        let mut graph = AccessGraph::new();
        graph.add_owner(owner("222222222222", "deployer")).unwrap();
        let err = graph
            .add_owner(owner("222222222222", "deployer"))
            .unwrap_err();
        assert!(matches!(err, AccessError::DuplicateEntity { .. }));

        graph
            .add_grantee(grantee(IamArn::root("111111111111")))
            .unwrap();
        let err = graph
            .add_grantee(grantee(IamArn::root("111111111111")))
            .unwrap_err();
        assert!(matches!(err, AccessError::DuplicateEntity { .. }));
        assert!(graph.find_grantee("arn:aws:iam::111111111111:root").is_some());
        assert!(graph
            .find_owner("arn:aws:iam::222222222222:role/deployer")
            .is_some());
    }

    #[test]
    fn test_ensure_no_duplicate_accounts() {
        let mut graph = AccessGraph::new();
        let o1 = graph.add_owner(owner("222222222222", "a")).unwrap();
        let o2 = graph.add_owner(owner("222222222222", "b")).unwrap();
        let o3 = graph.add_owner(owner("333333333333", "a")).unwrap();
        let g = graph
            .add_grantee(grantee(IamArn::root("111111111111")))
            .unwrap();

        assert!(ensure_no_duplicate_accounts(&graph, &[g], &[o1, o3]).is_ok());
        let err = ensure_no_duplicate_accounts(&graph, &[g], &[o1, o2]).unwrap_err();
        assert!(matches!(err, AccessError::DuplicateAccount { .. }));
    }
}
