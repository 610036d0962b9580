//! Cross account IAM role access.
//!
//! A grantee identity in one AWS account is granted into owner accounts that
//! expose an assumable role. From the resulting [`graph::AccessGraph`] the
//! crate derives a managed policy for the grantee side and a role with a
//! trust policy for the owner side, deploys both as CloudFormation stacks and
//! then validates the trust by actually assuming every granted role.

pub mod aws;
pub mod commands;
pub mod common;
pub mod error;
pub mod graph;
pub mod plan;
pub mod reconciler;
pub mod stack;
pub mod validator;

pub use error::{AccessError, AccessResult};
