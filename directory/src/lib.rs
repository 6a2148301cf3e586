//! HTTP client for the remote membership directory.
//!
//! Exposes the [`DirectoryClient`] trait consumed by the sync engine and a
//! reqwest-backed implementation with rate-limit aware retry.

pub mod client;
pub mod error;
pub mod types;

pub use client::{DirectoryClient, RestDirectoryClient, RetryPolicy};
pub use error::{DirectoryError, DirectoryResult};
pub use types::{GroupMember, GroupOrg, MemberOrg, OrgGroup, PendingOrgInvite, RoleDescriptor};
