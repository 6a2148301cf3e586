//! Membership reconciliation engine.
//!
//! Converges a remote access-control graph (group → orgs → member roles)
//! toward a declarative membership list. One reconciliation pass per group:
//! snapshot the remote state, prune the pending-invite record set, diff
//! desired against actual, then execute the plan through a bounded-concurrency
//! queue. Groups are processed strictly sequentially because each carries its
//! own credential and rate-limit budget.

pub mod config;
pub mod desired;
pub mod error;
pub mod execute;
pub mod groups;
pub mod invites;
pub mod reconcile;
pub mod remote;
pub mod roles;
pub mod service;
pub mod store;

pub use config::SyncOptions;
pub use desired::{DesiredState, GroupDesired, Membership, SchemaVersion};
pub use error::{SyncError, SyncResult};
pub use execute::ExecutionReport;
pub use groups::{GroupHandle, GroupStatus};
pub use invites::{PendingInvite, PendingInviteTracker, PendingProvision};
pub use reconcile::{PlannedAdd, PlannedRemove, ReconciliationPlan, reconcile};
pub use remote::RemoteGroupState;
pub use roles::RoleMapper;
pub use service::{GroupReport, GroupSyncService};
pub use store::{InviteStore, JsonFileStore};

#[cfg(test)]
pub(crate) mod test_support;
