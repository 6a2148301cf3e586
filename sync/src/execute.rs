//! Plan execution: the operation queue.
//!
//! Plan entries translate into remote-call descriptors. Invites and
//! provisions are serialized because each one mutates the pending record set
//! and must not race; role updates, org adds and removals are independent and
//! run under bounded concurrency. An individual call failure is logged and
//! never aborts the rest of the queue: a partial failure leaves some
//! memberships unconverged until the next run.

use crate::config::SyncOptions;
use crate::invites::PendingInviteTracker;
use crate::reconcile::ReconciliationPlan;
use crate::remote::RemoteGroupState;
use crate::roles::{RoleMapper, is_admin_role};
use directory::{DirectoryClient, DirectoryResult};
use futures_util::StreamExt;
use futures_util::stream;
use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{info, warn};

/// Outcome counters for one executed plan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionReport {
    /// Remote calls issued (successes and failures both count).
    pub attempted: u32,
    /// Records suppressed before any call was made.
    pub skipped: u32,
    /// Calls that failed after the client's own retry policy gave up.
    pub failed: u32
}

#[derive(Debug)]
enum RemoteCall {
    UpdateRole {
        org_id: String,
        user_id: String,
        email: String,
        role_public_id: String
    },
    AddMember {
        org_id: String,
        user_id: String,
        email: String,
        role: String
    },
    Invite {
        org_id: String,
        org_name: String,
        email: String,
        is_admin: bool
    },
    Provision {
        org_id: String,
        org_name: String,
        email: String,
        role_public_id: String
    },
    Remove {
        org_id: String,
        user_id: String,
        email: String
    }
}

impl RemoteCall {
    fn describe(&self) -> String {
        match self {
            Self::UpdateRole { email, .. } => format!("update role for {email}"),
            Self::AddMember { email, .. } => format!("add {email} to org"),
            Self::Invite { email, org_name, .. } => format!("invite {email} to {org_name}"),
            Self::Provision { email, org_name, .. } => {
                format!("provision {email} into {org_name}")
            }
            Self::Remove { email, .. } => format!("remove {email} from org")
        }
    }
}

/// Execute a plan against the remote API.
///
/// The tracker picks up a record for every invite/provision issued; the
/// caller persists it once the pass completes.
pub async fn execute(
    client: &dyn DirectoryClient,
    group_name: &str,
    group_id: &str,
    remote: &RemoteGroupState,
    plan: &ReconciliationPlan,
    roles: &RoleMapper,
    options: &SyncOptions,
    tracker: &mut PendingInviteTracker
) -> ExecutionReport {
    let mut report = ExecutionReport {
        skipped: plan.skipped,
        ..ExecutionReport::default()
    };

    let mut serialized: Vec<RemoteCall> = Vec::new();
    let mut concurrent: Vec<RemoteCall> = Vec::new();

    for add in &plan.add {
        let org_id = match remote.resolve_org_id(&add.org) {
            Ok(id) => id.to_string(),
            Err(err) => {
                warn!(email = %add.user_email, org = %add.org, error = %err, "skipping add");
                report.skipped += 1;
                continue;
            }
        };
        match remote.resolve_user_id(&add.user_email) {
            Some(user_id) if add.user_exists_in_org => {
                let Some(role_public_id) = roles.resolve(&add.role) else {
                    warn!(email = %add.user_email, role = %add.role, "skipping, unmapped role");
                    report.skipped += 1;
                    continue;
                };
                concurrent.push(RemoteCall::UpdateRole {
                    org_id,
                    user_id: user_id.to_string(),
                    email: add.user_email.clone(),
                    role_public_id: role_public_id.to_string()
                });
            }
            Some(user_id) => {
                concurrent.push(RemoteCall::AddMember {
                    org_id,
                    user_id: user_id.to_string(),
                    email: add.user_email.clone(),
                    role: add.role.clone()
                });
            }
            None if options.auto_provision => {
                let Some(role_public_id) = roles.resolve(&add.role) else {
                    warn!(email = %add.user_email, role = %add.role, "skipping, unmapped role");
                    report.skipped += 1;
                    continue;
                };
                serialized.push(RemoteCall::Provision {
                    org_id,
                    org_name: add.org.clone(),
                    email: add.user_email.clone(),
                    role_public_id: role_public_id.to_string()
                });
            }
            None => {
                info!(
                    email = %add.user_email,
                    group = %group_name,
                    org = %add.org,
                    "user not in group, sending invite"
                );
                serialized.push(RemoteCall::Invite {
                    org_id,
                    org_name: add.org.clone(),
                    email: add.user_email.clone(),
                    is_admin: is_admin_role(&add.role)
                });
            }
        }
    }

    for removal in &plan.remove {
        let org_id = match remote.resolve_org_id(&removal.org) {
            Ok(id) => id.to_string(),
            Err(err) => {
                warn!(email = %removal.user_email, org = %removal.org, error = %err, "skipping removal");
                report.skipped += 1;
                continue;
            }
        };
        let Some(user_id) = remote.resolve_user_id(&removal.user_email) else {
            warn!(email = %removal.user_email, "skipping removal, user id not found");
            report.skipped += 1;
            continue;
        };
        concurrent.push(RemoteCall::Remove {
            org_id,
            user_id: user_id.to_string(),
            email: removal.user_email.clone()
        });
    }

    let total = (serialized.len() + concurrent.len()) as u32;
    let completed = AtomicU32::new(0);

    // Invite/provision side effects must not race: strictly sequential.
    for call in serialized {
        report.attempted += 1;
        let outcome = dispatch(client, group_id, &call).await;
        let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
        info!("{done}/{total} operations completed");
        match outcome {
            Ok(()) => match call {
                RemoteCall::Invite {
                    org_id,
                    org_name,
                    email,
                    ..
                } => tracker.record_invite(group_name, group_id, &org_name, &org_id, &email),
                RemoteCall::Provision {
                    org_id,
                    email,
                    role_public_id,
                    ..
                } => tracker.record_provision(&email, &org_id, &role_public_id),
                _ => unreachable!("only invites and provisions are serialized")
            },
            Err(err) => {
                warn!(operation = %call.describe(), error = %err, "operation failed");
                report.failed += 1;
            }
        }
    }

    let concurrency = options.concurrency.max(1);
    let outcomes: Vec<(String, DirectoryResult<()>)> = stream::iter(concurrent)
        .map(|call| {
            let completed = &completed;
            async move {
                let description = call.describe();
                let outcome = dispatch(client, group_id, &call).await;
                let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                info!("{done}/{total} operations completed");
                (description, outcome)
            }
        })
        .buffer_unordered(concurrency)
        .collect()
        .await;

    for (description, outcome) in outcomes {
        report.attempted += 1;
        if let Err(err) = outcome {
            warn!(operation = %description, error = %err, "operation failed");
            report.failed += 1;
        }
    }

    report
}

async fn dispatch(
    client: &dyn DirectoryClient,
    group_id: &str,
    call: &RemoteCall
) -> DirectoryResult<()> {
    match call {
        RemoteCall::UpdateRole {
            org_id,
            user_id,
            role_public_id,
            ..
        } => client.update_role(org_id, user_id, role_public_id).await,
        RemoteCall::AddMember {
            org_id,
            user_id,
            role,
            ..
        } => client.add_member(group_id, org_id, user_id, role).await,
        RemoteCall::Invite {
            org_id,
            email,
            is_admin,
            ..
        } => client.invite(org_id, email, *is_admin).await,
        RemoteCall::Provision {
            org_id,
            email,
            role_public_id,
            ..
        } => client.provision(org_id, email, role_public_id).await,
        RemoteCall::Remove {
            org_id, user_id, ..
        } => client.remove_member(org_id, user_id).await
    }
}
