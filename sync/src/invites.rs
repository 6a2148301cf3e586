//! Pending invite/provision tracking.
//!
//! An invitation (or, in auto-provision mode, a provisioning request) is
//! recorded when an add operation targets a user absent from the group. The
//! record suppresses duplicate invites on later passes and is pruned once the
//! target user appears as a full member of the corresponding org.

use crate::config::SyncOptions;
use crate::error::SyncResult;
use crate::remote::RemoteGroupState;
use crate::store::InviteStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// An issued-but-unaccepted email invitation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingInvite {
    pub group_name: String,
    pub group_id: String,
    pub org_name: String,
    pub org_id: String,
    pub user_email: String,
    pub date: DateTime<Utc>
}

/// An issued-but-unconfirmed direct provisioning request (auto-provision
/// mode). Functionally analogous to a pending invite.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingProvision {
    pub email: String,
    pub org_id: String,
    pub role_public_id: String,
    pub created: DateTime<Utc>
}

/// In-memory working set of pending records for one reconciliation pass.
pub struct PendingInviteTracker {
    auto_provision: bool,
    invites: Vec<PendingInvite>,
    provisions: Vec<PendingProvision>
}

impl PendingInviteTracker {
    /// An empty working set, useful when no durable store is in play.
    pub fn empty(auto_provision: bool) -> Self {
        Self {
            auto_provision,
            invites: Vec::new(),
            provisions: Vec::new()
        }
    }

    /// Load the durable record set for the mode in use.
    pub fn load(store: &dyn InviteStore, options: &SyncOptions) -> SyncResult<Self> {
        let (invites, provisions) = if options.auto_provision {
            (Vec::new(), store.read_provisions()?)
        } else {
            (store.read_invites()?, Vec::new())
        };
        debug!(
            invites = invites.len(),
            provisions = provisions.len(),
            "loaded pending records"
        );
        Ok(Self {
            auto_provision: options.auto_provision,
            invites,
            provisions
        })
    }

    /// Drop records whose user has since become a full member of the
    /// corresponding org (the invite was accepted / the provision landed).
    /// Group admins and viewers never count as acceptance.
    pub fn prune_accepted(&mut self, remote: &RemoteGroupState) {
        let accepted = |email: &str, org_id: &str| -> bool {
            remote.members().iter().any(|m| {
                m.is_org_member()
                    && m.email.eq_ignore_ascii_case(email)
                    && m.orgs.iter().any(|o| {
                        remote
                            .resolve_org_id(&o.name)
                            .map(|id| id == org_id)
                            .unwrap_or(false)
                    })
            })
        };

        let group_id = remote.group_id().to_string();
        self.invites.retain(|invite| {
            if invite.group_id != group_id {
                return true;
            }
            if accepted(&invite.user_email, &invite.org_id) {
                info!(
                    email = %invite.user_email,
                    group = %invite.group_name,
                    org = %invite.org_name,
                    "found accepted invite"
                );
                false
            } else {
                true
            }
        });

        // Provisions carry no group id; only judge those targeting an org
        // visible in this group's snapshot.
        let in_group = |org_id: &str| remote.orgs().iter().any(|o| o.id == org_id);
        self.provisions.retain(|provision| {
            if !in_group(&provision.org_id) {
                return true;
            }
            if accepted(&provision.email, &provision.org_id) {
                info!(
                    email = %provision.email,
                    org_id = %provision.org_id,
                    "provisioned user is now a full member"
                );
                false
            } else {
                true
            }
        });
    }

    /// Invite-dedup lookup: is an invite or provision already in flight for
    /// this (email, org) pair?
    pub fn exists(&self, email: &str, org_id: &str) -> bool {
        if self.auto_provision {
            self.provisions
                .iter()
                .any(|p| p.org_id == org_id && p.email.eq_ignore_ascii_case(email))
        } else {
            self.invites
                .iter()
                .any(|i| i.org_id == org_id && i.user_email.eq_ignore_ascii_case(email))
        }
    }

    pub fn record_invite(
        &mut self,
        group_name: &str,
        group_id: &str,
        org_name: &str,
        org_id: &str,
        email: &str
    ) {
        self.invites.push(PendingInvite {
            group_name: group_name.to_string(),
            group_id: group_id.to_string(),
            org_name: org_name.to_string(),
            org_id: org_id.to_string(),
            user_email: email.to_string(),
            date: Utc::now()
        });
    }

    pub fn record_provision(&mut self, email: &str, org_id: &str, role_public_id: &str) {
        self.provisions.push(PendingProvision {
            email: email.to_string(),
            org_id: org_id.to_string(),
            role_public_id: role_public_id.to_string(),
            created: Utc::now()
        });
    }

    /// Rewrite the durable record set. Called once at the end of a pass;
    /// skipped entirely in dry-run.
    pub fn persist(&self, store: &dyn InviteStore) -> SyncResult<()> {
        if self.auto_provision {
            store.write_provisions(&self.provisions)
        } else {
            store.write_invites(&self.invites)
        }
    }

    pub fn pending_count(&self) -> usize {
        if self.auto_provision {
            self.provisions.len()
        } else {
            self.invites.len()
        }
    }
}
