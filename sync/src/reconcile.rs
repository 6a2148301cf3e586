//! The diff engine.
//!
//! `reconcile` is a pure function over the canonical desired state, the
//! remote snapshot, the role mapping and the pending record set. It performs
//! no I/O; executing the resulting plan is the operation queue's job.

use crate::config::SyncOptions;
use crate::desired::{GroupDesired, Membership};
use crate::error::{SyncError, SyncResult};
use crate::invites::PendingInviteTracker;
use crate::remote::RemoteGroupState;
use crate::roles::RoleMapper;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;
use tracing::{info, warn};

/// An add or update-role operation. `user_exists_in_org` decides the remote
/// call at execution time: role update when true, org add (or invite /
/// provision for users absent from the group) when false.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedAdd {
    pub user_email: String,
    pub role: String,
    pub org: String,
    pub user_exists_in_org: bool
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedRemove {
    pub user_email: String,
    pub role: String,
    pub org: String
}

/// Output of one reconciliation pass for one group.
///
/// Invariant: an (email, org) pair never appears in both lists. The add side
/// wins collisions, since its role update already converges the entry.
#[derive(Debug, Default)]
pub struct ReconciliationPlan {
    pub add: Vec<PlannedAdd>,
    pub remove: Vec<PlannedRemove>,
    /// Records suppressed during planning: failed validation, unresolvable
    /// org, or an invite/provision already in flight.
    pub skipped: u32
}

impl ReconciliationPlan {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }
}

fn email_shape() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\S+@\S+\.\S+").expect("email regex"))
}

/// Per-record validation against the group's role set and the email shape.
fn validate_record(record: &Membership, roles: &RoleMapper) -> SyncResult<()> {
    if !roles.is_valid_role(&record.role) {
        return Err(SyncError::InvalidRole {
            role: record.role.clone(),
            valid: roles.valid_roles().join(", ")
        });
    }
    if !email_shape().is_match(&record.user_email) {
        return Err(SyncError::InvalidEmail {
            email: record.user_email.clone()
        });
    }
    Ok(())
}

/// Record-scoped errors are caught at single-membership granularity; anything
/// else must not reach here.
fn note_skipped(plan: &mut ReconciliationPlan, record: &Membership, err: &SyncError) {
    debug_assert!(err.is_record_error());
    warn!(
        email = %record.user_email,
        org = %record.org,
        error = %err,
        "record not processed, skipping"
    );
    plan.skipped += 1;
}

/// Compute the operations needed to converge `remote` to `desired`.
pub fn reconcile(
    desired: &GroupDesired,
    remote: &RemoteGroupState,
    roles: &RoleMapper,
    options: &SyncOptions,
    pending: &PendingInviteTracker
) -> ReconciliationPlan {
    let mut plan = ReconciliationPlan::default();

    // Upper-cased email → (upper-cased org name → role), group admins and
    // viewers excluded. First org entry wins, which makes the tie-break rule
    // explicit: a user+org combination must not be listed under conflicting
    // roles.
    let mut member_orgs: HashMap<String, HashMap<String, &str>> = HashMap::new();
    for m in remote.members().iter().filter(|m| m.is_org_member()) {
        let orgs = member_orgs.entry(m.email.to_uppercase()).or_default();
        for org in &m.orgs {
            orgs.entry(org.name.to_uppercase()).or_insert(&org.role);
        }
    }

    if options.add_new {
        for record in &desired.memberships {
            if !record.group.eq_ignore_ascii_case(&desired.group) {
                continue;
            }
            if let Err(err) = validate_record(record, roles) {
                note_skipped(&mut plan, record, &err);
                continue;
            }

            let (org_match, role_match) = member_orgs
                .get(&record.user_email.to_uppercase())
                .map_or((false, false), |orgs| {
                    match orgs.get(&record.org.to_uppercase()) {
                        Some(current_role) => {
                            let converged = current_role.eq_ignore_ascii_case(&record.role)
                                && !roles.overrides_built_in(&record.role);
                            (true, converged)
                        }
                        None => (false, false)
                    }
                });

            if role_match {
                continue;
            }

            let org_id = match remote.resolve_org_id(&record.org) {
                Ok(id) => id,
                Err(err) => {
                    note_skipped(&mut plan, record, &err);
                    continue;
                }
            };
            if pending.exists(&record.user_email, org_id) {
                info!(
                    email = %record.user_email,
                    org = %record.org,
                    "skipping, invite already pending"
                );
                plan.skipped += 1;
                continue;
            }

            plan.add.push(PlannedAdd {
                user_email: record.user_email.clone(),
                role: record.role.clone(),
                org: record.org.clone(),
                user_exists_in_org: org_match
            });
        }
    }

    if options.delete_missing {
        // (upper email, upper org) → upper role, first record wins.
        let mut desired_index: HashMap<(String, String), String> = HashMap::new();
        let mut desired_orgs: HashSet<String> = HashSet::new();
        for record in &desired.memberships {
            desired_orgs.insert(record.org.to_uppercase());
            desired_index
                .entry((
                    record.user_email.to_uppercase(),
                    record.org.to_uppercase()
                ))
                .or_insert_with(|| record.role.to_uppercase());
        }

        for member in remote.members() {
            if member.group_role.eq_ignore_ascii_case("admin") {
                // Group admins are only ever matched against the desired
                // group-admin list; removal is a deliberate no-op.
                if let Some(admins) = &desired.group_admins {
                    let listed = admins
                        .iter()
                        .any(|a| a.eq_ignore_ascii_case(&member.email));
                    if !listed {
                        info!(
                            email = %member.email,
                            group = %desired.group,
                            "group admin missing from desired admin list, left in place"
                        );
                    }
                }
                continue;
            }
            if !member.is_org_member() {
                continue;
            }

            for org in &member.orgs {
                let key = (member.email.to_uppercase(), org.name.to_uppercase());
                let keep = desired_index
                    .get(&key)
                    .is_some_and(|role| role.eq_ignore_ascii_case(&org.role));
                if keep {
                    continue;
                }
                if !desired_orgs.contains(&org.name.to_uppercase()) {
                    info!(
                        email = %member.email,
                        org = %org.name,
                        group = %desired.group,
                        "org not found in source data"
                    );
                }
                plan.remove.push(PlannedRemove {
                    user_email: member.email.clone(),
                    role: org.role.clone(),
                    org: org.name.clone()
                });
            }
        }

        // Enforce the plan invariant: an (email, org) pair in the add list
        // converges via role update, so its removal entry is dropped.
        let adding: HashSet<(String, String)> = plan
            .add
            .iter()
            .map(|a| (a.user_email.to_uppercase(), a.org.to_uppercase()))
            .collect();
        plan.remove
            .retain(|r| !adding.contains(&(r.user_email.to_uppercase(), r.org.to_uppercase())));
    }

    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desired::Membership;
    use crate::test_support::{desired_v1, member, org, role, standard_roles};

    fn options(add_new: bool, delete_missing: bool) -> SyncOptions {
        SyncOptions {
            add_new,
            delete_missing,
            ..SyncOptions::default()
        }
    }

    fn record(email: &str, role: &str, org: &str) -> Membership {
        Membership {
            user_email: email.to_string(),
            role: role.to_string(),
            org: org.to_string(),
            group: "G".to_string()
        }
    }

    #[test]
    fn test_absent_user_yields_add_without_org() {
        let desired = desired_v1(vec![record("a@x.com", "collaborator", "Org1")]);
        let remote = RemoteGroupState::from_parts("g1", vec![], vec![org("o1", "Org1")], vec![]);
        let roles = standard_roles();
        let pending = PendingInviteTracker::empty(false);

        let plan = reconcile(&desired, &remote, &roles, &options(true, false), &pending);
        assert_eq!(
            plan.add,
            vec![PlannedAdd {
                user_email: "a@x.com".to_string(),
                role: "collaborator".to_string(),
                org: "Org1".to_string(),
                user_exists_in_org: false
            }]
        );
        assert!(plan.remove.is_empty());
    }

    #[test]
    fn test_converged_member_yields_empty_plan() {
        let desired = desired_v1(vec![record("a@x.com", "collaborator", "Org1")]);
        let remote = RemoteGroupState::from_parts(
            "g1",
            vec![member("u1", "a@x.com", "member", &[("Org1", "collaborator")])],
            vec![org("o1", "Org1")],
            vec![]
        );
        let plan = reconcile(
            &desired,
            &remote,
            &standard_roles(),
            &options(true, true),
            &PendingInviteTracker::empty(false)
        );
        assert!(plan.is_empty());
    }

    #[test]
    fn test_reconcile_is_idempotent_over_unchanged_state() {
        let desired = desired_v1(vec![record("a@x.com", "collaborator", "Org1")]);
        let remote = RemoteGroupState::from_parts("g1", vec![], vec![org("o1", "Org1")], vec![]);
        let roles = standard_roles();
        let pending = PendingInviteTracker::empty(false);

        let first = reconcile(&desired, &remote, &roles, &options(true, true), &pending);
        let second = reconcile(&desired, &remote, &roles, &options(true, true), &pending);
        assert_eq!(first.add, second.add);
        assert_eq!(first.remove, second.remove);

        // after execution the user is a collaborator in Org1; re-reconciling
        // against the converged snapshot yields nothing
        let converged = RemoteGroupState::from_parts(
            "g1",
            vec![member("u1", "a@x.com", "member", &[("Org1", "collaborator")])],
            vec![org("o1", "Org1")],
            vec![]
        );
        let after = reconcile(&desired, &converged, &roles, &options(true, true), &pending);
        assert!(after.is_empty());
    }

    #[test]
    fn test_role_match_is_case_insensitive() {
        let desired = desired_v1(vec![record("a@x.com", "Admin", "Org1")]);
        let remote = RemoteGroupState::from_parts(
            "g1",
            vec![member("u1", "A@X.COM", "member", &[("Org1", "ADMIN")])],
            vec![org("o1", "Org1")],
            vec![]
        );
        let plan = reconcile(
            &desired,
            &remote,
            &standard_roles(),
            &options(true, false),
            &PendingInviteTracker::empty(false)
        );
        assert!(plan.is_empty());
    }

    #[test]
    fn test_role_mismatch_yields_update_with_org_flag() {
        let desired = desired_v1(vec![record("a@x.com", "admin", "Org1")]);
        let remote = RemoteGroupState::from_parts(
            "g1",
            vec![member("u1", "a@x.com", "member", &[("Org1", "collaborator")])],
            vec![org("o1", "Org1")],
            vec![]
        );
        let plan = reconcile(
            &desired,
            &remote,
            &standard_roles(),
            &options(true, false),
            &PendingInviteTracker::empty(false)
        );
        assert_eq!(plan.add.len(), 1);
        assert!(plan.add[0].user_exists_in_org);
    }

    #[test]
    fn test_group_admin_excluded_from_org_reconciliation() {
        let desired = desired_v1(vec![record("a@x.com", "collaborator", "Org1")]);
        // the same email exists but only as a group admin; the desired record
        // must be treated as an absent user, and the admin's org entries must
        // never be removed
        let remote = RemoteGroupState::from_parts(
            "g1",
            vec![member("u1", "a@x.com", "admin", &[("Org1", "admin")])],
            vec![org("o1", "Org1")],
            vec![]
        );
        let plan = reconcile(
            &desired,
            &remote,
            &standard_roles(),
            &options(true, true),
            &PendingInviteTracker::empty(false)
        );
        assert_eq!(plan.add.len(), 1);
        assert!(!plan.add[0].user_exists_in_org);
        assert!(plan.remove.is_empty());
    }

    #[test]
    fn test_viewer_excluded_from_org_reconciliation() {
        let desired = desired_v1(vec![]);
        let remote = RemoteGroupState::from_parts(
            "g1",
            vec![member("u1", "v@x.com", "viewer", &[("Org1", "collaborator")])],
            vec![org("o1", "Org1")],
            vec![]
        );
        let plan = reconcile(
            &desired,
            &remote,
            &standard_roles(),
            &options(true, true),
            &PendingInviteTracker::empty(false)
        );
        assert!(plan.remove.is_empty());
    }

    #[test]
    fn test_pending_invite_suppresses_add() {
        let desired = desired_v1(vec![record("a@x.com", "collaborator", "Org1")]);
        let remote = RemoteGroupState::from_parts("g1", vec![], vec![org("o1", "Org1")], vec![]);
        let mut pending = PendingInviteTracker::empty(false);
        pending.record_invite("G", "g1", "Org1", "o1", "A@X.COM");

        let plan = reconcile(
            &desired,
            &remote,
            &standard_roles(),
            &options(true, false),
            &pending
        );
        assert!(plan.add.is_empty());
        assert_eq!(plan.skipped, 1);
    }

    #[test]
    fn test_custom_admin_role_defeats_name_equality() {
        let desired = desired_v1(vec![record("a@x.com", "admin", "Org1")]);
        let remote = RemoteGroupState::from_parts(
            "g1",
            vec![member("u1", "a@x.com", "member", &[("Org1", "admin")])],
            vec![org("o1", "Org1")],
            vec![]
        );
        let roles = RoleMapper::new(&[
            role("Org Admin", "r-admin"),
            role("Org Collaborator", "r-collab"),
            role("Admin", "r-custom-admin")
        ]);
        let plan = reconcile(
            &desired,
            &remote,
            &roles,
            &options(true, false),
            &PendingInviteTracker::empty(false)
        );
        // still an update: the member holds the built-in role while a custom
        // role of the same logical name exists
        assert_eq!(plan.add.len(), 1);
        assert!(plan.add[0].user_exists_in_org);
    }

    #[test]
    fn test_undesired_membership_is_removed() {
        let desired = desired_v1(vec![record("a@x.com", "collaborator", "Org1")]);
        let remote = RemoteGroupState::from_parts(
            "g1",
            vec![member("u2", "b@x.com", "member", &[("Org2", "admin")])],
            vec![org("o1", "Org1"), org("o2", "Org2")],
            vec![]
        );
        let plan = reconcile(
            &desired,
            &remote,
            &standard_roles(),
            &options(false, true),
            &PendingInviteTracker::empty(false)
        );
        assert_eq!(
            plan.remove,
            vec![PlannedRemove {
                user_email: "b@x.com".to_string(),
                role: "admin".to_string(),
                org: "Org2".to_string()
            }]
        );
    }

    #[test]
    fn test_add_and_remove_never_share_an_email_org_pair() {
        // desired role differs from the current one: the add side emits an
        // update, so the remove side must stay silent for that pair
        let desired = desired_v1(vec![record("a@x.com", "admin", "Org1")]);
        let remote = RemoteGroupState::from_parts(
            "g1",
            vec![member("u1", "a@x.com", "member", &[("Org1", "collaborator")])],
            vec![org("o1", "Org1")],
            vec![]
        );
        let plan = reconcile(
            &desired,
            &remote,
            &standard_roles(),
            &options(true, true),
            &PendingInviteTracker::empty(false)
        );
        assert_eq!(plan.add.len(), 1);
        assert!(plan.remove.is_empty());
    }

    #[test]
    fn test_validation_yields_record_scoped_errors() {
        let roles = standard_roles();

        let err = validate_record(&record("a@x.com", "superuser", "Org1"), &roles).unwrap_err();
        assert!(matches!(err, SyncError::InvalidRole { .. }));
        assert!(err.is_record_error());

        let err = validate_record(&record("not-an-email", "admin", "Org1"), &roles).unwrap_err();
        assert!(matches!(err, SyncError::InvalidEmail { .. }));
        assert!(err.is_record_error());

        assert!(validate_record(&record("a@x.com", "admin", "Org1"), &roles).is_ok());
    }

    #[test]
    fn test_invalid_records_are_skipped_not_fatal() {
        let desired = desired_v1(vec![
            record("a@x.com", "superuser", "Org1"),
            record("not-an-email", "collaborator", "Org1"),
            record("c@x.com", "collaborator", "NoSuchOrg"),
            record("d@x.com", "collaborator", "Org1"),
        ]);
        let remote = RemoteGroupState::from_parts("g1", vec![], vec![org("o1", "Org1")], vec![]);
        let plan = reconcile(
            &desired,
            &remote,
            &standard_roles(),
            &options(true, false),
            &PendingInviteTracker::empty(false)
        );
        assert_eq!(plan.skipped, 3);
        assert_eq!(plan.add.len(), 1);
        assert_eq!(plan.add[0].user_email, "d@x.com");
    }

    #[test]
    fn test_records_for_other_groups_are_ignored() {
        let mut other = record("a@x.com", "collaborator", "Org1");
        other.group = "OtherGroup".to_string();
        let desired = GroupDesired {
            group: "G".to_string(),
            memberships: vec![other],
            group_admins: None
        };
        let remote = RemoteGroupState::from_parts("g1", vec![], vec![org("o1", "Org1")], vec![]);
        let plan = reconcile(
            &desired,
            &remote,
            &standard_roles(),
            &options(true, false),
            &PendingInviteTracker::empty(false)
        );
        assert!(plan.is_empty());
    }
}
