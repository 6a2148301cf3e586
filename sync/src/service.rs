//! Per-group reconciliation passes.

use crate::config::SyncOptions;
use crate::desired::DesiredState;
use crate::error::SyncResult;
use crate::execute::execute;
use crate::groups::GroupHandle;
use crate::invites::PendingInviteTracker;
use crate::reconcile::reconcile;
use crate::remote::RemoteGroupState;
use crate::roles::RoleMapper;
use crate::store::InviteStore;
use chrono::{DateTime, Utc};
use directory::DirectoryClient;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument};

/// Outcome of one group pass.
#[derive(Debug, Clone, Serialize)]
pub struct GroupReport {
    pub group: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub adds_planned: u32,
    pub removes_planned: u32,
    pub attempted: u32,
    pub skipped: u32,
    pub failed: u32,
    pub pending_invites: u32,
    pub dry_run: bool
}

impl GroupReport {
    fn new(group: &str, dry_run: bool) -> Self {
        Self {
            group: group.to_string(),
            started_at: Utc::now(),
            completed_at: None,
            adds_planned: 0,
            removes_planned: 0,
            attempted: 0,
            skipped: 0,
            failed: 0,
            pending_invites: 0,
            dry_run
        }
    }
}

/// Runs reconciliation passes for one group's credential.
pub struct GroupSyncService {
    client: Arc<dyn DirectoryClient>,
    options: SyncOptions
}

impl GroupSyncService {
    pub fn new(client: Arc<dyn DirectoryClient>, options: SyncOptions) -> Self {
        Self { client, options }
    }

    /// One full pass: snapshot, prune pending records, diff, execute,
    /// persist. In dry-run the plan is logged and nothing is written,
    /// remotely or locally.
    #[instrument(skip_all, fields(group = %group.name))]
    pub async fn sync_group(
        &self,
        group: &GroupHandle,
        desired: &DesiredState,
        store: &dyn InviteStore
    ) -> SyncResult<GroupReport> {
        let mut report = GroupReport::new(&group.name, self.options.dry_run);

        let remote = RemoteGroupState::fetch(self.client.as_ref(), &group.id).await?;
        info!(
            members = remote.members().len(),
            orgs = remote.orgs().len(),
            roles = remote.roles().len(),
            "fetched remote group state"
        );
        let roles = RoleMapper::new(remote.roles());

        let mut tracker = PendingInviteTracker::load(store, &self.options)?;
        tracker.prune_accepted(&remote);

        let group_desired = desired.for_group(&group.name);
        let plan = reconcile(&group_desired, &remote, &roles, &self.options, &tracker);
        report.adds_planned = plan.add.len() as u32;
        report.removes_planned = plan.remove.len() as u32;
        report.skipped = plan.skipped;

        if self.options.dry_run {
            for add in &plan.add {
                info!(
                    email = %add.user_email,
                    org = %add.org,
                    role = %add.role,
                    update = add.user_exists_in_org,
                    "dry-run: would add or update"
                );
            }
            for removal in &plan.remove {
                info!(
                    email = %removal.user_email,
                    org = %removal.org,
                    role = %removal.role,
                    "dry-run: would remove"
                );
            }
            report.pending_invites = tracker.pending_count() as u32;
            report.completed_at = Some(Utc::now());
            return Ok(report);
        }

        let outcome = execute(
            self.client.as_ref(),
            &group.name,
            &group.id,
            &remote,
            &plan,
            &roles,
            &self.options,
            &mut tracker
        )
        .await;
        report.attempted = outcome.attempted;
        report.skipped = outcome.skipped;
        report.failed = outcome.failed;
        report.pending_invites = tracker.pending_count() as u32;

        tracker.persist(store)?;

        report.completed_at = Some(Utc::now());
        info!(
            attempted = report.attempted,
            skipped = report.skipped,
            failed = report.failed,
            pending = report.pending_invites,
            "group pass complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::groups::GroupStatus;
    use crate::store::JsonFileStore;
    use crate::test_support::{StubClient, org, raw_member, role};

    fn handle() -> GroupHandle {
        GroupHandle {
            name: "G".to_string(),
            id: "g1".to_string(),
            token: "tok".to_string(),
            status: GroupStatus::Enabled
        }
    }

    fn desired(json: &str) -> DesiredState {
        DesiredState::from_json(serde_json::from_str(json).unwrap()).unwrap()
    }

    fn stub() -> StubClient {
        StubClient {
            members: vec![raw_member(
                "u1",
                Some("present@x.com"),
                "member",
                &[("Org1", "collaborator")]
            )],
            orgs: vec![org("o1", "Org1")],
            roles: vec![role("Org Admin", "r-admin"), role("Org Collaborator", "r-collab")],
            ..StubClient::default()
        }
    }

    #[tokio::test]
    async fn test_full_pass_invites_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        let client = Arc::new(stub());
        let calls = client.calls_handle();
        let service = GroupSyncService::new(
            client,
            SyncOptions {
                add_new: true,
                ..SyncOptions::default()
            }
        );

        let desired = desired(
            r#"[{"userEmail": "new@x.com", "role": "admin", "org": "Org1", "group": "G"}]"#
        );
        let report = service.sync_group(&handle(), &desired, &store).await.unwrap();

        assert_eq!(report.adds_planned, 1);
        assert_eq!(report.attempted, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(report.pending_invites, 1);
        assert!(report.completed_at.is_some());
        assert_eq!(
            calls.lock().unwrap().as_slice(),
            ["invite o1 new@x.com admin=true"]
        );

        let persisted = store.read_invites().unwrap();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].user_email, "new@x.com");
        assert_eq!(persisted[0].org_id, "o1");
    }

    #[tokio::test]
    async fn test_second_pass_suppresses_duplicate_invite() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        let desired = desired(
            r#"[{"userEmail": "new@x.com", "role": "admin", "org": "Org1", "group": "G"}]"#
        );
        let options = SyncOptions {
            add_new: true,
            ..SyncOptions::default()
        };

        let first = GroupSyncService::new(Arc::new(stub()), options.clone());
        first.sync_group(&handle(), &desired, &store).await.unwrap();

        let client = Arc::new(stub());
        let calls = client.calls_handle();
        let second = GroupSyncService::new(client, options);
        let report = second.sync_group(&handle(), &desired, &store).await.unwrap();

        assert_eq!(report.attempted, 0);
        assert_eq!(report.skipped, 1);
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dry_run_issues_no_calls_and_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        let client = Arc::new(stub());
        let calls = client.calls_handle();
        let service = GroupSyncService::new(
            client,
            SyncOptions {
                add_new: true,
                delete_missing: true,
                dry_run: true,
                ..SyncOptions::default()
            }
        );

        let desired = desired(
            r#"[{"userEmail": "new@x.com", "role": "admin", "org": "Org1", "group": "G"}]"#
        );
        let report = service.sync_group(&handle(), &desired, &store).await.unwrap();

        assert_eq!(report.adds_planned, 1);
        assert_eq!(report.removes_planned, 1);
        assert_eq!(report.attempted, 0);
        assert!(report.dry_run);
        assert!(calls.lock().unwrap().is_empty());
        assert!(!dir.path().join("pending_invites.json").exists());
    }

    #[tokio::test]
    async fn test_converged_state_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        let client = Arc::new(stub());
        let calls = client.calls_handle();
        let service = GroupSyncService::new(
            client,
            SyncOptions {
                add_new: true,
                delete_missing: true,
                ..SyncOptions::default()
            }
        );

        let desired = desired(
            r#"[{"userEmail": "present@x.com", "role": "collaborator", "org": "Org1", "group": "G"}]"#
        );
        let report = service.sync_group(&handle(), &desired, &store).await.unwrap();

        assert_eq!(report.adds_planned, 0);
        assert_eq!(report.removes_planned, 0);
        assert_eq!(report.attempted, 0);
        assert!(calls.lock().unwrap().is_empty());
    }
}
