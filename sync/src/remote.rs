//! Read-only snapshot of a group's live remote state.
//!
//! Built once per reconciliation pass; never cached across passes.

use crate::error::{SyncError, SyncResult};
use directory::{DirectoryClient, GroupOrg, MemberOrg, RoleDescriptor};
use std::collections::HashMap;
use tracing::debug;

/// A group member that survived snapshot filtering: the email is guaranteed
/// present. Remote records without an email cannot be matched against
/// desired memberships and are silently excluded.
#[derive(Debug, Clone)]
pub struct GroupMemberView {
    pub id: String,
    pub email: String,
    pub group_role: String,
    pub orgs: Vec<MemberOrg>
}

impl GroupMemberView {
    /// Group admins and viewers hold group-scoped roles and are excluded
    /// from per-org reconciliation.
    pub fn is_org_member(&self) -> bool {
        !self.group_role.eq_ignore_ascii_case("admin")
            && !self.group_role.eq_ignore_ascii_case("viewer")
    }
}

pub struct RemoteGroupState {
    group_id: String,
    members: Vec<GroupMemberView>,
    orgs: Vec<GroupOrg>,
    /// Upper-cased org name → org id. The indexed lookup makes the
    /// first-exact-match tie-break rule explicit: membership files must not
    /// list the same org name twice with different casing.
    org_index: HashMap<String, String>,
    roles: Vec<RoleDescriptor>
}

impl RemoteGroupState {
    /// Fetch members, orgs and role definitions for one group.
    pub async fn fetch(client: &dyn DirectoryClient, group_id: &str) -> SyncResult<Self> {
        let raw_members = client.get_members(group_id).await?;
        let orgs = client.get_orgs().await?;
        let roles = client.get_roles(group_id).await?;

        let total = raw_members.len();
        let members: Vec<GroupMemberView> = raw_members
            .into_iter()
            .filter_map(|m| {
                m.email.map(|email| GroupMemberView {
                    id: m.id,
                    email,
                    group_role: m.group_role,
                    orgs: m.orgs
                })
            })
            .collect();
        if members.len() < total {
            debug!(
                excluded = total - members.len(),
                "excluded member records without an email"
            );
        }

        // The credential is group-scoped, but be defensive about org listings
        // that carry another group's id.
        let orgs: Vec<GroupOrg> = orgs
            .into_iter()
            .filter(|o| o.group.as_ref().is_none_or(|g| g.id == group_id))
            .collect();

        Ok(Self::from_parts(group_id, members, orgs, roles))
    }

    pub fn from_parts(
        group_id: &str,
        members: Vec<GroupMemberView>,
        orgs: Vec<GroupOrg>,
        roles: Vec<RoleDescriptor>
    ) -> Self {
        let mut org_index = HashMap::new();
        for org in &orgs {
            org_index
                .entry(org.name.to_uppercase())
                .or_insert_with(|| org.id.clone());
        }
        Self {
            group_id: group_id.to_string(),
            members,
            orgs,
            org_index,
            roles
        }
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn members(&self) -> &[GroupMemberView] {
        &self.members
    }

    pub fn orgs(&self) -> &[GroupOrg] {
        &self.orgs
    }

    pub fn roles(&self) -> &[RoleDescriptor] {
        &self.roles
    }

    /// Org name → id, the only join key between desired and remote state.
    pub fn resolve_org_id(&self, org_name: &str) -> SyncResult<&str> {
        self.org_index
            .get(&org_name.to_uppercase())
            .map(String::as_str)
            .ok_or_else(|| SyncError::OrgNotFound {
                org: org_name.to_string()
            })
    }

    /// Case-insensitive exact email match against the snapshot.
    pub fn resolve_user_id(&self, email: &str) -> Option<&str> {
        self.members
            .iter()
            .find(|m| m.email.eq_ignore_ascii_case(email))
            .map(|m| m.id.as_str())
    }
}
