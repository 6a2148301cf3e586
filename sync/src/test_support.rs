//! Shared fixtures for engine unit tests.

use crate::desired::{GroupDesired, Membership};
use crate::remote::GroupMemberView;
use crate::roles::RoleMapper;
use async_trait::async_trait;
use directory::{
    DirectoryClient, DirectoryError, DirectoryResult, GroupMember, GroupOrg, MemberOrg,
    PendingOrgInvite, RoleDescriptor
};
use std::sync::{Arc, Mutex};

pub fn member(id: &str, email: &str, group_role: &str, orgs: &[(&str, &str)]) -> GroupMemberView {
    GroupMemberView {
        id: id.to_string(),
        email: email.to_string(),
        group_role: group_role.to_string(),
        orgs: orgs
            .iter()
            .map(|(name, role)| MemberOrg {
                name: (*name).to_string(),
                role: (*role).to_string()
            })
            .collect()
    }
}

pub fn org(id: &str, name: &str) -> GroupOrg {
    GroupOrg {
        id: id.to_string(),
        name: name.to_string(),
        group: None
    }
}

pub fn role(name: &str, public_id: &str) -> RoleDescriptor {
    RoleDescriptor {
        name: name.to_string(),
        public_id: public_id.to_string()
    }
}

/// The two built-in descriptors every group carries.
pub fn standard_roles() -> RoleMapper {
    RoleMapper::new(&[
        role("Org Admin", "r-admin"),
        role("Org Collaborator", "r-collab")
    ])
}

pub fn desired_v1(memberships: Vec<Membership>) -> GroupDesired {
    GroupDesired {
        group: "G".to_string(),
        memberships,
        group_admins: None
    }
}

#[derive(Clone, Copy)]
pub enum StubFailure {
    Auth,
    Server
}

/// In-memory [`DirectoryClient`] that records every mutating call.
#[derive(Default)]
pub struct StubClient {
    pub members: Vec<GroupMember>,
    pub orgs: Vec<GroupOrg>,
    pub roles: Vec<RoleDescriptor>,
    pub orgs_failure: Option<StubFailure>,
    /// Mutating calls whose description contains this substring fail with a
    /// server error.
    pub fail_matching: Option<String>,
    pub calls: Arc<Mutex<Vec<String>>>
}

impl StubClient {
    pub fn calls_handle(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.calls)
    }

    fn record(&self, description: String) -> DirectoryResult<()> {
        let fails = self
            .fail_matching
            .as_ref()
            .is_some_and(|s| description.contains(s.as_str()));
        self.calls.lock().unwrap().push(description);
        if fails {
            return Err(DirectoryError::Api {
                status: 500,
                message: "injected failure".to_string()
            });
        }
        Ok(())
    }
}

#[async_trait]
impl DirectoryClient for StubClient {
    async fn get_members(&self, _group_id: &str) -> DirectoryResult<Vec<GroupMember>> {
        Ok(self.members.clone())
    }

    async fn get_orgs(&self) -> DirectoryResult<Vec<GroupOrg>> {
        match self.orgs_failure {
            Some(StubFailure::Auth) => Err(DirectoryError::Authentication(
                "API token rejected (401)".to_string()
            )),
            Some(StubFailure::Server) => Err(DirectoryError::Api {
                status: 500,
                message: "injected failure".to_string()
            }),
            None => Ok(self.orgs.clone())
        }
    }

    async fn get_roles(&self, _group_id: &str) -> DirectoryResult<Vec<RoleDescriptor>> {
        Ok(self.roles.clone())
    }

    async fn invite(&self, org_id: &str, email: &str, is_admin: bool) -> DirectoryResult<()> {
        self.record(format!("invite {org_id} {email} admin={is_admin}"))
    }

    async fn provision(
        &self,
        org_id: &str,
        email: &str,
        role_public_id: &str
    ) -> DirectoryResult<()> {
        self.record(format!("provision {org_id} {email} {role_public_id}"))
    }

    async fn add_member(
        &self,
        group_id: &str,
        org_id: &str,
        user_id: &str,
        role: &str
    ) -> DirectoryResult<()> {
        self.record(format!("add_member {group_id} {org_id} {user_id} {role}"))
    }

    async fn update_role(
        &self,
        org_id: &str,
        user_id: &str,
        role_public_id: &str
    ) -> DirectoryResult<()> {
        self.record(format!("update_role {org_id} {user_id} {role_public_id}"))
    }

    async fn remove_member(&self, org_id: &str, user_id: &str) -> DirectoryResult<()> {
        self.record(format!("remove_member {org_id} {user_id}"))
    }

    async fn get_pending_invites(&self, _org_id: &str) -> DirectoryResult<Vec<PendingOrgInvite>> {
        Ok(Vec::new())
    }
}

pub fn raw_member(id: &str, email: Option<&str>, group_role: &str, orgs: &[(&str, &str)]) -> GroupMember {
    GroupMember {
        id: id.to_string(),
        username: None,
        name: None,
        email: email.map(str::to_string),
        group_role: group_role.to_string(),
        orgs: orgs
            .iter()
            .map(|(name, role)| MemberOrg {
                name: (*name).to_string(),
                role: (*role).to_string()
            })
            .collect()
    }
}
