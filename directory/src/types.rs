//! Wire types for the directory API.

use serde::{Deserialize, Serialize};

/// A member of a group as reported by `GET /group/{id}/members`.
///
/// `email` is optional on the wire: service accounts and half-provisioned
/// records come back without one. The engine drops such records at snapshot
/// build since they cannot be matched against desired memberships.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMember {
    pub id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(rename = "groupRole")]
    pub group_role: String,
    #[serde(default)]
    pub orgs: Vec<MemberOrg>
}

/// An org-scoped role held by a group member.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberOrg {
    pub name: String,
    pub role: String
}

/// An organization visible to the credential, from `GET /orgs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupOrg {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub group: Option<OrgGroup>
}

/// The group an org belongs to, embedded in the org listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrgGroup {
    pub id: String,
    pub name: String
}

/// A role definition for a group, from `GET /group/{id}/roles`.
///
/// The listing carries both the built-in roles ("Org Admin",
/// "Org Collaborator") and any custom roles defined for the group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleDescriptor {
    pub name: String,
    #[serde(rename = "publicId")]
    pub public_id: String
}

/// An issued-but-unaccepted invitation, from `GET /org/{id}/invites`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingOrgInvite {
    pub email: String,
    #[serde(rename = "isAdmin", default)]
    pub is_admin: bool
}

#[derive(Debug, Deserialize)]
pub(crate) struct OrgsResponse {
    pub orgs: Vec<GroupOrg>
}
