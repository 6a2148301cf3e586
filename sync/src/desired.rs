//! Desired-state normalization.
//!
//! Two input schemas are accepted and resolved once into a tagged variant;
//! everything downstream of [`DesiredState::for_group`] operates on the
//! canonical form only. A malformed file is fatal for the whole run: the
//! operator fixes the input and reruns, there is no partial success.

use crate::error::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};

/// A single desired (user, role, org, group) assignment.
///
/// `role` is free-form and compared case-insensitively against remote role
/// names; "admin" and "collaborator" are the two reserved logical roles.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Membership {
    pub user_email: String,
    pub role: String,
    pub org: String,
    pub group: String
}

/// Schema 2: nested per-group structure with org-scoped collaborator and
/// admin lists plus an optional group-admin list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GroupInput {
    pub group_name: String,
    #[serde(default)]
    pub admins: Vec<UserInput>,
    #[serde(default)]
    pub orgs: Vec<OrgInput>
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UserInput {
    #[serde(default)]
    pub full_name: Option<String>,
    pub email: String
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct OrgInput {
    pub org_name: String,
    #[serde(default)]
    pub collaborators: Vec<UserInput>,
    #[serde(default)]
    pub admins: Vec<UserInput>
}

/// The two supported input schemas, resolved once at load time.
#[derive(Debug, Clone)]
pub enum DesiredState {
    /// Flat list of membership records.
    V1(Vec<Membership>),
    /// Nested per-group org/collaborator/admin lists.
    V2(Vec<GroupInput>)
}

/// Explicit schema selection for callers that know which shape they feed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaVersion {
    V1,
    V2
}

/// Canonical reconciler input for one group: org-scoped memberships plus an
/// optional group-admin email list (schema 1 cannot express group admins).
#[derive(Debug, Clone)]
pub struct GroupDesired {
    pub group: String,
    pub memberships: Vec<Membership>,
    pub group_admins: Option<Vec<String>>
}

impl DesiredState {
    /// Resolve raw parsed JSON into one of the two schemas.
    ///
    /// Detection keys off the record shape: schema 1 records carry
    /// `userEmail`, schema 2 entries carry `groupName`. Any record that does
    /// not decode fails the whole normalization with the serde error text.
    pub fn from_json(value: serde_json::Value) -> SyncResult<Self> {
        let records = value.as_array().ok_or_else(|| SyncError::Input {
            reason: "expected a JSON array of membership records or group objects".to_string()
        })?;

        let Some(first) = records.first() else {
            return Ok(Self::V1(Vec::new()));
        };

        if first.get("userEmail").is_some() {
            Self::from_json_as(value, SchemaVersion::V1)
        } else if first.get("groupName").is_some() {
            Self::from_json_as(value, SchemaVersion::V2)
        } else {
            Err(SyncError::Input {
                reason: "records match neither the flat membership schema (userEmail/role/org/\
                         group) nor the per-group schema (groupName/admins/orgs)"
                    .to_string()
            })
        }
    }

    /// Decode against one named schema, no detection. Input of the other
    /// shape fails with the serde error text.
    pub fn from_json_as(value: serde_json::Value, schema: SchemaVersion) -> SyncResult<Self> {
        match schema {
            SchemaVersion::V1 => {
                let memberships =
                    serde_json::from_value::<Vec<Membership>>(value).map_err(input_error)?;
                Ok(Self::V1(memberships))
            }
            SchemaVersion::V2 => {
                let groups =
                    serde_json::from_value::<Vec<GroupInput>>(value).map_err(input_error)?;
                Ok(Self::V2(groups))
            }
        }
    }

    /// Names of all groups referenced by the input, in first-seen order.
    pub fn group_names(&self) -> Vec<String> {
        let mut seen = Vec::new();
        let mut push = |name: &str| {
            if !seen.iter().any(|s: &String| s.eq_ignore_ascii_case(name)) {
                seen.push(name.to_string());
            }
        };
        match self {
            Self::V1(memberships) => {
                for m in memberships {
                    push(&m.group);
                }
            }
            Self::V2(groups) => {
                for g in groups {
                    push(&g.group_name);
                }
            }
        }
        seen
    }

    /// Canonical desired state for one group. Both schemas normalize to
    /// identical reconciler inputs.
    pub fn for_group(&self, group_name: &str) -> GroupDesired {
        match self {
            Self::V1(memberships) => GroupDesired {
                group: group_name.to_string(),
                memberships: memberships
                    .iter()
                    .filter(|m| m.group.eq_ignore_ascii_case(group_name))
                    .cloned()
                    .collect(),
                group_admins: None
            },
            Self::V2(groups) => {
                let mut memberships = Vec::new();
                let mut group_admins = None;
                for g in groups {
                    if !g.group_name.eq_ignore_ascii_case(group_name) {
                        continue;
                    }
                    group_admins =
                        Some(g.admins.iter().map(|a| a.email.clone()).collect::<Vec<_>>());
                    for org in &g.orgs {
                        for user in &org.collaborators {
                            memberships.push(Membership {
                                user_email: user.email.clone(),
                                role: "collaborator".to_string(),
                                org: org.org_name.clone(),
                                group: g.group_name.clone()
                            });
                        }
                        for user in &org.admins {
                            memberships.push(Membership {
                                user_email: user.email.clone(),
                                role: "admin".to_string(),
                                org: org.org_name.clone(),
                                group: g.group_name.clone()
                            });
                        }
                    }
                }
                GroupDesired {
                    group: group_name.to_string(),
                    memberships,
                    group_admins
                }
            }
        }
    }
}

fn input_error(err: serde_json::Error) -> SyncError {
    SyncError::Input {
        reason: err.to_string()
    }
}
