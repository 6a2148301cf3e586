//! Group catalog discovery.
//!
//! Each group is addressed by a `name:token` credential pair. Before any
//! reconciliation work the catalog is probed: one org listing per token
//! establishes whether the credential works and which group id it is scoped
//! to. A rejected token disables the group for the run instead of failing it.

use crate::error::{SyncError, SyncResult};
use directory::{DirectoryClient, DirectoryError};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum GroupStatus {
    Enabled,
    Disabled { reason: String }
}

/// One group from the credential catalog, resolved against the remote API.
#[derive(Debug, Clone)]
pub struct GroupHandle {
    /// Group name as configured, matched case-insensitively against the
    /// membership data.
    pub name: String,
    /// Remote group id. Empty for disabled groups.
    pub id: String,
    pub token: String,
    pub status: GroupStatus
}

impl GroupHandle {
    pub fn is_enabled(&self) -> bool {
        self.status == GroupStatus::Enabled
    }

    fn disabled(name: &str, token: &str, reason: &str) -> Self {
        Self {
            name: name.to_string(),
            id: String::new(),
            token: token.to_string(),
            status: GroupStatus::Disabled {
                reason: reason.to_string()
            }
        }
    }
}

/// Parse the `name:token[,name:token...]` credential catalog.
pub fn parse_api_keys(raw: &str) -> SyncResult<Vec<(String, String)>> {
    let mut pairs = Vec::new();
    for entry in raw.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let (name, token) = entry.split_once(':').ok_or_else(|| SyncError::Input {
            reason: format!("API key entry is not a name:token pair: {entry:?}")
        })?;
        let (name, token) = (name.trim(), token.trim());
        if name.is_empty() || token.is_empty() {
            return Err(SyncError::Input {
                reason: format!("API key entry has an empty name or token: {entry:?}")
            });
        }
        pairs.push((name.to_string(), token.to_string()));
    }
    if pairs.is_empty() {
        return Err(SyncError::Input {
            reason: "no API key pairs configured".to_string()
        });
    }
    Ok(pairs)
}

/// Probe each credential pair and build the group catalog. A failed probe
/// disables the group for the run instead of failing discovery; the reason
/// distinguishes rejected tokens from transport or server trouble.
pub async fn discover<F>(pairs: &[(String, String)], client_for: F) -> SyncResult<Vec<GroupHandle>>
where
    F: Fn(&str) -> SyncResult<Arc<dyn DirectoryClient>>
{
    let mut handles = Vec::with_capacity(pairs.len());
    for (name, token) in pairs {
        let client = client_for(token)?;
        let handle = match client.get_orgs().await {
            Ok(orgs) => match orgs.iter().find_map(|o| o.group.as_ref()) {
                Some(group) => {
                    info!(group = %name, id = %group.id, orgs = orgs.len(), "group enabled");
                    GroupHandle {
                        name: name.clone(),
                        id: group.id.clone(),
                        token: token.clone(),
                        status: GroupStatus::Enabled
                    }
                }
                None => {
                    warn!(group = %name, "no group-scoped orgs visible, group disabled");
                    GroupHandle::disabled(name, token, "no group-scoped orgs visible")
                }
            },
            Err(DirectoryError::Authentication(message)) => {
                warn!(group = %name, %message, "API authentication error, group disabled");
                GroupHandle::disabled(name, token, "API authentication error")
            }
            Err(err) => {
                warn!(group = %name, error = %err, "group probe failed, group disabled");
                GroupHandle::disabled(name, token, &err.to_string())
            }
        };
        handles.push(handle);
    }
    Ok(handles)
}
