//! Logical role name → remote role id mapping.

use directory::RoleDescriptor;
use std::collections::HashMap;

/// Wire names of the built-in role descriptors.
pub const BUILT_IN_ADMIN: &str = "ORG ADMIN";
pub const BUILT_IN_COLLABORATOR: &str = "ORG COLLABORATOR";

/// Invites for these desired roles carry the admin flag.
pub fn is_admin_role(role: &str) -> bool {
    let upper = role.to_uppercase();
    upper == "ADMIN" || upper == "ADMINISTRATOR"
}

/// Maps logical role names (upper-cased) to remote role public ids for one
/// group.
///
/// A custom role named "admin" or "collaborator" shadows the built-in
/// descriptor of the same logical name. The override flags feed the
/// reconciler's role-equivalence check: a member already holding the built-in
/// role must read as *not yet converged* while a same-named custom role
/// exists, or the custom role would never be applied.
#[derive(Debug, Clone)]
pub struct RoleMapper {
    by_name: HashMap<String, String>,
    admin_id: Option<String>,
    collaborator_id: Option<String>,
    custom_admin_role_exists: bool,
    custom_collaborator_role_exists: bool
}

impl RoleMapper {
    pub fn new(roles: &[RoleDescriptor]) -> Self {
        let mut by_name = HashMap::new();
        for role in roles {
            by_name
                .entry(role.name.to_uppercase())
                .or_insert_with(|| role.public_id.clone());
        }

        let custom_admin = by_name.get("ADMIN").cloned();
        let custom_collaborator = by_name.get("COLLABORATOR").cloned();
        let custom_admin_role_exists = custom_admin.is_some();
        let custom_collaborator_role_exists = custom_collaborator.is_some();

        let admin_id = custom_admin.or_else(|| by_name.get(BUILT_IN_ADMIN).cloned());
        let collaborator_id =
            custom_collaborator.or_else(|| by_name.get(BUILT_IN_COLLABORATOR).cloned());

        Self {
            by_name,
            admin_id,
            collaborator_id,
            custom_admin_role_exists,
            custom_collaborator_role_exists
        }
    }

    /// Remote role public id for a logical role name.
    pub fn resolve(&self, role: &str) -> Option<&str> {
        let upper = role.to_uppercase();
        match upper.as_str() {
            "ADMIN" | "ADMINISTRATOR" => self.admin_id.as_deref(),
            "COLLABORATOR" => self.collaborator_id.as_deref(),
            _ => self.by_name.get(&upper).map(String::as_str)
        }
    }

    pub fn custom_admin_role_exists(&self) -> bool {
        self.custom_admin_role_exists
    }

    pub fn custom_collaborator_role_exists(&self) -> bool {
        self.custom_collaborator_role_exists
    }

    /// True when a same-named custom role shadows the built-in role the
    /// remote member currently holds, defeating name-equality convergence.
    pub fn overrides_built_in(&self, role: &str) -> bool {
        let upper = role.to_uppercase();
        (upper == "ADMIN" && self.custom_admin_role_exists)
            || (upper == "COLLABORATOR" && self.custom_collaborator_role_exists)
    }

    /// The group's acceptable role set, used for per-record validation.
    pub fn is_valid_role(&self, role: &str) -> bool {
        self.resolve(role).is_some()
    }

    /// Acceptable role names for error messages, sorted for stable output.
    pub fn valid_roles(&self) -> Vec<String> {
        let mut names: Vec<String> = self.by_name.keys().cloned().collect();
        if self.admin_id.is_some() && !names.iter().any(|n| n == "ADMIN") {
            names.push("ADMIN".to_string());
        }
        if self.collaborator_id.is_some() && !names.iter().any(|n| n == "COLLABORATOR") {
            names.push("COLLABORATOR".to_string());
        }
        names.sort();
        names
    }
}
