use thiserror::Error;

pub type SyncResult<T> = Result<T, SyncError>;

/// Engine error taxonomy.
///
/// `InvalidRole`, `InvalidEmail` and `OrgNotFound` are per-record errors:
/// they are caught at single-membership granularity, logged, and never abort
/// the group's reconciliation. `Input` is fatal for the whole run.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("invalid value for role \"{role}\", acceptable values are one of [{valid}]")]
    InvalidRole { role: String, valid: String },

    #[error("invalid email address format: {email}")]
    InvalidEmail { email: String },

    #[error("org ID not found for org name \"{org}\" - check the name is correct")]
    OrgNotFound { org: String },

    #[error("unable to process source data: {reason}")]
    Input { reason: String },

    #[error("invite store I/O error: {0}")]
    Store(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Directory(#[from] directory::DirectoryError)
}

impl SyncError {
    /// Errors that skip a single membership record rather than the group.
    pub fn is_record_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidRole { .. } | Self::InvalidEmail { .. } | Self::OrgNotFound { .. }
        )
    }
}
