/// Immutable per-run options, passed explicitly into the reconciler and the
/// operation queue. There is no ambient flag state.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Compute and log the plan without touching the remote API or the
    /// durable invite store.
    pub dry_run: bool,
    /// Enable the add/update side of reconciliation.
    pub add_new: bool,
    /// Enable the remove side of reconciliation (use with caution).
    pub delete_missing: bool,
    /// Provision absent users directly instead of sending email invites.
    pub auto_provision: bool,
    /// Bounded concurrency for independent role updates and removals.
    /// Invites and provisions are always serialized.
    pub concurrency: usize
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            add_new: false,
            delete_missing: false,
            auto_provision: false,
            concurrency: 10
        }
    }
}
