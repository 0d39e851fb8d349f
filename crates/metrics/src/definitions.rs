//! Metric names.
//!
//! Every metric the registry emits is named here so dashboards have a single
//! place to look.

/// Channel definition registry metrics
pub mod registry {
    /// Live reads served, found or not
    pub const DEFINITION_READS_TOTAL: &str = "chanreg_definition_reads_total";
    /// Definition writes whose relational phase committed
    pub const DEFINITION_WRITES_TOTAL: &str = "chanreg_definition_writes_total";
    /// Relational writes rolled back (invalid input, storage error, cancellation)
    pub const WRITE_ROLLBACKS_TOTAL: &str = "chanreg_definition_write_rollbacks_total";
    /// Category synchronizations that failed after a committed write
    pub const CATEGORY_SYNC_FAILURES_TOTAL: &str = "chanreg_category_sync_failures_total";
    /// Approvals applied to an existing definition
    pub const APPROVALS_TOTAL: &str = "chanreg_definition_approvals_total";
    /// Channel types registered in the catalog
    pub const CHANNEL_TYPES_ADDED_TOTAL: &str = "chanreg_channel_types_added_total";
}
