//! Metrics for chanreg.
//!
//! Crates record through the `metrics` facade re-exported here, behind their
//! own optional `metrics` feature:
//!
//! ```rust,ignore
//! use chanreg_metrics::{counter, registry};
//!
//! counter!(registry::DEFINITION_WRITES_TOTAL).increment(1);
//! ```
//!
//! Nothing is exported until the embedding application installs a recorder.

mod definitions;

pub use definitions::*;

// Re-export metrics macros for convenience
pub use metrics::{counter, gauge, histogram};
