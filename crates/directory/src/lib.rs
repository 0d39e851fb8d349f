//! Category membership directory.
//!
//! Channel categories are groups in a forest rooted at a distinguished
//! category root. The registry resolves each channel definition to an
//! [`EntityHandle`] and moves it between groups through the
//! [`MembershipDirectory`] trait.

pub mod error;
pub mod memory;
pub mod sqlite;
pub mod store;
pub mod types;

pub use {
    error::{Error, Result},
    memory::InMemoryDirectory,
    sqlite::SqliteDirectory,
    store::MembershipDirectory,
    types::{EntityHandle, EntityKind, GroupHandle, GroupMember},
};

/// Run database migrations for the directory crate.
///
/// This creates the `dir_group` and `dir_membership` tables. Should be called
/// at application startup before using [`SqliteDirectory`].
pub async fn run_migrations(pool: &sqlx::SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .set_ignore_missing(true)
        .run(pool)
        .await?;
    Ok(())
}
