//! Channel definition registry.
//!
//! Channel definitions (metadata plus an ordered parameter set) live in
//! SQLite. A write replaces the definition in one transaction, returns it to
//! the unapproved state, and then moves the definition into its target
//! categories in the membership directory. That second phase is outside the
//! transaction; see [`ChannelRegistryStore::reconcile_categories`].

pub mod catalog;
mod categories;
pub mod error;
pub mod params;
pub mod read;
pub mod sequence;
pub mod store;
pub mod types;

pub use {
    catalog::TypeCatalog,
    error::{Error, ErrorKind, Result},
    params::{ChannelParameter, ParameterSet},
    read::ReadStrategy,
    sequence::{IdAllocator, SqliteSequenceAllocator},
    store::{ChannelRegistryStore, SqliteChannelRegistryStore, StoreOptions},
    types::{ChannelDefinition, ChannelType, Visibility},
};

/// Run database migrations for the registry crate.
///
/// This creates the `up_channel`, `up_channel_param`, `up_chan_type`,
/// `up_sequence` and `up_channel_category` tables. Should be called at
/// application startup before using [`SqliteChannelRegistryStore`].
pub async fn run_migrations(pool: &sqlx::SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .set_ignore_missing(true)
        .run(pool)
        .await?;
    Ok(())
}
