//! Channel type catalog.

use std::sync::Arc;

use {
    sqlx::{Sqlite, SqlitePool, Transaction},
    tracing::{debug, info, warn},
};

use crate::{Result, sequence::IdAllocator, types::ChannelType};

/// Reference table mapping type ids to implementation classes.
pub struct TypeCatalog {
    pool: SqlitePool,
    allocator: Arc<dyn IdAllocator>,
    sequence: String,
}

#[derive(sqlx::FromRow)]
struct ChannelTypeRow {
    type_id: i64,
    #[sqlx(rename = "type")]
    class_name: String,
    type_name: Option<String>,
    type_descr: Option<String>,
    type_def_uri: Option<String>,
}

impl From<ChannelTypeRow> for ChannelType {
    fn from(r: ChannelTypeRow) -> Self {
        Self {
            id: r.type_id,
            class_name: r.class_name,
            name: r.type_name.unwrap_or_default(),
            description: r.type_descr.unwrap_or_default(),
            definition_uri: r.type_def_uri.unwrap_or_default(),
        }
    }
}

impl TypeCatalog {
    /// `sequence` names the allocator sequence new type ids are drawn from.
    pub fn new(pool: SqlitePool, allocator: Arc<dyn IdAllocator>, sequence: impl Into<String>) -> Self {
        Self {
            pool,
            allocator,
            sequence: sequence.into(),
        }
    }

    /// All registered types, ordered by id. Empty when none exist.
    pub async fn list(&self) -> Result<Vec<ChannelType>> {
        let rows = sqlx::query_as::<_, ChannelTypeRow>(
            "SELECT type_id, type, type_name, type_descr, type_def_uri FROM up_chan_type ORDER BY type_id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Register a new type and return its allocated id.
    ///
    /// Allocation failures surface as storage errors, like the insert itself.
    pub async fn add(&self, channel_type: &ChannelType) -> Result<i64> {
        let id = self
            .allocator
            .next_id(&self.sequence)
            .await
            .map_err(|e| e.into_storage(format!("allocate id from `{}`", self.sequence)))?;

        let mut tx = self.pool.begin().await?;
        match insert_type(&mut tx, id, channel_type).await {
            Ok(()) => {
                tx.commit().await?;
                info!(type_id = id, name = %channel_type.name, "registered channel type");
                Ok(id)
            },
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(type_id = id, error = %rollback, "rollback failed");
                }
                Err(e)
            },
        }
    }
}

async fn insert_type(
    tx: &mut Transaction<'_, Sqlite>,
    id: i64,
    channel_type: &ChannelType,
) -> Result<()> {
    debug!(type_id = id, class = %channel_type.class_name, "inserting channel type");
    sqlx::query(
        "INSERT INTO up_chan_type (type_id, type, type_name, type_descr, type_def_uri)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(id)
    .bind(&channel_type.class_name)
    .bind(&channel_type.name)
    .bind(&channel_type.description)
    .bind(&channel_type.definition_uri)
    .execute(&mut **tx)
    .await?;
    Ok(())
}
