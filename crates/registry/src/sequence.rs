//! Identifier allocation for new catalog records.

use {async_trait::async_trait, sqlx::SqlitePool, tracing::debug};

use crate::Result;

/// Issues unique, increasing integer ids per named sequence.
#[async_trait]
pub trait IdAllocator: Send + Sync {
    async fn next_id(&self, sequence: &str) -> Result<i64>;
}

/// Sequences kept in the `up_sequence` table. The first id of a sequence is 1.
pub struct SqliteSequenceAllocator {
    pool: SqlitePool,
}

impl SqliteSequenceAllocator {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdAllocator for SqliteSequenceAllocator {
    async fn next_id(&self, sequence: &str) -> Result<i64> {
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO up_sequence (sequence_name, sequence_value) VALUES (?, 1)
             ON CONFLICT(sequence_name) DO UPDATE SET sequence_value = sequence_value + 1
             RETURNING sequence_value",
        )
        .bind(sequence)
        .fetch_one(&self.pool)
        .await?;
        debug!(sequence, id, "allocated id");
        Ok(id)
    }
}
