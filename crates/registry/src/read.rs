//! Live-read strategies for channel definitions.
//!
//! A definition is read only while it is live: `chan_apvl_dt` is set and not
//! after the instant of the read. Backends with efficient outer joins fetch
//! metadata and parameters in one statement; others issue two.

use std::sync::Arc;

use {
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    sqlx::{Row, SqliteConnection, sqlite::SqliteRow},
    tracing::debug,
};

use crate::{
    Result,
    params::ChannelParameter,
    types::{ChannelDefinition, from_millis, parse_flag, to_millis},
};

const METADATA_COLUMNS: &str = "uc.chan_id AS chan_id, uc.chan_title AS chan_title, \
    uc.chan_desc AS chan_desc, uc.chan_class AS chan_class, uc.chan_type_id AS chan_type_id, \
    uc.chan_publ_id AS chan_publ_id, uc.chan_apvl_id AS chan_apvl_id, \
    uc.chan_publ_dt AS chan_publ_dt, uc.chan_apvl_dt AS chan_apvl_dt, \
    uc.chan_timeout AS chan_timeout, uc.chan_editable AS chan_editable, \
    uc.chan_has_help AS chan_has_help, uc.chan_has_about AS chan_has_about, \
    uc.chan_name AS chan_name, uc.chan_fname AS chan_fname";

const PARAMETER_COLUMNS: &str = "p.chan_parm_nm AS chan_parm_nm, p.chan_parm_val AS chan_parm_val, \
    p.chan_parm_ovrd AS chan_parm_ovrd, p.chan_parm_desc AS chan_parm_desc";

const LIVE_FILTER: &str =
    "uc.chan_id = ? AND uc.chan_apvl_dt IS NOT NULL AND uc.chan_apvl_dt <= ?";

/// How definitions are read back, fixed when the store is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadStrategy {
    /// One outer-join statement, one row per parameter.
    Joined,
    /// A metadata statement followed by a parameter statement.
    Split,
}

impl ReadStrategy {
    #[must_use]
    pub fn from_capability(supports_outer_joins: bool) -> Self {
        if supports_outer_joins {
            Self::Joined
        } else {
            Self::Split
        }
    }

    pub(crate) fn reader(self) -> Arc<dyn DefinitionReader> {
        match self {
            Self::Joined => Arc::new(JoinedReader::new()),
            Self::Split => Arc::new(SplitReader::new()),
        }
    }
}

/// Reads one live definition over an already acquired connection.
#[async_trait]
pub(crate) trait DefinitionReader: Send + Sync {
    fn strategy(&self) -> ReadStrategy;

    async fn read(
        &self,
        conn: &mut SqliteConnection,
        publish_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<ChannelDefinition>>;
}

pub(crate) struct JoinedReader {
    sql: String,
}

impl JoinedReader {
    fn new() -> Self {
        Self {
            sql: format!(
                "SELECT {METADATA_COLUMNS}, {PARAMETER_COLUMNS}
                 FROM up_channel uc
                 LEFT OUTER JOIN up_channel_param p ON p.chan_id = uc.chan_id
                 WHERE {LIVE_FILTER}
                 ORDER BY p.chan_parm_ord"
            ),
        }
    }
}

#[async_trait]
impl DefinitionReader for JoinedReader {
    fn strategy(&self) -> ReadStrategy {
        ReadStrategy::Joined
    }

    async fn read(
        &self,
        conn: &mut SqliteConnection,
        publish_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<ChannelDefinition>> {
        debug!(publish_id, "reading channel definition (joined)");
        let rows = sqlx::query(&self.sql)
            .bind(publish_id)
            .bind(to_millis(now))
            .fetch_all(&mut *conn)
            .await?;

        // Metadata repeats on every row; the first one is authoritative.
        let Some(first) = rows.first() else {
            return Ok(None);
        };
        let mut definition = metadata_from_row(first)?;
        for row in &rows {
            if let Some(param) = parameter_from_row(row)? {
                definition.parameters.push(param);
            }
        }
        Ok(Some(definition))
    }
}

pub(crate) struct SplitReader {
    metadata_sql: String,
    parameters_sql: String,
}

impl SplitReader {
    fn new() -> Self {
        Self {
            metadata_sql: format!("SELECT {METADATA_COLUMNS} FROM up_channel uc WHERE {LIVE_FILTER}"),
            parameters_sql: format!(
                "SELECT {PARAMETER_COLUMNS} FROM up_channel_param p
                 WHERE p.chan_id = ?
                 ORDER BY p.chan_parm_ord"
            ),
        }
    }
}

#[async_trait]
impl DefinitionReader for SplitReader {
    fn strategy(&self) -> ReadStrategy {
        ReadStrategy::Split
    }

    async fn read(
        &self,
        conn: &mut SqliteConnection,
        publish_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<ChannelDefinition>> {
        debug!(publish_id, "reading channel definition (split)");
        let Some(row) = sqlx::query(&self.metadata_sql)
            .bind(publish_id)
            .bind(to_millis(now))
            .fetch_optional(&mut *conn)
            .await?
        else {
            return Ok(None);
        };
        let mut definition = metadata_from_row(&row)?;

        let rows = sqlx::query(&self.parameters_sql)
            .bind(publish_id)
            .fetch_all(&mut *conn)
            .await?;
        for row in &rows {
            if let Some(param) = parameter_from_row(row)? {
                definition.parameters.push(param);
            }
        }
        Ok(Some(definition))
    }
}

fn int_or_zero(row: &SqliteRow, column: &str) -> Result<i64> {
    Ok(row.try_get::<Option<i64>, _>(column)?.unwrap_or(0))
}

fn text(row: &SqliteRow, column: &str) -> Result<Option<String>> {
    Ok(row.try_get::<Option<String>, _>(column)?)
}

fn metadata_from_row(row: &SqliteRow) -> Result<ChannelDefinition> {
    Ok(ChannelDefinition {
        publish_id: row.try_get("chan_id")?,
        title: text(row, "chan_title")?.unwrap_or_default(),
        description: text(row, "chan_desc")?.unwrap_or_default(),
        class_name: text(row, "chan_class")?.unwrap_or_default(),
        type_id: int_or_zero(row, "chan_type_id")?,
        publisher_id: int_or_zero(row, "chan_publ_id")?,
        approver_id: int_or_zero(row, "chan_apvl_id")?,
        publish_date: from_millis(row.try_get("chan_publ_dt")?),
        approval_date: from_millis(row.try_get("chan_apvl_dt")?),
        timeout_ms: int_or_zero(row, "chan_timeout")?,
        editable: parse_flag(text(row, "chan_editable")?.as_deref()),
        has_help: parse_flag(text(row, "chan_has_help")?.as_deref()),
        has_about: parse_flag(text(row, "chan_has_about")?.as_deref()),
        name: text(row, "chan_name")?.unwrap_or_default(),
        fname: text(row, "chan_fname")?.unwrap_or_default(),
        parameters: Default::default(),
    })
}

/// `None` for the parameter-less row an outer join yields.
fn parameter_from_row(row: &SqliteRow) -> Result<Option<ChannelParameter>> {
    let Some(name) = text(row, "chan_parm_nm")? else {
        return Ok(None);
    };
    Ok(Some(ChannelParameter {
        name: Some(name),
        value: text(row, "chan_parm_val")?,
        override_allowed: parse_flag(text(row, "chan_parm_ovrd")?.as_deref()),
        description: text(row, "chan_parm_desc")?,
    }))
}
