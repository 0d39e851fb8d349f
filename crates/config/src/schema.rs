//! Config schema types.

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChanregConfig {
    pub database: DatabaseConfig,
    pub categories: CategoriesConfig,
    pub sequences: SequencesConfig,
}

/// Relational backend settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// sqlx connection URL.
    pub url: String,
    pub max_connections: u32,
    /// Read definitions with one outer join instead of two statements.
    pub supports_outer_joins: bool,
    /// Deadline for the relational phase of a definition write.
    pub write_timeout_secs: Option<u64>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:chanreg.db?mode=rwc".into(),
            max_connections: 5,
            supports_outer_joins: true,
            write_timeout_secs: None,
        }
    }
}

/// Channel category settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoriesConfig {
    /// Key of the directory group every category lives under.
    pub root: String,
}

impl Default for CategoriesConfig {
    fn default() -> Self {
        Self {
            root: "channel-categories".into(),
        }
    }
}

/// Identifier sequence names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequencesConfig {
    pub channel_type: String,
}

impl Default for SequencesConfig {
    fn default() -> Self {
        Self {
            channel_type: "UP_CHAN_TYPE".into(),
        }
    }
}
