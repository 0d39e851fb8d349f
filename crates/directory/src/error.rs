use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("group not found: {key}")]
    GroupNotFound { key: String },

    #[error("group already exists: {key}")]
    GroupExists { key: String },

    #[error("unknown member kind: {kind}")]
    UnknownKind { kind: String },

    #[error("{message}")]
    Message { message: String },
}

impl Error {
    #[must_use]
    pub fn group_not_found(key: impl Into<String>) -> Self {
        Self::GroupNotFound { key: key.into() }
    }

    #[must_use]
    pub fn group_exists(key: impl Into<String>) -> Self {
        Self::GroupExists { key: key.into() }
    }

    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
