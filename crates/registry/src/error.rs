use std::{error::Error as StdError, time::Duration};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("storage access failed: {context}: {source}")]
    Storage {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    #[error("invalid parameter at position {index}: {reason}")]
    InvalidParameter { index: usize, reason: &'static str },

    /// A target category that is not a group under the category root.
    #[error("unknown category `{key}`")]
    UnknownCategory { key: String },

    #[error("`{operation}` is not supported")]
    Unsupported { operation: &'static str },

    #[error(
        "channel definition {publish_id} was committed but its categories are out of sync: {source}"
    )]
    CategorySync {
        publish_id: i64,
        #[source]
        source: chanreg_directory::Error,
    },

    /// Directory failure before the relational commit; nothing was written.
    #[error(transparent)]
    Directory(#[from] chanreg_directory::Error),

    #[error("write cancelled before commit")]
    Cancelled,

    #[error("write did not commit within {0:?}")]
    DeadlineExceeded(Duration),
}

/// Coarse classification callers use to decide how to react to an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The relational backend failed; any transaction was rolled back.
    Storage,
    InvalidInput,
    /// Permanent: retrying will not help.
    Unsupported,
    /// The relational write committed but category membership did not follow.
    PartialConsistency,
    Cancelled,
}

impl Error {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Sqlx(_) | Self::Migration(_) | Self::Storage { .. } | Self::Directory(_) => {
                ErrorKind::Storage
            },
            Self::InvalidParameter { .. } | Self::UnknownCategory { .. } => ErrorKind::InvalidInput,
            Self::Unsupported { .. } => ErrorKind::Unsupported,
            Self::CategorySync { .. } => ErrorKind::PartialConsistency,
            Self::Cancelled | Self::DeadlineExceeded(_) => ErrorKind::Cancelled,
        }
    }

    #[must_use]
    pub fn storage<E>(context: impl Into<String>, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Storage {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Fold any error into the storage kind, keeping storage errors as they are.
    #[must_use]
    pub fn into_storage(self, context: impl Into<String>) -> Self {
        match self.kind() {
            ErrorKind::Storage => self,
            _ => Self::storage(context, self),
        }
    }

    #[must_use]
    pub fn unsupported(operation: &'static str) -> Self {
        Self::Unsupported { operation }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
