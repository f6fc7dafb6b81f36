use thiserror::Error;

use crate::types::TargetId;

#[derive(Debug, Error)]
pub enum Error {
    #[error("no active broadcast campaign")]
    NoActiveCampaign,

    #[error("delivery to {target} failed: {message}")]
    DeliveryFailure { target: TargetId, message: String },

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("{message}")]
    Message { message: String },

    #[error("{context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn delivery_failure(target: TargetId, message: impl Into<String>) -> Self {
        Self::DeliveryFailure {
            target,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn external(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }
}

impl herald_common::FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message { message }
    }
}

herald_common::impl_context!();

pub type Result<T> = std::result::Result<T, Error>;
