use thiserror::Error;

use crate::frame::FrameId;

pub type Result<T, E = TimelapseError> = std::result::Result<T, E>;

/// Unified error type covering common failure scenarios across subsystems.
#[derive(Debug, Error)]
pub enum TimelapseError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("invalid value for `{field}`: {reason}")]
    InvalidField { field: String, reason: String },
    #[error("unable to decode image: {0}")]
    Decode(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("store I/O error: {0}")]
    StoreIo(String),
    #[error("frame {0} is no longer in the store")]
    MissingFrame(FrameId),
    #[error("scheduler error: {0}")]
    Scheduler(String),
    #[error("server error: {0}")]
    Server(String),
    #[error("operational error: {0}")]
    Ops(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TimelapseError {
    pub fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Name of the offending configuration field, if this is a validation error.
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::InvalidField { field, .. } => Some(field.as_str()),
            _ => None,
        }
    }
}
