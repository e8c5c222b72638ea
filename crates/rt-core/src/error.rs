//! Error types for the real-time engine

use thiserror::Error;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, RtError>;

/// Errors raised by the indicator, subscription and dispatch layers
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RtError {
    /// Subscription could not be created, updated or found
    #[error("Subscription error: {message}")]
    Subscription { message: String },

    /// Indicator or profile lookup failed
    #[error("Lookup error: {message}")]
    Lookup { message: String },

    /// The user is unknown or not logged
    #[error("Availability error: {reason}")]
    Availability { reason: String },

    /// Task is not tracked by the communication listener
    #[error("Unknown task: {task_id}")]
    UnknownTask { task_id: String },

    /// A view answered with a field index missing from its schema
    #[error("Unknown field index {field_index} in view {view}")]
    UnknownField { view: String, field_index: u32 },

    /// A row could not be interpreted
    #[error("Malformed row: {message}")]
    MalformedRow { message: String },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// The engine task is gone
    #[error("Engine stopped")]
    Stopped,
}

impl RtError {
    /// Create a subscription error
    pub fn subscription(message: impl Into<String>) -> Self {
        Self::Subscription {
            message: message.into(),
        }
    }

    /// Create a lookup error
    pub fn lookup(message: impl Into<String>) -> Self {
        Self::Lookup {
            message: message.into(),
        }
    }

    /// Create an availability error
    pub fn availability(reason: impl Into<String>) -> Self {
        Self::Availability {
            reason: reason.into(),
        }
    }

    /// Create an unknown task error
    pub fn unknown_task(task_id: impl Into<String>) -> Self {
        Self::UnknownTask {
            task_id: task_id.into(),
        }
    }

    /// Create an unknown field error
    pub fn unknown_field(view: impl Into<String>, field_index: u32) -> Self {
        Self::UnknownField {
            view: view.into(),
            field_index,
        }
    }

    /// Create a malformed row error
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedRow {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Re-raise a lookup failure as a subscription failure.
    ///
    /// Other variants pass through untouched.
    pub fn into_subscription(self) -> Self {
        match self {
            Self::Lookup { message } => Self::Subscription { message },
            other => other,
        }
    }
}

impl From<cccp_infra_common::Error> for RtError {
    fn from(err: cccp_infra_common::Error) -> Self {
        Self::config(err.to_string())
    }
}
