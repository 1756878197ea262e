//! Error types for Timerboard.

use thiserror::Error;

/// Every failure the core can report.
#[derive(Debug, Error)]
pub enum TimerboardError {
    /// Message has neither text content nor an embed.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// A deferred job fired after it was superseded.
    #[error("Stale job: {0}")]
    StaleJob(String),

    #[error("Delivery failure: {0}")]
    DeliveryFailure(String),

    /// Rule clauses conflict (same value required and excluded).
    #[error("{0}")]
    Validation(String),

    #[error("Invalid choice: {0}")]
    UnknownChoice(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TimerboardError>;
