//! # Timerboard Core
//!
//! Shared data model for structure timers, notification rules and the
//! jobs linking them, plus the configuration and error types used by every
//! other Timerboard crate.

pub mod choices;
pub mod config;
pub mod error;
pub mod types;

pub use config::TimerboardConfig;
pub use error::{Result, TimerboardError};
