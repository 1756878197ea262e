//! # Timerboard Scheduler
//!
//! Turns structure timers into webhook notifications.
//!
//! ## Architecture
//! ```text
//! Scheduler (timer / rule changes)
//!   ├── matcher: does rule R apply to timer T?
//!   ├── persistence: one ScheduledNotification per (timer, rule)
//!   └── TaskRunner: sleep until notification_date
//!         └── Dispatcher.deliver (revalidates, stale jobs discarded)
//!               └── MessageQueue per webhook
//!                     └── drain → Transport (Discord webhook POST)
//!
//! Worker (tokio interval)
//!   ├── re-drain queues with failed messages
//!   └── delete obsolete timers
//! ```

pub mod dispatch;
pub mod engine;
pub mod matcher;
pub mod persistence;
pub mod queue;
pub mod retention;
pub mod tasks;
pub mod webhook;

pub use dispatch::{DeliveryOutcome, Dispatcher};
pub use engine::Scheduler;
pub use persistence::TimerboardDb;
pub use queue::MessageQueue;
pub use tasks::{TaskHandle, TaskRunner};
pub use webhook::{DiscordTransport, TestReport, Transport};
