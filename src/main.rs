//! # Timerboard
//!
//! Operator CLI for the structure timer notification worker.
//!
//! Usage:
//!   timerboard run                       # Start the worker (re-arms pending jobs)
//!   timerboard test-webhook 3            # Send a test message to webhook #3
//!   timerboard queue-size 3              # Messages waiting for webhook #3
//!   timerboard scheduled                 # List pending notifications

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use timerboard_core::TimerboardConfig;
use timerboard_core::types::DATETIME_FORMAT;
use timerboard_scheduler::engine::spawn_worker;
use timerboard_scheduler::{DiscordTransport, Scheduler, TimerboardDb};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "timerboard",
    version,
    about = "⏰ Timerboard: structure timer notifications for Discord webhooks"
)]
struct Cli {
    /// Config file (default: ~/.timerboard/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the worker: re-arm pending jobs, retry queues, sweep old timers
    Run,
    /// Send a test message to a webhook
    TestWebhook { id: i64 },
    /// Send a timer's notification to every enabled webhook
    TestNotification { timer_id: i64 },
    /// Number of messages queued for a webhook
    QueueSize { id: i64 },
    /// Drop every message queued for a webhook
    PurgeQueue { id: i64 },
    /// Delete obsolete timers once
    Sweep,
    /// List pending scheduled notifications
    Scheduled,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "timerboard=debug,timerboard_scheduler=debug,timerboard_core=debug"
    } else {
        "timerboard=info,timerboard_scheduler=info,timerboard_core=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let config = match &cli.config {
        Some(path) => TimerboardConfig::load_from(path)?,
        None => TimerboardConfig::load()?,
    };
    let db_path = config.storage.resolved_db_path();
    let db = Arc::new(TimerboardDb::open(&db_path)?);
    let transport = Arc::new(DiscordTransport::new(config.webhook.request_timeout_secs));
    let scheduler = Arc::new(Scheduler::new(db.clone(), transport, config));

    match cli.command {
        Command::Run => {
            tracing::info!("🗄️ Database: {}", db_path.display());
            scheduler.resume_pending()?;
            let worker = spawn_worker(scheduler.clone());
            tokio::signal::ctrl_c().await?;
            tracing::info!("👋 Shutting down");
            worker.abort();
        }
        Command::TestWebhook { id } => {
            let report = scheduler.dispatcher().send_test_message(id).await?;
            if report.success {
                println!("✅ Test message sent");
            } else {
                println!("❌ Test message failed: {}", report.error_text);
            }
        }
        Command::TestNotification { timer_id } => {
            let queued = scheduler.dispatcher().send_test_notification(timer_id).await?;
            println!("🔔 Notification for timer #{timer_id} sent to {queued} webhook(s)");
        }
        Command::QueueSize { id } => {
            println!("{}", scheduler.dispatcher().queue(id).size()?);
        }
        Command::PurgeQueue { id } => {
            let cleared = scheduler.dispatcher().queue(id).clear()?;
            println!("🗑️ Purged {cleared} message(s)");
        }
        Command::Sweep => {
            let deleted = scheduler.sweep()?;
            println!("🧹 Deleted {deleted} obsolete timer(s)");
        }
        Command::Scheduled => {
            let jobs = db.pending_scheduled()?;
            if jobs.is_empty() {
                println!("No pending notifications.");
            }
            for job in jobs {
                let timer = db
                    .get_timer(job.timer_id)?
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| format!("timer #{}", job.timer_id));
                println!(
                    "#{:<5} {}  rule #{:<4} {}",
                    job.id,
                    job.notification_date.format(DATETIME_FORMAT),
                    job.rule_id,
                    timer
                );
            }
        }
    }
    Ok(())
}
