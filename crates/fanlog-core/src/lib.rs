//! fanlog core library
//!
//! Structured log fan-out for backend services.
//!
//! ## Overview
//!
//! One log call becomes one [`LogEvent`]. The [`Router`] hands that event
//! to each sink whose configured levels include the event's severity:
//!
//! - **console**: colorized line on stdout
//! - **file**: `<date>-<level>.log` JSONL files, closed when idle
//! - **database**: a [`StoredLogRecord`] through a [`RecordStore`]
//! - **email**: a plain-text alert through a [`MailTransport`], falling
//!   back to the file sink when delivery fails
//!
//! Each sink receives a given event at most once, and a failing sink only
//! leaves a note on the event. Nothing is propagated to the caller.
//!
//! ## Quick Start
//!
//! ```ignore
//! use fanlog_core::{Logger, LoggingConfig, RedbRecordStore};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = LoggingConfig::from_file("logging.json")?.with_env()?;
//!     let logger = Logger::builder(config)
//!         .record_store(Arc::new(RedbRecordStore::open("data/logs.redb")?))
//!         .build()?;
//!
//!     let system = logger.child("system");
//!     system.error("Transaction failed", None);
//!
//!     logger.close_all().await?;
//!     Ok(())
//! }
//! ```

pub mod callstack;
pub mod config;
pub mod error;
pub mod event;
pub mod layer;
pub mod level;
pub mod logger;
pub mod router;
pub mod sink;

// Re-exports
pub use callstack::{format_call_stack, render_backtrace, CallStack, StackFilter};
pub use config::{FileConfig, LoggingConfig, MailSettings, SinkRoutes};
pub use error::{LogError, LogResult};
pub use event::{Context, EventLine, LogEvent};
pub use layer::FanoutLayer;
pub use level::Severity;
pub use logger::{CategoryLogger, Logger, LoggerBuilder};
pub use router::Router;
pub use sink::{
    ConsoleSink, EmailSink, MailTransport, NewLogRecord, OutgoingMail, PickupDirTransport,
    RecordStore, RedbRecordStore, RejectingTransport, RotatingFileSink, SinkId, StoreSink,
    StoredLogRecord, SubjectTemplates, Translator,
};
