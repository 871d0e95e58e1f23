//! Logging front-end.
//!
//! A [`Logger`] is built once at process start and passed to whoever needs
//! it. It stamps events with time, process identity and call stack, then
//! hands them to the [`Router`].
//!
//! ```ignore
//! use fanlog_core::{Logger, LoggingConfig, RedbRecordStore, Severity};
//! use std::sync::Arc;
//!
//! let store = Arc::new(RedbRecordStore::open("data/logs.redb")?);
//! let logger = Logger::builder(LoggingConfig::default())
//!     .record_store(store)
//!     .build()?;
//!
//! let history = logger.child("history");
//! history.info("order created", None);
//!
//! logger.close_all().await?;
//! ```

use std::sync::Arc;

use ulid::Ulid;

use crate::callstack::StackFilter;
use crate::config::LoggingConfig;
use crate::error::LogResult;
use crate::event::{Context, LogEvent};
use crate::level::Severity;
use crate::router::Router;
use crate::sink::{
    ConsoleSink, EmailSink, MailTransport, RecordStore, RotatingFileSink, StoreSink,
    SubjectTemplates, Translator,
};

/// Collects collaborators before building a [`Logger`].
pub struct LoggerBuilder {
    config: LoggingConfig,
    store: Option<Arc<dyn RecordStore>>,
    transport: Option<Arc<dyn MailTransport>>,
    translator: Arc<dyn Translator>,
    console: ConsoleSink,
    process_identity: Option<String>,
}

impl LoggerBuilder {
    /// Enable the database sink.
    pub fn record_store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Enable the email sink.
    pub fn mail_transport(mut self, transport: Arc<dyn MailTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn translator(mut self, translator: Arc<dyn Translator>) -> Self {
        self.translator = translator;
        self
    }

    pub fn console(mut self, console: ConsoleSink) -> Self {
        self.console = console;
        self
    }

    /// Override the generated process identity.
    pub fn process_identity(mut self, identity: impl Into<String>) -> Self {
        self.process_identity = Some(identity.into());
        self
    }

    /// Build the logger. Must be called inside a tokio runtime.
    pub fn build(self) -> LogResult<Logger> {
        let config = self.config;

        let file = Arc::new(RotatingFileSink::new(
            &config.file.root_dir,
            config.file.idle_close(),
        )?);
        let store = self.store.map(|s| Arc::new(StoreSink::new(s)));
        let email = self.transport.map(|transport| {
            Arc::new(EmailSink::new(
                transport,
                self.translator,
                config.mail.clone(),
                config.app_name.clone(),
                Arc::clone(&file),
            ))
        });

        let router = Router::new(config.routes.clone(), self.console, file, store, email)?;
        let process_identity = self
            .process_identity
            .unwrap_or_else(|| Ulid::new().to_string());

        tracing::debug!(pid = %process_identity, "logger ready");

        Ok(Logger {
            inner: Arc::new(LoggerInner {
                router,
                process_identity,
                min_level: config.min_level,
                stack_min_level: config.stack_min_level,
                stacks: StackFilter::new(config.stack_exclude),
            }),
        })
    }
}

struct LoggerInner {
    router: Router,
    process_identity: String,
    min_level: Severity,
    stack_min_level: Severity,
    stacks: StackFilter,
}

/// Handle to the logging pipeline. Cheap to clone.
#[derive(Clone)]
pub struct Logger {
    inner: Arc<LoggerInner>,
}

impl Logger {
    pub fn builder(config: LoggingConfig) -> LoggerBuilder {
        LoggerBuilder {
            config,
            store: None,
            transport: None,
            translator: Arc::new(SubjectTemplates::default()),
            console: ConsoleSink::new(),
            process_identity: None,
        }
    }

    pub fn process_identity(&self) -> &str {
        &self.inner.process_identity
    }

    pub fn router(&self) -> &Router {
        &self.inner.router
    }

    /// Emit an event. Returns at once; scheduled sinks finish later.
    ///
    /// Returns the dispatched event, or `None` when it was filtered out by
    /// `min_level` or no sink accepts it.
    pub fn log(
        &self,
        severity: Severity,
        category: &str,
        message: impl Into<String>,
        context: Option<Context>,
    ) -> Option<Arc<LogEvent>> {
        if severity < self.inner.min_level || !self.inner.router.wants(severity) {
            return None;
        }

        let mut event = LogEvent::new(severity, &self.inner.process_identity, category, message);
        event.call_stack = match context.as_ref().and_then(LogEvent::error_stack) {
            Some(stack) => Some(self.inner.stacks.parse(stack)),
            None if severity >= self.inner.stack_min_level => Some(self.inner.stacks.capture()),
            None => None,
        };
        event.context = context;

        let event = Arc::new(event);
        self.inner.router.dispatch(&event);
        Some(event)
    }

    /// Route a pre-built event, e.g. one re-dispatched after a retry.
    pub fn dispatch(&self, event: &Arc<LogEvent>) {
        self.inner.router.dispatch(event);
    }

    /// A logger bound to one category.
    pub fn child(&self, category: impl Into<String>) -> CategoryLogger {
        CategoryLogger {
            logger: self.clone(),
            category: category.into(),
        }
    }

    /// Flush files and wait for scheduled sinks. Later events are ignored.
    pub async fn close_all(&self) -> LogResult<()> {
        self.inner.router.close_all().await
    }
}

/// A [`Logger`] with a fixed category.
#[derive(Clone)]
pub struct CategoryLogger {
    logger: Logger,
    category: String,
}

impl CategoryLogger {
    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn log(
        &self,
        severity: Severity,
        message: impl Into<String>,
        context: Option<Context>,
    ) -> Option<Arc<LogEvent>> {
        self.logger.log(severity, &self.category, message, context)
    }

    pub fn trace(&self, message: impl Into<String>, context: Option<Context>) -> Option<Arc<LogEvent>> {
        self.log(Severity::Trace, message, context)
    }

    pub fn debug(&self, message: impl Into<String>, context: Option<Context>) -> Option<Arc<LogEvent>> {
        self.log(Severity::Debug, message, context)
    }

    pub fn info(&self, message: impl Into<String>, context: Option<Context>) -> Option<Arc<LogEvent>> {
        self.log(Severity::Info, message, context)
    }

    pub fn warn(&self, message: impl Into<String>, context: Option<Context>) -> Option<Arc<LogEvent>> {
        self.log(Severity::Warn, message, context)
    }

    pub fn error(&self, message: impl Into<String>, context: Option<Context>) -> Option<Arc<LogEvent>> {
        self.log(Severity::Error, message, context)
    }

    pub fn fatal(&self, message: impl Into<String>, context: Option<Context>) -> Option<Arc<LogEvent>> {
        self.log(Severity::Fatal, message, context)
    }
}
