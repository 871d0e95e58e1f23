//! Dispatch router: fans one event out to every matching sink, once each.
//!
//! Sinks run in [`SinkId::ALL`] order. Console and file run inline; database
//! and email are spawned on a [`TaskTracker`] so shutdown can wait for them.
//! A sink is marked delivered on the event *before* it starts, which keeps
//! delivery at-most-once even when a sink logs about its own failure.

use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::RwLock;
use tokio::runtime::Handle;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::config::SinkRoutes;
use crate::error::{LogError, LogResult};
use crate::event::LogEvent;
use crate::sink::{ConsoleSink, EmailSink, RotatingFileSink, SinkId, StoreSink};

pub struct Router {
    routes: SinkRoutes,
    console: ConsoleSink,
    file: Arc<RotatingFileSink>,
    store: Option<Arc<StoreSink>>,
    email: Option<Arc<EmailSink>>,
    tasks: TaskTracker,
    runtime: Handle,
    /// Held shared for a whole dispatch, exclusively to start shutdown.
    closed: RwLock<bool>,
}

impl Router {
    /// Build a router on the current tokio runtime.
    pub fn new(
        routes: SinkRoutes,
        console: ConsoleSink,
        file: Arc<RotatingFileSink>,
        store: Option<Arc<StoreSink>>,
        email: Option<Arc<EmailSink>>,
    ) -> LogResult<Self> {
        let runtime = Handle::try_current().map_err(|e| LogError::NoRuntime(e.to_string()))?;

        Ok(Self {
            routes,
            console,
            file,
            store,
            email,
            tasks: TaskTracker::new(),
            runtime,
            closed: RwLock::new(false),
        })
    }

    pub fn routes(&self) -> &SinkRoutes {
        &self.routes
    }

    pub fn file_sink(&self) -> &Arc<RotatingFileSink> {
        &self.file
    }

    /// Whether `sink` exists in this router. Database and email are
    /// optional collaborators.
    pub fn is_installed(&self, sink: SinkId) -> bool {
        match sink {
            SinkId::Console | SinkId::File => true,
            SinkId::Database => self.store.is_some(),
            SinkId::Email => self.email.is_some(),
        }
    }

    /// Whether any installed sink would take an event at `severity`.
    pub fn wants(&self, severity: crate::level::Severity) -> bool {
        SinkId::ALL
            .into_iter()
            .any(|sink| self.is_installed(sink) && self.routes.accepts(sink, severity))
    }

    /// Hand the event to every matching sink that has not yet received it.
    ///
    /// Never blocks on scheduled sinks and never propagates a sink failure.
    /// Ignored once shutdown has begun.
    pub fn dispatch(&self, event: &Arc<LogEvent>) {
        // Recursive so a sink that logs through the tracing bridge cannot
        // deadlock against a queued `close_all`.
        let closed = self.closed.read_recursive();
        if *closed {
            return;
        }

        for sink in SinkId::ALL {
            if !self.is_installed(sink) || !self.routes.accepts(sink, event.severity) {
                continue;
            }
            if !event.mark_delivered(sink) {
                continue;
            }
            self.invoke(sink, event);
        }
    }

    fn invoke(&self, sink: SinkId, event: &Arc<LogEvent>) {
        match sink {
            SinkId::Console => run_inline(sink, event, || {
                self.console.emit(event);
                Ok(())
            }),
            SinkId::File => run_inline(sink, event, || {
                self.file.write(event.severity.as_str(), event)
            }),
            SinkId::Database => {
                if let Some(store) = &self.store {
                    let store = Arc::clone(store);
                    let owned = Arc::clone(event);
                    self.schedule(sink, event, async move {
                        tokio::task::spawn_blocking(move || store.persist(&owned).map(|_| ()))
                            .await
                            .map_err(|e| LogError::Task(e.to_string()))?
                    });
                }
            }
            SinkId::Email => {
                if let Some(email) = &self.email {
                    let email = Arc::clone(email);
                    let owned = Arc::clone(event);
                    self.schedule(sink, event, async move { email.send(&owned).await });
                }
            }
        }
    }

    fn schedule<F>(&self, sink: SinkId, event: &Arc<LogEvent>, work: F)
    where
        F: Future<Output = LogResult<()>> + Send + 'static,
    {
        let event = Arc::clone(event);
        self.tasks.spawn_on(
            async move {
                let outcome = AssertUnwindSafe(work).catch_unwind().await;
                record_outcome(sink, &event, outcome);
            },
            &self.runtime,
        );
    }

    /// Stop accepting events, wait for scheduled sinks already started,
    /// then flush and close every log file.
    pub async fn close_all(&self) -> LogResult<()> {
        // Waits out dispatches in flight, so none can reopen a file after
        // the final flush below.
        *self.closed.write() = true;
        self.tasks.close();
        self.tasks.wait().await;
        debug!("scheduled sinks drained");
        self.file.close_all()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.read_recursive()
    }
}

fn run_inline<F>(sink: SinkId, event: &LogEvent, work: F)
where
    F: FnOnce() -> LogResult<()>,
{
    let outcome = panic::catch_unwind(AssertUnwindSafe(work));
    record_outcome(sink, event, outcome);
}

fn record_outcome(sink: SinkId, event: &LogEvent, outcome: Result<LogResult<()>, Box<dyn Any + Send>>) {
    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            warn!(%sink, error = %err, "sink failed");
            event.add_note(format!("{} sink failed: {}", sink, err));
        }
        Err(payload) => {
            let reason = panic_message(payload.as_ref());
            warn!(%sink, reason = %reason, "sink panicked");
            event.add_note(format!("{} sink panicked: {}", sink, reason));
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::Severity;
    use crate::sink::store::{NewLogRecord, RecordStore, StoredLogRecord};
    use parking_lot::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    #[derive(Default)]
    struct MemoryStore {
        saved: Mutex<Vec<NewLogRecord>>,
    }

    impl RecordStore for MemoryStore {
        fn save(&self, record: NewLogRecord) -> LogResult<u64> {
            let mut saved = self.saved.lock();
            saved.push(record);
            Ok(saved.len() as u64)
        }

        fn get(&self, _id: u64) -> LogResult<Option<StoredLogRecord>> {
            Ok(None)
        }

        fn recent(&self, _limit: usize) -> LogResult<Vec<StoredLogRecord>> {
            Ok(Vec::new())
        }
    }

    struct PanickingStore;

    impl RecordStore for PanickingStore {
        fn save(&self, _record: NewLogRecord) -> LogResult<u64> {
            panic!("connection pool poisoned")
        }

        fn get(&self, _id: u64) -> LogResult<Option<StoredLogRecord>> {
            Ok(None)
        }

        fn recent(&self, _limit: usize) -> LogResult<Vec<StoredLogRecord>> {
            Ok(Vec::new())
        }
    }

    fn router(temp: &TempDir, routes: SinkRoutes, store: Arc<dyn RecordStore>) -> Router {
        let file = Arc::new(
            RotatingFileSink::new(temp.path().join("logs"), Duration::from_secs(300)).unwrap(),
        );
        Router::new(
            routes,
            ConsoleSink::plain(),
            file,
            Some(Arc::new(StoreSink::new(store))),
            None,
        )
        .unwrap()
    }

    fn event(severity: Severity) -> Arc<LogEvent> {
        Arc::new(LogEvent::new(severity, "pid", "system", "hello"))
    }

    #[tokio::test]
    async fn test_routes_by_severity() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::default());
        let routes = SinkRoutes::none().with(SinkId::Database, [Severity::Error, Severity::Fatal]);
        let router = router(&temp, routes, store.clone());

        for severity in [Severity::Debug, Severity::Info, Severity::Warn] {
            router.dispatch(&event(severity));
        }
        router.dispatch(&event(Severity::Error));
        router.dispatch(&event(Severity::Fatal));
        router.close_all().await.unwrap();

        let levels: Vec<u8> = store.saved.lock().iter().map(|r| r.level).collect();
        assert_eq!(levels.len(), 2);
        assert!(levels.contains(&50));
        assert!(levels.contains(&60));
    }

    #[tokio::test]
    async fn test_repeated_dispatch_delivers_once() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::default());
        let routes = SinkRoutes::none()
            .with(SinkId::File, [Severity::Error])
            .with(SinkId::Database, [Severity::Error]);
        let router = router(&temp, routes, store.clone());

        let event = event(Severity::Error);
        for _ in 0..5 {
            router.dispatch(&event);
        }
        router.close_all().await.unwrap();

        assert_eq!(store.saved.lock().len(), 1);
        assert_eq!(event.delivered(), vec![SinkId::File, SinkId::Database]);
    }

    #[tokio::test]
    async fn test_store_panic_is_contained() {
        let temp = TempDir::new().unwrap();
        let routes = SinkRoutes::none()
            .with(SinkId::File, [Severity::Error])
            .with(SinkId::Database, [Severity::Error]);
        let router = router(&temp, routes, Arc::new(PanickingStore));

        let event = event(Severity::Error);
        router.dispatch(&event);
        router.close_all().await.unwrap();

        assert!(event.is_delivered(SinkId::File));
        let notes = event.notes();
        assert_eq!(notes.len(), 1);
        assert!(notes[0].starts_with("database sink failed"));
    }

    #[tokio::test]
    async fn test_ignores_events_after_close() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::default());
        let routes = SinkRoutes::none().with(SinkId::Database, [Severity::Info]);
        let router = router(&temp, routes, store.clone());

        router.close_all().await.unwrap();
        let late = event(Severity::Info);
        router.dispatch(&late);

        assert!(late.delivered().is_empty());
        assert!(store.saved.lock().is_empty());
    }

    #[tokio::test]
    async fn test_uninstalled_sink_is_not_marked() {
        let temp = TempDir::new().unwrap();
        let routes = SinkRoutes::none().with(SinkId::Email, [Severity::Fatal]);
        let router = router(&temp, routes, Arc::new(MemoryStore::default()));

        let event = event(Severity::Fatal);
        router.dispatch(&event);

        assert!(!router.wants(Severity::Fatal));
        assert!(event.delivered().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_close_all_leaves_no_file_open() {
        let temp = TempDir::new().unwrap();
        let routes = SinkRoutes::none().with(SinkId::File, [Severity::Error]);
        let router = Arc::new(router(&temp, routes, Arc::new(MemoryStore::default())));

        let mut writers = Vec::new();
        for _ in 0..8 {
            let router = Arc::clone(&router);
            writers.push(tokio::spawn(async move {
                for _ in 0..50 {
                    router.dispatch(&event(Severity::Error));
                    tokio::task::yield_now().await;
                }
            }));
        }
        tokio::task::yield_now().await;
        router.close_all().await.unwrap();
        for writer in writers {
            writer.await.unwrap();
        }

        assert!(router.is_closed());
        assert_eq!(router.file_sink().open_count(), 0);
    }

    #[test]
    fn test_requires_runtime() {
        let temp = TempDir::new().unwrap();
        let file = Arc::new(RotatingFileSink::new(temp.path(), Duration::from_secs(1)).unwrap());
        let result = Router::new(SinkRoutes::none(), ConsoleSink::plain(), file, None, None);
        assert!(matches!(result, Err(LogError::NoRuntime(_))));
    }
}
