//! Date-stamped JSONL files split by level, with idle auto-close.
//!
//! ```text
//! logs/
//! ├── 2026-01-21-error.log
//! ├── 2026-01-21-fatal.log
//! └── 2026-01-22-error.log
//! ```
//!
//! A file is opened on the first write for its level key and kept open
//! while writes keep arriving. Each open handle has a reaper task that
//! closes it once the idle window passes without a write, so sparse
//! logging does not pin file descriptors.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::LogResult;
use crate::event::LogEvent;

#[cfg(windows)]
const LINE_ENDING: &[u8] = b"\r\n";
#[cfg(not(windows))]
const LINE_ENDING: &[u8] = b"\n";

type HandleMap = Arc<Mutex<HashMap<String, RotatingFileHandle>>>;

/// An open stream for one level key. Owned by the map, never shared.
struct RotatingFileHandle {
    writer: BufWriter<File>,
    path: PathBuf,
    day: NaiveDate,
    last_write: Instant,
    generation: u64,
    reaper: Option<AbortHandle>,
}

impl RotatingFileHandle {
    fn close(mut self) -> std::io::Result<()> {
        if let Some(reaper) = self.reaper.take() {
            reaper.abort();
        }
        self.writer.flush()
    }
}

/// Appends events as JSON lines to `<root>/<YYYY-MM-DD>-<level>.log`.
pub struct RotatingFileSink {
    root: PathBuf,
    idle: Duration,
    handles: HandleMap,
    generations: AtomicU64,
    runtime: Option<Handle>,
}

impl RotatingFileSink {
    /// Create a sink writing under `root`.
    ///
    /// The directory is created if missing. Idle-close needs a tokio
    /// runtime; built outside one, handles stay open until `close_all`.
    pub fn new(root: impl Into<PathBuf>, idle: Duration) -> LogResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;

        Ok(Self {
            root,
            idle,
            handles: Arc::new(Mutex::new(HashMap::new())),
            generations: AtomicU64::new(0),
            runtime: Handle::try_current().ok(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File path for a level key on a given day.
    pub fn path_for(&self, level_key: &str, day: NaiveDate) -> PathBuf {
        self.root
            .join(format!("{}-{}.log", day.format("%Y-%m-%d"), level_key))
    }

    /// Append the event to the file for `level_key` on the event's UTC day,
    /// the same day its `time` field carries.
    ///
    /// Failures are returned to the router as-is; nothing is retried.
    pub fn write(&self, level_key: &str, event: &LogEvent) -> LogResult<()> {
        let line = event.to_line().to_json_line()?;
        let day = event.timestamp.date_naive();

        let mut handles = self.handles.lock();

        // Day rolled over: finish the old file before opening the new one.
        if handles.get(level_key).is_some_and(|h| h.day != day) {
            if let Some(old) = handles.remove(level_key) {
                old.close()?;
            }
        }

        let handle = match handles.entry(level_key.to_string()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(self.open(level_key, day)?),
        };

        handle.writer.write_all(line.as_bytes())?;
        handle.writer.write_all(LINE_ENDING)?;
        handle.writer.flush()?;
        handle.last_write = Instant::now();

        Ok(())
    }

    fn open(&self, level_key: &str, day: NaiveDate) -> LogResult<RotatingFileHandle> {
        let path = self.path_for(level_key, day);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        debug!(path = %path.display(), "opened log file");

        Ok(RotatingFileHandle {
            writer: BufWriter::new(file),
            path,
            day,
            last_write: Instant::now(),
            generation,
            reaper: self.spawn_reaper(level_key.to_string(), generation),
        })
    }

    /// Close the handle once `idle` passes without a write.
    ///
    /// The reaper and writers share the map lock. The generation check
    /// makes a reaper for a replaced handle exit without touching the new
    /// one, and `last_write` is re-read under the lock, so a write racing
    /// the deadline either keeps the handle alive or lands in a fresh one.
    fn spawn_reaper(&self, level_key: String, generation: u64) -> Option<AbortHandle> {
        let runtime = self.runtime.as_ref()?;
        let handles = Arc::clone(&self.handles);
        let idle = self.idle;

        let task = runtime.spawn(async move {
            let mut deadline = Instant::now() + idle;
            loop {
                tokio::time::sleep_until(deadline).await;

                let closed = {
                    let mut map = handles.lock();
                    let due = match map.get(&level_key) {
                        Some(h) if h.generation == generation => h.last_write + idle,
                        _ => return,
                    };
                    if due > Instant::now() {
                        deadline = due;
                        None
                    } else {
                        map.remove(&level_key)
                    }
                };

                if let Some(mut handle) = closed {
                    // Do not abort ourselves; just flush and drop.
                    handle.reaper = None;
                    let path = handle.path.clone();
                    match handle.close() {
                        Ok(()) => debug!(path = %path.display(), "closed idle log file"),
                        Err(e) => warn!(path = %path.display(), error = %e, "failed to flush idle log file"),
                    }
                    return;
                }
            }
        });

        Some(task.abort_handle())
    }

    /// Whether a stream is currently open for `level_key`.
    pub fn is_open(&self, level_key: &str) -> bool {
        self.handles.lock().contains_key(level_key)
    }

    pub fn open_count(&self) -> usize {
        self.handles.lock().len()
    }

    /// Flush and close every open stream.
    ///
    /// All handles are closed even if one fails; the first error is
    /// returned.
    pub fn close_all(&self) -> LogResult<()> {
        let drained: Vec<RotatingFileHandle> = {
            let mut map = self.handles.lock();
            map.drain().map(|(_, handle)| handle).collect()
        };

        let mut first_err = None;
        for handle in drained {
            let path = handle.path.clone();
            if let Err(e) = handle.close() {
                warn!(path = %path.display(), error = %e, "failed to flush log file");
                first_err.get_or_insert(e);
            }
        }

        match first_err {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}

impl Drop for RotatingFileSink {
    fn drop(&mut self) {
        let _ = self.close_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::Severity;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    const IDLE: Duration = Duration::from_secs(300);

    fn event(message: &str) -> LogEvent {
        LogEvent::new(Severity::Error, "pid", "system", message)
    }

    fn today_path(sink: &RotatingFileSink, key: &str) -> PathBuf {
        sink.path_for(key, chrono::Utc::now().date_naive())
    }

    #[test]
    fn test_writes_one_line_per_event() {
        let temp = TempDir::new().unwrap();
        let sink = RotatingFileSink::new(temp.path().join("logs"), IDLE).unwrap();

        sink.write("error", &event("first")).unwrap();
        sink.write("error", &event("second")).unwrap();

        let content = fs::read_to_string(today_path(&sink, "error")).unwrap();
        let lines: Vec<_> = content.lines().collect();

        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("{\"time\":"));
        assert!(lines[0].contains("\"msg\":\"first\""));
        assert!(lines[1].contains("\"msg\":\"second\""));
    }

    #[test]
    fn test_files_split_by_level_key() {
        let temp = TempDir::new().unwrap();
        let sink = RotatingFileSink::new(temp.path(), IDLE).unwrap();

        sink.write("error", &event("e")).unwrap();
        sink.write("fatal", &event("f")).unwrap();

        assert_eq!(sink.open_count(), 2);
        assert!(today_path(&sink, "error").exists());
        assert!(today_path(&sink, "fatal").exists());
        assert!(today_path(&sink, "fatal")
            .file_name()
            .unwrap()
            .to_string_lossy()
            .ends_with("-fatal.log"));
    }

    #[test]
    fn test_file_date_follows_event_timestamp() {
        let temp = TempDir::new().unwrap();
        let sink = RotatingFileSink::new(temp.path(), IDLE).unwrap();

        let mut late = event("late");
        late.timestamp = Utc.with_ymd_and_hms(2026, 3, 9, 23, 59, 58).unwrap();
        sink.write("error", &late).unwrap();

        let day = NaiveDate::from_ymd_opt(2026, 3, 9).unwrap();
        let content = fs::read_to_string(sink.path_for("error", day)).unwrap();
        assert!(content.contains("\"time\":\"2026-03-09T23:59:58"));
    }

    #[test]
    fn test_day_rollover_reopens_on_new_file() {
        let temp = TempDir::new().unwrap();
        let sink = RotatingFileSink::new(temp.path(), IDLE).unwrap();

        let mut before = event("before midnight");
        before.timestamp = Utc.with_ymd_and_hms(2026, 3, 9, 23, 59, 59).unwrap();
        let mut after = event("after midnight");
        after.timestamp = Utc.with_ymd_and_hms(2026, 3, 10, 0, 0, 1).unwrap();

        sink.write("error", &before).unwrap();
        sink.write("error", &after).unwrap();
        assert_eq!(sink.open_count(), 1);

        let first = sink.path_for("error", NaiveDate::from_ymd_opt(2026, 3, 9).unwrap());
        let second = sink.path_for("error", NaiveDate::from_ymd_opt(2026, 3, 10).unwrap());
        let first = fs::read_to_string(first).unwrap();
        let second = fs::read_to_string(second).unwrap();

        assert_eq!(first.lines().count(), 1);
        assert!(first.contains("before midnight"));
        assert_eq!(second.lines().count(), 1);
        assert!(second.contains("after midnight"));
    }

    #[test]
    fn test_close_all_then_reopen() {
        let temp = TempDir::new().unwrap();
        let sink = RotatingFileSink::new(temp.path(), IDLE).unwrap();

        sink.write("error", &event("before")).unwrap();
        sink.close_all().unwrap();
        assert_eq!(sink.open_count(), 0);

        sink.write("error", &event("after")).unwrap();
        assert!(sink.is_open("error"));

        let content = fs::read_to_string(today_path(&sink, "error")).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn test_open_failure_is_reported() {
        let temp = TempDir::new().unwrap();
        let sink = RotatingFileSink::new(temp.path(), IDLE).unwrap();

        // A directory where the file should be makes the open fail.
        fs::create_dir_all(today_path(&sink, "error")).unwrap();

        assert!(sink.write("error", &event("lost")).is_err());
        assert!(!sink.is_open("error"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_handle_is_closed_and_recreated() {
        let temp = TempDir::new().unwrap();
        let sink = RotatingFileSink::new(temp.path(), IDLE).unwrap();

        sink.write("error", &event("one")).unwrap();
        assert!(sink.is_open("error"));

        tokio::time::sleep(IDLE + Duration::from_secs(1)).await;
        assert!(!sink.is_open("error"));

        sink.write("error", &event("two")).unwrap();
        assert!(sink.is_open("error"));

        let content = fs::read_to_string(today_path(&sink, "error")).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_resets_idle_timer() {
        let temp = TempDir::new().unwrap();
        let sink = RotatingFileSink::new(temp.path(), IDLE).unwrap();

        sink.write("warn", &event("a")).unwrap();
        tokio::time::sleep(Duration::from_secs(200)).await;
        sink.write("warn", &event("b")).unwrap();

        // 400s after open, 200s after the last write.
        tokio::time::sleep(Duration::from_secs(200)).await;
        assert!(sink.is_open("warn"));

        tokio::time::sleep(Duration::from_secs(101)).await;
        assert!(!sink.is_open("warn"));
    }
}
