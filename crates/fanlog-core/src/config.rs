//! Static pipeline configuration.
//!
//! Loaded once at startup from a JSON file and/or environment variables and
//! never changed afterwards. Unknown keys are rejected so a misspelled sink
//! name fails loudly instead of silently routing nothing.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LogError, LogResult};
use crate::level::Severity;
use crate::sink::SinkId;

/// Default idle window before an unused log file is closed.
pub const DEFAULT_IDLE_CLOSE_SECS: u64 = 300;

/// Ordered set of levels a sink accepts.
pub type LevelSet = BTreeSet<Severity>;

/// Accepted levels for each sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SinkRoutes {
    #[serde(default)]
    pub console: LevelSet,
    #[serde(default)]
    pub file: LevelSet,
    #[serde(default)]
    pub database: LevelSet,
    #[serde(default)]
    pub email: LevelSet,
}

impl SinkRoutes {
    /// Routes with every sink disabled.
    pub fn none() -> Self {
        Self {
            console: LevelSet::new(),
            file: LevelSet::new(),
            database: LevelSet::new(),
            email: LevelSet::new(),
        }
    }

    /// Console on for every level outside production, files for errors,
    /// database from `info` up, email for `error` and `fatal`.
    pub fn defaults(production: bool) -> Self {
        Self {
            console: if production {
                LevelSet::new()
            } else {
                Severity::ALL.into_iter().collect()
            },
            file: Severity::Error.and_above().collect(),
            database: Severity::Info.and_above().collect(),
            email: Severity::Error.and_above().collect(),
        }
    }

    pub fn levels(&self, sink: SinkId) -> &LevelSet {
        match sink {
            SinkId::Console => &self.console,
            SinkId::File => &self.file,
            SinkId::Database => &self.database,
            SinkId::Email => &self.email,
        }
    }

    pub fn levels_mut(&mut self, sink: SinkId) -> &mut LevelSet {
        match sink {
            SinkId::Console => &mut self.console,
            SinkId::File => &mut self.file,
            SinkId::Database => &mut self.database,
            SinkId::Email => &mut self.email,
        }
    }

    /// Replace the level set for one sink.
    pub fn with(mut self, sink: SinkId, levels: impl IntoIterator<Item = Severity>) -> Self {
        *self.levels_mut(sink) = levels.into_iter().collect();
        self
    }

    pub fn accepts(&self, sink: SinkId, severity: Severity) -> bool {
        self.levels(sink).contains(&severity)
    }

    /// Lowest level any sink accepts, if any sink is enabled.
    pub fn lowest(&self) -> Option<Severity> {
        SinkId::ALL
            .into_iter()
            .filter_map(|sink| self.levels(sink).first().copied())
            .min()
    }
}

impl Default for SinkRoutes {
    fn default() -> Self {
        Self::defaults(false)
    }
}

/// Rotating file sink settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    /// Directory holding `<date>-<level>.log` files
    pub root_dir: PathBuf,
    /// Seconds without writes before a file is closed
    pub idle_close_secs: u64,
}

impl FileConfig {
    pub fn idle_close(&self) -> Duration {
        Duration::from_secs(self.idle_close_secs)
    }
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("logs"),
            idle_close_secs: DEFAULT_IDLE_CLOSE_SECS,
        }
    }
}

/// Mail transport connection and addressing.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MailSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub from: String,
    /// Alert recipient
    pub to: String,
}

impl Default for MailSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 25,
            username: None,
            password: None,
            from: "noreply@localhost".to_string(),
            to: "ops@localhost".to_string(),
        }
    }
}

// Keep credentials out of debug output.
impl std::fmt::Debug for MailSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("from", &self.from)
            .field("to", &self.to)
            .finish()
    }
}

/// Complete pipeline configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Used in alert subjects
    pub app_name: String,
    pub production: bool,
    /// Events below this level are dropped before routing
    pub min_level: Severity,
    /// Events below this level get no synthesized call stack
    pub stack_min_level: Severity,
    /// Extra frame fragments to drop from call stacks
    pub stack_exclude: Vec<String>,
    pub routes: SinkRoutes,
    pub file: FileConfig,
    pub mail: MailSettings,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: "fanlog".to_string(),
            production: false,
            min_level: Severity::Debug,
            stack_min_level: Severity::Warn,
            stack_exclude: Vec::new(),
            routes: SinkRoutes::defaults(false),
            file: FileConfig::default(),
            mail: MailSettings::default(),
        }
    }
}

impl LoggingConfig {
    /// Production defaults: console off, `info` minimum.
    pub fn production() -> Self {
        Self {
            production: true,
            min_level: Severity::Info,
            routes: SinkRoutes::defaults(true),
            ..Self::default()
        }
    }

    /// Load from a JSON file. Missing keys take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> LogResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| LogError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&text).map_err(|e| LogError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Parse a JSON document. Without explicit `routes`, the defaults for
    /// the document's `production` flag apply.
    pub fn from_json(text: &str) -> LogResult<Self> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        let has_routes = value.get("routes").is_some();
        let mut config: Self = serde_json::from_value(value)?;
        if !has_routes {
            config.routes = SinkRoutes::defaults(config.production);
        }
        Ok(config)
    }

    /// Apply `FANLOG_*` overrides from the process environment.
    pub fn with_env(self) -> LogResult<Self> {
        self.with_vars(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable source.
    pub fn with_vars<F>(mut self, var: F) -> LogResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = var("FANLOG_MIN_LEVEL") {
            self.min_level = level.parse()?;
        }
        if let Some(dir) = var("FANLOG_LOG_DIR") {
            self.file.root_dir = PathBuf::from(dir);
        }
        if let Some(secs) = var("FANLOG_IDLE_CLOSE_SECS") {
            self.file.idle_close_secs = secs
                .parse()
                .map_err(|_| LogError::Config(format!("FANLOG_IDLE_CLOSE_SECS: {}", secs)))?;
        }
        if let Some(app) = var("FANLOG_APP_NAME") {
            self.app_name = app;
        }
        if let Some(to) = var("FANLOG_ALERT_TO") {
            self.mail.to = to;
        }
        Ok(self)
    }
}
