//! Terminal destinations for log events.
//!
//! Console and file sinks are synchronous: cheap local I/O done on the
//! caller's thread. Database and email sinks are scheduled: the router
//! spawns them and never waits for them.

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod console;
pub mod email;
pub mod file;
pub mod store;

pub use console::ConsoleSink;
pub use email::{
    EmailSink, MailTransport, OutgoingMail, PickupDirTransport, RejectingTransport,
    SubjectTemplates, Translator, ALERT_SUBJECT_KEY,
};
pub use file::RotatingFileSink;
pub use store::{NewLogRecord, RecordStore, RedbRecordStore, StoreSink, StoredLogRecord};

/// Identifies a sink. Declaration order is invocation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkId {
    Console,
    File,
    Database,
    Email,
}

impl SinkId {
    /// All sinks in invocation order.
    pub const ALL: [SinkId; 4] = [SinkId::Console, SinkId::File, SinkId::Database, SinkId::Email];

    /// Scheduled sinks run as background tasks.
    pub fn is_scheduled(self) -> bool {
        matches!(self, SinkId::Database | SinkId::Email)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SinkId::Console => "console",
            SinkId::File => "file",
            SinkId::Database => "database",
            SinkId::Email => "email",
        }
    }
}

impl fmt::Display for SinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
