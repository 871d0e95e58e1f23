//! Alert email sink.
//!
//! Renders an event as a plain-text alert and hands it to a
//! [`MailTransport`]. If delivery fails the event is written through the
//! file sink instead, so an alert is never silently lost.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use futures::future::BoxFuture;
use tracing::warn;

use crate::config::MailSettings;
use crate::error::{LogError, LogResult};
use crate::event::LogEvent;
use crate::sink::file::RotatingFileSink;
use crate::sink::SinkId;

/// Translation key for the alert subject line.
pub const ALERT_SUBJECT_KEY: &str = "log.alert.subject";

/// A rendered alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub text: String,
}

/// Delivers mail. Connection details come from `settings` on every call.
pub trait MailTransport: Send + Sync + 'static {
    fn send_mail<'a>(
        &'a self,
        settings: &'a MailSettings,
        mail: OutgoingMail,
    ) -> BoxFuture<'a, LogResult<()>>;
}

/// Renders translated strings.
pub trait Translator: Send + Sync + 'static {
    fn render(&self, key: &str, vars: &[(&str, &str)]) -> String;
}

/// [`Translator`] over a fixed key → template table with `{{var}}`
/// placeholders. Unknown keys render as the key itself.
#[derive(Debug, Clone)]
pub struct SubjectTemplates {
    templates: HashMap<String, String>,
}

impl Default for SubjectTemplates {
    fn default() -> Self {
        let mut templates = HashMap::new();
        templates.insert(
            ALERT_SUBJECT_KEY.to_string(),
            "[{{app}}] {{level}} in {{category}}".to_string(),
        );
        Self { templates }
    }
}

impl SubjectTemplates {
    pub fn with_template(mut self, key: impl Into<String>, template: impl Into<String>) -> Self {
        self.templates.insert(key.into(), template.into());
        self
    }
}

impl Translator for SubjectTemplates {
    fn render(&self, key: &str, vars: &[(&str, &str)]) -> String {
        let Some(template) = self.templates.get(key) else {
            return key.to_string();
        };
        vars.iter().fold(template.clone(), |text, (name, value)| {
            text.replace(&format!("{{{{{}}}}}", name), value)
        })
    }
}

/// Transport that drops each message as a `.eml` file into a pickup
/// directory for a local MTA or relay to collect.
#[derive(Debug, Clone)]
pub struct PickupDirTransport {
    dir: PathBuf,
}

impl PickupDirTransport {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &std::path::Path {
        &self.dir
    }
}

impl MailTransport for PickupDirTransport {
    fn send_mail<'a>(
        &'a self,
        settings: &'a MailSettings,
        mail: OutgoingMail,
    ) -> BoxFuture<'a, LogResult<()>> {
        Box::pin(async move {
            tokio::fs::create_dir_all(&self.dir).await?;

            let message = format!(
                "X-Relay: {}:{}\r\nDate: {}\r\nFrom: {}\r\nTo: {}\r\nSubject: {}\r\nContent-Type: text/plain; charset=utf-8\r\n\r\n{}\r\n",
                settings.host,
                settings.port,
                Utc::now().to_rfc2822(),
                mail.from,
                mail.to,
                mail.subject,
                mail.text.replace('\n', "\r\n"),
            );
            let path = self.dir.join(format!("{}.eml", ulid::Ulid::new()));
            tokio::fs::write(&path, message).await?;
            Ok(())
        })
    }
}

/// Sends alerts for the severities routed to email.
pub struct EmailSink {
    transport: Arc<dyn MailTransport>,
    translator: Arc<dyn Translator>,
    settings: MailSettings,
    app_name: String,
    fallback: Arc<RotatingFileSink>,
}

impl EmailSink {
    pub fn new(
        transport: Arc<dyn MailTransport>,
        translator: Arc<dyn Translator>,
        settings: MailSettings,
        app_name: impl Into<String>,
        fallback: Arc<RotatingFileSink>,
    ) -> Self {
        Self {
            transport,
            translator,
            settings,
            app_name: app_name.into(),
            fallback,
        }
    }

    /// Build the alert for an event.
    pub fn render(&self, event: &LogEvent) -> LogResult<OutgoingMail> {
        let subject = self.translator.render(
            ALERT_SUBJECT_KEY,
            &[
                ("app", self.app_name.as_str()),
                ("level", event.severity.as_str()),
                ("category", event.category.as_str()),
            ],
        );
        let body = event.to_line().to_pretty_json()?;
        let text = format!(
            "{} reported a {} event in \"{}\":\n\n{}\n\nProcess: {}\n",
            self.app_name, event.severity, event.category, body, event.process_identity
        );

        Ok(OutgoingMail {
            from: self.settings.from.clone(),
            to: self.settings.to.clone(),
            subject,
            text,
        })
    }

    /// Send the alert, falling back to the file sink on failure.
    ///
    /// The failure is recorded on the event and not returned. The fallback
    /// marks the file sink delivered first, so it never runs twice for the
    /// same event.
    pub async fn send(&self, event: &LogEvent) -> LogResult<()> {
        let result = match self.render(event) {
            Ok(mail) => self.transport.send_mail(&self.settings, mail).await,
            Err(e) => Err(e),
        };

        if let Err(err) = result {
            warn!(category = %event.category, error = %err, "alert email failed, writing to file");
            event.add_note(format!("email sink failed: {}", err));

            if event.mark_delivered(SinkId::File) {
                if let Err(file_err) = self.fallback.write(event.severity.as_str(), event) {
                    event.add_note(format!("file sink failed: {}", file_err));
                }
            }
        }
        Ok(())
    }
}

/// Transport that always fails, for tests and for disabling delivery while
/// keeping the file fallback.
#[derive(Debug, Clone, Default)]
pub struct RejectingTransport {
    reason: String,
}

impl RejectingTransport {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl MailTransport for RejectingTransport {
    fn send_mail<'a>(
        &'a self,
        _settings: &'a MailSettings,
        _mail: OutgoingMail,
    ) -> BoxFuture<'a, LogResult<()>> {
        Box::pin(async move { Err(LogError::Mail(self.reason.clone())) })
    }
}
