//! Alert delivery collaborators.
//!
//! The coordinator hands every alert to a `Notifier` exactly once and records the
//! outcome; nothing here retries.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Context, Result};
use serde::Serialize;

const SPOOL_FILE_NAME: &str = "alerts.jsonl";

/// One alert ready for delivery.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertRequest {
    pub subject: String,
    pub body: String,
    pub attachment: Option<PathBuf>,
}

pub trait Notifier: Send {
    fn send(&self, request: &AlertRequest) -> Result<()>;

    /// Where alerts go, as recorded in the alert history.
    fn target(&self) -> String;
}

/// Writes alerts to the log. Always succeeds.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(&self, request: &AlertRequest) -> Result<()> {
        match &request.attachment {
            Some(path) => log::warn!(
                "ALERT: {} [{}]\n{}",
                request.subject,
                path.display(),
                request.body
            ),
            None => log::warn!("ALERT: {}\n{}", request.subject, request.body),
        }
        Ok(())
    }

    fn target(&self) -> String {
        "log".to_string()
    }
}

/// Appends alerts as JSON lines to `<dir>/alerts.jsonl` for an external mailer.
#[derive(Debug, Clone)]
pub struct SpoolNotifier {
    path: PathBuf,
    recipients: Vec<String>,
}

#[derive(Serialize)]
struct SpoolEntry<'a> {
    queued_at: u64,
    recipients: &'a [String],
    #[serde(flatten)]
    request: &'a AlertRequest,
}

impl SpoolNotifier {
    pub fn new(dir: &Path, recipients: Vec<String>) -> Result<Self> {
        let mut unique: Vec<String> = Vec::with_capacity(recipients.len());
        for recipient in recipients {
            let recipient = recipient.trim().to_string();
            if !recipient.is_empty() && !unique.contains(&recipient) {
                unique.push(recipient);
            }
        }
        if unique.is_empty() {
            return Err(anyhow!("alert spool needs at least one recipient"));
        }
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create alert spool dir {}", dir.display()))?;
        Ok(Self {
            path: dir.join(SPOOL_FILE_NAME),
            recipients: unique,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn recipients(&self) -> &[String] {
        &self.recipients
    }
}

impl Notifier for SpoolNotifier {
    fn send(&self, request: &AlertRequest) -> Result<()> {
        let entry = SpoolEntry {
            queued_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            recipients: &self.recipients,
            request,
        };
        let mut line = serde_json::to_string(&entry).context("serialize alert")?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open alert spool {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("failed to append to {}", self.path.display()))?;
        Ok(())
    }

    fn target(&self) -> String {
        self.recipients.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> AlertRequest {
        AlertRequest {
            subject: "Security Alert: 1 Object(s) Detected".to_string(),
            body: "Smart Surveillance Alert".to_string(),
            attachment: Some(PathBuf::from("alerts/alert_1_50.jpg")),
        }
    }

    #[test]
    fn spool_appends_one_line_per_alert() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let notifier = SpoolNotifier::new(
            dir.path(),
            vec![
                "ops@example.com".to_string(),
                " ops@example.com ".to_string(),
                "guard@example.com".to_string(),
            ],
        )?;
        assert_eq!(notifier.target(), "ops@example.com, guard@example.com");

        notifier.send(&request())?;
        notifier.send(&request())?;

        let raw = fs::read_to_string(notifier.path())?;
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 2);
        let value: serde_json::Value = serde_json::from_str(lines[0])?;
        assert_eq!(value["subject"], "Security Alert: 1 Object(s) Detected");
        assert_eq!(value["attachment"], "alerts/alert_1_50.jpg");
        assert_eq!(value["recipients"].as_array().map(|r| r.len()), Some(2));
        Ok(())
    }

    #[test]
    fn spool_requires_recipients() -> Result<()> {
        let dir = tempfile::tempdir()?;
        assert!(SpoolNotifier::new(dir.path(), vec![" ".to_string()]).is_err());
        Ok(())
    }

    #[test]
    fn log_notifier_always_succeeds() -> Result<()> {
        LogNotifier.send(&request())?;
        assert_eq!(LogNotifier.target(), "log");
        Ok(())
    }
}
