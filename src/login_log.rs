//! Append-only record of confirmation attempts.
//!
//! One line per attempt: `email,login_start,outcome`, where outcome is the
//! confirmation time or `FAILED`. Writing is best-effort.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const FAILED: &str = "FAILED";

#[derive(Debug, Clone)]
pub struct LoginLog {
    path: PathBuf,
}

impl LoginLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format_line(
        email: &str,
        login_start: Option<DateTime<Utc>>,
        confirmed_at: Option<DateTime<Utc>>,
    ) -> String {
        let start = login_start
            .map(|t| t.format(TIME_FORMAT).to_string())
            .unwrap_or_default();
        let outcome = confirmed_at
            .map(|t| t.format(TIME_FORMAT).to_string())
            .unwrap_or_else(|| FAILED.to_string());
        format!("{},{},{}\n", email, start, outcome)
    }

    /// Append one attempt; `confirmed_at == None` records a failure
    pub async fn append(
        &self,
        email: &str,
        login_start: Option<DateTime<Utc>>,
        confirmed_at: Option<DateTime<Utc>>,
    ) {
        let line = Self::format_line(email, login_start, confirmed_at);

        let result = async {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await?;
            file.write_all(line.as_bytes()).await
        }
        .await;

        if let Err(e) = result {
            tracing::debug!(path = %self.path.display(), "Skipping login log entry: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn test_format_line() {
        let start = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        let done = Utc.with_ymd_and_hms(2026, 3, 4, 5, 8, 0).unwrap();
        assert_eq!(
            LoginLog::format_line("ada@example.org", Some(start), Some(done)),
            "ada@example.org,2026-03-04 05:06:07,2026-03-04 05:08:00\n"
        );
        assert_eq!(
            LoginLog::format_line("ada@example.org", Some(start), None),
            "ada@example.org,2026-03-04 05:06:07,FAILED\n"
        );
    }

    #[tokio::test]
    async fn test_append_accumulates_lines() {
        let dir = TempDir::new().unwrap();
        let log = LoginLog::new(dir.path().join("login.log"));
        let now = Utc::now();
        log.append("a@example.org", Some(now), None).await;
        log.append("a@example.org", Some(now), Some(now)).await;

        let content = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with(",FAILED"));
        assert!(!lines[1].ends_with(",FAILED"));
    }

    #[tokio::test]
    async fn test_unwritable_log_is_skipped() {
        let dir = TempDir::new().unwrap();
        let log = LoginLog::new(dir.path().join("missing").join("login.log"));
        log.append("a@example.org", None, None).await;
        assert!(!log.path().exists());
    }
}
