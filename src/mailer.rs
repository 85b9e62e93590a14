//! Delivery of confirmation codes

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

#[async_trait]
pub trait CodeMailer: Send + Sync {
    /// Deliver `code` to `email`. Failures are the mailer's to report.
    async fn send_code(&self, email: &str, code: &str);

    fn name(&self) -> &str;
}

/// Writes the code to the log instead of sending mail
pub struct LogMailer;

#[async_trait]
impl CodeMailer for LogMailer {
    async fn send_code(&self, email: &str, code: &str) {
        tracing::info!(email, code, "Confirmation code issued");
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// Keeps every delivered code in memory; used by tests to read the code back
#[derive(Default, Clone)]
pub struct CapturingMailer {
    sent: Arc<RwLock<Vec<(String, String)>>>,
}

impl CapturingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recent code delivered to `email`
    pub async fn last_code_for(&self, email: &str) -> Option<String> {
        self.sent
            .read()
            .await
            .iter()
            .rev()
            .find(|(to, _)| to == email)
            .map(|(_, code)| code.clone())
    }

    pub async fn sent_count(&self) -> usize {
        self.sent.read().await.len()
    }
}

#[async_trait]
impl CodeMailer for CapturingMailer {
    async fn send_code(&self, email: &str, code: &str) {
        self.sent
            .write()
            .await
            .push((email.to_string(), code.to_string()));
    }

    fn name(&self) -> &str {
        "capture"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_capturing_mailer_returns_latest_code() {
        let mailer = CapturingMailer::new();
        mailer.send_code("a@example.org", "AAAAAA").await;
        mailer.send_code("b@example.org", "BBBBBB").await;
        mailer.send_code("a@example.org", "CCCCCC").await;

        assert_eq!(
            mailer.last_code_for("a@example.org").await.as_deref(),
            Some("CCCCCC")
        );
        assert_eq!(mailer.last_code_for("z@example.org").await, None);
        assert_eq!(mailer.sent_count().await, 3);
    }
}
