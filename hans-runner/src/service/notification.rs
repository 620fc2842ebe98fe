//! Result notifications
//!
//! The message is handed to a sendmail-compatible program, which takes
//! care of delivery.

use anyhow::Context;
use async_trait::async_trait;
use base64::prelude::*;
use hans_core::domain::notification::Notification;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::config::MailConfig;

/// Delivers run results to contributors
#[async_trait]
pub trait NotificationService: Send + Sync {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()>;
}

/// Used when no mail settings are configured
#[derive(Debug, Default)]
pub struct DisabledNotifications;

#[async_trait]
impl NotificationService for DisabledNotifications {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        debug!(
            "Mail disabled, not notifying {} about {}",
            notification.contributor_email, notification.sha
        );
        Ok(())
    }
}

/// Pipes messages into `sendmail -t`
pub struct SendmailNotificationService {
    sendmail: String,
    cc: Vec<String>,
}

impl SendmailNotificationService {
    pub fn new(sendmail: impl Into<String>, cc: Vec<String>) -> Self {
        Self {
            sendmail: sendmail.into(),
            cc,
        }
    }

    pub fn from_config(mail: &MailConfig) -> Self {
        Self::new(mail.sendmail.clone(), mail.cc.clone())
    }
}

#[async_trait]
impl NotificationService for SendmailNotificationService {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        let message = compose_message(notification, &self.cc)?;

        let mut child = tokio::process::Command::new(&self.sendmail)
            .arg("-t")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("Failed to start {}", self.sendmail))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(message.as_bytes())
                .await
                .context("Failed to write message to sendmail")?;
            // Closing stdin ends the message
        }

        let status = child.wait().await.context("Failed to wait for sendmail")?;
        if !status.success() {
            anyhow::bail!("{} exited with {}", self.sendmail, status);
        }

        info!(
            "Sent result mail for {} to {}",
            notification.sha, notification.contributor_email
        );
        Ok(())
    }
}

/// Bytes of text per encoded word; a folded `Subject:` line stays within 78 characters
const ENCODED_CHUNK: usize = 39;

/// Renders a notification as an RFC 5322 plain-text message
///
/// Header values taken from webhook payloads are flattened to one line and
/// non-ASCII text is sent as RFC 2047 encoded words. Addresses that do not
/// look like plain `local@domain` mailboxes are refused.
pub fn compose_message(notification: &Notification, cc: &[String]) -> anyhow::Result<String> {
    let from = mailbox("Hardware Test", &notification.sender)?;
    let to = mailbox(&notification.contributor, &notification.contributor_email)?;
    let cc = cc
        .iter()
        .map(|address| plain_address(address))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let mut message = String::new();

    message.push_str(&format!("From: {}\n", from));
    message.push_str(&format!("To: {}\n", to));
    if !cc.is_empty() {
        message.push_str(&format!("Cc: {}\n", cc.join(", ")));
    }
    message.push_str(&format!(
        "Subject: {}\n",
        encode_words(&header_text(&notification.subject()))
    ));
    message.push_str(&format!("Date: {}\n", notification.finished_at.to_rfc2822()));
    message.push_str("MIME-Version: 1.0\n");
    message.push_str("Content-Type: text/plain; charset=UTF-8\n");
    message.push_str("Content-Transfer-Encoding: 8bit\n");
    message.push('\n');

    let verdict = if notification.success {
        "The test succeeded"
    } else {
        "The test failed"
    };
    message.push_str(&format!("{}\n\n", verdict));
    message.push_str(&format!("Repository: {}\n", notification.repo_full_name));
    message.push_str(&format!("Branch:     {}\n", notification.branch));
    message.push_str(&format!("Commit:     {}\n\n", notification.sha));
    message.push_str(&notification.detail);
    message.push_str("\n\n");
    message.push_str(&format!("Results: {}\n", notification.results_link));

    Ok(message)
}

/// Single-line header text; control characters, CR and LF included, become spaces
fn header_text(value: &str) -> String {
    let flat: String = value
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    flat.trim().to_string()
}

/// RFC 2047 `B` encoding for non-ASCII text, folded across lines
fn encode_words(text: &str) -> String {
    if text.is_ascii() {
        return text.to_string();
    }

    let mut words = Vec::new();
    let mut chunk = String::new();
    for c in text.chars() {
        if chunk.len() + c.len_utf8() > ENCODED_CHUNK {
            words.push(encoded_word(&chunk));
            chunk.clear();
        }
        chunk.push(c);
    }
    if !chunk.is_empty() {
        words.push(encoded_word(&chunk));
    }

    words.join("\n ")
}

fn encoded_word(text: &str) -> String {
    format!("=?UTF-8?B?{}?=", BASE64_STANDARD.encode(text))
}

/// `Display Name <address>`
fn mailbox(name: &str, address: &str) -> anyhow::Result<String> {
    let address = plain_address(address)?;
    let name = header_text(name);

    let display = if !name.is_ascii() {
        encode_words(&name)
    } else if name.contains(|c: char| "()<>[]:;@\\,.\"".contains(c)) {
        format!("\"{}\"", name.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        name
    };

    Ok(format!("{} <{}>", display, address))
}

/// Accepts a bare `local@domain` address with no room for header syntax
fn plain_address(address: &str) -> anyhow::Result<&str> {
    let valid = match address.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.is_empty()
                && !domain.contains('@')
                && address
                    .chars()
                    .all(|c| c.is_ascii_graphic() && !"<>()[],;:\\\"".contains(c))
        }
        None => false,
    };

    if !valid {
        anyhow::bail!("refusing to mail invalid address {:?}", address);
    }
    Ok(address)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notification(success: bool) -> Notification {
        Notification {
            contributor: "Jane Doe".to_string(),
            contributor_email: "jane@example.org".to_string(),
            sender: "ci@example.org".to_string(),
            detail: "ci.example.org: Pixhawk HW test passed: git: 1.00s build: 2.00s hw: 3.00s"
                .to_string(),
            success,
            branch: "main".to_string(),
            repo_full_name: "org/repo".to_string(),
            sha: "abc123".to_string(),
            results_link: "http://ci.example.org/".to_string(),
            finished_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_compose_headers() {
        let message =
            compose_message(&notification(true), &["lead@example.org".to_string()]).unwrap();

        assert!(message.starts_with("From: Hardware Test <ci@example.org>\n"));
        assert!(message.contains("To: Jane Doe <jane@example.org>\n"));
        assert!(message.contains("Cc: lead@example.org\n"));
        assert!(message.contains("Subject: Success: On-hardware test for main on org/repo (abc123)\n"));
        assert!(message.contains("\n\nThe test succeeded\n"));
        assert!(message.contains("Results: http://ci.example.org/"));
    }

    #[test]
    fn test_compose_without_cc() {
        let message = compose_message(&notification(false), &[]).unwrap();

        assert!(!message.contains("Cc:"));
        assert!(message.contains("The test failed"));
    }

    fn header_lines(message: &str) -> Vec<&str> {
        message.split("\n\n").next().unwrap().lines().collect()
    }

    #[test]
    fn test_newlines_cannot_add_headers() {
        let mut hostile = notification(true);
        hostile.contributor = "Jane\nBcc: victim@example.org".to_string();
        hostile.branch = "main\r\nBcc: other@example.org".to_string();

        let message = compose_message(&hostile, &[]).unwrap();
        let headers = header_lines(&message);

        assert!(!headers.iter().any(|l| l.starts_with("Bcc:")));
        assert!(headers.contains(&"To: \"Jane Bcc: victim@example.org\" <jane@example.org>"));
        assert!(
            headers
                .iter()
                .any(|l| l.starts_with("Subject: ") && l.contains("main  Bcc: other@example.org"))
        );
    }

    #[test]
    fn test_hostile_addresses_are_refused() {
        let mut hostile = notification(true);
        hostile.contributor_email = "jane@example.org\nBcc: victim@example.org".to_string();
        assert!(compose_message(&hostile, &[]).is_err());

        for address in ["jane", "@example.org", "a@b@c", "Jane <jane@example.org>", "a@b,c@d"] {
            let mut bad = notification(true);
            bad.contributor_email = address.to_string();
            assert!(compose_message(&bad, &[]).is_err(), "{address}");
        }

        let cc = vec!["lead@example.org\nBcc: x@y".to_string()];
        assert!(compose_message(&notification(true), &cc).is_err());
    }

    #[test]
    fn test_non_ascii_headers_are_encoded() {
        let mut n = notification(true);
        n.contributor = "Jörg".to_string();

        let message = compose_message(&n, &[]).unwrap();
        assert!(message.contains("To: =?UTF-8?B?SsO2cmc=?= <jane@example.org>\n"));
        assert!(header_lines(&message).iter().all(|l| l.is_ascii()));
    }

    #[test]
    fn test_long_non_ascii_subject_is_folded() {
        let mut n = notification(false);
        n.branch = "ü".repeat(60);

        let message = compose_message(&n, &[]).unwrap();
        let headers = header_lines(&message);
        let subject = headers.iter().position(|l| l.starts_with("Subject: ")).unwrap();

        assert!(headers[subject + 1].starts_with(" =?UTF-8?B?"));
        assert!(headers.iter().all(|l| l.len() <= 78));
    }

    #[tokio::test]
    async fn test_sendmail_refuses_invalid_recipient() {
        let mut n = notification(true);
        n.contributor_email = "not an address".to_string();

        let service = SendmailNotificationService::new("cat", vec![]);
        assert!(service.notify(&n).await.is_err());
    }

    #[tokio::test]
    async fn test_sendmail_success() {
        // `cat -t` accepts the flag and consumes stdin like sendmail would
        let service = SendmailNotificationService::new("cat", vec![]);
        service.notify(&notification(true)).await.unwrap();
    }

    #[tokio::test]
    async fn test_sendmail_failure_is_reported() {
        let service = SendmailNotificationService::new("false", vec![]);
        assert!(service.notify(&notification(true)).await.is_err());
    }

    #[tokio::test]
    async fn test_sendmail_missing_binary() {
        let service = SendmailNotificationService::new("hans-no-such-sendmail", vec![]);
        assert!(service.notify(&notification(true)).await.is_err());
    }

    #[tokio::test]
    async fn test_disabled_notifications() {
        DisabledNotifications.notify(&notification(true)).await.unwrap();
    }
}
