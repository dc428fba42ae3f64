//! Email channel backed by a sendmail-compatible binary.
//!
//! The message is piped to `<sendmail> -i -t`, so recipients are taken from
//! the `To:` header and a lone `.` line does not end the message early.

use async_trait::async_trait;
use chrono::Utc;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{Channel, NotificationTarget, NotifyError};
use crate::watch::Event;

pub const DEFAULT_SENDMAIL_PATH: &str = "/usr/sbin/sendmail";
pub const DEFAULT_MAIL_FROM: &str = "docketwatch@localhost";

/// Delivers events to `email` targets through sendmail.
#[derive(Debug, Clone)]
pub struct SendmailChannel {
    program: PathBuf,
    from: String,
}

impl SendmailChannel {
    pub fn new(program: impl Into<PathBuf>, from: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            from: from.into(),
        }
    }
}

impl Default for SendmailChannel {
    fn default() -> Self {
        Self::new(DEFAULT_SENDMAIL_PATH, DEFAULT_MAIL_FROM)
    }
}

/// Render an RFC 5322 message for `event`.
pub(crate) fn build_message(from: &str, to: &[String], event: &Event) -> String {
    let subject = format!(
        "[docketwatch] {} new {} item(s)",
        event.items.len(),
        event.watch_type
    );

    let mut body = format!(
        "{} new item(s) detected for {} at {}.\r\n\r\n",
        event.items.len(),
        event.watch_type,
        event.occurred_at.to_rfc3339()
    );
    for item in &event.items {
        body.push_str("- ");
        body.push_str(&item.to_string());
        body.push_str("\r\n");
    }
    body.push_str(&format!("\r\nEvent id: {}\r\n", event.id));

    format!(
        "From: {from}\r\nTo: {to}\r\nSubject: {subject}\r\nDate: {date}\r\nMessage-ID: <{id}@docketwatch>\r\nMIME-Version: 1.0\r\nContent-Type: text/plain; charset=utf-8\r\n\r\n{body}",
        from = from,
        to = to.join(", "),
        subject = subject,
        date = Utc::now().to_rfc2822(),
        id = event.id,
        body = body,
    )
}

#[async_trait]
impl Channel for SendmailChannel {
    async fn deliver(&self, event: &Event, target: &NotificationTarget) -> Result<(), NotifyError> {
        let NotificationTarget::Email { to } = target else {
            return Err(NotifyError::Rejected(format!("email channel cannot deliver to {}", target)));
        };
        let message = build_message(&self.from, to, event);

        let mut child = Command::new(&self.program)
            .args(["-i", "-t"])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| NotifyError::Transport(format!("failed to run {}: {}", self.program.display(), e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(message.as_bytes())
                .await
                .map_err(|e| NotifyError::Transport(format!("failed to write message: {}", e)))?;
            // Closing stdin ends the message.
            drop(stdin);
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| NotifyError::Transport(format!("sendmail did not finish: {}", e)))?;
        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(NotifyError::Rejected(format!(
                "sendmail exited with {}: {}",
                output.status,
                stderr.trim()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watch::WatchType;
    use serde_json::json;

    fn event() -> Event {
        Event::new(
            WatchType::ReceivedProcesses,
            vec![json!({"processNumber": "0001234-56.2024.8.26.0100"})],
        )
    }

    #[test]
    fn message_has_headers_and_items() {
        let event = event();
        let message = build_message(
            "bot@firm.example",
            &["a@firm.example".to_string(), "b@firm.example".to_string()],
            &event,
        );
        let (headers, body) = message.split_once("\r\n\r\n").unwrap();

        assert!(headers.contains("From: bot@firm.example"));
        assert!(headers.contains("To: a@firm.example, b@firm.example"));
        assert!(headers.contains("Subject: [docketwatch] 1 new received_processes item(s)"));
        assert!(headers.contains(&format!("Message-ID: <{}@docketwatch>", event.id)));
        assert!(body.contains("0001234-56.2024.8.26.0100"));
        assert!(body.contains(&event.id.to_string()));
    }

    #[tokio::test]
    async fn missing_binary_is_transport_error() {
        let channel = SendmailChannel::new("/nonexistent/sendmail", DEFAULT_MAIL_FROM);
        let target = NotificationTarget::Email { to: vec!["a@x.com".into()] };
        let result = channel.deliver(&event(), &target).await;
        assert!(matches!(result, Err(NotifyError::Transport(_))));
    }

    #[tokio::test]
    async fn refuses_webhook_targets() {
        let channel = SendmailChannel::default();
        let target = NotificationTarget::Webhook { url: "https://h".into() };
        assert!(matches!(
            channel.deliver(&event(), &target).await,
            Err(NotifyError::Rejected(_))
        ));
    }

    #[cfg(unix)]
    mod with_script {
        use super::*;
        use std::fs;
        use std::os::unix::fs::PermissionsExt;
        use tempfile::TempDir;

        fn script(dir: &TempDir, body: &str) -> PathBuf {
            let path = dir.path().join("fake-sendmail");
            fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        #[tokio::test]
        async fn pipes_message_to_binary() {
            let dir = TempDir::new().unwrap();
            let out = dir.path().join("out.eml");
            let program = script(&dir, &format!("echo \"$@\" > {0}.args\ncat > {0}", out.display()));
            let channel = SendmailChannel::new(program, "bot@firm.example");
            let target = NotificationTarget::Email { to: vec!["ops@firm.example".into()] };

            channel.deliver(&event(), &target).await.unwrap();

            let written = fs::read_to_string(&out).unwrap();
            assert!(written.contains("To: ops@firm.example"));
            let args = fs::read_to_string(format!("{}.args", out.display())).unwrap();
            assert_eq!(args.trim(), "-i -t");
        }

        #[tokio::test]
        async fn nonzero_exit_is_rejected() {
            let dir = TempDir::new().unwrap();
            let program = script(&dir, "cat > /dev/null\necho 'mailbox full' >&2\nexit 75");
            let channel = SendmailChannel::new(program, DEFAULT_MAIL_FROM);
            let target = NotificationTarget::Email { to: vec!["a@x.com".into()] };

            match channel.deliver(&event(), &target).await {
                Err(NotifyError::Rejected(msg)) => assert!(msg.contains("mailbox full")),
                other => panic!("Expected Rejected, got {:?}", other),
            }
        }
    }
}
