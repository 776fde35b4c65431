//! Outgoing email.
//!
//! Requests never talk to the mail server themselves: they hand an
//! [`Email`] to the [`MailDispatcher`], whose worker task sends it in the
//! background through a [`Mailer`].

use std::sync::Arc;

use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::Config;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub text_body: String,
    pub html_body: String,
}

#[derive(Debug, Error)]
pub enum MailError {
    #[error("invalid address: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("failed to build message: {0}")]
    Build(#[from] lettre::error::Error),

    #[error("smtp error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &Email) -> Result<(), MailError>;
}

/// Plain SMTP, no TLS and no credentials.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    pub fn new(host: &str, port: Option<u16>) -> Self {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host);
        if let Some(port) = port {
            builder = builder.port(port);
        }
        Self {
            transport: builder.build(),
        }
    }
}

fn build_message(email: &Email) -> Result<Message, MailError> {
    let mut builder = Message::builder()
        .from(email.from.parse::<Mailbox>()?)
        .subject(email.subject.clone());
    for to in &email.to {
        builder = builder.to(to.parse::<Mailbox>()?);
    }
    Ok(builder.multipart(MultiPart::alternative_plain_html(
        email.text_body.clone(),
        email.html_body.clone(),
    ))?)
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: &Email) -> Result<(), MailError> {
        let message = build_message(email)?;
        self.transport.send(message).await?;
        Ok(())
    }
}

/// Writes emails to the log instead of sending them.
#[derive(Debug, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: &Email) -> Result<(), MailError> {
        tracing::info!(
            to = ?email.to,
            subject = %email.subject,
            body = %email.text_body,
            "mail server not configured, email not sent"
        );
        Ok(())
    }
}

/// Keeps every email in memory.
#[derive(Clone, Default)]
pub struct MemoryMailer {
    sent: Arc<RwLock<Vec<Email>>>,
}

impl MemoryMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Email> {
        self.sent.read().clone()
    }
}

#[async_trait]
impl Mailer for MemoryMailer {
    async fn send(&self, email: &Email) -> Result<(), MailError> {
        self.sent.write().push(email.clone());
        Ok(())
    }
}

pub fn mailer_from_config(config: &Config) -> Arc<dyn Mailer> {
    match &config.mail_server {
        Some(host) => Arc::new(SmtpMailer::new(host, config.mail_port)),
        None => Arc::new(LogMailer),
    }
}

/// Bounded queue in front of a single sending task.
#[derive(Clone)]
pub struct MailDispatcher {
    queue: mpsc::Sender<Email>,
}

impl MailDispatcher {
    /// Spawns the worker on the current Tokio runtime. It runs until every
    /// clone of the dispatcher is dropped.
    pub fn start(mailer: Arc<dyn Mailer>, capacity: usize) -> Self {
        let (queue, mut inbox) = mpsc::channel::<Email>(capacity.max(1));
        tokio::spawn(async move {
            while let Some(email) = inbox.recv().await {
                match mailer.send(&email).await {
                    Ok(()) => tracing::info!(to = ?email.to, subject = %email.subject, "email sent"),
                    Err(err) => {
                        tracing::error!(to = ?email.to, subject = %email.subject, error = %err, "failed to send email")
                    }
                }
            }
            tracing::debug!("mail worker stopped");
        });
        Self { queue }
    }

    /// Queues `email` without waiting. Returns whether it was accepted.
    pub fn dispatch(&self, email: Email) -> bool {
        match self.queue.try_send(email) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(email)) => {
                tracing::warn!(to = ?email.to, subject = %email.subject, "mail queue full, email dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(email)) => {
                tracing::error!(to = ?email.to, subject = %email.subject, "mail worker gone, email dropped");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn email(subject: &str) -> Email {
        Email {
            from: "noreply@example.com".to_string(),
            to: vec!["susan@example.com".to_string()],
            subject: subject.to_string(),
            text_body: "hello".to_string(),
            html_body: "<p>hello</p>".to_string(),
        }
    }

    async fn wait_for(mailer: &MemoryMailer, count: usize) {
        for _ in 0..100 {
            if mailer.sent().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn dispatched_email_reaches_the_mailer() {
        let mailer = MemoryMailer::new();
        let dispatcher = MailDispatcher::start(Arc::new(mailer.clone()), 4);
        assert!(dispatcher.dispatch(email("one")));
        wait_for(&mailer, 1).await;
        assert_eq!(mailer.sent()[0].subject, "one");
    }

    /// Never finishes sending, so the queue can be filled.
    struct StuckMailer;

    #[async_trait]
    impl Mailer for StuckMailer {
        async fn send(&self, _: &Email) -> Result<(), MailError> {
            futures::future::pending::<()>().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn full_queue_drops_instead_of_blocking() {
        let dispatcher = MailDispatcher::start(Arc::new(StuckMailer), 1);
        let accepted = (0..5).filter(|i| dispatcher.dispatch(email(&i.to_string()))).count();
        // One in flight in the worker at most, one waiting in the queue.
        assert!(accepted <= 2, "accepted {}", accepted);
        assert!(accepted >= 1);
    }

    #[test]
    fn message_has_both_bodies() {
        let message = build_message(&email("Reset")).unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("Subject: Reset"));
        assert!(raw.contains("multipart/alternative"));
    }

    #[test]
    fn bad_address_is_an_error() {
        let mut bad = email("x");
        bad.to = vec!["not an address".to_string()];
        assert!(matches!(build_message(&bad), Err(MailError::Address(_))));
    }
}
