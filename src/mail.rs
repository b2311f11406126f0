//! Outbound email.
//!
//! Transitions never wait on email: they drop an [`OutgoingMail`] on the
//! queue and move on. A background worker hands each message to the
//! configured [`Mailer`] and logs failures. Nothing is retried.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum MailError {
    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// Email transport.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), MailError>;
}

/// Writes mail to the log instead of sending it. The default transport.
pub struct LogMailer {
    pub sender: String,
}

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), MailError> {
        tracing::info!(
            from = %self.sender,
            to = %mail.to,
            subject = %mail.subject,
            body = %mail.body,
            "mail"
        );
        Ok(())
    }
}

/// Producer side of the mail queue. Cheap to clone.
#[derive(Clone)]
pub struct MailQueue {
    tx: mpsc::UnboundedSender<OutgoingMail>,
}

impl MailQueue {
    pub fn channel() -> (MailQueue, mpsc::UnboundedReceiver<OutgoingMail>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (MailQueue { tx }, rx)
    }

    /// Fire and forget. Only fails to enqueue once the worker is gone.
    pub fn enqueue(&self, mail: OutgoingMail) {
        if let Err(e) = self.tx.send(mail) {
            tracing::warn!(to = %e.0.to, "mail worker stopped, dropping message");
        }
    }
}

/// Drain the queue until every producer is dropped.
pub async fn run_mail_worker(mut rx: mpsc::UnboundedReceiver<OutgoingMail>, mailer: Arc<dyn Mailer>) {
    while let Some(mail) = rx.recv().await {
        match mailer.send(&mail).await {
            Ok(()) => tracing::debug!(to = %mail.to, subject = %mail.subject, "mail sent"),
            Err(e) => tracing::warn!(to = %mail.to, error = %e, "mail delivery failed"),
        }
    }
}
