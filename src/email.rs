// Outgoing email dispatch
// A bounded queue drained by a fixed pool of workers; every send gets its delivery outcome back

use crate::config::EmailConfig;
use crate::token::Token;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

#[derive(Error, Debug)]
pub enum EmailError {
    #[error("Email queue full")]
    QueueFull,

    #[error("Email dispatcher is shut down")]
    Closed,

    #[error("Email delivery failed: {0}")]
    DeliveryFailed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmailKind {
    AccountActivation,
    PasswordChanging,
    ExceptionReport,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Email {
    pub kind: EmailKind,
    // Comma separated addresses
    pub recipients: String,
    pub subject: String,
    pub body: String,
}

impl Email {
    pub fn account_activation(token: &Token, recipient: &str) -> Self {
        Self {
            kind: EmailKind::AccountActivation,
            recipients: recipient.to_string(),
            subject: "Activate your account".to_string(),
            body: format!(
                "Use this code to activate your account: {}\nIt expires at {}.",
                token.value, token.expires_at
            ),
        }
    }

    pub fn password_changing(token: &Token, recipient: &str) -> Self {
        Self {
            kind: EmailKind::PasswordChanging,
            recipients: recipient.to_string(),
            subject: "Password change request".to_string(),
            body: format!(
                "Use this code to set a new password: {}\nIt expires at {}.",
                token.value, token.expires_at
            ),
        }
    }

    pub fn exception_report(developers: &str, error: &dyn Display) -> Self {
        Self {
            kind: EmailKind::ExceptionReport,
            recipients: developers.to_string(),
            subject: "Internal server error".to_string(),
            body: error.to_string(),
        }
    }

    pub fn recipient_list(&self) -> Vec<&str> {
        self.recipients
            .split(',')
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .collect()
    }
}

// Transport collaborator (SMTP relay, provider API, ...)
#[async_trait]
pub trait Mailer: Send + Sync + 'static {
    async fn deliver(&self, sender: &str, email: &Email) -> anyhow::Result<()>;
}

struct Job {
    email: Email,
    outcome: oneshot::Sender<Result<(), EmailError>>,
}

pub struct DeliveryHandle {
    outcome: oneshot::Receiver<Result<(), EmailError>>,
}

impl DeliveryHandle {
    pub async fn outcome(self) -> Result<(), EmailError> {
        self.outcome.await.unwrap_or(Err(EmailError::Closed))
    }
}

pub struct EmailDispatcher {
    queue: mpsc::Sender<Job>,
    workers: Vec<JoinHandle<()>>,
}

impl EmailDispatcher {
    // Spawns the worker pool, must be called inside a tokio runtime.
    pub fn start(mailer: Arc<dyn Mailer>, config: &EmailConfig) -> Self {
        let (queue, receiver) = mpsc::channel::<Job>(config.queue_size.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let sender: Arc<str> = Arc::from(config.sender.as_str());

        let workers = (0..config.workers.max(1))
            .map(|worker| {
                let receiver = Arc::clone(&receiver);
                let mailer = Arc::clone(&mailer);
                let sender = Arc::clone(&sender);
                tokio::spawn(async move {
                    loop {
                        let job = receiver.lock().await.recv().await;
                        let Some(Job { email, outcome }) = job else {
                            break;
                        };
                        let result = mailer
                            .deliver(&sender, &email)
                            .await
                            .map_err(|e| EmailError::DeliveryFailed(format!("{:#}", e)));
                        match &result {
                            Ok(()) => tracing::debug!(worker, kind = ?email.kind, "email delivered"),
                            Err(e) => tracing::error!(worker, kind = ?email.kind, error = %e, "email delivery failed"),
                        }
                        // The caller may have dropped its handle
                        let _ = outcome.send(result);
                    }
                    tracing::debug!(worker, "email worker stopped");
                })
            })
            .collect();

        Self { queue, workers }
    }

    // Queues an email without waiting for delivery.
    pub fn send(&self, email: Email) -> Result<DeliveryHandle, EmailError> {
        let (outcome, receiver) = oneshot::channel();
        self.queue
            .try_send(Job { email, outcome })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(job) => {
                    tracing::warn!(kind = ?job.email.kind, "email queue full");
                    EmailError::QueueFull
                }
                mpsc::error::TrySendError::Closed(_) => EmailError::Closed,
            })?;
        Ok(DeliveryHandle { outcome: receiver })
    }

    // Stops accepting emails and waits until queued ones are delivered.
    pub async fn shutdown(self) {
        drop(self.queue);
        for worker in self.workers {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "email worker panicked");
            }
        }
    }
}
