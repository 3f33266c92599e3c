//! Notification domain
//!
//! Turns lifecycle messages into owner-facing notifications. Delivery is
//! not part of this crate; notifications collect in an outbox.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use scanflow_core::domain::message::{DomainMessage, MessageId};

use crate::bus::{AsyncMessageHandler, MessageBus};
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub kind: MessageId,
    pub job_uuid: Uuid,
    /// Owner or e-mail address when the message carried one
    pub recipient: Option<String>,
    pub text: String,
    pub created: DateTime<Utc>,
}

#[derive(Default)]
pub struct NotificationHandler {
    outbox: RwLock<Vec<Notification>>,
}

impl NotificationHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(self: Arc<Self>, bus: &MessageBus) {
        for id in [
            MessageId::JobRestartCanceled,
            MessageId::JobRestartTriggered,
            MessageId::JobCancellationRunning,
            MessageId::JobResultsPurged,
            MessageId::JobCanceled,
        ] {
            bus.subscribe(id, self.clone()).await;
        }
    }

    pub async fn notifications(&self) -> Vec<Notification> {
        self.outbox.read().await.clone()
    }

    pub async fn notifications_for(&self, job_uuid: Uuid) -> Vec<Notification> {
        self.outbox
            .read()
            .await
            .iter()
            .filter(|n| n.job_uuid == job_uuid)
            .cloned()
            .collect()
    }
}

fn text_for(message: &DomainMessage) -> Option<String> {
    let job = message.job();
    let text = match message {
        DomainMessage::JobRestartCanceled(_) => format!(
            "Restart of job {} was canceled: {}",
            job.job_uuid,
            job.info.as_deref().unwrap_or("no reason given")
        ),
        DomainMessage::JobRestartTriggered(_) => format!("Job {} has been restarted", job.job_uuid),
        DomainMessage::JobCancellationRunning(_) => {
            format!("Cancellation of job {} is running", job.job_uuid)
        }
        DomainMessage::JobResultsPurged(_) => {
            format!("Product results of job {} have been purged", job.job_uuid)
        }
        DomainMessage::JobCanceled(_) => format!("Job {} has been canceled", job.job_uuid),
        _ => return None,
    };
    Some(text)
}

#[async_trait]
impl AsyncMessageHandler for NotificationHandler {
    async fn receive_async(&self, message: &DomainMessage) -> Result<()> {
        let Some(text) = text_for(message) else {
            tracing::warn!("No notification for {}", message.id());
            return Ok(());
        };

        let job = message.job();
        let notification = Notification {
            kind: message.id(),
            job_uuid: job.job_uuid,
            recipient: job.email.clone().or_else(|| job.owner.clone()),
            text,
            created: Utc::now(),
        };
        tracing::info!(
            "Notification {} for {}: {}",
            notification.kind,
            notification.recipient.as_deref().unwrap_or("operators"),
            notification.text
        );
        self.outbox.write().await.push(notification);
        Ok(())
    }
}
