//! Message bus
//!
//! Connects the scheduler domains. Asynchronous messages are delivered by
//! one worker task per lane, so every subscriber sees the messages of a lane
//! in publish order. Each topic has its own lane, except the started and
//! terminal messages of jobs which share one: a record deleted for a finished
//! job never comes back through a late started message. Synchronous requests
//! are answered inline by the single handler registered for their topic.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;

use scanflow_core::domain::message::{DomainMessage, MessageId};

use crate::error::{Result, SchedulerError};

/// Receives published messages
#[async_trait]
pub trait AsyncMessageHandler: Send + Sync {
    async fn receive_async(&self, message: &DomainMessage) -> Result<()>;
}

/// Answers synchronous requests
#[async_trait]
pub trait SyncMessageHandler: Send + Sync {
    async fn receive_sync(&self, message: &DomainMessage) -> Result<DomainMessage>;
}

/// Ordered delivery channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Lane {
    JobLifecycle,
    Topic(MessageId),
}

impl Lane {
    fn of(id: MessageId) -> Self {
        match id {
            MessageId::JobStarted | MessageId::JobDone | MessageId::JobFailed | MessageId::JobCanceled => {
                Lane::JobLifecycle
            }
            id => Lane::Topic(id),
        }
    }
}

type Subscribers = Arc<RwLock<HashMap<MessageId, Vec<Arc<dyn AsyncMessageHandler>>>>>;

struct Worker {
    subscribers: Subscribers,
    sender: mpsc::UnboundedSender<DomainMessage>,
    handle: JoinHandle<()>,
}

impl Worker {
    fn spawn(lane: Lane) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<DomainMessage>();
        let subscribers: Subscribers = Arc::default();
        let worker_subscribers = Arc::clone(&subscribers);

        let handle = tokio::spawn(async move {
            while let Some(message) = receiver.recv().await {
                let id = message.id();
                let handlers = worker_subscribers
                    .read()
                    .await
                    .get(&id)
                    .cloned()
                    .unwrap_or_default();
                for handler in handlers {
                    if let Err(e) = handler.receive_async(&message).await {
                        tracing::error!(
                            "Handler for {} failed on job {}: {}",
                            id,
                            message.job_uuid(),
                            e
                        );
                    }
                }
            }
            tracing::debug!("Worker of {:?} stopped", lane);
        });

        Self {
            subscribers,
            sender,
            handle,
        }
    }
}

/// In-process message bus
#[derive(Default)]
pub struct MessageBus {
    workers: Mutex<HashMap<Lane, Worker>>,
    sync_handlers: RwLock<HashMap<MessageId, Arc<dyn SyncMessageHandler>>>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a subscriber; the lane worker starts with its first subscriber
    pub async fn subscribe(&self, id: MessageId, handler: Arc<dyn AsyncMessageHandler>) {
        let lane = Lane::of(id);
        let mut workers = self.workers.lock().await;
        let worker = workers.entry(lane).or_insert_with(|| Worker::spawn(lane));
        worker.subscribers.write().await.entry(id).or_default().push(handler);
        tracing::debug!("Subscribed handler to {}", id);
    }

    /// Publishes a message without waiting for its handlers
    pub async fn publish(&self, message: DomainMessage) {
        let id = message.id();
        let job_uuid = message.job_uuid();
        let workers = self.workers.lock().await;

        let subscribed = match workers.get(&Lane::of(id)) {
            Some(worker) => worker.subscribers.read().await.contains_key(&id).then_some(worker),
            None => None,
        };
        let Some(worker) = subscribed else {
            tracing::warn!("No subscriber for {}, message for job {} dropped", id, job_uuid);
            return;
        };

        tracing::debug!("Publishing {} for job {}", id, job_uuid);
        if worker.sender.send(message).is_err() {
            tracing::warn!("Worker of {} stopped, message for job {} dropped", id, job_uuid);
        }
    }

    /// Registers the handler answering requests of a topic
    ///
    /// Each topic accepts exactly one synchronous handler.
    pub async fn register_sync_handler(
        &self,
        id: MessageId,
        handler: Arc<dyn SyncMessageHandler>,
    ) -> Result<()> {
        let mut handlers = self.sync_handlers.write().await;
        if handlers.contains_key(&id) {
            return Err(SchedulerError::Validation(format!(
                "A synchronous handler for {} is already registered",
                id
            )));
        }
        handlers.insert(id, handler);
        Ok(())
    }

    /// Sends a synchronous request and returns the answer
    pub async fn request(&self, message: DomainMessage) -> Result<DomainMessage> {
        let id = message.id();
        let handler = self
            .sync_handlers
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(SchedulerError::NoSyncHandler(id))?;

        tracing::debug!("Requesting {} for job {}", id, message.job_uuid());
        handler.receive_sync(&message).await
    }

    /// Stops all workers, pending messages are dropped
    pub async fn shutdown(&self) {
        for (lane, worker) in self.workers.lock().await.drain() {
            worker.handle.abort();
            tracing::debug!("Stopped worker of {:?}", lane);
        }
    }
}
