//! Publish/subscribe bridge between the pipeline and streaming clients.
//! Delivery is at-most-once and best-effort: events published with no
//! subscriber are dropped, and the job row in storage stays the durable
//! source of truth.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::debug;

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEvent {
    pub job_id: String,
    pub stage: String,
    pub status: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tests_count: Option<usize>,
}

impl JobEvent {
    pub fn processing(job_id: &str, stage: &str, message: impl Into<String>) -> Self {
        Self {
            job_id: job_id.to_string(),
            stage: stage.to_string(),
            status: "processing".to_string(),
            message: message.into(),
            tests_count: None,
        }
    }

    pub fn with_count(mut self, count: usize) -> Self {
        self.tests_count = Some(count);
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status == "completed" || self.status == "failed"
    }
}

/// What a streaming subscriber sees next: a job event, or a keep-alive after
/// an idle period so long-running jobs do not look dead.
#[derive(Debug, Clone)]
pub enum StreamItem {
    Event(JobEvent),
    KeepAlive,
}

pub struct EventBus {
    topics: Mutex<HashMap<String, broadcast::Sender<JobEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
        }
    }

    pub fn publish(&self, topic: &str, event: JobEvent) {
        let mut topics = self.lock_topics();
        if let Some(sender) = topics.get(topic) {
            // Err just means nobody is listening.
            let _ = sender.send(event);
            if sender.receiver_count() == 0 {
                topics.remove(topic);
            }
        } else {
            debug!(topic, "Event published with no subscriber");
        }
    }

    pub fn subscribe(&self, topic: &str) -> broadcast::Receiver<JobEvent> {
        let mut topics = self.lock_topics();
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    fn lock_topics(&self) -> std::sync::MutexGuard<'_, HashMap<String, broadcast::Sender<JobEvent>>> {
        match self.topics.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

pub fn job_topic(job_id: &str) -> String {
    format!("job:{}", job_id)
}

/// Wait for the next stream item. Returns None when the topic is closed; a
/// lagged receiver skips to the oldest retained event.
pub async fn next_item(
    receiver: &mut broadcast::Receiver<JobEvent>,
    keepalive: Duration,
) -> Option<StreamItem> {
    loop {
        match tokio::time::timeout(keepalive, receiver.recv()).await {
            Ok(Ok(event)) => return Some(StreamItem::Event(event)),
            Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                debug!(skipped, "Subscriber lagged, continuing");
                continue;
            }
            Ok(Err(broadcast::error::RecvError::Closed)) => return None,
            Err(_) => return Some(StreamItem::KeepAlive),
        }
    }
}
