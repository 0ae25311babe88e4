// src/services/broadcaster.rs

//! Topic-partitioned fan-out to realtime observers.
//!
//! Holds nothing but the live subscriber set; a topic exists while it has at
//! least one receiver.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::{RwLock, broadcast};

use crate::{
    config::BROADCAST_CAPACITY,
    error::AppError,
    models::proctoring::RealtimeEvent,
    services::events::{LifecycleEvent, LifecycleObserver},
};

/// Every administrative observer.
pub const OBSERVERS_TOPIC: &str = "observers";

/// Observers of a single exam.
pub fn exam_topic(exam_id: i64) -> String {
    format!("exam:{}", exam_id)
}

pub struct RealtimeBroadcaster {
    topics: RwLock<HashMap<String, broadcast::Sender<RealtimeEvent>>>,
    capacity: usize,
}

impl Default for RealtimeBroadcaster {
    fn default() -> Self {
        Self::new(BROADCAST_CAPACITY)
    }
}

impl RealtimeBroadcaster {
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    /// Joins `topic`, creating it on first subscription.
    pub async fn subscribe(&self, topic: &str) -> broadcast::Receiver<RealtimeEvent> {
        let mut topics = self.topics.write().await;
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Sends `payload` to every current subscriber of `topic`.
    /// Returns how many receivers it reached.
    pub async fn publish(&self, topic: &str, payload: RealtimeEvent) -> usize {
        let delivered = {
            let topics = self.topics.read().await;
            match topics.get(topic) {
                Some(tx) => tx.send(payload).ok(),
                None => return 0,
            }
        };

        match delivered {
            Some(n) => n,
            None => {
                // Every receiver is gone.
                let mut topics = self.topics.write().await;
                if topics.get(topic).is_some_and(|tx| tx.receiver_count() == 0) {
                    topics.remove(topic);
                }
                0
            }
        }
    }

    /// Publishes to all observers and to the observers of `exam_id`.
    pub async fn publish_exam_event(&self, exam_id: i64, payload: RealtimeEvent) -> usize {
        let global = self.publish(OBSERVERS_TOPIC, payload.clone()).await;
        global + self.publish(&exam_topic(exam_id), payload).await
    }

    pub async fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .read()
            .await
            .get(topic)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl LifecycleObserver for RealtimeBroadcaster {
    fn name(&self) -> &'static str {
        "realtime_broadcaster"
    }

    async fn on_event(&self, event: &LifecycleEvent) -> Result<(), AppError> {
        let (exam_id, payload) = match event {
            LifecycleEvent::SessionStarted {
                session_id,
                user_id,
                exam_id,
                timestamp,
                ..
            } => (
                *exam_id,
                RealtimeEvent::SessionStarted {
                    session_id: *session_id,
                    user_id: *user_id,
                    exam_id: *exam_id,
                    timestamp: *timestamp,
                },
            ),
            LifecycleEvent::SessionEnded {
                session_id,
                exam_id,
                timestamp,
                ..
            }
            | LifecycleEvent::SessionAbandoned {
                session_id,
                exam_id,
                timestamp,
                ..
            } => (
                *exam_id,
                RealtimeEvent::SessionEnded {
                    session_id: *session_id,
                    timestamp: *timestamp,
                },
            ),
        };

        self.publish_exam_event(exam_id, payload).await;
        Ok(())
    }
}
