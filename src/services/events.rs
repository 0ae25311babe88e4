// src/services/events.rs

//! Lifecycle event bus.
//!
//! The session manager publishes here and never learns who listens; the
//! proctoring monitor and the realtime broadcaster subscribe as observers.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppError;

#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    SessionStarted {
        session_id: Uuid,
        user_id: i64,
        exam_id: i64,
        estimated_minutes: Option<i32>,
        expires_at: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },
    /// The candidate submitted.
    SessionEnded {
        session_id: Uuid,
        user_id: i64,
        exam_id: i64,
        timestamp: DateTime<Utc>,
    },
    /// An expired attempt was closed without a submission.
    SessionAbandoned {
        session_id: Uuid,
        user_id: i64,
        exam_id: i64,
        timestamp: DateTime<Utc>,
    },
}

impl LifecycleEvent {
    pub fn session_id(&self) -> Uuid {
        match self {
            LifecycleEvent::SessionStarted { session_id, .. }
            | LifecycleEvent::SessionEnded { session_id, .. }
            | LifecycleEvent::SessionAbandoned { session_id, .. } => *session_id,
        }
    }
}

/// Outbound side used by the session manager. Publishing never fails.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: LifecycleEvent);
}

#[async_trait]
pub trait LifecycleObserver: Send + Sync {
    fn name(&self) -> &'static str;

    async fn on_event(&self, event: &LifecycleEvent) -> Result<(), AppError>;
}

/// Delivers each event to every observer in registration order.
#[derive(Default, Clone)]
pub struct LifecycleBus {
    observers: Vec<Arc<dyn LifecycleObserver>>,
}

impl LifecycleBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_observer(mut self, observer: Arc<dyn LifecycleObserver>) -> Self {
        self.observers.push(observer);
        self
    }
}

#[async_trait]
impl EventPublisher for LifecycleBus {
    async fn publish(&self, event: LifecycleEvent) {
        for observer in &self.observers {
            if let Err(e) = observer.on_event(&event).await {
                tracing::warn!(
                    observer = observer.name(),
                    session_id = %event.session_id(),
                    "Lifecycle observer failed: {}",
                    e
                );
            }
        }
    }
}
