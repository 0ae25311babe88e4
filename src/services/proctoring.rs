// src/services/proctoring.rs

//! Proctoring registry and monitor.
//!
//! Everything here is advisory. Monitor operations swallow and log their own
//! failures so candidate-facing calls never see them.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    config::{FAST_SUBMIT_RATIO, TAB_SWITCH_THRESHOLD},
    error::AppError,
    models::proctoring::{AnomalyEvent, AnomalyKind, ProctoringEntry, RealtimeEvent},
    services::{
        broadcaster::RealtimeBroadcaster,
        events::{LifecycleEvent, LifecycleObserver},
    },
    store::AuditLog,
    utils::clock::Clock,
};

/// Table of active sessions, keyed by session id.
///
/// The bundled implementation is per-process; running several instances
/// requires a shared keyed store behind this trait.
#[async_trait]
pub trait ProctoringRegistry: Send + Sync {
    /// Inserts `entry` unless the session is already registered. Returns true if inserted.
    async fn register(&self, entry: ProctoringEntry) -> Result<bool, AppError>;

    async fn get(&self, session_id: Uuid) -> Result<Option<ProctoringEntry>, AppError>;

    /// Updates last activity. Returns false for unknown sessions.
    async fn touch(&self, session_id: Uuid, at: DateTime<Utc>) -> Result<bool, AppError>;

    /// Bumps the tab-switch counter and returns the updated entry.
    async fn increment_tab_switches(
        &self,
        session_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<ProctoringEntry>, AppError>;

    async fn remove(&self, session_id: Uuid) -> Result<Option<ProctoringEntry>, AppError>;

    async fn list(&self) -> Result<Vec<ProctoringEntry>, AppError>;
}

#[derive(Default)]
pub struct InMemoryProctoringRegistry {
    entries: RwLock<HashMap<Uuid, ProctoringEntry>>,
}

impl InMemoryProctoringRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProctoringRegistry for InMemoryProctoringRegistry {
    async fn register(&self, entry: ProctoringEntry) -> Result<bool, AppError> {
        let mut entries = self.entries.write().await;
        if entries.contains_key(&entry.session_id) {
            return Ok(false);
        }
        entries.insert(entry.session_id, entry);
        Ok(true)
    }

    async fn get(&self, session_id: Uuid) -> Result<Option<ProctoringEntry>, AppError> {
        Ok(self.entries.read().await.get(&session_id).cloned())
    }

    async fn touch(&self, session_id: Uuid, at: DateTime<Utc>) -> Result<bool, AppError> {
        match self.entries.write().await.get_mut(&session_id) {
            Some(entry) => {
                entry.last_activity_at = at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn increment_tab_switches(
        &self,
        session_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<ProctoringEntry>, AppError> {
        Ok(self
            .entries
            .write()
            .await
            .get_mut(&session_id)
            .map(|entry| {
                entry.tab_switches += 1;
                entry.last_activity_at = at;
                entry.clone()
            }))
    }

    async fn remove(&self, session_id: Uuid) -> Result<Option<ProctoringEntry>, AppError> {
        Ok(self.entries.write().await.remove(&session_id))
    }

    async fn list(&self) -> Result<Vec<ProctoringEntry>, AppError> {
        let mut entries: Vec<_> = self.entries.read().await.values().cloned().collect();
        entries.sort_by_key(|e| e.started_at);
        Ok(entries)
    }
}

/// Thresholds of the anomaly heuristics.
#[derive(Debug, Clone, Copy)]
pub struct ProctoringPolicy {
    /// Switches above this count raise `excessive_tab_switches`, once per switch.
    pub tab_switch_threshold: u32,
    /// Elapsed/estimated ratio below which a submission is `fast_submit`.
    pub fast_submit_ratio: f64,
}

impl Default for ProctoringPolicy {
    fn default() -> Self {
        Self {
            tab_switch_threshold: TAB_SWITCH_THRESHOLD,
            fast_submit_ratio: FAST_SUBMIT_RATIO,
        }
    }
}

pub struct ProctoringMonitor {
    registry: Arc<dyn ProctoringRegistry>,
    audit: Arc<dyn AuditLog>,
    broadcaster: Arc<RealtimeBroadcaster>,
    clock: Arc<dyn Clock>,
    policy: ProctoringPolicy,
}

impl ProctoringMonitor {
    pub fn new(
        registry: Arc<dyn ProctoringRegistry>,
        audit: Arc<dyn AuditLog>,
        broadcaster: Arc<RealtimeBroadcaster>,
        clock: Arc<dyn Clock>,
        policy: ProctoringPolicy,
    ) -> Self {
        Self {
            registry,
            audit,
            broadcaster,
            clock,
            policy,
        }
    }

    /// Starts watching a session. Re-registering an active session is a no-op.
    pub async fn register_session(
        &self,
        session_id: Uuid,
        user_id: i64,
        exam_id: i64,
        estimated_minutes: Option<i32>,
        expires_at: DateTime<Utc>,
    ) {
        let now = self.clock.now();
        let entry = ProctoringEntry {
            session_id,
            user_id,
            exam_id,
            estimated_minutes,
            started_at: now,
            last_activity_at: now,
            expires_at,
            tab_switches: 0,
        };

        match self.registry.register(entry).await {
            Ok(true) => tracing::debug!(%session_id, "Proctoring started"),
            Ok(false) => {}
            Err(e) => tracing::warn!(%session_id, "Failed to register session for proctoring: {}", e),
        }
    }

    /// Counts one tab switch and returns the running total, or `None` if the
    /// session is not being proctored.
    pub async fn record_tab_switch(&self, session_id: Uuid) -> Option<u32> {
        if self.drop_if_expired(session_id).await {
            return None;
        }

        let entry = match self
            .registry
            .increment_tab_switches(session_id, self.clock.now())
            .await
        {
            Ok(entry) => entry?,
            Err(e) => {
                tracing::warn!(%session_id, "Failed to record tab switch: {}", e);
                return None;
            }
        };

        if entry.tab_switches > self.policy.tab_switch_threshold {
            self.emit(
                &entry,
                AnomalyKind::ExcessiveTabSwitches,
                json!({
                    "tab_switches": entry.tab_switches,
                    "threshold": self.policy.tab_switch_threshold,
                }),
            )
            .await;
        }

        Some(entry.tab_switches)
    }

    /// Marks the candidate as alive. Returns false for unknown sessions.
    pub async fn record_heartbeat(&self, session_id: Uuid) -> bool {
        if self.drop_if_expired(session_id).await {
            return false;
        }

        match self.registry.touch(session_id, self.clock.now()).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(%session_id, "Failed to record heartbeat: {}", e);
                false
            }
        }
    }

    /// Runs the fast-submission check and stops watching the session.
    /// Returns the anomaly raised, if any.
    pub async fn on_session_end(&self, session_id: Uuid) -> Option<AnomalyEvent> {
        let entry = match self.registry.remove(session_id).await {
            Ok(entry) => entry?,
            Err(e) => {
                tracing::warn!(%session_id, "Failed to drop proctoring entry: {}", e);
                return None;
            }
        };

        match self.fast_submit_ratio(&entry) {
            Some((ratio, elapsed, estimated)) if ratio < self.policy.fast_submit_ratio => {
                let details = json!({
                    "elapsed_seconds": elapsed,
                    "estimated_seconds": estimated,
                    "ratio": (ratio * 1000.0).round() / 1000.0,
                });
                Some(self.emit(&entry, AnomalyKind::FastSubmit, details).await)
            }
            _ => None,
        }
    }

    /// Stops watching a session closed without a submission. No heuristics run.
    pub async fn on_session_abandoned(&self, session_id: Uuid) -> bool {
        match self.registry.remove(session_id).await {
            Ok(entry) => entry.is_some(),
            Err(e) => {
                tracing::warn!(%session_id, "Failed to drop proctoring entry: {}", e);
                false
            }
        }
    }

    /// Active sessions, optionally restricted to one exam.
    /// Entries past their deadline are dropped on the way.
    pub async fn active_sessions(&self, exam_id: Option<i64>) -> Vec<ProctoringEntry> {
        let entries = match self.registry.list().await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("Failed to list proctoring entries: {}", e);
                return Vec::new();
            }
        };

        let now = self.clock.now();
        let mut active = Vec::with_capacity(entries.len());
        for entry in entries {
            if entry.is_expired_at(now) {
                self.drop_expired(entry.session_id).await;
            } else if exam_id.is_none_or(|id| entry.exam_id == id) {
                active.push(entry);
            }
        }
        active
    }

    pub async fn entry(&self, session_id: Uuid) -> Option<ProctoringEntry> {
        let entry = self.registry.get(session_id).await.ok().flatten()?;
        (!entry.is_expired_at(self.clock.now())).then_some(entry)
    }

    /// Returns true if the session was registered but already past its deadline.
    async fn drop_if_expired(&self, session_id: Uuid) -> bool {
        match self.registry.get(session_id).await {
            Ok(Some(entry)) if entry.is_expired_at(self.clock.now()) => {
                self.drop_expired(session_id).await;
                true
            }
            _ => false,
        }
    }

    async fn drop_expired(&self, session_id: Uuid) {
        match self.registry.remove(session_id).await {
            Ok(Some(_)) => tracing::info!(%session_id, "Dropped expired session from proctoring"),
            Ok(None) => {}
            Err(e) => tracing::warn!(%session_id, "Failed to drop proctoring entry: {}", e),
        }
    }

    /// (elapsed / estimated, elapsed seconds, estimated seconds)
    fn fast_submit_ratio(&self, entry: &ProctoringEntry) -> Option<(f64, i64, i64)> {
        let estimated = i64::from(entry.estimated_minutes?) * 60;
        if estimated <= 0 {
            return None;
        }
        let elapsed = (self.clock.now() - entry.started_at).num_seconds().max(0);
        Some((elapsed as f64 / estimated as f64, elapsed, estimated))
    }

    async fn emit(
        &self,
        entry: &ProctoringEntry,
        kind: AnomalyKind,
        details: serde_json::Value,
    ) -> AnomalyEvent {
        let event = AnomalyEvent {
            session_id: entry.session_id,
            user_id: entry.user_id,
            exam_id: entry.exam_id,
            event_type: kind,
            details,
            timestamp: self.clock.now(),
        };

        tracing::warn!(
            session_id = %event.session_id,
            user_id = event.user_id,
            exam_id = event.exam_id,
            kind = kind.as_str(),
            "Proctoring anomaly detected"
        );

        if let Err(e) = self.audit.record(&event).await {
            tracing::warn!(session_id = %event.session_id, "Failed to write audit log: {}", e);
        }

        self.broadcaster
            .publish_exam_event(entry.exam_id, RealtimeEvent::CheatingDetected(event.clone()))
            .await;

        event
    }
}

#[async_trait]
impl LifecycleObserver for ProctoringMonitor {
    fn name(&self) -> &'static str {
        "proctoring_monitor"
    }

    async fn on_event(&self, event: &LifecycleEvent) -> Result<(), AppError> {
        match event {
            LifecycleEvent::SessionStarted {
                session_id,
                user_id,
                exam_id,
                estimated_minutes,
                expires_at,
                ..
            } => {
                self.register_session(
                    *session_id,
                    *user_id,
                    *exam_id,
                    *estimated_minutes,
                    *expires_at,
                )
                .await
            }
            LifecycleEvent::SessionEnded { session_id, .. } => {
                self.on_session_end(*session_id).await;
            }
            LifecycleEvent::SessionAbandoned { session_id, .. } => {
                self.on_session_abandoned(*session_id).await;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{store::memory::MemoryAuditLog, utils::clock::ManualClock};
    use chrono::Duration;

    struct Harness {
        monitor: ProctoringMonitor,
        audit: Arc<MemoryAuditLog>,
        broadcaster: Arc<RealtimeBroadcaster>,
        clock: Arc<ManualClock>,
    }

    impl Harness {
        fn deadline(&self) -> DateTime<Utc> {
            self.clock.now() + Duration::hours(2)
        }
    }

    fn harness() -> Harness {
        let audit = Arc::new(MemoryAuditLog::new());
        let broadcaster = Arc::new(RealtimeBroadcaster::new(32));
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let monitor = ProctoringMonitor::new(
            Arc::new(InMemoryProctoringRegistry::new()),
            audit.clone(),
            broadcaster.clone(),
            clock.clone(),
            ProctoringPolicy::default(),
        );
        Harness {
            monitor,
            audit,
            broadcaster,
            clock,
        }
    }

    #[tokio::test]
    async fn register_is_a_noop_for_known_sessions() {
        let h = harness();
        let sid = Uuid::new_v4();
        h.monitor.register_session(sid, 1, 1, Some(60), h.deadline()).await;
        h.monitor.record_tab_switch(sid).await;

        h.monitor.register_session(sid, 1, 1, Some(60), h.deadline()).await;
        assert_eq!(h.monitor.entry(sid).await.unwrap().tab_switches, 1);
    }

    #[tokio::test]
    async fn fourth_and_fifth_tab_switch_each_raise_one_warning() {
        let h = harness();
        let sid = Uuid::new_v4();
        h.monitor.register_session(sid, 1, 7, Some(60), h.deadline()).await;

        for expected in 1..=3 {
            assert_eq!(h.monitor.record_tab_switch(sid).await, Some(expected));
        }
        assert!(h.audit.entries().await.is_empty());

        assert_eq!(h.monitor.record_tab_switch(sid).await, Some(4));
        assert_eq!(h.audit.entries().await.len(), 1);

        assert_eq!(h.monitor.record_tab_switch(sid).await, Some(5));
        let entries = h.audit.entries().await;
        assert_eq!(entries.len(), 2);
        assert!(
            entries
                .iter()
                .all(|e| e.event_type == AnomalyKind::ExcessiveTabSwitches)
        );
        assert_eq!(entries[1].details["tab_switches"], 5);
    }

    #[tokio::test]
    async fn tab_switch_on_unknown_session_is_ignored() {
        let h = harness();
        assert_eq!(h.monitor.record_tab_switch(Uuid::new_v4()).await, None);
        assert!(!h.monitor.record_heartbeat(Uuid::new_v4()).await);
    }

    #[tokio::test]
    async fn heartbeat_updates_last_activity_only() {
        let h = harness();
        let sid = Uuid::new_v4();
        h.monitor.register_session(sid, 1, 1, Some(60), h.deadline()).await;

        h.clock.advance(Duration::minutes(3));
        assert!(h.monitor.record_heartbeat(sid).await);

        let entry = h.monitor.entry(sid).await.unwrap();
        assert_eq!(entry.last_activity_at, h.clock.now());
        assert_eq!(entry.tab_switches, 0);
        assert!(entry.started_at < entry.last_activity_at);
    }

    #[tokio::test]
    async fn submitting_after_ten_of_sixty_minutes_is_fast() {
        let h = harness();
        let mut observer = h.broadcaster.subscribe(crate::services::broadcaster::OBSERVERS_TOPIC).await;
        let sid = Uuid::new_v4();
        h.monitor.register_session(sid, 2, 3, Some(60), h.deadline()).await;

        h.clock.advance(Duration::minutes(10));
        let anomaly = h.monitor.on_session_end(sid).await.unwrap();

        assert_eq!(anomaly.event_type, AnomalyKind::FastSubmit);
        assert_eq!(anomaly.details["elapsed_seconds"], 600);
        assert_eq!(anomaly.details["estimated_seconds"], 3600);
        assert!(h.monitor.entry(sid).await.is_none());

        match observer.recv().await.unwrap() {
            RealtimeEvent::CheatingDetected(event) => assert_eq!(event, anomaly),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn submitting_after_forty_minutes_is_not_flagged() {
        let h = harness();
        let sid = Uuid::new_v4();
        h.monitor.register_session(sid, 2, 3, Some(60), h.deadline()).await;

        h.clock.advance(Duration::minutes(40));
        assert!(h.monitor.on_session_end(sid).await.is_none());
        assert!(h.monitor.entry(sid).await.is_none());
    }

    #[tokio::test]
    async fn eighteen_of_sixty_minutes_is_the_cutoff() {
        let h = harness();
        let at_cutoff = Uuid::new_v4();
        let just_before = Uuid::new_v4();
        h.monitor.register_session(at_cutoff, 1, 1, Some(60), h.deadline()).await;
        h.monitor.register_session(just_before, 1, 1, Some(60), h.deadline()).await;

        h.clock.advance(Duration::minutes(18) - Duration::seconds(1));
        assert!(h.monitor.on_session_end(just_before).await.is_some());

        h.clock.advance(Duration::seconds(1));
        assert!(h.monitor.on_session_end(at_cutoff).await.is_none());
    }

    #[tokio::test]
    async fn exams_without_estimate_are_never_fast() {
        let h = harness();
        let sid = Uuid::new_v4();
        h.monitor.register_session(sid, 1, 1, None, h.deadline()).await;
        assert!(h.monitor.on_session_end(sid).await.is_none());
    }

    #[tokio::test]
    async fn active_sessions_filters_by_exam() {
        let h = harness();
        h.monitor.register_session(Uuid::new_v4(), 1, 1, None, h.deadline()).await;
        h.monitor.register_session(Uuid::new_v4(), 2, 2, None, h.deadline()).await;

        assert_eq!(h.monitor.active_sessions(None).await.len(), 2);
        let only_two = h.monitor.active_sessions(Some(2)).await;
        assert_eq!(only_two.len(), 1);
        assert_eq!(only_two[0].user_id, 2);
    }

    #[tokio::test]
    async fn abandoned_session_is_dropped_without_heuristics() {
        let h = harness();
        let sid = Uuid::new_v4();
        h.monitor.register_session(sid, 1, 1, Some(60), h.deadline()).await;

        h.monitor
            .on_event(&LifecycleEvent::SessionAbandoned {
                session_id: sid,
                user_id: 1,
                exam_id: 1,
                timestamp: h.clock.now(),
            })
            .await
            .unwrap();

        assert!(h.monitor.entry(sid).await.is_none());
        assert!(h.monitor.active_sessions(None).await.is_empty());
        assert_eq!(h.monitor.record_tab_switch(sid).await, None);
        assert!(h.audit.entries().await.is_empty());
    }

    #[tokio::test]
    async fn expired_sessions_stop_being_proctored() {
        let h = harness();
        let expiring = Uuid::new_v4();
        let lasting = Uuid::new_v4();
        let deadline = h.clock.now() + Duration::minutes(30);
        h.monitor.register_session(expiring, 1, 1, Some(60), deadline).await;
        h.monitor.register_session(lasting, 2, 1, Some(60), h.deadline()).await;

        h.clock.set(deadline);
        assert_eq!(h.monitor.record_tab_switch(expiring).await, Some(1));

        h.clock.advance(Duration::seconds(1));
        assert_eq!(h.monitor.record_tab_switch(expiring).await, None);
        assert!(!h.monitor.record_heartbeat(expiring).await);

        let active = h.monitor.active_sessions(None).await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].session_id, lasting);
        assert!(h.monitor.on_session_end(expiring).await.is_none());
    }
}
