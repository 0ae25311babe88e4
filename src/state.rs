use std::sync::Arc;

use axum::extract::FromRef;

use crate::{
    config::Config,
    services::{
        broadcaster::RealtimeBroadcaster,
        events::LifecycleBus,
        grading::GradingService,
        proctoring::{ProctoringMonitor, ProctoringPolicy, ProctoringRegistry},
        session_manager::SessionManager,
    },
    store::{AuditLog, ExamCatalog, LicenseGate, SessionRepository},
    utils::clock::Clock,
};

/// Storage-facing collaborators, chosen by the binary (Postgres) or by tests (memory).
pub struct Backends {
    pub sessions: Arc<dyn SessionRepository>,
    pub catalog: Arc<dyn ExamCatalog>,
    pub licenses: Arc<dyn LicenseGate>,
    pub audit: Arc<dyn AuditLog>,
    pub registry: Arc<dyn ProctoringRegistry>,
}

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub sessions: Arc<SessionManager>,
    pub monitor: Arc<ProctoringMonitor>,
    pub broadcaster: Arc<RealtimeBroadcaster>,
}

impl AppState {
    /// Wires the runtime: monitor and broadcaster observe the lifecycle bus the
    /// session manager publishes to.
    pub fn build(config: Config, backends: Backends, clock: Arc<dyn Clock>) -> Self {
        let broadcaster = Arc::new(RealtimeBroadcaster::default());
        let monitor = Arc::new(ProctoringMonitor::new(
            backends.registry,
            backends.audit,
            broadcaster.clone(),
            clock.clone(),
            ProctoringPolicy::default(),
        ));
        let bus = LifecycleBus::new()
            .with_observer(monitor.clone())
            .with_observer(broadcaster.clone());
        let grading = Arc::new(GradingService::new(
            backends.sessions.clone(),
            backends.catalog.clone(),
        ));
        let sessions = Arc::new(SessionManager::new(
            backends.sessions,
            backends.catalog,
            backends.licenses,
            Arc::new(bus),
            grading,
            clock,
        ));

        Self {
            config,
            sessions,
            monitor,
            broadcaster,
        }
    }
}

impl FromRef<AppState> for Config {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}

impl FromRef<AppState> for Arc<SessionManager> {
    fn from_ref(state: &AppState) -> Self {
        state.sessions.clone()
    }
}

impl FromRef<AppState> for Arc<ProctoringMonitor> {
    fn from_ref(state: &AppState) -> Self {
        state.monitor.clone()
    }
}

impl FromRef<AppState> for Arc<RealtimeBroadcaster> {
    fn from_ref(state: &AppState) -> Self {
        state.broadcaster.clone()
    }
}
