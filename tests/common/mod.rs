// tests/common/mod.rs

#![allow(dead_code)]

use std::sync::Arc;

use exam_runtime::{
    config::Config,
    models::exam::{Exam, ExamQuestion, ExamSection},
    routes,
    services::proctoring::InMemoryProctoringRegistry,
    state::{AppState, Backends},
    store::{
        AllowAllLicenses, LicenseGate,
        memory::{MemoryAuditLog, MemoryExamCatalog, MemoryLicenseGate, MemorySessionStore},
    },
    utils::{clock::SystemClock, jwt::sign_jwt},
};

pub const JWT_SECRET: &str = "test_secret_for_integration_tests";

pub struct TestApp {
    pub address: String,
    pub ws_address: String,
    pub catalog: Arc<MemoryExamCatalog>,
    pub audit: Arc<MemoryAuditLog>,
    pub licenses: Option<Arc<MemoryLicenseGate>>,
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }
}

pub fn token_for(user_id: i64, role: &str) -> String {
    sign_jwt(user_id, role, JWT_SECRET, 600).expect("Failed to sign token")
}

/// Two sections of two questions each; every answer is "A", every question worth 1 point.
pub fn sample_exam(id: i64, estimated_minutes: Option<i32>) -> Exam {
    let section = |idx: i64| ExamSection {
        id: id * 100 + idx,
        title: format!("Part {}", idx),
        position: idx as i32,
        questions: (1..=2)
            .map(|pos| ExamQuestion {
                id: id * 1000 + (idx - 1) * 2 + pos,
                position: pos as i32,
                correct_answer: "A".to_string(),
                points: 1,
            })
            .collect(),
    };

    Exam {
        id,
        title: format!("Exam {}", id),
        is_active: true,
        estimated_minutes,
        allow_section_navigation: true,
        sections: vec![section(1), section(2)],
    }
}

/// Spawns the app with in-memory stores on a random port.
/// With `require_license`, candidates need an explicit grant to start an exam.
pub async fn spawn_app(require_license: bool) -> TestApp {
    let config = Config {
        database_url: String::new(),
        jwt_secret: JWT_SECRET.to_string(),
        rust_log: "error".to_string(),
        bind_addr: "127.0.0.1:0".parse().expect("valid address"),
        require_license,
    };

    let catalog = Arc::new(MemoryExamCatalog::new());
    let audit = Arc::new(MemoryAuditLog::new());
    let (licenses, gate): (Option<Arc<MemoryLicenseGate>>, Arc<dyn LicenseGate>) =
        if require_license {
            let gate = Arc::new(MemoryLicenseGate::new());
            (Some(gate.clone()), gate)
        } else {
            (None, Arc::new(AllowAllLicenses))
        };

    let backends = Backends {
        sessions: Arc::new(MemorySessionStore::new()),
        catalog: catalog.clone(),
        licenses: gate,
        audit: audit.clone(),
        registry: Arc::new(InMemoryProctoringRegistry::new()),
    };

    let state = AppState::build(config, backends, Arc::new(SystemClock));
    let app = routes::create_router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestApp {
        address: format!("http://127.0.0.1:{}", port),
        ws_address: format!("ws://127.0.0.1:{}", port),
        catalog,
        audit,
        licenses,
    }
}
