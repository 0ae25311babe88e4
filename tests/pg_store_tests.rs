// tests/pg_store_tests.rs
//
// Runs against the Postgres database in DATABASE_URL. Skipped when it is unset.

use std::sync::Arc;

use chrono::{DateTime, Duration, SubsecRound, Utc};
use exam_runtime::{
    error::AppError,
    models::attempt::{AttemptStatus, NewAttempt},
    services::grading::GradingService,
    store::{
        SessionRepository,
        postgres::{PgExamCatalog, PgSessionStore},
    },
};
use sqlx::{PgPool, postgres::PgPoolOptions};
use uuid::Uuid;

async fn test_pool() -> Option<PgPool> {
    let Ok(database_url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set, skipping Postgres store tests");
        return None;
    };

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("Failed to connect to Postgres for testing. Make sure DATABASE_URL is set.");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to migrate database");

    Some(pool)
}

/// Fresh user id so runs against a shared database never collide.
fn unique_user() -> i64 {
    (Uuid::new_v4().as_u128() & 0x0000_7fff_ffff_ffff) as i64
}

fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

/// Seeds an exam with one section of two questions (answers "A" and "B", 1 and 2 points).
/// Returns (exam id, section id, question ids).
async fn seed_exam(pool: &PgPool) -> (i64, i64, [i64; 2]) {
    let exam_id: i64 = sqlx::query_scalar(
        "INSERT INTO exams (title, estimated_minutes) VALUES ($1, 60) RETURNING id",
    )
    .bind(format!("Store test {}", Uuid::new_v4()))
    .fetch_one(pool)
    .await
    .unwrap();

    let section_id: i64 = sqlx::query_scalar(
        "INSERT INTO exam_sections (exam_id, title, position) VALUES ($1, 'Part 1', 1) RETURNING id",
    )
    .bind(exam_id)
    .fetch_one(pool)
    .await
    .unwrap();

    let mut question_ids = [0; 2];
    for (idx, (answer, points)) in [("A", 1), ("B", 2)].into_iter().enumerate() {
        question_ids[idx] = sqlx::query_scalar(
            "INSERT INTO exam_questions (section_id, position, correct_answer, points)
             VALUES ($1, $2, $3, $4) RETURNING id",
        )
        .bind(section_id)
        .bind(idx as i32 + 1)
        .bind(answer)
        .bind(points)
        .fetch_one(pool)
        .await
        .unwrap();
    }

    (exam_id, section_id, question_ids)
}

fn new_attempt(user_id: i64, exam_id: i64, section_id: i64) -> NewAttempt {
    let started_at = now();
    NewAttempt {
        user_id,
        exam_id,
        license_ref: Some("LIC-TEST".to_string()),
        started_at,
        expires_at: started_at + Duration::minutes(90),
        first_section_id: Some(section_id),
    }
}

#[tokio::test]
async fn concurrent_starts_leave_one_in_progress_attempt() {
    let Some(pool) = test_pool().await else { return };
    let store = PgSessionStore::new(pool.clone());
    let (exam_id, section_id, _) = seed_exam(&pool).await;
    let user_id = unique_user();

    let (a, b) = tokio::join!(
        store.create_attempt(new_attempt(user_id, exam_id, section_id)),
        store.create_attempt(new_attempt(user_id, exam_id, section_id)),
    );

    let results = [a, b];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(
        results
            .iter()
            .any(|r| matches!(r, Err(AppError::Conflict(_))))
    );

    let live = store
        .find_in_progress(user_id, exam_id)
        .await
        .unwrap()
        .expect("one attempt in progress");
    assert_eq!(live.attempt.status, AttemptStatus::InProgress);
    assert_eq!(live.attempt.license_ref.as_deref(), Some("LIC-TEST"));
    assert_eq!(live.session.current_section_id, Some(section_id));
    assert_eq!(live.session.current_question, 1);

    // Closing it frees the slot.
    assert!(store.mark_abandoned(live.attempt.id).await.unwrap());
    store
        .create_attempt(new_attempt(user_id, exam_id, section_id))
        .await
        .unwrap();
}

#[tokio::test]
async fn concurrent_submits_complete_once() {
    let Some(pool) = test_pool().await else { return };
    let store = PgSessionStore::new(pool.clone());
    let (exam_id, section_id, _) = seed_exam(&pool).await;

    let live = store
        .create_attempt(new_attempt(unique_user(), exam_id, section_id))
        .await
        .unwrap();
    let submitted_at = now();

    let (a, b) = tokio::join!(
        store.mark_completed(live.attempt.id, submitted_at),
        store.mark_completed(live.attempt.id, submitted_at),
    );
    assert_eq!([a.unwrap(), b.unwrap()].iter().filter(|won| **won).count(), 1);

    let attempt = store.find_attempt(live.attempt.id).await.unwrap().unwrap();
    assert_eq!(attempt.status, AttemptStatus::Completed);
    assert_eq!(attempt.submitted_at, Some(submitted_at));
}

#[tokio::test]
async fn answers_merge_per_question_and_last_write_wins() {
    let Some(pool) = test_pool().await else { return };
    let store = PgSessionStore::new(pool.clone());
    let (exam_id, section_id, [q1, q2]) = seed_exam(&pool).await;

    let live = store
        .create_attempt(new_attempt(unique_user(), exam_id, section_id))
        .await
        .unwrap();
    let sid = live.session.id;

    assert!(store.save_answer(sid, q1, "A", now()).await.unwrap());
    assert!(store.save_answer(sid, q2, "C", now()).await.unwrap());
    assert!(store.save_answer(sid, q2, "B", now()).await.unwrap());
    assert!(store.update_cursor(sid, section_id, 2, now()).await.unwrap());

    let session = store.find_session(sid).await.unwrap().unwrap();
    assert_eq!(session.attempt.id, live.attempt.id);
    assert_eq!(session.session.answers.len(), 2);
    assert_eq!(session.session.answers[&q1], "A");
    assert_eq!(session.session.answers[&q2], "B");
    assert_eq!(session.session.current_question, 2);
    assert_eq!(session.session.expires_at, live.session.expires_at);

    // Past the deadline the write is refused.
    let late = live.session.expires_at + Duration::seconds(1);
    assert!(!store.save_answer(sid, q1, "B", late).await.unwrap());
    assert!(!store.update_cursor(sid, section_id, 1, late).await.unwrap());

    // After submission too.
    store.mark_completed(live.attempt.id, now()).await.unwrap();
    assert!(!store.save_answer(sid, q1, "B", now()).await.unwrap());

    let answers = store.answers_for_attempt(live.attempt.id).await.unwrap();
    assert_eq!(answers[&q1], "A");
}

#[tokio::test]
async fn accepted_answer_is_visible_to_the_submit_that_follows() {
    let Some(pool) = test_pool().await else { return };
    let store = Arc::new(PgSessionStore::new(pool.clone()));
    let (exam_id, section_id, [q1, _]) = seed_exam(&pool).await;

    for _ in 0..20 {
        let live = store
            .create_attempt(new_attempt(unique_user(), exam_id, section_id))
            .await
            .unwrap();

        let save = store.save_answer(live.session.id, q1, "A", now());
        let submit = async {
            let won = store.mark_completed(live.attempt.id, now()).await.unwrap();
            let snapshot = store.answers_for_attempt(live.attempt.id).await.unwrap();
            (won, snapshot)
        };
        let (saved, (won, snapshot)) = tokio::join!(save, submit);

        assert!(won);
        if saved.unwrap() {
            assert_eq!(snapshot.get(&q1).map(String::as_str), Some("A"));
        }
    }
}

#[tokio::test]
async fn grade_is_persisted_once() {
    let Some(pool) = test_pool().await else { return };
    let store = Arc::new(PgSessionStore::new(pool.clone()));
    let grading = GradingService::new(store.clone(), Arc::new(PgExamCatalog::new(pool.clone())));
    let (exam_id, section_id, [q1, q2]) = seed_exam(&pool).await;

    let live = store
        .create_attempt(new_attempt(unique_user(), exam_id, section_id))
        .await
        .unwrap();
    store.save_answer(live.session.id, q1, "A", now()).await.unwrap();
    store.save_answer(live.session.id, q2, "C", now()).await.unwrap();
    store.mark_completed(live.attempt.id, now()).await.unwrap();

    let report = grading.grade_attempt(live.attempt.id).await.unwrap();
    assert_eq!(report.total_score, 1);
    assert_eq!(report.max_score, 3);

    let attempt = store.find_attempt(live.attempt.id).await.unwrap().unwrap();
    assert_eq!(attempt.status, AttemptStatus::Graded);
    assert_eq!(attempt.total_score, Some(1));
    assert_eq!(attempt.max_score, Some(3));

    let sections = store.section_results(live.attempt.id).await.unwrap();
    assert_eq!(sections.len(), 1);
    assert_eq!(sections[0].section_id, section_id);
    assert_eq!(sections[0].correct_count, 1);
    assert_eq!(sections[0].incorrect_count, 1);
    assert_eq!(sections[0].score, 1);

    let question_rows: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM question_results WHERE attempt_id = $1")
            .bind(live.attempt.id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(question_rows, 2);

    // A second run neither regrades nor duplicates rows.
    assert!(matches!(
        grading.grade_attempt(live.attempt.id).await,
        Err(AppError::Conflict(_))
    ));
    assert_eq!(store.section_results(live.attempt.id).await.unwrap().len(), 1);
}
