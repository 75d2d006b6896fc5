use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use actix_web::{App, test, web};
use serde_json::json;
use sqlx::sqlite::SqlitePool;

use runlab::config::{SandboxConfig, SandboxMode};
use runlab::database as db;
use runlab::routes::{
    get_run_handler, get_runs_handler, json_error_handler, post_evaluate_handler,
    post_run_handler,
};
use runlab::sandbox::{RunResult, SandboxRunner, create_sandbox_runner};

// Global counter to ensure unique test database names
static TEST_DB_COUNTER: AtomicU32 = AtomicU32::new(0);

// Helper function to create an isolated test database
async fn create_test_db() -> (SqlitePool, String) {
    let test_id = TEST_DB_COUNTER.fetch_add(1, Ordering::SeqCst);
    let db_path = std::env::temp_dir()
        .join(format!("test_runlab_{}_{}.db", std::process::id(), test_id))
        .display()
        .to_string();

    // Remove existing test database if it exists
    let _ = fs::remove_file(&db_path);

    let db_pool = db::init_db(&db_path).await.unwrap();

    (db_pool, db_path)
}

// Test guard that ensures cleanup on drop
struct TestDbGuard {
    db_path: String,
}

impl TestDbGuard {
    fn new(db_path: String) -> Self {
        Self { db_path }
    }
}

impl Drop for TestDbGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.db_path);
        let _ = fs::remove_file(format!("{}-wal", self.db_path));
        let _ = fs::remove_file(format!("{}-shm", self.db_path));
    }
}

/// Local strategy driving `sh`, so tests only depend on a POSIX shell
fn shell_config(timeout_seconds: u64) -> SandboxConfig {
    SandboxConfig {
        mode: SandboxMode::Local,
        command: vec!["sh".to_string()],
        file_name: "main.sh".to_string(),
        timeout_seconds,
        ..SandboxConfig::default()
    }
}

fn build_sandbox(config: &SandboxConfig) -> Arc<dyn SandboxRunner> {
    Arc::from(create_sandbox_runner(config).expect("Failed to build sandbox runner"))
}

macro_rules! test_app {
    ($pool:expr, $sandbox_config:expr) => {{
        let sandbox_config = $sandbox_config;
        let sandbox = build_sandbox(&sandbox_config);
        test::init_service(
            App::new()
                .app_data(web::Data::new($pool.clone()))
                .app_data(web::Data::from(sandbox))
                .app_data(web::Data::new(sandbox_config))
                .app_data(web::JsonConfig::default().error_handler(json_error_handler))
                .service(post_run_handler)
                .service(get_runs_handler)
                .service(get_run_handler)
                .service(post_evaluate_handler),
        )
        .await
    }};
}

#[actix_web::test]
async fn run_then_get_returns_identical_record() {
    let (pool, db_path) = create_test_db().await;
    let _guard = TestDbGuard::new(db_path);
    let app = test_app!(pool, shell_config(10));

    let code = "printf 'out text'; printf 'err text' >&2; exit 3";
    let req = test::TestRequest::post()
        .uri("/run")
        .set_json(json!({ "code": code }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());

    let created: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(created["code"], code);
    assert_eq!(created["stdout"], "out text");
    assert_eq!(created["stderr"], "err text");
    assert_eq!(created["returncode"], 3);
    let id = created["id"].as_i64().unwrap();
    assert!(id >= 1);

    // `get` must return the record byte-identical to what was persisted
    let req = test::TestRequest::get()
        .uri(&format!("/runs/{id}"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());

    let fetched: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(fetched["code"], created["code"]);
    assert_eq!(fetched["stdout"], created["stdout"]);
    assert_eq!(fetched["stderr"], created["stderr"]);
    assert_eq!(fetched["returncode"], created["returncode"]);
    assert_eq!(fetched["created_at"], created["created_at"]);
}

#[actix_web::test]
async fn get_unknown_run_returns_not_found() {
    let (pool, db_path) = create_test_db().await;
    let _guard = TestDbGuard::new(db_path);
    let app = test_app!(pool, shell_config(10));

    let req = test::TestRequest::get().uri("/runs/424242").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 404);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["reason"], "ERR_NOT_FOUND");
}

#[actix_web::test]
async fn listing_truncates_stdout_and_orders_by_recency() {
    let (pool, db_path) = create_test_db().await;
    let _guard = TestDbGuard::new(db_path);

    let older = db::create_run(
        "code a",
        &RunResult {
            stdout: "x".repeat(3000),
            stderr: String::new(),
            returncode: 0,
        },
        &pool,
    )
    .await
    .unwrap();
    let newer = db::create_run(
        "code b",
        &RunResult {
            stdout: "short".to_string(),
            stderr: String::new(),
            returncode: 1,
        },
        &pool,
    )
    .await
    .unwrap();

    let app = test_app!(pool, shell_config(10));
    let req = test::TestRequest::get().uri("/runs").to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());

    let listed: serde_json::Value = test::read_body_json(resp).await;
    let listed = listed.as_array().unwrap();
    assert_eq!(listed.len(), 2);

    // Newest first
    assert_eq!(listed[0]["id"].as_i64().unwrap(), newer.id);
    assert_eq!(listed[1]["id"].as_i64().unwrap(), older.id);

    // Preview bounded at 1000 characters; full text stays retrievable via get
    assert_eq!(listed[1]["stdout"].as_str().unwrap().len(), 1000);
    let req = test::TestRequest::get()
        .uri(&format!("/runs/{}", older.id))
        .to_request();
    let full: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(full["stdout"].as_str().unwrap().len(), 3000);

    // limit caps the listing
    let req = test::TestRequest::get().uri("/runs?limit=1").to_request();
    let limited: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(limited.as_array().unwrap().len(), 1);
}

#[actix_web::test]
async fn evaluate_scores_and_persists_each_metric() {
    let (pool, db_path) = create_test_db().await;
    let _guard = TestDbGuard::new(db_path);

    let run = db::create_run(
        "print(...)",
        &RunResult {
            stdout: "accuracy: 0.93\nloss: 0.07\n".to_string(),
            stderr: String::new(),
            returncode: 0,
        },
        &pool,
    )
    .await
    .unwrap();

    let app = test_app!(pool.clone(), shell_config(10));
    let req = test::TestRequest::post()
        .uri("/evaluate")
        .set_json(json!({
            "run_id": run.id,
            "metrics": [
                {
                    "name": "accuracy",
                    "pattern": "accuracy: ([0-9.]+)",
                    "reported": 0.92,
                    "direction": "higher",
                    "threshold": 0.0
                },
                {
                    "name": "loss",
                    "pattern": "loss: ([0-9.]+)",
                    "reported": 0.05,
                    "direction": "lower",
                    "threshold": 0.03
                },
                {
                    "name": "f1",
                    "pattern": "f1: ([0-9.]+)",
                    "reported": 0.9,
                    "direction": "higher",
                    "threshold": 0.0
                }
            ]
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());

    let body: serde_json::Value = test::read_body_json(resp).await;
    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 3);

    assert_eq!(results[0]["name"], "accuracy");
    assert_eq!(results[0]["measured"], 0.93);
    assert_eq!(results[0]["pass"], true);

    assert_eq!(results[1]["name"], "loss");
    assert_eq!(results[1]["measured"], 0.07);
    assert_eq!(results[1]["pass"], true);

    // No match: measured falls back to 0.0 but the row is still persisted
    assert_eq!(results[2]["name"], "f1");
    assert_eq!(results[2]["measured"], 0.0);
    assert_eq!(results[2]["pass"], false);

    let rows = db::list_evaluations(run.id, &pool).await.unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].metric_name, "accuracy");
    assert_eq!(rows[0].measured, 0.93);
    assert!((rows[0].delta - 0.01).abs() < 1e-9);
    assert_eq!(rows[0].direction, "higher");
    assert_eq!(rows[2].metric_name, "f1");
    assert_eq!(rows[2].measured, 0.0);
    assert_eq!(rows[2].pattern.as_deref(), Some("f1: ([0-9.]+)"));
}

#[actix_web::test]
async fn evaluate_unknown_run_yields_empty_results_and_persists_nothing() {
    let (pool, db_path) = create_test_db().await;
    let _guard = TestDbGuard::new(db_path);
    let app = test_app!(pool.clone(), shell_config(10));

    let req = test::TestRequest::post()
        .uri("/evaluate")
        .set_json(json!({
            "run_id": 9999,
            "metrics": [
                { "name": "accuracy", "pattern": "acc: ([0-9.]+)", "reported": 0.9 }
            ]
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["results"].as_array().unwrap().len(), 0);

    let rows = db::list_evaluations(9999, &pool).await.unwrap();
    assert!(rows.is_empty());
}

#[actix_web::test]
async fn repeated_evaluation_is_deterministic() {
    let (pool, db_path) = create_test_db().await;
    let _guard = TestDbGuard::new(db_path);

    let run = db::create_run(
        "print(...)",
        &RunResult {
            stdout: "accuracy: 0.89\n".to_string(),
            stderr: String::new(),
            returncode: 0,
        },
        &pool,
    )
    .await
    .unwrap();

    let app = test_app!(pool, shell_config(10));
    let payload = json!({
        "run_id": run.id,
        "metrics": [{
            "name": "accuracy",
            "pattern": "accuracy: ([0-9.]+)",
            "reported": 0.90,
            "direction": "higher",
            "threshold": 0.02
        }]
    });

    let mut bodies = Vec::new();
    for _ in 0..2 {
        let req = test::TestRequest::post()
            .uri("/evaluate")
            .set_json(&payload)
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        bodies.push(body);
    }

    assert_eq!(bodies[0], bodies[1]);
    assert_eq!(bodies[0]["results"][0]["measured"], 0.89);
    assert_eq!(bodies[0]["results"][0]["pass"], true);
}

#[actix_web::test]
async fn timed_out_run_is_persisted_with_partial_output() {
    let (pool, db_path) = create_test_db().await;
    let _guard = TestDbGuard::new(db_path);
    let app = test_app!(pool, shell_config(1));

    let started = Instant::now();
    let req = test::TestRequest::post()
        .uri("/run")
        .set_json(json!({ "code": "echo started; sleep 5; echo done" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    let elapsed = started.elapsed();

    assert!(resp.status().is_success());
    assert!(
        elapsed < Duration::from_secs(4),
        "request returned after {elapsed:?}"
    );

    let record: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(record["stdout"], "started\n");
    assert!(record["returncode"].as_i64().unwrap() < 0);
}

#[actix_web::test]
async fn malformed_run_payload_is_rejected() {
    let (pool, db_path) = create_test_db().await;
    let _guard = TestDbGuard::new(db_path);
    let app = test_app!(pool, shell_config(10));

    let req = test::TestRequest::post()
        .uri("/run")
        .set_json(json!({ "source": "echo hi" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 400);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["reason"], "ERR_INVALID_ARGUMENT");
}
