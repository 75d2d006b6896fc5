use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use crate::evaluator::Verdict;
use crate::sandbox::RunResult;

const DATABASE_NAME: &str = "runlab.sqlite3";

/// Characters of stdout kept in listing previews; `get` returns the full text
pub const STDOUT_PREVIEW_CHARS: i64 = 1000;

/// One recorded attempt to execute a code string
///
/// Created exactly once, immediately after the runner returns, and never
/// mutated afterwards.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct RunRecord {
    pub id: i64,
    pub code: String,
    pub stdout: String,
    pub stderr: String,
    pub returncode: i64,
    pub created_at: String,
}

/// Truncated view of a run used by the listing endpoint
#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct RunSummary {
    pub id: i64,
    pub created_at: String,
    pub returncode: i64,
    pub stdout: String,
}

/// One persisted scored comparison; exactly one per metric spec evaluated
#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct EvaluationRecord {
    pub id: i64,
    pub run_id: i64,
    pub metric_name: String,
    pub reported: f64,
    pub measured: f64,
    pub direction: String,
    pub delta: f64,
    pub threshold: f64,
    pub pattern: Option<String>,
    pub created_at: String,
}

pub fn get_db_path() -> PathBuf {
    use directories::ProjectDirs;

    let proj_dirs = ProjectDirs::from("", "", "runlab").expect("Unable to find user directory");
    let data_dir = proj_dirs.data_local_dir();

    fs::create_dir_all(data_dir).expect("Failed to create local data dir");

    data_dir.join(DATABASE_NAME)
}

pub async fn init_db(db_path: impl AsRef<Path>) -> sqlx::Result<SqlitePool> {
    let db_url = format!("sqlite://{}?mode=rwc", db_path.as_ref().display()); // rwc = read/write/create
    let db_pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(0)
        .connect(&db_url)
        .await?;

    // PRAGMA statements cannot run inside a transaction
    for pragma_sql in &[
        "PRAGMA busy_timeout = 2000;", // 2 seconds timeout for lock contention
        "PRAGMA journal_mode = WAL;",  // Write-Ahead Logging for better concurrency
        "PRAGMA synchronous = NORMAL;", // Balance between safety and performance
    ] {
        sqlx::query(pragma_sql).execute(&db_pool).await?;
    }

    let mut tx = db_pool.begin().await?;

    // No foreign key from evaluations to runs: an orphaned run_id is
    // tolerated and simply yields an empty lookup.
    for sql in &[
        r"
        CREATE TABLE IF NOT EXISTS runs (
            id            INTEGER  PRIMARY KEY AUTOINCREMENT,
            code          TEXT     NOT NULL,
            stdout        TEXT     NOT NULL,
            stderr        TEXT     NOT NULL,
            returncode    INTEGER  NOT NULL,
            created_at    TEXT     NOT NULL
        );",
        "CREATE INDEX IF NOT EXISTS idx_runs_created_at ON runs(created_at);",
        r"
        CREATE TABLE IF NOT EXISTS evaluations (
            id            INTEGER  PRIMARY KEY AUTOINCREMENT,
            run_id        INTEGER  NOT NULL,
            metric_name   TEXT     NOT NULL,
            reported      REAL     NOT NULL,
            measured      REAL     NOT NULL,
            direction     TEXT     NOT NULL,
            delta         REAL     NOT NULL,
            threshold     REAL     NOT NULL,
            pattern       TEXT,
            created_at    TEXT     NOT NULL
        );",
        "CREATE INDEX IF NOT EXISTS idx_evaluations_run_id ON evaluations(run_id);",
    ] {
        sqlx::query(sql).execute(tx.as_mut()).await?;
    }

    tx.commit().await?;

    log::info!("Initialized database at {}", db_path.as_ref().display());

    Ok(db_pool)
}

pub fn remove_db(db_path: impl AsRef<Path>) {
    // Remove WAL and SHM files (ignore errors as they might not exist)
    let wal_path = format!("{}-wal", db_path.as_ref().display());
    let shm_path = format!("{}-shm", db_path.as_ref().display());
    let _ = fs::remove_file(wal_path);
    let _ = fs::remove_file(shm_path);

    if let Err(e) = std::fs::remove_file(&db_path) {
        log::warn!(
            "Unable to remove database at {}: {e}",
            db_path.as_ref().display()
        );
    } else {
        log::info!("Removed database at {}", db_path.as_ref().display());
    }
}

/// Inserts one immutable run record and returns it with its assigned id
pub async fn create_run(
    code: &str,
    result: &RunResult,
    pool: &SqlitePool,
) -> sqlx::Result<RunRecord> {
    let now = crate::create_timestamp();

    let insert = sqlx::query(
        r#"
        INSERT INTO runs (code, stdout, stderr, returncode, created_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(code)
    .bind(&result.stdout)
    .bind(&result.stderr)
    .bind(result.returncode)
    .bind(&now)
    .execute(pool)
    .await?;

    Ok(RunRecord {
        id: insert.last_insert_rowid(),
        code: code.to_string(),
        stdout: result.stdout.clone(),
        stderr: result.stderr.clone(),
        returncode: result.returncode as i64,
        created_at: now,
    })
}

pub async fn fetch_run(id: i64, pool: &SqlitePool) -> sqlx::Result<Option<RunRecord>> {
    sqlx::query_as::<_, RunRecord>(
        r#"
        SELECT id, code, stdout, stderr, returncode, created_at
        FROM runs
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}

/// Most recent runs first, stdout truncated to a bounded preview
pub async fn list_runs(limit: u32, pool: &SqlitePool) -> sqlx::Result<Vec<RunSummary>> {
    sqlx::query_as::<_, RunSummary>(
        r#"
        SELECT id, created_at, returncode, substr(stdout, 1, ?) AS stdout
        FROM runs
        ORDER BY created_at DESC, id DESC
        LIMIT ?
        "#,
    )
    .bind(STDOUT_PREVIEW_CHARS)
    .bind(limit)
    .fetch_all(pool)
    .await
}

/// Persists one evaluation row for a verdict already computed against a run
pub async fn create_evaluation(
    run_id: i64,
    verdict: &Verdict,
    pattern: Option<&str>,
    pool: &SqlitePool,
) -> sqlx::Result<i64> {
    let now = crate::create_timestamp();

    let insert = sqlx::query(
        r#"
        INSERT INTO evaluations
            (run_id, metric_name, reported, measured, direction, delta, threshold, pattern, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(run_id)
    .bind(&verdict.name)
    .bind(verdict.reported)
    .bind(verdict.measured)
    .bind(verdict.direction.as_str())
    .bind(verdict.delta)
    .bind(verdict.threshold)
    .bind(pattern)
    .bind(&now)
    .execute(pool)
    .await?;

    Ok(insert.last_insert_rowid())
}

/// All evaluations recorded against one run, in insertion order
pub async fn list_evaluations(
    run_id: i64,
    pool: &SqlitePool,
) -> sqlx::Result<Vec<EvaluationRecord>> {
    sqlx::query_as::<_, EvaluationRecord>(
        r#"
        SELECT id, run_id, metric_name, reported, measured, direction, delta,
               threshold, pattern, created_at
        FROM evaluations
        WHERE run_id = ?
        ORDER BY id
        "#,
    )
    .bind(run_id)
    .fetch_all(pool)
    .await
}
