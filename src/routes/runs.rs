use actix_web::{HttpResponse, Responder, get, post, web};
use serde::Deserialize;
use sqlx::SqlitePool;

use crate::config::SandboxConfig;
use crate::database as db;
use crate::sandbox::SandboxRunner;

use super::{ErrorResponse, ErrorResponseWithMessage};

const DEFAULT_LIST_LIMIT: u32 = 50;

#[derive(Deserialize)]
pub struct RunRequest {
    pub code: String,
}

#[derive(Deserialize)]
pub struct RunsQueryParams {
    pub limit: Option<u32>,
}

/// Executes a code string under the configured strategy and persists the run
#[post("/run")]
pub async fn post_run_handler(
    sandbox: web::Data<dyn SandboxRunner>,
    sandbox_config: web::Data<SandboxConfig>,
    pool: web::Data<SqlitePool>,
    body: web::Json<RunRequest>,
) -> impl Responder {
    let code = body.into_inner().code;
    let timeout = sandbox_config.timeout();

    // Sandbox runners block until the process exits or the deadline fires
    let runner = sandbox.into_inner();
    let code_for_run = code.clone();
    let result_handle = tokio::task::spawn_blocking(move || runner.run(&code_for_run, timeout));

    match result_handle.await {
        Ok(Ok(result)) => match db::create_run(&code, &result, &pool).await {
            Ok(record) => {
                log::info!(
                    "Inserted run {} into database (returncode {})",
                    record.id,
                    record.returncode
                );
                HttpResponse::Ok().json(record)
            }
            Err(e) => {
                log::error!("Failed to insert run into database: {e}");
                HttpResponse::InternalServerError().json(ErrorResponse {
                    reason: "ERR_EXTERNAL",
                    code: 5,
                })
            }
        },
        // The sandbox itself failed; no run took place and none is recorded
        Ok(Err(e)) => {
            log::error!("Sandbox could not execute the run: {e:#}");
            HttpResponse::InternalServerError().json(ErrorResponseWithMessage {
                reason: "ERR_EXTERNAL",
                code: 5,
                message: format!("{e:#}"),
            })
        }
        Err(e) => {
            log::error!("Run task failed to complete: {e}");
            HttpResponse::InternalServerError().json(ErrorResponse {
                reason: "ERR_INTERNAL",
                code: 6,
            })
        }
    }
}

/// Lists recent runs, newest first, with stdout truncated to a preview
#[get("/runs")]
pub async fn get_runs_handler(
    pool: web::Data<SqlitePool>,
    query: web::Query<RunsQueryParams>,
) -> impl Responder {
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT);

    match db::list_runs(limit, &pool).await {
        Ok(runs) => HttpResponse::Ok().json(runs),
        Err(e) => {
            log::error!("Failed to list runs: {e}");
            HttpResponse::InternalServerError().json(ErrorResponse {
                reason: "ERR_EXTERNAL",
                code: 5,
            })
        }
    }
}

/// Returns one run with its full captured output
#[get("/runs/{id}")]
pub async fn get_run_handler(pool: web::Data<SqlitePool>, path: web::Path<i64>) -> impl Responder {
    let id = path.into_inner();

    match db::fetch_run(id, &pool).await {
        Ok(Some(record)) => HttpResponse::Ok().json(record),
        Ok(None) => HttpResponse::NotFound().json(ErrorResponse {
            reason: "ERR_NOT_FOUND",
            code: 3,
        }),
        Err(e) => {
            log::error!("Failed to fetch run {id}: {e}");
            HttpResponse::InternalServerError().json(ErrorResponse {
                reason: "ERR_EXTERNAL",
                code: 5,
            })
        }
    }
}
