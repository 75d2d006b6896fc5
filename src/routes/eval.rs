use actix_web::{HttpResponse, Responder, post, web};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::database as db;
use crate::evaluator::{self, MetricSpec, Verdict};

use super::ErrorResponse;

#[derive(Deserialize)]
pub struct EvaluateRequest {
    pub run_id: i64,
    pub metrics: Vec<MetricSpec>,
}

#[derive(Serialize)]
pub struct EvaluateResponse {
    pub results: Vec<Verdict>,
}

/// Scores metric specs against a persisted run's stdout
///
/// Metrics are evaluated independently and in input order; one evaluation
/// row is persisted per spec regardless of extraction outcome. An unknown
/// run id yields an empty verdict list and persists nothing.
#[post("/evaluate")]
pub async fn post_evaluate_handler(
    pool: web::Data<SqlitePool>,
    body: web::Json<EvaluateRequest>,
) -> impl Responder {
    let req = body.into_inner();

    let run = match db::fetch_run(req.run_id, &pool).await {
        Ok(run) => run,
        Err(e) => {
            log::error!("Failed to fetch run {} for evaluation: {e}", req.run_id);
            return HttpResponse::InternalServerError().json(ErrorResponse {
                reason: "ERR_EXTERNAL",
                code: 5,
            });
        }
    };

    let Some(run) = run else {
        log::info!("Evaluation requested for unknown run {}", req.run_id);
        return HttpResponse::Ok().json(EvaluateResponse { results: vec![] });
    };

    let mut results = Vec::with_capacity(req.metrics.len());
    for spec in &req.metrics {
        let verdict = evaluator::evaluate_metric(&run.stdout, spec);

        if let Err(e) = db::create_evaluation(run.id, &verdict, spec.pattern.as_deref(), &pool).await
        {
            log::error!(
                "Failed to persist evaluation of metric {:?} for run {}: {e}",
                spec.name,
                run.id
            );
            return HttpResponse::InternalServerError().json(ErrorResponse {
                reason: "ERR_EXTERNAL",
                code: 5,
            });
        }

        results.push(verdict);
    }

    log::info!(
        "Evaluated {} metric(s) against run {}",
        results.len(),
        run.id
    );
    HttpResponse::Ok().json(EvaluateResponse { results })
}
