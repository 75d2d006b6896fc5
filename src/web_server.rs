use std::sync::Arc;

use actix_web::{App, HttpServer, dev::Server, middleware, web};
use sqlx::sqlite::SqlitePool;

use crate::config::Config;
use crate::routes::{
    get_run_handler, get_runs_handler, json_error_handler, post_evaluate_handler,
    post_run_handler, query_error_handler,
};
use crate::sandbox::SandboxRunner;

pub fn build_server(
    config: Config,
    db_pool: SqlitePool,
    sandbox: Arc<dyn SandboxRunner>,
) -> std::io::Result<Server> {
    let Config {
        server: server_config,
        sandbox: sandbox_config,
    } = config;
    let db_pool = web::Data::new(db_pool);
    let sandbox = web::Data::from(sandbox);
    let sandbox_config = web::Data::new(sandbox_config);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(db_pool.clone())
            .app_data(sandbox.clone())
            .app_data(sandbox_config.clone())
            .app_data(web::JsonConfig::default().error_handler(json_error_handler))
            .app_data(web::QueryConfig::default().error_handler(query_error_handler))
            .wrap(middleware::Logger::default())
            .service(post_run_handler)
            .service(get_runs_handler)
            .service(get_run_handler)
            .service(post_evaluate_handler)
    })
    .bind((
        server_config
            .bind_address
            .unwrap_or("127.0.0.1".to_string()),
        server_config.bind_port.unwrap_or(12345),
    ))?
    .run();

    Ok(server)
}
