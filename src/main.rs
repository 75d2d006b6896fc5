use std::sync::Arc;

use clap::Parser;

use runlab::config::CliArgs;
use runlab::database as db;
use runlab::sandbox::{SandboxRunner, create_sandbox_runner};
use runlab::web_server::build_server;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let cli = CliArgs::parse();
    let config = cli.to_config().expect("Failed to load configuration");

    let db_path = db::get_db_path();
    if cli.flush_data {
        db::remove_db(&db_path);
    }

    let db_pool = db::init_db(&db_path)
        .await
        .expect("Failed to initialize database");

    // An unusable isolation runtime is a fatal configuration error
    let sandbox: Arc<dyn SandboxRunner> =
        Arc::from(create_sandbox_runner(&config.sandbox).expect("Failed to build sandbox runner"));

    let server = build_server(config, db_pool, sandbox)?;

    log::info!("Server started");
    server.await
}
