use std::process;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use tracing::{error, info};

use llmstxt::config::Config;
use llmstxt::worker::WorkerRuntime;

const STARTUP_RETRIES: u32 = 10;
const STARTUP_RETRY_DELAY: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("invalid configuration: {e}");
            process::exit(2);
        }
    };

    let pool = connect_with_retries(&config.database_url).await;

    if let Err(e) = sqlx::migrate!("./migrations").run(&pool).await {
        error!("migrations failed: {e}");
        process::exit(1);
    }

    info!(worker_id = %config.worker_id, scheduler = config.run_scheduler, "worker starting");
    let runtime = WorkerRuntime::new(pool, config);
    if let Err(e) = runtime.run().await {
        error!("worker error: {e:#}");
        process::exit(1);
    }
}

async fn connect_with_retries(database_url: &str) -> Pool<Postgres> {
    for attempt in 1..=STARTUP_RETRIES {
        match PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await
        {
            Ok(pool) => return pool,
            Err(e) => {
                error!("database connection failed (attempt {attempt}/{STARTUP_RETRIES}): {e}");
                tokio::time::sleep(STARTUP_RETRY_DELAY).await;
            }
        }
    }
    error!("database unreachable after {STARTUP_RETRIES} attempts");
    process::exit(1);
}
