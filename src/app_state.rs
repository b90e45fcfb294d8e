use std::sync::Arc;

use sqlx::{Pool, Postgres};

use crate::config::Config;

#[derive(Clone)]
pub struct AppState {
    pub db_pool: Pool<Postgres>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(pool: Pool<Postgres>, config: Config) -> Self {
        Self {
            db_pool: pool,
            config: Arc::new(config),
        }
    }
}
