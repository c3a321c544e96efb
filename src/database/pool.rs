use std::time::Duration;

use crate::config::get_config;
use crate::error::Result;
use sqlx::{postgres::PgPoolOptions, PgPool};

const MAX_CONNECTIONS: u32 = 20;

fn options() -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .acquire_timeout(Duration::from_secs(10))
}

pub async fn create_pool() -> Result<PgPool> {
    let config = get_config();
    let pool = options().connect(&config.database_url).await?;
    tracing::info!(max_connections = MAX_CONNECTIONS, "database pool ready");
    Ok(pool)
}

/// Connects on first use, so routers can be assembled without a database.
pub fn create_lazy_pool(database_url: &str) -> Result<PgPool> {
    Ok(options().connect_lazy(database_url)?)
}
