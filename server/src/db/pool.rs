//! Connection pools for the two stores.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

/// Type alias for the database pool.
pub type Pool = PgPool;

/// How long a request waits for a free connection before failing.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Connect the pool of one store. `name` only appears in logs.
pub async fn create_pool(
    name: &str,
    database_url: &str,
    max_connections: u32,
) -> Result<Pool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect(database_url)
        .await?;
    tracing::info!(
        "Connected {} store with up to {} connection(s)",
        name,
        max_connections
    );
    Ok(pool)
}

/// Apply the bundled schema. Both stores run the same migrations so their
/// tables stay identical.
pub async fn run_migrations(name: &str, pool: &Pool) -> Result<(), sqlx::migrate::MigrateError> {
    tracing::info!("Running database migrations on {} store...", name);
    sqlx::migrate!("./migrations").run(pool).await
}
