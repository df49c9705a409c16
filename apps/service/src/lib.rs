//! Pulse monitoring pipeline: scheduler, check executors, job queue, worker,
//! incident state machine and alert dispatch over a libsql store.

pub mod alerts;
pub mod config;
pub mod database;
pub mod error;
pub mod incident;
pub mod monitoring;
pub mod pool;
pub mod queue;
pub mod retention;
pub mod seed;
pub mod shutdown;
pub mod worker;

use std::sync::Arc;

use anyhow::Result;

use crate::config::Config;
use crate::database::{Database, DatabaseImpl};

/// Open the configured store, run migrations and return the repository
pub async fn connect_database(config: &Config) -> Result<Arc<DatabaseImpl>> {
    let pool = pool::open(&config.database).await?;
    Ok(Arc::new(database::prepare(pool).await?))
}

/// Same as [`connect_database`], erased to the trait object the loops take
pub async fn connect_store(config: &Config) -> Result<Arc<dyn Database>> {
    let database: Arc<dyn Database> = connect_database(config).await?;
    Ok(database)
}
