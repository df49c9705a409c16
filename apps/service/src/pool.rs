use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Context;
use deadpool::managed::{self, Pool, RecycleError, RecycleResult};
use libsql::{Builder, Connection, Database, Error as LibsqlError, params};

use crate::config::DatabaseConfig;

/// How long a connection waits on a locked database before giving up
const BUSY_TIMEOUT_MS: u64 = 5_000;

pub struct LibsqlManager {
    database: Database,
    recycle_count: AtomicUsize,
}

impl LibsqlManager {
    pub fn new(database: Database) -> Self {
        Self { database, recycle_count: AtomicUsize::new(0) }
    }
}

impl managed::Manager for LibsqlManager {
    type Type = Connection;
    type Error = LibsqlError;

    async fn create(&self) -> Result<Self::Type, Self::Error> {
        let conn = self.database.connect()?;
        // PRAGMA returns a row, so it has to go through query rather than execute
        conn.query(&format!("PRAGMA busy_timeout = {BUSY_TIMEOUT_MS}"), ()).await?;
        Ok(conn)
    }

    async fn recycle(
        &self,
        conn: &mut Self::Type,
        _: &managed::Metrics,
    ) -> RecycleResult<Self::Error> {
        let recycle_count = self.recycle_count.fetch_add(1, Ordering::Relaxed) as u64;
        let row = conn
            .query("SELECT ?1", params![recycle_count])
            .await?
            .next()
            .await?
            .ok_or(LibsqlError::QueryReturnedNoRows)?;
        if row.get::<u64>(0)? != recycle_count {
            return Err(RecycleError::message("connection returned a stale probe value"));
        }
        Ok(())
    }
}

pub type LibsqlPool = Pool<LibsqlManager>;

/// Open the configured database (local file or remote libsql) and wrap it in a pool
pub async fn open(config: &DatabaseConfig) -> anyhow::Result<LibsqlPool> {
    let database = match &config.url {
        Some(url) => Builder::new_remote(url.clone(), config.auth_token.clone().unwrap_or_default())
            .build()
            .await
            .with_context(|| format!("failed to open remote database {url}"))?,
        None => Builder::new_local(&config.path)
            .build()
            .await
            .with_context(|| format!("failed to open database file {}", config.path))?,
    };

    build_pool(database, config.pool_size)
}

pub fn build_pool(database: Database, size: usize) -> anyhow::Result<LibsqlPool> {
    Pool::builder(LibsqlManager::new(database))
        .max_size(size.max(1))
        .build()
        .context("failed to build database pool")
}
