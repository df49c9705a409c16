//! Persistence layer: schema migrations, row models and the libsql-backed
//! repository shared by the scheduler, worker, dispatcher and server.

pub mod migrations;
pub mod models;
pub mod repository;

pub use repository::{Database, DatabaseImpl, NewIncident, ResolvedIncident, TransitionCommit, TransitionReport};

use anyhow::Result;

use crate::pool::LibsqlPool;

/// Initialize database with schema
pub async fn initialize_database(conn: &libsql::Connection) -> Result<()> {
    migrations::run_migrations(conn).await
}

/// Run migrations on a pooled connection and hand back the repository
pub async fn prepare(pool: LibsqlPool) -> Result<DatabaseImpl> {
    {
        let conn = pool.get().await?;
        initialize_database(&conn).await?;
    }
    Ok(DatabaseImpl::new_from_pool(pool))
}
