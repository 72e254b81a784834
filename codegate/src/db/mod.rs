//! Sqlite persistence: the audit log (prompts, outputs, alerts) and the
//! workspace/session/endpoint tables the registry mirrors in memory.

pub mod audit;
pub mod sqlite;
pub mod workspaces;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("stored row is malformed: {0}")]
    BadRow(String),
}
