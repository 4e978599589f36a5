use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

use ingest_core::error::{IngestError, Result};

/// Connection pool wrapper; owns schema migrations (C4).
#[derive(Clone)]
pub struct Db {
    pool: SqlitePool,
}

impl Db {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| IngestError::Config(format!("invalid database url {database_url:?}: {e}")))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| IngestError::Persistence {
                chunk_index: 0,
                row_count: 0,
                message: format!("failed to open {database_url}: {e}"),
            })?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| IngestError::Persistence {
                chunk_index: 0,
                row_count: 0,
                message: format!("migration failed: {e}"),
            })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connects_and_migrates_in_memory() {
        let db = Db::connect("sqlite::memory:", 1).await.unwrap();
        assert!(db.pool().acquire().await.is_ok());
    }
}
