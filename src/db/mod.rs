//! Persistence gateway (C11)
//!
//! Thin wrapper around a `sqlx::PgPool`. The book itself is authoritative and
//! in-memory; this pool exists for durability and boot-time recovery, never
//! consulted on the hot matching path.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

pub struct Database {
    pub pool: PgPool,
}

impl Database {
    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;

        info!("connected to database");

        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| sqlx::Error::Migrate(Box::new(e)))?;
        info!("migrations applied");
        Ok(())
    }
}
