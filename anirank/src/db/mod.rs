//! SQLite persistence
//!
//! The database mirrors the in-memory store: one row per title and one row
//! per (title, source) observation, written with the same upsert contract.

pub mod observations;
pub mod titles;

use crate::error::Result;
use crate::store::ObservationStore;
use anirank_common::AnalysisPeriod;
use sqlx::SqlitePool;
use std::path::Path;
use tracing::{debug, info, warn};

/// Open (creating if needed) the database and its tables
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;
    init_tables(&pool).await?;
    Ok(pool)
}

pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS titles (
            title_id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            title_localized TEXT,
            aliases TEXT NOT NULL DEFAULT '[]',
            external_ids TEXT NOT NULL DEFAULT '{}',
            period TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS observations (
            title_id TEXT NOT NULL REFERENCES titles(title_id) ON DELETE CASCADE,
            source_id TEXT NOT NULL,
            raw_score REAL NOT NULL,
            vote_count INTEGER NOT NULL,
            distribution TEXT,
            fetched_at TEXT NOT NULL,
            origin TEXT NOT NULL,
            PRIMARY KEY (title_id, source_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    info!("Database tables initialized (titles, observations)");
    Ok(())
}

/// Rebuild a store from the database
pub async fn load_store(pool: &SqlitePool) -> Result<ObservationStore> {
    let mut store = ObservationStore::new();
    for record in titles::load_titles(pool).await? {
        store.insert_title(record);
    }
    for observation in observations::load_observations(pool).await? {
        let key = observation.key();
        if let Err(e) = store.upsert(observation) {
            warn!(title_id = %key.0, source = %key.1, error = %e, "Orphan observation skipped");
        }
    }
    info!(
        titles = store.title_count(),
        observations = store.observation_count(),
        "Store loaded"
    );
    Ok(store)
}

/// Rebuild the store for one analysis period
pub async fn load_period(pool: &SqlitePool, period: AnalysisPeriod) -> Result<ObservationStore> {
    let mut store = load_store(pool).await?;
    let dropped = store.retain_period(period);
    debug!(period = %period, kept = store.title_count(), dropped, "Store filtered to period");
    Ok(store)
}

/// Write every title and observation of a store in one transaction
pub async fn save_store(pool: &SqlitePool, store: &ObservationStore) -> Result<()> {
    let mut tx = pool.begin().await?;
    for record in store.titles() {
        titles::save_title(&mut *tx, record).await?;
    }
    for observation in store.observations() {
        observations::upsert_observation(&mut *tx, observation).await?;
    }
    tx.commit().await?;
    debug!(
        titles = store.title_count(),
        observations = store.observation_count(),
        "Store saved"
    );
    Ok(())
}

#[cfg(test)]
pub(crate) async fn memory_pool() -> SqlitePool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    init_tables(&pool).await.unwrap();
    pool
}
