//! Title rows

use crate::error::{Error, Result};
use crate::types::{SourceId, TitleId, TitleRecord};
use anirank_common::AnalysisPeriod;
use chrono::Utc;
use sqlx::{Executor, Sqlite, SqlitePool};
use std::collections::BTreeMap;
use tracing::info;

pub async fn save_title<'e, E>(executor: E, record: &TitleRecord) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    let aliases = serde_json::to_string(&record.aliases)?;
    let external_ids = serde_json::to_string(&record.external_ids)?;
    let period = record.period.map(|p| p.slug());

    sqlx::query(
        r#"
        INSERT INTO titles (title_id, title, title_localized, aliases, external_ids, period, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(title_id) DO UPDATE SET
            title = excluded.title,
            title_localized = excluded.title_localized,
            aliases = excluded.aliases,
            external_ids = excluded.external_ids,
            period = excluded.period
        "#,
    )
    .bind(record.id.as_str())
    .bind(&record.title)
    .bind(&record.title_localized)
    .bind(aliases)
    .bind(external_ids)
    .bind(period)
    .bind(Utc::now())
    .execute(executor)
    .await?;
    Ok(())
}

type TitleRow = (String, String, Option<String>, String, String, Option<String>);

fn record_from_row(row: TitleRow) -> Result<TitleRecord> {
    let (title_id, title, title_localized, aliases, external_ids, period) = row;
    let aliases: Vec<String> = serde_json::from_str(&aliases)?;
    let external_ids: BTreeMap<SourceId, String> = serde_json::from_str(&external_ids)?;
    let period = period
        .map(|slug| AnalysisPeriod::parse(&slug))
        .transpose()
        .map_err(Error::Common)?;

    Ok(TitleRecord {
        id: TitleId::new(title_id),
        title,
        title_localized,
        aliases,
        period,
        external_ids,
    })
}

pub async fn load_titles(pool: &SqlitePool) -> Result<Vec<TitleRecord>> {
    let rows: Vec<TitleRow> = sqlx::query_as(
        r#"
        SELECT title_id, title, title_localized, aliases, external_ids, period
        FROM titles
        ORDER BY title_id
        "#,
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(record_from_row).collect()
}

/// Delete titles and their observations in one transaction
pub async fn delete_titles(pool: &SqlitePool, ids: &[TitleId]) -> Result<u64> {
    let mut tx = pool.begin().await?;
    let mut deleted = 0;
    for id in ids {
        sqlx::query("DELETE FROM observations WHERE title_id = ?")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?;
        deleted += sqlx::query("DELETE FROM titles WHERE title_id = ?")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?
            .rows_affected();
    }
    tx.commit().await?;

    info!(deleted, "Titles deleted from database");
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory_pool;
    use anirank_common::Season;

    #[tokio::test]
    async fn test_save_title_is_upsert() {
        let pool = memory_pool().await;
        let mut record = TitleRecord::new("t1", "Dungeon Meshi")
            .with_period(AnalysisPeriod::new(2024, Season::Winter));
        save_title(&pool, &record).await.unwrap();

        record.add_alias("Delicious in Dungeon");
        save_title(&pool, &record).await.unwrap();

        let titles = load_titles(&pool).await.unwrap();
        assert_eq!(titles, vec![record]);
    }

    #[tokio::test]
    async fn test_delete_titles() {
        let pool = memory_pool().await;
        for id in ["a", "b", "c"] {
            save_title(&pool, &TitleRecord::new(id, id)).await.unwrap();
        }

        let deleted = delete_titles(&pool, &["a".into(), "c".into()]).await.unwrap();
        assert_eq!(deleted, 2);
        let remaining: Vec<_> = load_titles(&pool)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id.to_string())
            .collect();
        assert_eq!(remaining, vec!["b"]);
    }
}
