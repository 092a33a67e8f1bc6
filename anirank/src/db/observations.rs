//! Observation rows, keyed by (title_id, source_id)

use crate::error::{Error, Result};
use crate::types::{ObservationOrigin, RatingObservation, ScoreDistribution, SourceId, TitleId};
use chrono::{DateTime, Utc};
use sqlx::{Executor, Sqlite, SqlitePool};

/// Insert or replace the row for the observation's (title, source) pair
pub async fn upsert_observation<'e, E>(executor: E, observation: &RatingObservation) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    let distribution = observation
        .distribution
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    let vote_count = i64::try_from(observation.vote_count)
        .map_err(|_| Error::Internal(format!("vote count {} too large", observation.vote_count)))?;

    sqlx::query(
        r#"
        INSERT INTO observations (title_id, source_id, raw_score, vote_count, distribution, fetched_at, origin)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(title_id, source_id) DO UPDATE SET
            raw_score = excluded.raw_score,
            vote_count = excluded.vote_count,
            distribution = excluded.distribution,
            fetched_at = excluded.fetched_at,
            origin = excluded.origin
        "#,
    )
    .bind(observation.title_id.as_str())
    .bind(observation.source_id.as_str())
    .bind(observation.raw_score)
    .bind(vote_count)
    .bind(distribution)
    .bind(observation.fetched_at)
    .bind(observation.origin.as_str())
    .execute(executor)
    .await?;
    Ok(())
}

type ObservationRow = (String, String, f64, i64, Option<String>, DateTime<Utc>, String);

fn observation_from_row(row: ObservationRow) -> Result<RatingObservation> {
    let (title_id, source_id, raw_score, vote_count, distribution, fetched_at, origin) = row;
    let distribution: Option<ScoreDistribution> = distribution
        .map(|text| serde_json::from_str(&text))
        .transpose()?;
    let origin = ObservationOrigin::parse(&origin)
        .ok_or_else(|| Error::Internal(format!("unknown observation origin '{origin}'")))?;

    Ok(RatingObservation {
        title_id: TitleId::new(title_id),
        source_id: SourceId::new(source_id),
        raw_score,
        vote_count: u64::try_from(vote_count).unwrap_or(0),
        distribution,
        fetched_at,
        origin,
    })
}

pub async fn load_observations(pool: &SqlitePool) -> Result<Vec<RatingObservation>> {
    let rows: Vec<ObservationRow> = sqlx::query_as(
        r#"
        SELECT title_id, source_id, raw_score, vote_count, distribution, fetched_at, origin
        FROM observations
        ORDER BY title_id, source_id
        "#,
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(observation_from_row).collect()
}
