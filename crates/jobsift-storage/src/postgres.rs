//! Postgres job store: one row per source URL, upserted on every write.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobsift_core::{JobRecord, ScoredJob};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::{info, warn};

use crate::{StorageError, StorageWriter, WriteOutcome, WriteStatus};

const UPSERT_JOB: &str = r#"
    INSERT INTO jobs (
        source_url, source_platform, title, company, location,
        salary_min, salary_max, score, recommendation, reasons, record, collected_at
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
    ON CONFLICT (source_url) DO UPDATE SET
        source_platform = EXCLUDED.source_platform,
        title = EXCLUDED.title,
        company = EXCLUDED.company,
        location = EXCLUDED.location,
        salary_min = EXCLUDED.salary_min,
        salary_max = EXCLUDED.salary_max,
        score = EXCLUDED.score,
        recommendation = EXCLUDED.recommendation,
        reasons = EXCLUDED.reasons,
        record = EXCLUDED.record,
        collected_at = EXCLUDED.collected_at,
        updated_at = NOW()
    RETURNING (xmax = 0) AS inserted
"#;

/// Column values for one `jobs` row.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRow {
    pub source_url: String,
    pub source_platform: String,
    pub title: Option<String>,
    pub company: Option<String>,
    pub location: Option<String>,
    pub salary_min: Option<f64>,
    pub salary_max: Option<f64>,
    pub score: f64,
    pub recommendation: String,
    pub reasons: serde_json::Value,
    pub record: serde_json::Value,
    pub collected_at: DateTime<Utc>,
}

impl JobRow {
    pub fn from_scored(scored: &ScoredJob) -> Result<Self, serde_json::Error> {
        let job = &scored.job;
        let salary = job.effective_salary();
        Ok(Self {
            source_url: job.source_url.clone(),
            source_platform: job.source_platform.clone(),
            title: job.title.clone(),
            company: job.company.clone(),
            location: job.location.clone(),
            salary_min: salary.and_then(|s| s.min),
            salary_max: salary.and_then(|s| s.max),
            score: scored.result.score(),
            recommendation: scored.result.recommendation().as_str().to_string(),
            reasons: serde_json::to_value(scored.result.reasons())?,
            record: serde_json::to_value(job)?,
            collected_at: job.collected_at,
        })
    }
}

fn is_connection_error(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
    )
}

#[derive(Debug, Clone)]
pub struct PgJobWriter {
    pool: PgPool,
}

impl PgJobWriter {
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await
            .map_err(|e| StorageError::Unavailable(format!("connecting to postgres: {e}")))?;
        Ok(Self { pool })
    }

    /// Defers connecting until first use; only the URL is checked here.
    pub fn connect_lazy(database_url: &str) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect_lazy(database_url)
            .map_err(|e| StorageError::Unavailable(format!("invalid database url: {e}")))?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), StorageError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StorageError::Unavailable(format!("running migrations: {e}")))?;
        info!("postgres migrations applied");
        Ok(())
    }

    async fn upsert(&self, row: &JobRow) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(UPSERT_JOB)
            .bind(&row.source_url)
            .bind(&row.source_platform)
            .bind(&row.title)
            .bind(&row.company)
            .bind(&row.location)
            .bind(row.salary_min)
            .bind(row.salary_max)
            .bind(row.score)
            .bind(&row.recommendation)
            .bind(&row.reasons)
            .bind(&row.record)
            .bind(row.collected_at)
            .fetch_one(&self.pool)
            .await?;
        result.try_get::<bool, _>("inserted")
    }
}

#[async_trait]
impl StorageWriter for PgJobWriter {
    fn name(&self) -> &str {
        "postgres"
    }

    async fn write_batch(&self, batch: &[ScoredJob]) -> Result<Vec<WriteOutcome>, StorageError> {
        let mut outcomes = Vec::with_capacity(batch.len());
        for scored in batch {
            let source_url = scored.job.source_url.clone();
            let row = match JobRow::from_scored(scored) {
                Ok(row) => row,
                Err(err) => {
                    outcomes.push(WriteOutcome {
                        source_url,
                        status: WriteStatus::Failed {
                            message: err.to_string(),
                        },
                    });
                    continue;
                }
            };
            let status = match self.upsert(&row).await {
                Ok(true) => WriteStatus::Inserted,
                Ok(false) => WriteStatus::Updated,
                Err(err) if is_connection_error(&err) && !outcomes.iter().any(WriteOutcome::is_success) => {
                    return Err(StorageError::Unavailable(err.to_string()));
                }
                Err(err) => {
                    warn!(url = %source_url, error = %err, "postgres upsert failed");
                    WriteStatus::Failed {
                        message: err.to_string(),
                    }
                }
            };
            outcomes.push(WriteOutcome { source_url, status });
        }
        Ok(outcomes)
    }

    async fn load_existing(&self) -> Result<Vec<JobRecord>, StorageError> {
        let rows = sqlx::query("SELECT record FROM jobs ORDER BY first_seen_at, source_url")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                if is_connection_error(&e) {
                    StorageError::Unavailable(e.to_string())
                } else {
                    StorageError::Database(e)
                }
            })?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let record: serde_json::Value = row.try_get("record")?;
            match serde_json::from_value::<JobRecord>(record) {
                Ok(job) => out.push(job),
                Err(err) => warn!(error = %err, "skipping undecodable stored job"),
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use jobsift_core::{FilterResult, ScoreBreakdown};

    #[test]
    fn row_mapping_uses_parsed_salary_and_keeps_full_record() {
        let mut job = JobRecord::new(
            "https://jobs.example/7",
            "board",
            Utc.with_ymd_and_hms(2026, 1, 5, 10, 0, 0).single().unwrap(),
        )
        .with_title("ML Engineer")
        .with_company("Hooli");
        job.salary_text = Some("30-40k".into());
        let scored = ScoredJob {
            job,
            result: FilterResult::scored(88.0, ScoreBreakdown::default(), vec!["keyword_relevance: 100".into()]),
        };

        let row = JobRow::from_scored(&scored).expect("row");
        assert_eq!(row.salary_min, Some(30_000.0));
        assert_eq!(row.salary_max, Some(40_000.0));
        assert_eq!(row.recommendation, "highly_recommended");
        assert_eq!(row.reasons[0], "keyword_relevance: 100");
        let back: JobRecord = serde_json::from_value(row.record).expect("record");
        assert_eq!(back.title.as_deref(), Some("ML Engineer"));
    }
}
