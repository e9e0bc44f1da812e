use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::str::FromStr;

use super::Database;
use crate::error::{PipelineError, Result};
use crate::types::time::{fmt_ts, parse_ts};
use crate::types::{JobRun, JobStatus};

impl Database {
    /// Appends one audit row.
    pub async fn insert_job_run(&self, run: &JobRun) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO job_runs (
                job_type, job_id, cycle_id, symbol, status, message, started_at, finished_at, duration_ms
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&run.job_type)
        .bind(&run.job_id)
        .bind(&run.cycle_id)
        .bind(&run.symbol)
        .bind(run.status.as_str())
        .bind(&run.message)
        .bind(fmt_ts(run.started_at))
        .bind(run.finished_at.map(fmt_ts))
        .bind(run.duration_ms)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Job types already completed for this symbol in this cycle.
    pub async fn completed_job_types(&self, cycle_id: &str, symbol: &str) -> Result<Vec<String>> {
        let types: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT job_type FROM job_runs
            WHERE cycle_id = ? AND symbol = ? AND status = 'completed'
            "#,
        )
        .bind(cycle_id)
        .bind(symbol)
        .fetch_all(&self.pool)
        .await?;

        Ok(types)
    }

    pub async fn recent_job_runs(&self, limit: u32) -> Result<Vec<JobRun>> {
        let rows = sqlx::query(
            r#"
            SELECT job_type, job_id, cycle_id, symbol, status, message, started_at, finished_at, duration_ms
            FROM job_runs
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(job_from_row).collect()
    }

    pub async fn job_runs_for_cycle(&self, cycle_id: &str) -> Result<Vec<JobRun>> {
        let rows = sqlx::query(
            r#"
            SELECT job_type, job_id, cycle_id, symbol, status, message, started_at, finished_at, duration_ms
            FROM job_runs
            WHERE cycle_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(cycle_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(job_from_row).collect()
    }

    /// Retention: drops job rows started before `cutoff`.
    pub async fn prune_job_runs(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM job_runs WHERE started_at < ?")
            .bind(fmt_ts(cutoff))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

fn job_from_row(row: &SqliteRow) -> Result<JobRun> {
    Ok(JobRun {
        job_type: row.get("job_type"),
        job_id: row.get("job_id"),
        cycle_id: row.get("cycle_id"),
        symbol: row.get("symbol"),
        status: JobStatus::from_str(row.get("status")).map_err(PipelineError::NotFound)?,
        message: row.get("message"),
        started_at: parse_ts(row.get("started_at"))?,
        finished_at: row
            .get::<Option<String>, _>("finished_at")
            .as_deref()
            .map(parse_ts)
            .transpose()?,
        duration_ms: row.get("duration_ms"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::bar::test_support::day;

    fn run(job_type: &str, status: JobStatus) -> JobRun {
        JobRun {
            job_type: job_type.to_string(),
            job_id: "job-1".to_string(),
            cycle_id: "cycle-2024-01-05".to_string(),
            symbol: "X".to_string(),
            status,
            message: String::new(),
            started_at: day(4),
            finished_at: (status != JobStatus::Started).then(|| day(4)),
            duration_ms: (status != JobStatus::Started).then_some(12),
        }
    }

    #[tokio::test]
    async fn test_completed_steps_per_cycle() {
        let db = Database::in_memory().await.unwrap();
        db.insert_job_run(&run("ingesting", JobStatus::Started)).await.unwrap();
        db.insert_job_run(&run("ingesting", JobStatus::Completed)).await.unwrap();
        db.insert_job_run(&run("featurizing", JobStatus::Started)).await.unwrap();
        db.insert_job_run(&run("featurizing", JobStatus::Failed)).await.unwrap();

        let done = db.completed_job_types("cycle-2024-01-05", "X").await.unwrap();
        assert_eq!(done, vec!["ingesting".to_string()]);
        assert!(db.completed_job_types("cycle-2024-01-06", "X").await.unwrap().is_empty());

        let recent = db.recent_job_runs(10).await.unwrap();
        assert_eq!(recent.len(), 4);
        assert_eq!(recent[0].status, JobStatus::Failed);
        assert_eq!(recent[0].duration_ms, Some(12));
        assert_eq!(db.job_runs_for_cycle("cycle-2024-01-05").await.unwrap()[0].finished_at, None);

        assert_eq!(db.prune_job_runs(day(5)).await.unwrap(), 4);
    }
}
