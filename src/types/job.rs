use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Per-symbol pipeline state. `Failed` is absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineStep {
    Pending,
    Ingesting,
    Featurizing,
    Forecasting,
    Reconciling,
    Done,
    Failed,
}

impl PipelineStep {
    /// Steps that do work and are logged, in execution order.
    pub const WORK: [PipelineStep; 4] = [
        PipelineStep::Ingesting,
        PipelineStep::Featurizing,
        PipelineStep::Forecasting,
        PipelineStep::Reconciling,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStep::Pending => "PENDING",
            PipelineStep::Ingesting => "INGESTING",
            PipelineStep::Featurizing => "FEATURIZING",
            PipelineStep::Forecasting => "FORECASTING",
            PipelineStep::Reconciling => "RECONCILING",
            PipelineStep::Done => "DONE",
            PipelineStep::Failed => "FAILED",
        }
    }

    /// Transition after the current step succeeds.
    pub fn next(&self) -> PipelineStep {
        match self {
            PipelineStep::Pending => PipelineStep::Ingesting,
            PipelineStep::Ingesting => PipelineStep::Featurizing,
            PipelineStep::Featurizing => PipelineStep::Forecasting,
            PipelineStep::Forecasting => PipelineStep::Reconciling,
            PipelineStep::Reconciling => PipelineStep::Done,
            PipelineStep::Done => PipelineStep::Done,
            PipelineStep::Failed => PipelineStep::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineStep::Done | PipelineStep::Failed)
    }

    /// Job type string written to the job log.
    pub fn job_type(&self) -> String {
        self.as_str().to_ascii_lowercase()
    }
}

impl fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Started,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Started => "started",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "started" => Ok(JobStatus::Started),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            _ => Err(format!("Unknown job status: {}", s)),
        }
    }
}

/// Append-only audit row for one orchestrated step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRun {
    pub job_type: String,
    pub job_id: String,
    pub cycle_id: String,
    pub symbol: String,
    pub status: JobStatus,
    pub message: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_machine_order() {
        let mut step = PipelineStep::Pending;
        let mut seen = Vec::new();
        while !step.is_terminal() {
            step = step.next();
            seen.push(step);
        }
        assert_eq!(
            seen,
            vec![
                PipelineStep::Ingesting,
                PipelineStep::Featurizing,
                PipelineStep::Forecasting,
                PipelineStep::Reconciling,
                PipelineStep::Done,
            ]
        );
        assert_eq!(PipelineStep::Failed.next(), PipelineStep::Failed);
    }

    #[test]
    fn test_job_type_names() {
        assert_eq!(PipelineStep::Featurizing.job_type(), "featurizing");
        assert_eq!(JobStatus::from_str("failed").unwrap(), JobStatus::Failed);
    }
}
