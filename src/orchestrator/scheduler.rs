use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

use super::Orchestrator;
use crate::config::ScheduleSettings;
use crate::error::{PipelineError, Result};
use crate::types::time::is_weekday;

/// Fires one cycle per (week)day at the configured UTC time.
pub struct Scheduler {
    orchestrator: Arc<Orchestrator>,
    run_time: NaiveTime,
    weekdays_only: bool,
}

impl Scheduler {
    pub fn new(orchestrator: Arc<Orchestrator>, settings: &ScheduleSettings) -> Result<Self> {
        let run_time = settings.run_time().ok_or_else(|| {
            PipelineError::Config(config::ConfigError::Message(format!(
                "invalid schedule.run_time_utc {:?}",
                settings.run_time_utc
            )))
        })?;
        Ok(Self {
            orchestrator,
            run_time,
            weekdays_only: settings.weekdays_only,
        })
    }

    /// First scheduled instant strictly after `now`.
    pub fn next_run_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        next_run_after(self.run_time, self.weekdays_only, now)
    }

    /// Runs cycles until `shutdown` flips to true. A failed cycle is logged and
    /// the loop waits for the next slot.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            let now = Utc::now();
            let next = self.next_run_after(now);
            let wait = (next - now).to_std().unwrap_or_default();
            info!(next_run = %next, "Waiting for next cycle");

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Scheduler shutting down");
                        return;
                    }
                    continue;
                }
            }

            match self.orchestrator.run_cycle(next.date_naive()).await {
                Ok(report) => info!(
                    cycle_id = %report.cycle_id,
                    succeeded = report.succeeded(),
                    failed = report.failed(),
                    "Scheduled cycle complete"
                ),
                Err(e) => error!(error = %e, "Scheduled cycle failed"),
            }

            if *shutdown.borrow() {
                return;
            }
        }
    }
}

fn next_run_after(run_time: NaiveTime, weekdays_only: bool, now: DateTime<Utc>) -> DateTime<Utc> {
    let mut date = now.date_naive();
    loop {
        let candidate = Utc.from_utc_datetime(&date.and_time(run_time));
        if candidate > now && (!weekdays_only || is_weekday(date)) {
            return candidate;
        }
        date += Duration::days(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn run_time() -> NaiveTime {
        NaiveTime::from_hms_opt(21, 30, 0).unwrap()
    }

    #[test]
    fn test_same_day_before_run_time() {
        // Tuesday
        assert_eq!(next_run_after(run_time(), true, at(2024, 1, 2, 9, 0)), at(2024, 1, 2, 21, 30));
    }

    #[test]
    fn test_at_run_time_moves_to_next_day() {
        assert_eq!(next_run_after(run_time(), true, at(2024, 1, 2, 21, 30)), at(2024, 1, 3, 21, 30));
    }

    #[test]
    fn test_friday_evening_skips_weekend() {
        assert_eq!(next_run_after(run_time(), true, at(2024, 1, 5, 22, 0)), at(2024, 1, 8, 21, 30));
        assert_eq!(next_run_after(run_time(), false, at(2024, 1, 5, 22, 0)), at(2024, 1, 6, 21, 30));
    }

    #[tokio::test]
    async fn test_shutdown_stops_waiting_loop() {
        use crate::config::PipelineConfig;
        use crate::database::Database;
        use crate::ingest::MemoryQuoteProvider;

        let db = Database::in_memory().await.unwrap();
        let config = PipelineConfig::default();
        let orchestrator = Arc::new(Orchestrator::new(db, Arc::new(MemoryQuoteProvider::new()), config.clone()));
        let scheduler = Scheduler::new(orchestrator, &config.schedule).unwrap();

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { scheduler.run(rx).await });
        tx.send(true).unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
