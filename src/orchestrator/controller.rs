use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CycleStatus {
    Idle,
    Running,
    Cancelling,
}

impl std::fmt::Display for CycleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CycleStatus::Idle => write!(f, "Idle"),
            CycleStatus::Running => write!(f, "Running"),
            CycleStatus::Cancelling => write!(f, "Cancelling"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleState {
    pub status: CycleStatus,
    pub cycle_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub steps_completed: u64,
}

/// Run/cancel flags for the current cycle. Cancellation is cooperative: the
/// orchestrator checks [`is_cancelled`](Self::is_cancelled) between steps.
pub struct CycleController {
    is_running: AtomicBool,
    cancel_requested: AtomicBool,
    cycle_id: RwLock<Option<String>>,
    started_at: RwLock<Option<DateTime<Utc>>>,
    steps_completed: AtomicU64,
    status_tx: broadcast::Sender<CycleStatus>,
}

impl CycleController {
    pub fn new() -> Self {
        let (status_tx, _) = broadcast::channel(32);
        Self {
            is_running: AtomicBool::new(false),
            cancel_requested: AtomicBool::new(false),
            cycle_id: RwLock::new(None),
            started_at: RwLock::new(None),
            steps_completed: AtomicU64::new(0),
            status_tx,
        }
    }

    pub async fn begin(&self, cycle_id: &str) -> Result<(), String> {
        if self
            .is_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err("A cycle is already running".to_string());
        }

        self.cancel_requested.store(false, Ordering::Release);
        self.steps_completed.store(0, Ordering::Relaxed);
        *self.cycle_id.write().await = Some(cycle_id.to_string());
        *self.started_at.write().await = Some(Utc::now());

        info!(cycle_id, "Cycle started");
        let _ = self.status_tx.send(CycleStatus::Running);
        Ok(())
    }

    pub async fn finish(&self) {
        self.is_running.store(false, Ordering::Release);
        *self.cycle_id.write().await = None;

        info!(
            steps = self.steps_completed.load(Ordering::Relaxed),
            cancelled = self.is_cancelled(),
            "Cycle finished"
        );
        let _ = self.status_tx.send(CycleStatus::Idle);
    }

    /// Requests a stop at the next step boundary. Committed work is kept.
    pub fn cancel(&self) {
        if self.is_running.load(Ordering::Acquire) && !self.cancel_requested.swap(true, Ordering::AcqRel) {
            info!("Cycle cancellation requested");
            let _ = self.status_tx.send(CycleStatus::Cancelling);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_requested.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }

    pub fn record_step(&self) {
        self.steps_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub async fn get_state(&self) -> CycleState {
        let status = if !self.is_running.load(Ordering::Acquire) {
            CycleStatus::Idle
        } else if self.is_cancelled() {
            CycleStatus::Cancelling
        } else {
            CycleStatus::Running
        };

        CycleState {
            status,
            cycle_id: self.cycle_id.read().await.clone(),
            started_at: *self.started_at.read().await,
            steps_completed: self.steps_completed.load(Ordering::Relaxed),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CycleStatus> {
        self.status_tx.subscribe()
    }
}

impl Default for CycleController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_single_cycle_at_a_time() {
        let controller = CycleController::new();
        controller.begin("cycle-2024-01-02").await.unwrap();
        assert!(controller.begin("cycle-2024-01-02").await.is_err());

        controller.finish().await;
        assert!(controller.begin("cycle-2024-01-03").await.is_ok());
    }

    #[tokio::test]
    async fn test_cancel_is_reset_by_next_cycle() {
        let controller = CycleController::new();
        let mut rx = controller.subscribe();

        controller.cancel();
        assert!(!controller.is_cancelled());

        controller.begin("cycle-2024-01-02").await.unwrap();
        controller.record_step();
        controller.cancel();
        assert!(controller.is_cancelled());

        let state = controller.get_state().await;
        assert_eq!(state.status, CycleStatus::Cancelling);
        assert_eq!(state.steps_completed, 1);
        assert_eq!(rx.recv().await.unwrap(), CycleStatus::Running);
        assert_eq!(rx.recv().await.unwrap(), CycleStatus::Cancelling);

        controller.finish().await;
        controller.begin("cycle-2024-01-03").await.unwrap();
        assert!(!controller.is_cancelled());
    }
}
