use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::Level;

use wfe_config::EngineConfig;
use wfe_executor::{ExecOutcome, StepExecutor};
use wfe_observability::{emit, Component, EngineEventFields};
use wfe_store::SharedStore;

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct TickResult {
    pub claimed: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub retrying: u32,
    pub blocked: u32,
}

pub struct ClaimScheduler {
    store: SharedStore,
    executor: Arc<StepExecutor>,
    config: Arc<EngineConfig>,
}

impl ClaimScheduler {
    pub fn new(store: SharedStore, executor: Arc<StepExecutor>, config: Arc<EngineConfig>) -> Self {
        Self { store, executor, config }
    }

    /// `tick({maxSteps, concurrency, scope})`: stall recovery, then a
    /// bounded find-and-modify claim loop, then a bounded concurrency
    /// fan-out over claimed steps.
    pub async fn tick(
        &self,
        max_steps: usize,
        concurrency: usize,
        scope_run_id: Option<&str>,
    ) -> TickResult {
        let now = Utc::now();
        let _reset = self
            .store
            .reset_stale_running_steps(chrono::Duration::milliseconds(self.config.stall_threshold_ms), now)
            .await
            .unwrap_or_default();

        let worker_id = wfe_types::new_id();
        let mut claimed = Vec::new();
        for _ in 0..max_steps {
            match self
                .store
                .claim_next_queued_step(scope_run_id, &worker_id, Utc::now())
                .await
            {
                Ok(Some(step)) => claimed.push(step),
                Ok(None) => break,
                Err(_) => break,
            }
        }

        let mut result = TickResult {
            claimed: claimed.len() as u32,
            ..Default::default()
        };
        if claimed.is_empty() {
            return result;
        }

        let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
        let mut handles = Vec::with_capacity(claimed.len());
        for step in claimed {
            let semaphore = semaphore.clone();
            let executor = self.executor.clone();
            let worker_id = worker_id.clone();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore not closed");
                executor.execute(&step.run_id, &step.step_id, &worker_id).await
            }));
        }

        for handle in handles {
            match handle.await {
                Ok(Ok(ExecOutcome::Succeeded)) => result.succeeded += 1,
                Ok(Ok(ExecOutcome::Failed)) => result.failed += 1,
                Ok(Ok(ExecOutcome::Retrying)) => result.retrying += 1,
                Ok(Ok(ExecOutcome::Blocked)) => result.blocked += 1,
                Ok(Ok(ExecOutcome::Skipped)) => {}
                Ok(Err(_)) | Err(_) => result.failed += 1,
            }
        }
        emit(
            Level::INFO,
            Component::Scheduler,
            "tick_completed",
            EngineEventFields {
                worker_id: Some(&worker_id),
                detail: Some(&format!(
                    "claimed={} succeeded={} failed={} retrying={} blocked={}",
                    result.claimed, result.succeeded, result.failed, result.retrying, result.blocked
                )),
                ..Default::default()
            },
        );
        result
    }
}
