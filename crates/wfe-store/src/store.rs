use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::fs;
use tokio::sync::RwLock;

use wfe_types::{Event, PaymentReceipt, Run, Step, StepArtifact, StepStatus, Tool, Workspace};

use crate::{StoreError, StoreResult};

/// In-process, lock-guarded document store with durable JSON snapshots.
///
/// "Atomic find-and-modify" here is a single write-lock critical section
/// over the relevant collection — this is the serializability the engine
/// relies on instead of a distributed transaction manager.
pub struct Store {
    base: PathBuf,
    workspaces: RwLock<HashMap<String, Workspace>>,
    tools: RwLock<HashMap<String, Tool>>,
    runs: RwLock<HashMap<String, Run>>,
    steps: RwLock<HashMap<(String, String), Step>>,
    events: RwLock<Vec<Event>>,
    receipts: RwLock<Vec<PaymentReceipt>>,
    artifacts: RwLock<HashMap<(String, String), StepArtifact>>,
}

impl Store {
    pub async fn new(base: impl AsRef<Path>) -> StoreResult<Self> {
        let base = base.as_ref().to_path_buf();
        fs::create_dir_all(&base)
            .await
            .map_err(|e| StoreError::Transient(e.to_string()))?;

        let workspaces = load_map(&base, "workspaces.json").await;
        let tools = load_map(&base, "tools.json").await;
        let runs = load_map(&base, "runs.json").await;
        let steps_flat: Vec<Step> = load_vec(&base, "steps.json").await;
        let steps = steps_flat
            .into_iter()
            .map(|s| ((s.run_id.clone(), s.step_id.clone()), s))
            .collect();
        let events = load_vec(&base, "events.json").await;
        let receipts = load_vec(&base, "receipts.json").await;
        let artifacts_flat: Vec<StepArtifact> = load_vec(&base, "artifacts.json").await;
        let artifacts = artifacts_flat
            .into_iter()
            .map(|a| ((a.run_id.clone(), a.step_id.clone()), a))
            .collect();

        Ok(Self {
            base,
            workspaces: RwLock::new(workspaces),
            tools: RwLock::new(tools),
            runs: RwLock::new(runs),
            steps: RwLock::new(steps),
            events: RwLock::new(events),
            receipts: RwLock::new(receipts),
            artifacts: RwLock::new(artifacts),
        })
    }

    // ---------------------------------------------------------------- workspaces

    pub async fn put_workspace(&self, workspace: Workspace) -> StoreResult<()> {
        self.workspaces
            .write()
            .await
            .insert(workspace.id.clone(), workspace);
        self.persist_map("workspaces.json", &self.workspaces).await
    }

    pub async fn get_workspace(&self, id: &str) -> StoreResult<Workspace> {
        self.workspaces
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("workspace {id}")))
    }

    // ---------------------------------------------------------------- tools

    pub async fn put_tool(&self, tool: Tool) -> StoreResult<()> {
        self.tools.write().await.insert(tool.id.clone(), tool);
        self.persist_map("tools.json", &self.tools).await
    }

    pub async fn get_tool(&self, id: &str) -> StoreResult<Tool> {
        self.tools
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("tool {id}")))
    }

    pub async fn list_tools_by_workspace(&self, workspace_id: &str) -> Vec<Tool> {
        let mut tools: Vec<Tool> = self
            .tools
            .read()
            .await
            .values()
            .filter(|t| t.workspace_id == workspace_id)
            .cloned()
            .collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    // ---------------------------------------------------------------- runs

    pub async fn put_run(&self, run: Run) -> StoreResult<()> {
        self.runs.write().await.insert(run.id.clone(), run);
        self.persist_map("runs.json", &self.runs).await
    }

    pub async fn get_run(&self, id: &str) -> StoreResult<Run> {
        self.runs
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("run {id}")))
    }

    /// Indexed scan `(workspace_id, created_at desc)`.
    pub async fn list_runs_by_workspace(&self, workspace_id: &str) -> Vec<Run> {
        let mut runs: Vec<Run> = self
            .runs
            .read()
            .await
            .values()
            .filter(|r| r.workspace_id == workspace_id)
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        runs
    }

    /// Applies `f` to the run under the write lock and persists the result.
    /// Used for monotonic/terminal writes that are idempotent under retry
    /// (status transitions, heartbeat) — not for the budget counter, which
    /// needs `compare_and_set_spent` below.
    pub async fn update_run<F>(&self, run_id: &str, f: F) -> StoreResult<Run>
    where
        F: FnOnce(&mut Run),
    {
        {
            let mut guard = self.runs.write().await;
            let run = guard
                .get_mut(run_id)
                .ok_or_else(|| StoreError::NotFound(format!("run {run_id}")))?;
            f(run);
            run.updated_at = Utc::now();
        }
        self.persist_map("runs.json", &self.runs).await?;
        self.get_run(run_id).await
    }

    /// Optimistic compare-and-set on `budget.spent_atomic`: succeeds only if
    /// the observed prior value still matches `expected_spent` at write time.
    pub async fn compare_and_set_spent(
        &self,
        run_id: &str,
        expected_spent: u128,
        new_spent: u128,
    ) -> StoreResult<Run> {
        {
            let mut guard = self.runs.write().await;
            let run = guard
                .get_mut(run_id)
                .ok_or_else(|| StoreError::NotFound(format!("run {run_id}")))?;
            if run.budget.spent_atomic != expected_spent {
                return Err(StoreError::Conflict(format!(
                    "spent_atomic changed: expected {expected_spent}, found {}",
                    run.budget.spent_atomic
                )));
            }
            run.budget.spent_atomic = new_spent;
            run.updated_at = Utc::now();
        }
        self.persist_map("runs.json", &self.runs).await?;
        self.get_run(run_id).await
    }

    // ---------------------------------------------------------------- steps

    pub async fn put_steps(&self, steps: Vec<Step>) -> StoreResult<()> {
        {
            let mut guard = self.steps.write().await;
            for step in steps {
                guard.insert((step.run_id.clone(), step.step_id.clone()), step);
            }
        }
        self.persist_steps().await
    }

    pub async fn get_step(&self, run_id: &str, step_id: &str) -> StoreResult<Step> {
        self.steps
            .read()
            .await
            .get(&(run_id.to_string(), step_id.to_string()))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("step {run_id}/{step_id}")))
    }

    pub async fn list_steps_by_run(&self, run_id: &str) -> Vec<Step> {
        self.steps
            .read()
            .await
            .values()
            .filter(|s| s.run_id == run_id)
            .cloned()
            .collect()
    }

    pub async fn update_step<F>(&self, run_id: &str, step_id: &str, f: F) -> StoreResult<Step>
    where
        F: FnOnce(&mut Step),
    {
        {
            let mut guard = self.steps.write().await;
            let step = guard
                .get_mut(&(run_id.to_string(), step_id.to_string()))
                .ok_or_else(|| StoreError::NotFound(format!("step {run_id}/{step_id}")))?;
            f(step);
            step.updated_at = Utc::now();
        }
        self.persist_steps().await?;
        self.get_step(run_id, step_id).await
    }

    /// Atomic claim: select one step with `status = queued` and
    /// `next_eligible_at` unset or `<= now`, optionally scoped to a single
    /// run, ordered by `updated_at asc`; transition it to `running` with a
    /// fresh lease and incremented attempt counter, returning the
    /// after-image. Returns `Ok(None)` when no eligible step exists.
    pub async fn claim_next_queued_step(
        &self,
        scope_run_id: Option<&str>,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Step>> {
        let mut guard = self.steps.write().await;
        let key = {
            let mut candidates: Vec<&Step> = guard
                .values()
                .filter(|s| {
                    s.status == StepStatus::Queued
                        && s.next_eligible_at.map(|t| t <= now).unwrap_or(true)
                        && scope_run_id.map(|r| r == s.run_id).unwrap_or(true)
                })
                .collect();
            candidates.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
            candidates
                .first()
                .map(|s| (s.run_id.clone(), s.step_id.clone()))
        };
        let Some(key) = key else {
            return Ok(None);
        };
        let step = guard.get_mut(&key).expect("key came from this map");
        step.status = StepStatus::Running;
        step.locked_by = Some(wfe_types::StepLock {
            worker_id: worker_id.to_string(),
            locked_at: now,
        });
        step.attempt += 1;
        step.updated_at = now;
        let after = step.clone();
        drop(guard);
        self.persist_steps().await?;
        Ok(Some(after))
    }

    /// Stall recovery: steps `running` with a lease older than `threshold`
    /// are reset to `queued` and their lease cleared.
    pub async fn reset_stale_running_steps(
        &self,
        threshold: chrono::Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<Step>> {
        let mut reset = Vec::new();
        {
            let mut guard = self.steps.write().await;
            for step in guard.values_mut() {
                if step.status == StepStatus::Running {
                    if let Some(lock) = &step.locked_by {
                        if now - lock.locked_at > threshold {
                            step.status = StepStatus::Queued;
                            step.locked_by = None;
                            step.updated_at = now;
                            reset.push(step.clone());
                        }
                    }
                }
            }
        }
        if !reset.is_empty() {
            self.persist_steps().await?;
        }
        Ok(reset)
    }

    async fn persist_steps(&self) -> StoreResult<()> {
        let flat: Vec<Step> = self.steps.read().await.values().cloned().collect();
        write_json(&self.base.join("steps.json"), &flat).await
    }

    // ---------------------------------------------------------------- events

    pub async fn append_event(&self, event: Event) -> StoreResult<()> {
        self.events.write().await.push(event);
        let flat: Vec<Event> = self.events.read().await.clone();
        write_json(&self.base.join("events.json"), &flat).await
    }

    /// Returns events for `run_id` with `ts > after`, ordered ascending.
    pub async fn events_since(&self, run_id: &str, after: DateTime<Utc>) -> Vec<Event> {
        let mut events: Vec<Event> = self
            .events
            .read()
            .await
            .iter()
            .filter(|e| e.run_id == run_id && e.ts > after)
            .cloned()
            .collect();
        events.sort_by(|a, b| a.ts.cmp(&b.ts));
        events
    }

    // ---------------------------------------------------------------- receipts

    pub async fn insert_receipt(&self, receipt: PaymentReceipt) -> StoreResult<()> {
        self.receipts.write().await.push(receipt);
        let flat: Vec<PaymentReceipt> = self.receipts.read().await.clone();
        write_json(&self.base.join("receipts.json"), &flat).await
    }

    pub async fn list_receipts_by_run(&self, run_id: &str) -> Vec<PaymentReceipt> {
        self.receipts
            .read()
            .await
            .iter()
            .filter(|r| r.run_id == run_id)
            .cloned()
            .collect()
    }

    // ---------------------------------------------------------------- artifacts

    pub async fn put_artifact(&self, artifact: StepArtifact) -> StoreResult<()> {
        self.artifacts
            .write()
            .await
            .insert((artifact.run_id.clone(), artifact.step_id.clone()), artifact);
        let flat: Vec<StepArtifact> = self.artifacts.read().await.values().cloned().collect();
        write_json(&self.base.join("artifacts.json"), &flat).await
    }

    async fn persist_map<T: serde::Serialize + Clone>(
        &self,
        filename: &str,
        map: &RwLock<HashMap<String, T>>,
    ) -> StoreResult<()> {
        let owned: Vec<T> = map.read().await.values().cloned().collect();
        write_json(&self.base.join(filename), &owned).await
    }
}

async fn load_map<T: serde::de::DeserializeOwned + HasId>(
    base: &Path,
    filename: &str,
) -> HashMap<String, T> {
    let items: Vec<T> = load_vec(base, filename).await;
    items.into_iter().map(|i| (i.id(), i)).collect()
}

async fn load_vec<T: serde::de::DeserializeOwned>(base: &Path, filename: &str) -> Vec<T> {
    let path = base.join(filename);
    match fs::read_to_string(&path).await {
        Ok(raw) => serde_json::from_str(&raw).unwrap_or_default(),
        Err(_) => Vec::new(),
    }
}

async fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> StoreResult<()> {
    let raw = serde_json::to_string_pretty(value).map_err(|e| StoreError::Transient(e.to_string()))?;
    fs::write(path, raw)
        .await
        .map_err(|e| StoreError::Transient(e.to_string()))
}

trait HasId {
    fn id(&self) -> String;
}

impl HasId for Workspace {
    fn id(&self) -> String {
        self.id.clone()
    }
}

impl HasId for Tool {
    fn id(&self) -> String {
        self.id.clone()
    }
}

impl HasId for Run {
    fn id(&self) -> String {
        self.id.clone()
    }
}

/// Shared handle type used throughout `AppState`.
pub type SharedStore = Arc<Store>;
