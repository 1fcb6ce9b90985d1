//! Run lifecycle: step materialization, dependent unblocking, and
//! completion detection over a store-backed lifecycle where steps are
//! durable documents rather than an in-memory mission tree.

use std::collections::{HashSet, VecDeque};

use tracing::Level;

use wfe_events::EventLog;
use wfe_observability::{emit, Component, EngineEventFields};
use wfe_store::{SharedStore, StoreResult};
use wfe_types::{event_types, Actor, Event, Run, RunStatus, Step, StepStatus};

#[derive(Clone)]
pub struct RunLifecycle {
    store: SharedStore,
    events: EventLog,
}

impl RunLifecycle {
    pub fn new(store: SharedStore, events: EventLog) -> Self {
        Self { store, events }
    }

    /// Inserts one step per graph node, `queued` if initially ready else
    /// `blocked`, then appends `RUN_CREATED`.
    pub async fn materialize(&self, run_id: &str) -> StoreResult<()> {
        let run = self.store.get_run(run_id).await?;
        let steps: Vec<Step> = run
            .graph
            .nodes
            .iter()
            .map(|node| {
                if run.graph.is_initially_ready(&node.id) {
                    Step::new_queued(run_id, &run.workspace_id, &node.id, node.node_type)
                } else {
                    Step::new_blocked(run_id, &run.workspace_id, &node.id, node.node_type)
                }
            })
            .collect();
        self.store.put_steps(steps).await?;
        self.events
            .append(Event::new(
                run_id,
                &run.workspace_id,
                event_types::RUN_CREATED,
                serde_json::json!({ "nodeCount": run.graph.nodes.len() }),
                Actor::system(),
            ))
            .await
    }

    /// Unblocks every dependent of `step_id` whose full dependency set has
    /// now succeeded, walking outward breadth-first so a skipped branch arm
    /// (see `resolve_target`) cascades to its own dependents in the same
    /// call rather than waiting for them to be claimed and never run.
    pub async fn unblock_dependents(&self, run_id: &str, step_id: &str) -> StoreResult<()> {
        let mut queue: VecDeque<String> = VecDeque::from([step_id.to_string()]);
        let mut visited: HashSet<String> = HashSet::new();
        while let Some(current_id) = queue.pop_front() {
            if !visited.insert(current_id.clone()) {
                continue;
            }
            let run = self.store.get_run(run_id).await?;
            for target in run.graph.dependents_of(&current_id) {
                if self.resolve_target(&run, &target).await? {
                    queue.push_back(target);
                }
            }
        }
        Ok(())
    }

    /// Looks at one blocked dependent and either queues it, skips it, or
    /// leaves it waiting. Returns `true` when the step was just marked
    /// skipped, so the caller keeps walking outward from it.
    ///
    /// Branch routing: a `branch` step records
    /// its chosen value as `outputs.branch`; a `conditional` edge out of it
    /// only satisfies its target when `edge.condition` matches that value.
    /// A target whose only path in is a non-matching conditional edge can
    /// never become ready, so instead of leaving it `blocked` forever it is
    /// marked `succeeded` with `outputs.skipped = true` and the skip is
    /// propagated the same way to ITS dependents — any dependency on an
    /// already-skipped step is itself unsatisfiable, regardless of that
    /// edge's own type. This only resolves tree-shaped branch/fan-out
    /// graphs; a node that re-converges two branch arms (a "merge after
    /// branch" diamond) will also be skipped if either arm is, since
    /// dependency satisfaction here is still strict AND across all
    /// incoming edges — see DESIGN.md.
    async fn resolve_target(&self, run: &Run, target: &str) -> StoreResult<bool> {
        let current = self.store.get_step(&run.id, target).await?;
        if current.status != StepStatus::Blocked {
            return Ok(false);
        }
        let deps = run.graph.dependencies_of(target);
        let mut all_satisfied = true;
        let mut dead = false;
        for dep in &deps {
            let dep_step = self.store.get_step(&run.id, dep).await?;
            if dep_step.status != StepStatus::Succeeded {
                all_satisfied = false;
                continue;
            }
            let dep_skipped = dep_step
                .outputs
                .as_ref()
                .and_then(|o| o.get("skipped"))
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            if dep_skipped {
                dead = true;
                continue;
            }
            if let Some(edge) = run.graph.conditional_edge(dep, target) {
                let chosen = dep_step.outputs.as_ref().and_then(|o| o.get("branch")).and_then(|v| v.as_str());
                if edge.condition.as_deref() != chosen {
                    dead = true;
                }
            }
        }
        if dead {
            self.store
                .update_step(&run.id, target, |s| {
                    s.status = StepStatus::Succeeded;
                    s.outputs = Some(serde_json::json!({ "skipped": true, "reason": "branch condition not taken" }));
                })
                .await?;
            self.events
                .append(Event::new(
                    &run.id,
                    &run.workspace_id,
                    event_types::STEP_SKIPPED,
                    serde_json::json!({ "stepId": target }),
                    Actor::system(),
                ))
                .await?;
            emit(
                Level::INFO,
                Component::Lifecycle,
                "step_skipped",
                EngineEventFields {
                    run_id: Some(&run.id),
                    step_id: Some(target),
                    ..Default::default()
                },
            );
            return Ok(true);
        }
        if all_satisfied {
            self.store
                .update_step(&run.id, target, |s| {
                    s.status = StepStatus::Queued;
                })
                .await?;
        }
        Ok(false)
    }

    /// Aggregates step statuses; if none remain `queued`/`running`/`blocked`,
    /// transitions the run to its terminal status idempotently.
    pub async fn check_completion(&self, run_id: &str) -> StoreResult<Option<RunStatus>> {
        let run = self.store.get_run(run_id).await?;
        if run.status.is_terminal() {
            return Ok(Some(run.status));
        }
        let steps = self.store.list_steps_by_run(run_id).await;
        let pending = steps.iter().any(|s| s.status.is_pending());
        if pending {
            return Ok(None);
        }
        let any_failed = steps.iter().any(|s| s.status == StepStatus::Failed);
        let final_status = if any_failed {
            RunStatus::Failed
        } else {
            RunStatus::Succeeded
        };
        self.store
            .update_run(run_id, |r| {
                r.status = final_status;
            })
            .await?;
        let event_type = if any_failed {
            event_types::RUN_FAILED
        } else {
            event_types::RUN_SUCCEEDED
        };
        self.events
            .append(Event::new(
                run_id,
                &run.workspace_id,
                event_type,
                serde_json::json!({ "status": final_status.as_str() }),
                Actor::system(),
            ))
            .await?;
        emit(
            Level::INFO,
            Component::Lifecycle,
            "run_completed",
            EngineEventFields {
                run_id: Some(run_id),
                status: Some(final_status.as_str()),
                ..Default::default()
            },
        );
        Ok(Some(final_status))
    }

    pub async fn heartbeat(&self, run_id: &str) -> StoreResult<()> {
        self.store
            .update_run(run_id, |r| {
                r.last_heartbeat_at = Some(wfe_types::now());
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use wfe_events::EventBus;
    use wfe_types::{
        AutoPayPolicySnapshot, Edge, EdgeType, Graph, Node, NodePolicy, NodeType, Run, RunBudget,
        RunInput, WorkspaceSettings,
    };

    fn node(id: &str) -> Node {
        Node {
            id: id.to_string(),
            node_type: NodeType::Finalize,
            label: id.to_string(),
            depends_on: vec![],
            policy: NodePolicy::default(),
            tool_id: None,
            endpoint: None,
            request_template: None,
            payment: None,
            system_prompt: None,
            user_prompt_template: None,
            output_format: None,
            output_template: None,
            branch_expr: None,
            status_url: None,
            completion_field: None,
            completion_value: None,
        }
    }

    async fn setup() -> (RunLifecycle, SharedStore, String) {
        let dir = tempfile::tempdir().unwrap();
        let store: SharedStore = Arc::new(wfe_store::Store::new(dir.path()).await.unwrap());
        let events = EventLog::new(store.clone(), EventBus::new());
        let lifecycle = RunLifecycle::new(store.clone(), events);

        let graph = Graph {
            nodes: vec![node("a"), node("b")],
            edges: vec![Edge {
                from: "a".to_string(),
                to: "b".to_string(),
                edge_type: EdgeType::Success,
                condition: None,
            }],
            entry_node_id: "a".to_string(),
        };
        let run = Run::new(
            "w1",
            "u1",
            RunInput::default(),
            graph,
            RunBudget {
                asset: "USDC".to_string(),
                network: "eip155:84532".to_string(),
                max_atomic: 1_000_000,
                spent_atomic: 0,
            },
            AutoPayPolicySnapshot::from(WorkspaceSettings::default()),
        );
        let run_id = run.id.clone();
        store.put_run(run).await.unwrap();
        (lifecycle, store, run_id)
    }

    #[tokio::test]
    async fn materialize_marks_entry_queued_and_rest_blocked() {
        let (lifecycle, store, run_id) = setup().await;
        lifecycle.materialize(&run_id).await.unwrap();
        let a = store.get_step(&run_id, "a").await.unwrap();
        let b = store.get_step(&run_id, "b").await.unwrap();
        assert_eq!(a.status, StepStatus::Queued);
        assert_eq!(b.status, StepStatus::Blocked);
    }

    #[tokio::test]
    async fn unblock_dependents_promotes_once_dependency_succeeds() {
        let (lifecycle, store, run_id) = setup().await;
        lifecycle.materialize(&run_id).await.unwrap();
        store
            .update_step(&run_id, "a", |s| s.status = StepStatus::Succeeded)
            .await
            .unwrap();
        lifecycle.unblock_dependents(&run_id, "a").await.unwrap();
        let b = store.get_step(&run_id, "b").await.unwrap();
        assert_eq!(b.status, StepStatus::Queued);
    }

    async fn setup_branch() -> (RunLifecycle, SharedStore, String) {
        let dir = tempfile::tempdir().unwrap();
        let store: SharedStore = Arc::new(wfe_store::Store::new(dir.path()).await.unwrap());
        let events = EventLog::new(store.clone(), EventBus::new());
        let lifecycle = RunLifecycle::new(store.clone(), events);

        let mut branch = node("branch");
        branch.node_type = NodeType::Branch;
        branch.branch_expr = Some("category".to_string());

        let graph = Graph {
            nodes: vec![
                branch,
                node("refund"),
                node("support"),
                node("support_followup"),
            ],
            edges: vec![
                Edge {
                    from: "branch".to_string(),
                    to: "refund".to_string(),
                    edge_type: EdgeType::Conditional,
                    condition: Some("refund".to_string()),
                },
                Edge {
                    from: "branch".to_string(),
                    to: "support".to_string(),
                    edge_type: EdgeType::Conditional,
                    condition: Some("support".to_string()),
                },
                Edge {
                    from: "support".to_string(),
                    to: "support_followup".to_string(),
                    edge_type: EdgeType::Success,
                    condition: None,
                },
            ],
            entry_node_id: "branch".to_string(),
        };
        let run = Run::new(
            "w1",
            "u1",
            RunInput::default(),
            graph,
            RunBudget {
                asset: "USDC".to_string(),
                network: "eip155:84532".to_string(),
                max_atomic: 1_000_000,
                spent_atomic: 0,
            },
            AutoPayPolicySnapshot::from(WorkspaceSettings::default()),
        );
        let run_id = run.id.clone();
        store.put_run(run).await.unwrap();
        (lifecycle, store, run_id)
    }

    #[tokio::test]
    async fn branch_unblocks_the_matching_arm_and_skips_the_other() {
        let (lifecycle, store, run_id) = setup_branch().await;
        lifecycle.materialize(&run_id).await.unwrap();
        store
            .update_step(&run_id, "branch", |s| {
                s.status = StepStatus::Succeeded;
                s.outputs = Some(serde_json::json!({ "branch": "refund" }));
            })
            .await
            .unwrap();
        lifecycle.unblock_dependents(&run_id, "branch").await.unwrap();

        let refund = store.get_step(&run_id, "refund").await.unwrap();
        assert_eq!(refund.status, StepStatus::Queued);

        let support = store.get_step(&run_id, "support").await.unwrap();
        assert_eq!(support.status, StepStatus::Succeeded);
        assert_eq!(support.outputs.unwrap()["skipped"], serde_json::json!(true));
    }

    #[tokio::test]
    async fn a_skip_cascades_to_the_skipped_arm_dependents() {
        let (lifecycle, store, run_id) = setup_branch().await;
        lifecycle.materialize(&run_id).await.unwrap();
        store
            .update_step(&run_id, "branch", |s| {
                s.status = StepStatus::Succeeded;
                s.outputs = Some(serde_json::json!({ "branch": "refund" }));
            })
            .await
            .unwrap();
        lifecycle.unblock_dependents(&run_id, "branch").await.unwrap();

        let followup = store.get_step(&run_id, "support_followup").await.unwrap();
        assert_eq!(followup.status, StepStatus::Succeeded);
        assert_eq!(followup.outputs.unwrap()["skipped"], serde_json::json!(true));
    }

    #[tokio::test]
    async fn completion_is_succeeded_when_all_steps_succeed() {
        let (lifecycle, store, run_id) = setup().await;
        lifecycle.materialize(&run_id).await.unwrap();
        store
            .update_step(&run_id, "a", |s| s.status = StepStatus::Succeeded)
            .await
            .unwrap();
        store
            .update_step(&run_id, "b", |s| s.status = StepStatus::Succeeded)
            .await
            .unwrap();
        let result = lifecycle.check_completion(&run_id).await.unwrap();
        assert_eq!(result, Some(RunStatus::Succeeded));
    }
}
