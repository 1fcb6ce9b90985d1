//! Per-node-type dispatch plus the post-processing that persists outcomes,
//! unblocks dependents, and arbitrates retries.

mod json_repair;
mod retry;

use std::sync::Arc;

use serde_json::Value;

use tracing::Level;

use wfe_budget::BudgetLedger;
use wfe_config::EngineConfig;
use wfe_events::EventLog;
use wfe_observability::{emit, Component, EngineEventFields};
use wfe_orchestrator::RunLifecycle;
use wfe_payments::{FetchOpts, PaymentError, RequestSpec, X402Client};
use wfe_providers::{LlmClient, LlmRequest, Wallet};
use wfe_store::{SharedStore, StoreResult};
use wfe_tools::ToolRegistry;
use wfe_types::{
    event_types, Actor, Event, Node, NodeType, Run, RunStatus, Step, StepError, StepMetrics,
    StepStatus,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecOutcome {
    Succeeded,
    Blocked,
    Retrying,
    Failed,
    /// The owning run is no longer executable (canceled, or already
    /// terminal) — the scheduler should simply drop this claim.
    Skipped,
}

pub struct StepExecutor {
    store: SharedStore,
    events: EventLog,
    budget: BudgetLedger,
    tools: ToolRegistry,
    payments: X402Client,
    wallet: Arc<dyn Wallet>,
    llm: Arc<dyn LlmClient>,
    plain_http: reqwest::Client,
    config: Arc<EngineConfig>,
}

impl StepExecutor {
    pub fn new(
        store: SharedStore,
        events: EventLog,
        budget: BudgetLedger,
        tools: ToolRegistry,
        payments: X402Client,
        wallet: Arc<dyn Wallet>,
        llm: Arc<dyn LlmClient>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            store,
            events,
            budget,
            tools,
            payments,
            wallet,
            llm,
            plain_http: reqwest::Client::new(),
            config,
        }
    }

    pub async fn execute(
        &self,
        run_id: &str,
        step_id: &str,
        worker_id: &str,
    ) -> StoreResult<ExecOutcome> {
        let run = self.store.get_run(run_id).await?;
        if !run.status.is_executable() {
            return Ok(ExecOutcome::Skipped);
        }
        let step = self.store.get_step(run_id, step_id).await?;
        let Some(node) = run.graph.node(step_id).cloned() else {
            return self
                .finish_failed(&run, &step, StepError {
                    code: "FATAL".to_string(),
                    message: "step has no corresponding graph node".to_string(),
                    stack: None,
                    context: None,
                }, false, self.config.default_retry_cap)
                .await;
        };

        self.events
            .append(Event::new(
                run_id,
                &run.workspace_id,
                event_types::STEP_STARTED,
                serde_json::json!({ "stepId": step_id, "workerId": worker_id, "attempt": step.attempt }),
                Actor::system(),
            ))
            .await?;
        emit(
            Level::INFO,
            Component::Executor,
            "step_started",
            EngineEventFields {
                run_id: Some(run_id),
                step_id: Some(step_id),
                worker_id: Some(worker_id),
                ..Default::default()
            },
        );

        let inputs = self.gather_inputs(&run, &node).await?;
        let outcome = self.dispatch(&run, &node, &inputs).await;

        match outcome {
            NodeOutcome::Succeeded { outputs, metrics, paid_amount } => {
                if let (Some(amount), Some(tool_id)) = (paid_amount, node.tool_id.as_ref()) {
                    let _ = self.budget.check_and_deduct(run_id, amount).await?;
                    let _ = tool_id;
                }
                self.store
                    .update_step(run_id, step_id, |s| {
                        s.status = StepStatus::Succeeded;
                        s.outputs = Some(outputs);
                        s.metrics = Some(metrics);
                        s.locked_by = None;
                    })
                    .await?;
                self.events
                    .append(Event::new(
                        run_id,
                        &run.workspace_id,
                        event_types::STEP_SUCCEEDED,
                        serde_json::json!({ "stepId": step_id }),
                        Actor::system(),
                    ))
                    .await?;
                emit(
                    Level::INFO,
                    Component::Executor,
                    "step_succeeded",
                    EngineEventFields {
                        run_id: Some(run_id),
                        step_id: Some(step_id),
                        ..Default::default()
                    },
                );
                let lifecycle = RunLifecycle::new(self.store.clone(), self.events.clone());
                lifecycle.unblock_dependents(run_id, step_id).await?;
                lifecycle.check_completion(run_id).await?;
                Ok(ExecOutcome::Succeeded)
            }
            NodeOutcome::Blocked { reason } => {
                self.store
                    .update_step(run_id, step_id, |s| {
                        s.status = StepStatus::Blocked;
                        s.error = Some(StepError {
                            code: "AWAITING_APPROVAL".to_string(),
                            message: reason,
                            stack: None,
                            context: None,
                        });
                        s.locked_by = None;
                    })
                    .await?;
                self.events
                    .append(Event::new(
                        run_id,
                        &run.workspace_id,
                        event_types::STEP_BLOCKED,
                        serde_json::json!({ "stepId": step_id }),
                        Actor::system(),
                    ))
                    .await?;
                self.store
                    .update_run(run_id, |r| {
                        r.status = RunStatus::PausedForApproval;
                    })
                    .await?;
                Ok(ExecOutcome::Blocked)
            }
            NodeOutcome::Failed { error, retryable } => {
                let max_retries = node.policy.max_retries.unwrap_or(self.config.default_retry_cap);
                self.finish_failed(&run, &step, error, retryable, max_retries).await
            }
        }
    }

    async fn finish_failed(
        &self,
        run: &Run,
        step: &Step,
        error: StepError,
        retryable: bool,
        max_retries: u32,
    ) -> StoreResult<ExecOutcome> {
        let run_id = &run.id;
        let step_id = &step.step_id;
        if retryable && step.attempt < max_retries {
            let delay = retry::backoff_ms(
                step.attempt,
                self.config.backoff_base_ms,
                self.config.backoff_max_ms,
                self.config.jitter_fraction,
            );
            let next_eligible = wfe_types::now() + chrono::Duration::milliseconds(delay as i64);
            self.store
                .update_step(run_id, step_id, |s| {
                    s.status = StepStatus::Queued;
                    s.error = Some(error.clone());
                    s.next_eligible_at = Some(next_eligible);
                    s.locked_by = None;
                })
                .await?;
            self.events
                .append(Event::new(
                    run_id,
                    &run.workspace_id,
                    event_types::STEP_RETRY_SCHEDULED,
                    serde_json::json!({ "stepId": step_id, "backoffMs": delay }),
                    Actor::system(),
                ))
                .await?;
            emit(
                Level::WARN,
                Component::Executor,
                "step_retry_scheduled",
                EngineEventFields {
                    run_id: Some(run_id),
                    step_id: Some(step_id),
                    error_code: Some(&error.code),
                    detail: Some(&error.message),
                    ..Default::default()
                },
            );
            return Ok(ExecOutcome::Retrying);
        }

        let error_code = error.code.clone();
        let error_message = error.message.clone();
        self.store
            .update_step(run_id, step_id, |s| {
                s.status = StepStatus::Failed;
                s.error = Some(error);
                s.locked_by = None;
            })
            .await?;
        self.events
            .append(Event::new(
                run_id,
                &run.workspace_id,
                event_types::STEP_FAILED,
                serde_json::json!({ "stepId": step_id }),
                Actor::system(),
            ))
            .await?;
        emit(
            Level::ERROR,
            Component::Executor,
            "step_failed",
            EngineEventFields {
                run_id: Some(run_id),
                step_id: Some(step_id),
                error_code: Some(&error_code),
                detail: Some(&error_message),
                ..Default::default()
            },
        );
        self.store
            .update_run(run_id, |r| {
                r.status = RunStatus::Failed;
            })
            .await?;
        self.events
            .append(Event::new(
                run_id,
                &run.workspace_id,
                event_types::RUN_FAILED,
                serde_json::json!({ "stepId": step_id }),
                Actor::system(),
            ))
            .await?;
        Ok(ExecOutcome::Failed)
    }

    /// Merges the run's top-level input text with every dependency step's
    /// persisted outputs into a single flat object keyed by node id, used as
    /// the `{{key}}` substitution source.
    async fn gather_inputs(&self, run: &Run, node: &Node) -> StoreResult<Value> {
        let mut merged: serde_json::Map<String, Value> = serde_json::Map::new();
        merged.insert("input".to_string(), Value::String(run.input.text.clone()));
        for dep_id in run.graph.dependencies_of(&node.id) {
            if let Ok(dep_step) = self.store.get_step(&run.id, &dep_id).await {
                if let Some(outputs) = dep_step.outputs {
                    merged.insert(dep_id, outputs);
                }
            }
        }
        Ok(Value::Object(merged))
    }

    async fn dispatch(&self, run: &Run, node: &Node, inputs: &Value) -> NodeOutcome {
        if node.policy.requires_approval && node.node_type != NodeType::Approval {
            return NodeOutcome::Blocked {
                reason: format!("{:?} node requires approval per policy", node.node_type),
            };
        }
        match node.node_type {
            NodeType::ToolCall => self.exec_tool_call(run, node, inputs).await,
            NodeType::LlmReason => self.exec_llm_reason(node, inputs).await,
            NodeType::Approval => NodeOutcome::Blocked {
                reason: "awaiting manual approval".to_string(),
            },
            NodeType::Wait => {
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                NodeOutcome::Succeeded {
                    outputs: serde_json::json!({}),
                    metrics: StepMetrics::default(),
                    paid_amount: None,
                }
            }
            NodeType::Merge => NodeOutcome::Succeeded {
                outputs: serde_json::json!({ "mergedInputs": inputs }),
                metrics: StepMetrics::default(),
                paid_amount: None,
            },
            NodeType::Finalize => {
                let rendered = match &node.output_template {
                    Some(template) => wfe_tools::render_template(template, inputs),
                    None => inputs.to_string(),
                };
                NodeOutcome::Succeeded {
                    outputs: serde_json::json!({ "output": rendered }),
                    metrics: StepMetrics::default(),
                    paid_amount: None,
                }
            }
            NodeType::Branch => self.exec_branch(node, inputs),
        }
    }

    /// Evaluates `branchExpr` as a dotted path into the merged step inputs
    /// and records the resolved value as `outputs.branch`. `RunLifecycle`
    /// reads that field back to decide which outgoing `conditional` edge
    /// fires; it never runs inside the executor itself.
    fn exec_branch(&self, node: &Node, inputs: &Value) -> NodeOutcome {
        let Some(expr) = &node.branch_expr else {
            return NodeOutcome::Failed {
                error: StepError {
                    code: "FATAL".to_string(),
                    message: "branch node has no branchExpr".to_string(),
                    stack: None,
                    context: None,
                },
                retryable: false,
            };
        };
        match wfe_tools::resolve_path(inputs, expr) {
            Some(value) => {
                let chosen = wfe_tools::stringify_branch_value(&value);
                NodeOutcome::Succeeded {
                    outputs: serde_json::json!({ "branch": chosen }),
                    metrics: StepMetrics::default(),
                    paid_amount: None,
                }
            }
            None => NodeOutcome::Failed {
                error: StepError {
                    code: "FATAL".to_string(),
                    message: format!("branchExpr {expr:?} did not resolve against step inputs"),
                    stack: None,
                    context: None,
                },
                retryable: false,
            },
        }
    }

    async fn exec_tool_call(&self, run: &Run, node: &Node, inputs: &Value) -> NodeOutcome {
        let Some(tool_id) = &node.tool_id else {
            return NodeOutcome::Failed {
                error: StepError {
                    code: "TOOL_MISSING".to_string(),
                    message: "tool_call node has no toolId".to_string(),
                    stack: None,
                    context: None,
                },
                retryable: false,
            };
        };
        let tool = match self.tools.get(tool_id).await {
            Ok(t) => t,
            Err(_) => {
                return NodeOutcome::Failed {
                    error: StepError {
                        code: "TOOL_MISSING".to_string(),
                        message: format!("tool {tool_id} not found"),
                        stack: None,
                        context: None,
                    },
                    retryable: false,
                }
            }
        };

        let allowance = wfe_tools::resolve_payment_allowance(
            node,
            run.auto_pay_policy.auto_pay_enabled,
            run.auto_pay_policy.auto_pay_max_per_step_atomic,
            self.config.default_payment_max_atomic,
        );

        let body = node
            .request_template
            .as_ref()
            .map(|tmpl| {
                let rendered = wfe_tools::render_template(&tmpl.to_string(), inputs);
                serde_json::from_str(&rendered).unwrap_or_else(|_| inputs.clone())
            })
            .unwrap_or_else(|| inputs.clone());

        let url = format!("{}{}", tool.base_url, node.endpoint.clone().unwrap_or_default());
        let timeout_ms = node.policy.timeout_ms.unwrap_or(self.config.default_timeout_ms);
        let started = std::time::Instant::now();

        let result = if allowance.allowed {
            let request = RequestSpec {
                method: reqwest::Method::POST,
                body: Some(body),
                headers: vec![],
            };
            let opts = FetchOpts {
                max_payment_atomic: allowance.max_atomic,
                run_id: run.id.clone(),
                step_id: node.id.clone(),
                workspace_id: run.workspace_id.clone(),
                tool_id: Some(tool_id.clone()),
                allowlist: run.auto_pay_policy.tool_allowlist.clone(),
                timeout_ms,
            };
            match self.payments.fetch(self.wallet.as_ref(), &url, request, opts).await {
                Ok(outcome) => Ok((outcome.response, outcome.receipt.map(|r| r.amount_atomic))),
                Err(e) => Err(e),
            }
        } else {
            match self
                .plain_http
                .post(&url)
                .timeout(std::time::Duration::from_millis(timeout_ms))
                .json(&body)
                .send()
                .await
            {
                Ok(response) if response.status() == reqwest::StatusCode::PAYMENT_REQUIRED => {
                    Err(PaymentError::PolicyRejected(
                        "payment required but not allowed for this step".to_string(),
                    ))
                }
                Ok(response) => {
                    let json = response.json::<Value>().await.unwrap_or(Value::Null);
                    Ok((json, None))
                }
                Err(e) => Err(PaymentError::Transient(e.to_string())),
            }
        };

        let latency_ms = started.elapsed().as_millis() as f64;
        match result {
            Ok((outputs, paid_amount)) => {
                let _ = self
                    .tools
                    .record_invocation(tool_id, true, latency_ms, paid_amount)
                    .await;
                NodeOutcome::Succeeded {
                    outputs,
                    metrics: StepMetrics {
                        latency_ms: latency_ms as u64,
                        tokens: None,
                        cost_atomic: paid_amount,
                    },
                    paid_amount,
                }
            }
            Err(e) => {
                let _ = self
                    .tools
                    .record_invocation(tool_id, false, latency_ms, None)
                    .await;
                let retryable = matches!(&e, PaymentError::Transient(_));
                NodeOutcome::Failed {
                    error: StepError {
                        code: match &e {
                            PaymentError::PolicyRejected(_) => "POLICY_REJECTED".to_string(),
                            PaymentError::Protocol(_) => "PROTOCOL_ERROR".to_string(),
                            PaymentError::Transient(_) => "TRANSIENT".to_string(),
                        },
                        message: e.to_string(),
                        stack: None,
                        context: None,
                    },
                    retryable,
                }
            }
        }
    }

    async fn exec_llm_reason(&self, node: &Node, inputs: &Value) -> NodeOutcome {
        let system_prompt = node
            .system_prompt
            .clone()
            .unwrap_or_else(|| "Reason about the current workflow step and produce the requested output.".to_string());
        let user_prompt = match &node.user_prompt_template {
            Some(template) => wfe_tools::render_template(template, inputs),
            None => inputs.to_string(),
        };

        let request = LlmRequest {
            system_prompt,
            user_prompt,
            model: "default".to_string(),
            max_tokens: 2048,
            temperature: 0.2,
            reasoning: None,
            store: None,
        };

        match self.llm.call(request).await {
            Ok(response) => {
                let outputs = if node.output_format.as_deref() == Some("json") {
                    match json_repair::extract_json(&response.text) {
                        Some(value) => value,
                        None => {
                            return NodeOutcome::Failed {
                                error: StepError {
                                    code: "PROTOCOL_ERROR".to_string(),
                                    message: "llm output declared json but could not be parsed"
                                        .to_string(),
                                    stack: None,
                                    context: Some(Value::String(response.text)),
                                },
                                retryable: false,
                            }
                        }
                    }
                } else {
                    serde_json::json!({ "text": response.text })
                };
                NodeOutcome::Succeeded {
                    outputs,
                    metrics: StepMetrics {
                        latency_ms: 0,
                        tokens: Some(response.usage.total),
                        cost_atomic: None,
                    },
                    paid_amount: None,
                }
            }
            Err(e) => NodeOutcome::Failed {
                error: StepError {
                    code: "TRANSIENT".to_string(),
                    message: e.to_string(),
                    stack: None,
                    context: None,
                },
                retryable: true,
            },
        }
    }
}

enum NodeOutcome {
    Succeeded {
        outputs: Value,
        metrics: StepMetrics,
        paid_amount: Option<u128>,
    },
    Blocked {
        reason: String,
    },
    Failed {
        error: StepError,
        retryable: bool,
    },
}
