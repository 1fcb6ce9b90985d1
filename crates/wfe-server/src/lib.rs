//! HTTP boundary: request authn/membership guard plus the four entry
//! points — `createRun`, `executeRun`, `tickAll`, `eventsStream` — and
//! `cancelRun`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{Stream, StreamExt};
use serde::Serialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use wfe_config::EngineConfig;
use wfe_events::EventLog;
use wfe_orchestrator::RunLifecycle;
use wfe_providers::{AuthenticatedUser, Identity, Planner, ToolDiscovery};
use wfe_scheduler::ClaimScheduler;
use wfe_store::{SharedStore, StoreError};
use wfe_tools::ToolRegistry;
use wfe_types::{
    event_types, Actor, AutoPayPolicySnapshot, Event, Graph, Node, NodePolicy, NodeType, Run,
    RunBudget, RunInput, RunStatus,
};
use wfe_wire::{CreateRunRequest, CreateRunResponse, TickCountsResponse};

#[derive(Clone)]
pub struct AppState {
    pub store: SharedStore,
    pub events: EventLog,
    pub lifecycle: Arc<RunLifecycle>,
    pub scheduler: Arc<ClaimScheduler>,
    pub tools: ToolRegistry,
    pub planner: Arc<dyn Planner>,
    pub discovery: Arc<dyn ToolDiscovery>,
    pub identity: Arc<dyn Identity>,
    pub cron_secret: Option<String>,
    pub config: Arc<EngineConfig>,
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    error: String,
    code: Option<String>,
}

enum ApiError {
    Unauthorized,
    Forbidden,
    NotFound(String),
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, code) = match self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "missing or invalid credentials".to_string(),
                "AUTH_REQUIRED",
            ),
            ApiError::Forbidden => (
                StatusCode::FORBIDDEN,
                "not a member of this workspace".to_string(),
                "NOT_A_MEMBER",
            ),
            ApiError::NotFound(what) => (StatusCode::NOT_FOUND, what, "NOT_FOUND"),
            ApiError::BadRequest(why) => (StatusCode::BAD_REQUEST, why, "BAD_REQUEST"),
            ApiError::Internal(why) => (StatusCode::INTERNAL_SERVER_ERROR, why, "INTERNAL"),
        };
        (
            status,
            Json(ErrorEnvelope {
                error,
                code: Some(code.to_string()),
            }),
        )
            .into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => ApiError::NotFound(what),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    let raw = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    raw.trim().strip_prefix("Bearer ").map(str::trim).filter(|t| !t.is_empty())
}

async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<AuthenticatedUser, ApiError> {
    let token = extract_bearer(headers).ok_or(ApiError::Unauthorized)?;
    state
        .identity
        .authn(token)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or(ApiError::Unauthorized)
}

async fn require_membership(state: &AppState, user: &AuthenticatedUser, workspace_id: &str) -> Result<(), ApiError> {
    let is_member = state
        .identity
        .is_member(&user.user_id, workspace_id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    if is_member {
        Ok(())
    } else {
        Err(ApiError::Forbidden)
    }
}

pub fn app_router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);
    Router::new()
        .route("/runs", post(create_run))
        .route("/runs/{id}/execute", post(execute_run))
        .route("/runs/{id}/cancel", post(cancel_run))
        .route("/runs/{id}/events", get(events_stream))
        .route("/tick", post(tick_all))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let app = app_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_err() {
                futures::future::pending::<()>().await;
            }
        })
        .await?;
    Ok(())
}

/// `createRun(user, workspaceId, intent, voiceTranscript?, budgetMaxAtomic?)`.
/// A planner failure still produces a run — `failed`, empty graph,
/// `RUN_PLANNING_FAILED` — rather than a 5xx, since the intent was accepted
/// even though nothing executable came out of it.
async fn create_run(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateRunRequest>,
) -> Result<Json<CreateRunResponse>, ApiError> {
    let user = authenticate(&state, &headers).await?;
    require_membership(&state, &user, &request.workspace_id).await?;

    let workspace = state.store.get_workspace(&request.workspace_id).await?;
    let auto_pay_policy = AutoPayPolicySnapshot::from(workspace.settings.clone());
    let budget_ceiling = request
        .budget_max_atomic
        .unwrap_or(workspace.settings.auto_pay_max_per_run_atomic);

    let discovered = state
        .discovery
        .discover(&request.intent, &request.workspace_id, state.config.tool_discovery_max_results)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    let available_tools: Vec<wfe_types::Tool> = discovered.into_iter().map(|m| m.tool).collect();
    let plan_result = state
        .planner
        .plan(&request.intent, &available_tools, budget_ceiling, workspace.settings.auto_pay_enabled)
        .await;

    let input = RunInput {
        text: request.intent.clone(),
        voice_transcript: request.voice_transcript.clone(),
    };
    let budget = RunBudget {
        asset: "USDC".to_string(),
        network: state.config.default_network.clone(),
        max_atomic: budget_ceiling,
        spent_atomic: 0,
    };

    let run = match plan_result {
        Ok(plan) if plan.success => {
            let graph = plan.graph.ok_or_else(|| {
                ApiError::Internal("planner reported success without a graph".to_string())
            })?;
            graph
                .validate()
                .map_err(|e| ApiError::BadRequest(format!("planner produced an invalid graph: {e}")))?;
            let mut run = Run::new(&request.workspace_id, &user.user_id, input, graph, budget, auto_pay_policy);
            run.status = RunStatus::Queued;
            state.store.put_run(run.clone()).await?;
            state.lifecycle.materialize(&run.id).await?;
            run
        }
        planned => {
            let reason = match planned {
                Ok(plan) => plan.error.unwrap_or_else(|| "planner declined the intent".to_string()),
                Err(e) => e.to_string(),
            };
            let fallback_graph = Graph {
                nodes: vec![Node {
                    id: "fallback".to_string(),
                    node_type: NodeType::Finalize,
                    label: "planning failed".to_string(),
                    depends_on: vec![],
                    policy: NodePolicy::default(),
                    tool_id: None,
                    endpoint: None,
                    request_template: None,
                    payment: None,
                    system_prompt: None,
                    user_prompt_template: None,
                    output_format: None,
                    output_template: Some(request.intent.clone()),
                    branch_expr: None,
                    status_url: None,
                    completion_field: None,
                    completion_value: None,
                }],
                edges: Vec::new(),
                entry_node_id: "fallback".to_string(),
            };
            let mut run = Run::new(&request.workspace_id, &user.user_id, input, fallback_graph, budget, auto_pay_policy);
            run.status = RunStatus::Failed;
            state.store.put_run(run.clone()).await?;
            state
                .events
                .append(Event::new(
                    &run.id,
                    &request.workspace_id,
                    event_types::RUN_PLANNING_FAILED,
                    json!({ "reason": reason }),
                    Actor::system(),
                ))
                .await?;
            run
        }
    };

    Ok(Json(CreateRunResponse {
        run_id: run.id,
        status: run.status.as_str().to_string(),
    }))
}

/// `executeRun(user, runId)`: membership + executable status check, then
/// one user-scoped tick (`maxSteps=10, concurrency=1`).
async fn execute_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<TickCountsResponse>, ApiError> {
    let user = authenticate(&state, &headers).await?;
    let run = state.store.get_run(&run_id).await?;
    require_membership(&state, &user, &run.workspace_id).await?;

    if !run.status.is_executable() {
        return Err(ApiError::BadRequest(format!(
            "run {run_id} is not executable in status {:?}",
            run.status
        )));
    }
    if run.status == RunStatus::Queued {
        state
            .store
            .update_run(&run_id, |r| r.status = RunStatus::Running)
            .await?;
        state
            .events
            .append(Event::new(&run_id, &run.workspace_id, event_types::RUN_STARTED, json!({}), Actor::user(&user.user_id)))
            .await?;
    }

    let started = Instant::now();
    let result = state
        .scheduler
        .tick(state.config.max_steps_per_tick, state.config.user_tick_concurrency, Some(&run_id))
        .await;
    Ok(Json(TickCountsResponse::from_tick(result, started.elapsed().as_millis() as u64)))
}

/// `tickAll(cronAuth)`: a bearer secret distinct from user session auth,
/// checked directly against the configured cron secret rather than going
/// through `Identity`.
async fn tick_all(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<TickCountsResponse>, ApiError> {
    let expected = state.cron_secret.as_deref().ok_or(ApiError::Unauthorized)?;
    let provided = extract_bearer(&headers).ok_or(ApiError::Unauthorized)?;
    if provided != expected {
        return Err(ApiError::Unauthorized);
    }

    let started = Instant::now();
    let result = state
        .scheduler
        .tick(state.config.max_steps_per_tick, state.config.scheduled_tick_concurrency, None)
        .await;
    Ok(Json(TickCountsResponse::from_tick(result, started.elapsed().as_millis() as u64)))
}

/// `cancelRun(user, runId)`. Steps are left untouched; the claim selector
/// skips non-executable runs and executors re-check `getRun` at the top of
/// `execute`.
async fn cancel_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let user = authenticate(&state, &headers).await?;
    let run = state.store.get_run(&run_id).await?;
    require_membership(&state, &user, &run.workspace_id).await?;

    state
        .store
        .update_run(&run_id, |r| r.status = RunStatus::Canceled)
        .await?;
    state
        .events
        .append(Event::new(&run_id, &run.workspace_id, event_types::RUN_CANCELED, json!({}), Actor::user(&user.user_id)))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `eventsStream(user, runId)`.
async fn events_stream(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, std::convert::Infallible>>>, ApiError> {
    let user = authenticate(&state, &headers).await?;
    let run = state.store.get_run(&run_id).await?;
    require_membership(&state, &user, &run.workspace_id).await?;

    let raw = wfe_scheduler::subscribe(state.store.clone(), run_id, state.config.clone());
    let sse_stream = raw.filter_map(|item| async move {
        let frame = wfe_wire::to_sse_frame(item)?;
        let payload = serde_json::to_string(&frame).unwrap_or_default();
        Some(Ok(SseEvent::default().data(payload)))
    });
    Ok(Sse::new(sse_stream).keep_alive(KeepAlive::new().interval(std::time::Duration::from_secs(30))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;
    use wfe_budget::BudgetLedger;
    use wfe_payments::X402Client;
    use wfe_providers::{LlmClient, LlmRequest, LlmResponse, LlmUsage, PaymentRequirement, PlanResult, Wallet};
    use wfe_types::{NodeType, Workspace};

    struct StubIdentity;
    #[async_trait::async_trait]
    impl Identity for StubIdentity {
        async fn authn(&self, token: &str) -> anyhow::Result<Option<AuthenticatedUser>> {
            if token == "valid" {
                Ok(Some(AuthenticatedUser { user_id: "u1".to_string() }))
            } else {
                Ok(None)
            }
        }
        async fn is_member(&self, _user_id: &str, workspace_id: &str) -> anyhow::Result<bool> {
            Ok(workspace_id == "w1")
        }
    }

    struct StubPlanner {
        graph: Graph,
    }
    #[async_trait::async_trait]
    impl Planner for StubPlanner {
        async fn plan(
            &self,
            _intent: &str,
            _available_tools: &[wfe_types::Tool],
            _budget_ceiling_atomic: u128,
            _auto_pay_enabled: bool,
        ) -> anyhow::Result<PlanResult> {
            Ok(PlanResult {
                success: true,
                graph: Some(self.graph.clone()),
                reasoning: None,
                estimated_cost_atomic: None,
                error: None,
            })
        }
    }

    struct StubDiscovery;
    #[async_trait::async_trait]
    impl ToolDiscovery for StubDiscovery {
        async fn discover(
            &self,
            _intent: &str,
            _workspace_id: &str,
            _max_results: usize,
        ) -> anyhow::Result<Vec<wfe_providers::ToolDiscoveryMatch>> {
            Ok(vec![])
        }
    }

    struct NoopWallet;
    #[async_trait::async_trait]
    impl Wallet for NoopWallet {
        async fn balance(&self, _address: &str, _network: &str) -> anyhow::Result<u128> {
            Ok(0)
        }
        async fn sign(&self, _requirement: &PaymentRequirement) -> anyhow::Result<Vec<u8>> {
            Ok(vec![])
        }
        fn address(&self) -> String {
            "0x0".to_string()
        }
    }

    struct NoopLlm;
    #[async_trait::async_trait]
    impl LlmClient for NoopLlm {
        async fn call(&self, _request: LlmRequest) -> anyhow::Result<LlmResponse> {
            Ok(LlmResponse { text: "ok".to_string(), usage: LlmUsage::default() })
        }
    }

    fn finalize_graph() -> Graph {
        Graph {
            nodes: vec![wfe_types::Node {
                id: "a".to_string(),
                node_type: NodeType::Finalize,
                label: "a".to_string(),
                depends_on: vec![],
                policy: wfe_types::NodePolicy::default(),
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
            }],
            edges: vec![],
            entry_node_id: "a".to_string(),
        }
    }

    async fn test_state() -> AppState {
        let dir = tempfile::tempdir().unwrap();
        let store: SharedStore = Arc::new(wfe_store::Store::new(dir.path()).await.unwrap());
        let ts = wfe_types::now();
        store
            .put_workspace(Workspace {
                id: "w1".to_string(),
                name: "acme".to_string(),
                settings: wfe_types::WorkspaceSettings::default(),
                created_at: ts,
                updated_at: ts,
            })
            .await
            .unwrap();

        let bus = wfe_events::EventBus::new();
        let events = EventLog::new(store.clone(), bus);
        let lifecycle = Arc::new(RunLifecycle::new(store.clone(), events.clone()));
        let budget = BudgetLedger::new(store.clone());
        let tools = ToolRegistry::new(store.clone());
        let payments = X402Client::new(X402Client::default_http_client(), store.clone(), events.clone());
        let config = Arc::new(wfe_config::EngineConfig::default());
        let executor = Arc::new(wfe_executor::StepExecutor::new(
            store.clone(),
            events.clone(),
            budget,
            tools.clone(),
            payments,
            Arc::new(NoopWallet),
            Arc::new(NoopLlm),
            config.clone(),
        ));
        let scheduler = Arc::new(ClaimScheduler::new(store.clone(), executor, config.clone()));

        AppState {
            store,
            events,
            lifecycle,
            scheduler,
            tools,
            planner: Arc::new(StubPlanner { graph: finalize_graph() }),
            discovery: Arc::new(StubDiscovery),
            identity: Arc::new(StubIdentity),
            cron_secret: Some("cron-secret".to_string()),
            config,
        }
    }

    #[tokio::test]
    async fn create_run_rejects_non_members() {
        let state = test_state().await;
        let app = app_router(state);
        let req = Request::builder()
            .method("POST")
            .uri("/runs")
            .header("authorization", "Bearer valid")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"workspaceId":"other","intent":"book a flight"}"#))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn create_run_then_execute_drives_a_ready_step_to_completion() {
        let state = test_state().await;
        let app = app_router(state.clone());
        let req = Request::builder()
            .method("POST")
            .uri("/runs")
            .header("authorization", "Bearer valid")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"workspaceId":"w1","intent":"book a flight"}"#))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let payload: CreateRunResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(payload.status, "queued");

        let app = app_router(state);
        let req = Request::builder()
            .method("POST")
            .uri(format!("/runs/{}/execute", payload.run_id))
            .header("authorization", "Bearer valid")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let counts: TickCountsResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(counts.succeeded, 1);
    }

    #[tokio::test]
    async fn tick_all_rejects_wrong_secret() {
        let state = test_state().await;
        let app = app_router(state);
        let req = Request::builder()
            .method("POST")
            .uri("/tick")
            .header("authorization", "Bearer wrong")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
}
