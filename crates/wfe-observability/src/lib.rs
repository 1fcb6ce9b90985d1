//! Structured tracing for the engine: one `tracing` event per lifecycle
//! transition, carrying the same handful of correlation fields everywhere
//! rather than free-form log strings.

use serde::Serialize;
use tracing::Level;

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Store,
    EventLog,
    Budget,
    Ssrf,
    Payments,
    Executor,
    Lifecycle,
    Scheduler,
    Server,
}

impl Component {
    pub fn as_str(self) -> &'static str {
        match self {
            Component::Store => "store",
            Component::EventLog => "event_log",
            Component::Budget => "budget",
            Component::Ssrf => "ssrf",
            Component::Payments => "payments",
            Component::Executor => "executor",
            Component::Lifecycle => "lifecycle",
            Component::Scheduler => "scheduler",
            Component::Server => "server",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EngineEventFields<'a> {
    pub run_id: Option<&'a str>,
    pub step_id: Option<&'a str>,
    pub worker_id: Option<&'a str>,
    pub status: Option<&'a str>,
    pub error_code: Option<&'a str>,
    pub detail: Option<&'a str>,
}

/// Emits one structured event. Call sites pick `Level` and `event` name;
/// correlation fields are always present (empty string when absent) so log
/// pipelines can index on them uniformly.
pub fn emit(level: Level, component: Component, event: &str, fields: EngineEventFields<'_>) {
    macro_rules! log_at {
        ($lvl:expr) => {
            tracing::event!(
                $lvl,
                target: "wfe.engine",
                component = component.as_str(),
                event = event,
                run_id = fields.run_id.unwrap_or(""),
                step_id = fields.step_id.unwrap_or(""),
                worker_id = fields.worker_id.unwrap_or(""),
                status = fields.status.unwrap_or(""),
                error_code = fields.error_code.unwrap_or(""),
                detail = fields.detail.unwrap_or(""),
            )
        };
    }
    match level {
        Level::ERROR => log_at!(Level::ERROR),
        Level::WARN => log_at!(Level::WARN),
        Level::DEBUG => log_at!(Level::DEBUG),
        Level::TRACE => log_at!(Level::TRACE),
        _ => log_at!(Level::INFO),
    }
}

/// Initializes the global subscriber once for the `wfe-engine` binary.
/// Idempotent: a second call is a harmless no-op via `try_init`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .try_init();
}
