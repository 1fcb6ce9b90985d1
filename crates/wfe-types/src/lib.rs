//! Shared data model for the durable workflow engine.
//!
//! These are plain value types — no storage or transport logic lives here.
//! `wfe-store` persists them, `wfe-wire` maps them to HTTP request/response
//! shapes, everything else operates on them directly.

mod event;
mod graph;
mod payment;
mod run;
mod step;
mod tool;
mod workspace;

pub use event::*;
pub use graph::*;
pub use payment::*;
pub use run::*;
pub use step::*;
pub use tool::*;
pub use workspace::*;

/// Default asset pricing precision: USDC has 6 decimal places.
pub const ASSET_DECIMALS: u32 = 6;

/// Compiled-in defaults for the engine-wide tunables. `wfe-config` reads
/// these as its fallback and layers a project file, environment
/// variables, and CLI overrides on top; nothing in this crate reads the
/// environment directly.
pub mod limits {
    pub const MAX_STEPS_PER_TICK: usize = 10;
    pub const SCHEDULED_TICK_CONCURRENCY: usize = 5;
    pub const USER_TICK_CONCURRENCY: usize = 1;
    pub const POLL_INTERVAL_MS: u64 = 2_000;
    pub const PING_INTERVAL_MS: u64 = 30_000;
    pub const STALL_THRESHOLD_MS: i64 = 300_000;
    pub const DEFAULT_RETRY_CAP: u32 = 3;
    pub const BACKOFF_BASE_MS: u64 = 1_000;
    pub const BACKOFF_MAX_MS: u64 = 60_000;
    pub const JITTER_FRACTION: f64 = 0.1;
    pub const DEFAULT_PAYMENT_MAX_ATOMIC: u128 = 1_000_000;
    pub const DEFAULT_NETWORK: &str = "eip155:84532";
    pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
    pub const TOOL_DISCOVERY_MAX_RESULTS: usize = 20;
}

/// Mint a fresh opaque id. All entity ids in this crate are opaque stable
/// strings, never structured or parsed by callers.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub fn now() -> chrono::DateTime<chrono::Utc> {
    chrono::Utc::now()
}
