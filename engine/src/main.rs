use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use wfe_budget::BudgetLedger;
use wfe_config::EngineConfig;
use wfe_events::{EventBus, EventLog};
use wfe_executor::StepExecutor;
use wfe_orchestrator::RunLifecycle;
use wfe_payments::X402Client;
use wfe_scheduler::ClaimScheduler;
use wfe_server::{serve, AppState};
use wfe_store::{SharedStore, Store};
use wfe_tools::ToolRegistry;

mod adapters;

#[derive(Parser, Debug)]
#[command(name = "wfe-engine")]
#[command(about = "Headless workflow engine: durable DAG execution behind an HTTP 402 paywall")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(long, env = "WFE_STATE_DIR", default_value = ".wfe")]
    state_dir: PathBuf,

    #[arg(long, env = "WFE_PLANNER_URL")]
    planner_url: String,
    #[arg(long, env = "WFE_DISCOVERY_URL")]
    discovery_url: String,
    #[arg(long, env = "WFE_LLM_URL")]
    llm_url: String,
    #[arg(long, env = "WFE_WALLET_URL")]
    wallet_url: String,
    #[arg(long, env = "WFE_WALLET_ADDRESS")]
    wallet_address: String,
    #[arg(long, env = "WFE_IDENTITY_URL")]
    identity_url: String,
    #[arg(long, env = "WFE_PROVIDER_API_KEY")]
    provider_api_key: Option<String>,
    #[arg(long, env = "WFE_CRON_SECRET")]
    cron_secret: Option<String>,
    #[arg(long, env = "WFE_CONFIG_FILE")]
    config_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Runs the HTTP boundary: createRun/executeRun/tickAll/eventsStream.
    Serve {
        #[arg(long, alias = "host", default_value = "127.0.0.1")]
        hostname: String,
        #[arg(long, default_value_t = 3000)]
        port: u16,
    },
    /// Runs one unscoped claim-scheduler tick and exits — for a cron
    /// trigger that shells out instead of calling `POST /tick` over HTTP.
    Tick {
        #[arg(long, default_value_t = 10)]
        max_steps: usize,
        #[arg(long, default_value_t = 5)]
        concurrency: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    wfe_observability::init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve { hostname, port } => {
            let state = build_state(&cli).await?;
            let addr: SocketAddr = format!("{hostname}:{port}").parse().context("invalid hostname or port")?;
            info!("starting wfe-engine on http://{addr}, state_dir={}", cli.state_dir.display());
            serve(addr, state).await?;
        }
        Command::Tick { max_steps, concurrency } => {
            let store: SharedStore = Arc::new(Store::new(&cli.state_dir).await?);
            let scheduler = build_scheduler(store, &cli).await?;
            let result = scheduler.tick(max_steps, concurrency, None).await;
            println!("{}", serde_json::to_string(&result)?);
        }
    }

    Ok(())
}

/// Loads the project config file named on the CLI (or `<state_dir>/config.json`
/// when unset), overlaid by `WFE_*` env vars — no CLI-flag layer here, since
/// every tunable this crate exposes already has its own `--flag`/`env` pair.
async fn load_config(cli: &Cli) -> anyhow::Result<Arc<EngineConfig>> {
    let path = cli
        .config_file
        .clone()
        .unwrap_or_else(|| cli.state_dir.join("config.json"));
    Ok(Arc::new(wfe_config::load(path, None).await?))
}

async fn build_scheduler(store: SharedStore, cli: &Cli) -> anyhow::Result<ClaimScheduler> {
    let config = load_config(cli).await?;
    let events = EventLog::new(store.clone(), EventBus::new());
    let budget = BudgetLedger::new(store.clone());
    let tools = ToolRegistry::new(store.clone());
    let payments = X402Client::new(X402Client::default_http_client(), store.clone(), events.clone());
    let wallet = Arc::new(adapters::HttpWallet::new(
        cli.wallet_url.clone(),
        cli.provider_api_key.clone(),
        cli.wallet_address.clone(),
    ));
    let llm = Arc::new(adapters::HttpLlmClient::new(cli.llm_url.clone(), cli.provider_api_key.clone()));
    let executor = Arc::new(StepExecutor::new(
        store.clone(),
        events,
        budget,
        tools,
        payments,
        wallet,
        llm,
        config.clone(),
    ));
    Ok(ClaimScheduler::new(store, executor, config))
}

async fn build_state(cli: &Cli) -> anyhow::Result<AppState> {
    let config = load_config(cli).await?;
    let store: SharedStore = Arc::new(Store::new(&cli.state_dir).await?);
    let bus = EventBus::new();
    let events = EventLog::new(store.clone(), bus);
    let lifecycle = Arc::new(RunLifecycle::new(store.clone(), events.clone()));
    let budget = BudgetLedger::new(store.clone());
    let tools = ToolRegistry::new(store.clone());
    let payments = X402Client::new(X402Client::default_http_client(), store.clone(), events.clone());
    let wallet = Arc::new(adapters::HttpWallet::new(
        cli.wallet_url.clone(),
        cli.provider_api_key.clone(),
        cli.wallet_address.clone(),
    ));
    let llm = Arc::new(adapters::HttpLlmClient::new(cli.llm_url.clone(), cli.provider_api_key.clone()));
    let executor = Arc::new(StepExecutor::new(
        store.clone(),
        events.clone(),
        budget,
        tools.clone(),
        payments,
        wallet,
        llm,
        config.clone(),
    ));
    let scheduler = Arc::new(ClaimScheduler::new(store.clone(), executor, config.clone()));

    let planner = Arc::new(adapters::HttpPlanner::new(cli.planner_url.clone(), cli.provider_api_key.clone()));
    let discovery = Arc::new(adapters::HttpToolDiscovery::new(cli.discovery_url.clone(), cli.provider_api_key.clone()));
    let identity = Arc::new(adapters::HttpIdentity::new(cli.identity_url.clone()));

    Ok(AppState {
        store,
        events,
        lifecycle,
        scheduler,
        tools,
        planner,
        discovery,
        identity,
        cron_secret: cli.cron_secret.clone(),
        config,
    })
}
