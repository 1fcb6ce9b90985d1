//! Claim scheduler tick loop and the event-stream fan-out it feeds.

mod stream;
mod tick;

pub use stream::{subscribe, EventFrame, StreamItem};
pub use tick::{ClaimScheduler, TickResult};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use wfe_budget::BudgetLedger;
    use wfe_events::{EventBus, EventLog};
    use wfe_executor::StepExecutor;
    use wfe_payments::X402Client;
    use wfe_providers::{LlmClient, LlmRequest, LlmResponse, LlmUsage, PaymentRequirement, Wallet};
    use wfe_store::{SharedStore, Store};
    use wfe_tools::ToolRegistry;
    use wfe_types::{
        AutoPayPolicySnapshot, Edge, EdgeType, Graph, Node, NodePolicy, NodeType, Run, RunBudget,
        RunInput, WorkspaceSettings,
    };

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
            Ok(LlmResponse {
                text: "ok".to_string(),
                usage: LlmUsage::default(),
            })
        }
    }

    fn finalize_node(id: &str) -> Node {
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

    #[tokio::test]
    async fn tick_claims_and_executes_a_ready_finalize_step() {
        let dir = tempfile::tempdir().unwrap();
        let store: SharedStore = Arc::new(Store::new(dir.path()).await.unwrap());
        let bus = EventBus::new();
        let events = EventLog::new(store.clone(), bus);

        let graph = Graph {
            nodes: vec![finalize_node("a")],
            edges: Vec::<Edge>::new(),
            entry_node_id: "a".to_string(),
        };
        let run = Run::new(
            "w1",
            "u1",
            RunInput { text: "hello".to_string(), voice_transcript: None },
            graph,
            RunBudget {
                asset: "USDC".to_string(),
                network: "eip155:84532".to_string(),
                max_atomic: 1_000_000,
                spent_atomic: 0,
            },
            AutoPayPolicySnapshot::from(WorkspaceSettings::default()),
        );
        let mut run = run;
        run.status = wfe_types::RunStatus::Running;
        let run_id = run.id.clone();
        store.put_run(run).await.unwrap();

        let lifecycle = wfe_orchestrator::RunLifecycle::new(store.clone(), events.clone());
        lifecycle.materialize(&run_id).await.unwrap();

        let budget = BudgetLedger::new(store.clone());
        let tools = ToolRegistry::new(store.clone());
        let payments = X402Client::new(X402Client::default_http_client(), store.clone(), events.clone());
        let config = Arc::new(wfe_config::EngineConfig::default());
        let executor = Arc::new(StepExecutor::new(
            store.clone(),
            events.clone(),
            budget,
            tools,
            payments,
            Arc::new(NoopWallet),
            Arc::new(NoopLlm),
            config.clone(),
        ));

        let scheduler = ClaimScheduler::new(store.clone(), executor, config);
        let result = scheduler.tick(10, 1, Some(&run_id)).await;
        assert_eq!(result.claimed, 1);
        assert_eq!(result.succeeded, 1);

        let run = store.get_run(&run_id).await.unwrap();
        assert_eq!(run.status, wfe_types::RunStatus::Succeeded);
    }
}
