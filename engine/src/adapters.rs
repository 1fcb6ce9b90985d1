//! Thin HTTP adapters for the engine's external collaborators: planner,
//! tool discovery, LLM, wallet, identity. Each of these just posts a
//! bearer-authed JSON request body and deserializes the reply into the
//! contract type from `wfe-providers`.

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use wfe_providers::{
    AuthenticatedUser, Identity, LlmClient, LlmRequest, LlmResponse, PaymentRequirement, PlanResult,
    Planner, ToolDiscovery, ToolDiscoveryMatch, Wallet,
};
use wfe_types::Tool;

pub struct HttpPlanner {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpPlanner {
    pub fn new(base_url: String, api_key: Option<String>) -> Self {
        Self { client: Client::new(), base_url, api_key }
    }
}

#[async_trait]
impl Planner for HttpPlanner {
    async fn plan(
        &self,
        intent: &str,
        available_tools: &[Tool],
        budget_ceiling_atomic: u128,
        auto_pay_enabled: bool,
    ) -> anyhow::Result<PlanResult> {
        let mut request = self.client.post(format!("{}/plan", self.base_url)).json(&json!({
            "intent": intent,
            "availableTools": available_tools,
            "budgetCeilingAtomic": budget_ceiling_atomic.to_string(),
            "autoPayEnabled": auto_pay_enabled,
        }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await.context("planner request failed")?;
        response
            .error_for_status()
            .context("planner returned an error status")?
            .json::<PlanResult>()
            .await
            .context("planner returned an unparseable body")
    }
}

pub struct HttpToolDiscovery {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpToolDiscovery {
    pub fn new(base_url: String, api_key: Option<String>) -> Self {
        Self { client: Client::new(), base_url, api_key }
    }
}

#[async_trait]
impl ToolDiscovery for HttpToolDiscovery {
    async fn discover(
        &self,
        intent: &str,
        workspace_id: &str,
        max_results: usize,
    ) -> anyhow::Result<Vec<ToolDiscoveryMatch>> {
        let mut request = self.client.post(format!("{}/discover", self.base_url)).json(&json!({
            "intent": intent,
            "workspaceId": workspace_id,
            "maxResults": max_results,
        }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await.context("tool discovery request failed")?;
        response
            .error_for_status()
            .context("tool discovery returned an error status")?
            .json::<Vec<ToolDiscoveryMatch>>()
            .await
            .context("tool discovery returned an unparseable body")
    }
}

pub struct HttpLlmClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpLlmClient {
    pub fn new(base_url: String, api_key: Option<String>) -> Self {
        Self { client: Client::new(), base_url, api_key }
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn call(&self, request: LlmRequest) -> anyhow::Result<LlmResponse> {
        let mut http_request = self.client.post(format!("{}/chat/completions", self.base_url)).json(&json!({
            "model": request.model,
            "messages": [
                {"role": "system", "content": request.system_prompt},
                {"role": "user", "content": request.user_prompt},
            ],
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "reasoning": request.reasoning,
            "store": request.store,
            "stream": false,
        }));
        if let Some(key) = &self.api_key {
            http_request = http_request.bearer_auth(key);
        }
        let response = http_request.send().await.context("llm request failed")?;
        response
            .error_for_status()
            .context("llm returned an error status")?
            .json::<LlmResponse>()
            .await
            .context("llm returned an unparseable body")
    }
}

pub struct HttpWallet {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    address: String,
}

impl HttpWallet {
    pub fn new(base_url: String, api_key: Option<String>, address: String) -> Self {
        Self { client: Client::new(), base_url, api_key, address }
    }
}

#[async_trait]
impl Wallet for HttpWallet {
    async fn balance(&self, address: &str, network: &str) -> anyhow::Result<u128> {
        let mut request = self
            .client
            .get(format!("{}/wallet/{address}/balance", self.base_url))
            .query(&[("network", network)]);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await.context("wallet balance request failed")?;
        let body: serde_json::Value = response
            .error_for_status()
            .context("wallet balance returned an error status")?
            .json()
            .await
            .context("wallet balance returned an unparseable body")?;
        body.get("balanceAtomic")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<u128>().ok())
            .context("wallet balance response missing balanceAtomic")
    }

    async fn sign(&self, requirement: &PaymentRequirement) -> anyhow::Result<Vec<u8>> {
        let mut request = self.client.post(format!("{}/wallet/sign", self.base_url)).json(requirement);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await.context("wallet sign request failed")?;
        let body: serde_json::Value = response
            .error_for_status()
            .context("wallet sign returned an error status")?
            .json()
            .await
            .context("wallet sign returned an unparseable body")?;
        let encoded = body
            .get("signatureHeader")
            .and_then(|v| v.as_str())
            .context("wallet sign response missing signatureHeader")?;
        Ok(encoded.as_bytes().to_vec())
    }

    fn address(&self) -> String {
        self.address.clone()
    }
}

pub struct HttpIdentity {
    client: Client,
    base_url: String,
}

impl HttpIdentity {
    pub fn new(base_url: String) -> Self {
        Self { client: Client::new(), base_url }
    }
}

#[async_trait]
impl Identity for HttpIdentity {
    async fn authn(&self, token: &str) -> anyhow::Result<Option<AuthenticatedUser>> {
        let response = self
            .client
            .get(format!("{}/authn", self.base_url))
            .bearer_auth(token)
            .send()
            .await
            .context("authn request failed")?;
        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Ok(None);
        }
        let user = response
            .error_for_status()
            .context("authn returned an error status")?
            .json::<AuthenticatedUser>()
            .await
            .context("authn returned an unparseable body")?;
        Ok(Some(user))
    }

    async fn is_member(&self, user_id: &str, workspace_id: &str) -> anyhow::Result<bool> {
        let response = self
            .client
            .get(format!("{}/membership", self.base_url))
            .query(&[("userId", user_id), ("workspaceId", workspace_id)])
            .send()
            .await
            .context("membership request failed")?;
        let body: serde_json::Value = response
            .error_for_status()
            .context("membership returned an error status")?
            .json()
            .await
            .context("membership returned an unparseable body")?;
        Ok(body.get("isMember").and_then(|v| v.as_bool()).unwrap_or(false))
    }
}
