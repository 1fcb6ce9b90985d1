//! HTTP 402 micropayment handshake, wrapping outbound tool calls behind
//! SSRF validation, wallet balance checks, and receipt persistence.

mod dialect;
mod network;

pub use dialect::{ParsedRequirement, PaymentDialect};
pub use network::normalize_network;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde_json::Value;

use wfe_events::EventLog;
use wfe_providers::{PaymentRequirement, Wallet};
use wfe_store::SharedStore;
use wfe_types::{event_types, Actor, Event, PaymentReceipt, ReceiptStatus};

#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("policy rejected: {0}")]
    PolicyRejected(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("transient: {0}")]
    Transient(String),
}

#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: reqwest::Method,
    pub body: Option<Value>,
    pub headers: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct FetchOpts {
    pub max_payment_atomic: u128,
    pub run_id: String,
    pub step_id: String,
    pub workspace_id: String,
    pub tool_id: Option<String>,
    pub allowlist: Vec<String>,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct ReceiptSummary {
    pub id: String,
    pub amount_atomic: u128,
    pub tx_hash: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub response: Value,
    pub paid: bool,
    pub receipt: Option<ReceiptSummary>,
}

pub struct X402Client {
    http: reqwest::Client,
    store: SharedStore,
    events: EventLog,
}

impl X402Client {
    /// `http` must be built with `redirect(reqwest::redirect::Policy::none())`
    /// — redirect targets have to be revalidated through SSRF policy rather
    /// than followed automatically.
    pub fn new(http: reqwest::Client, store: SharedStore, events: EventLog) -> Self {
        Self { http, store, events }
    }

    pub fn default_http_client() -> reqwest::Client {
        reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .expect("static client config")
    }

    pub async fn fetch(
        &self,
        wallet: &dyn Wallet,
        url: &str,
        request: RequestSpec,
        opts: FetchOpts,
    ) -> Result<FetchOutcome, PaymentError> {
        let decision = wfe_policy::validate(url, &opts.allowlist).await;
        if !decision.valid {
            return Err(PaymentError::PolicyRejected(
                decision.reason.unwrap_or_else(|| "ssrf".to_string()),
            ));
        }

        let initial = self
            .send(&self.http, url, &request, None, opts.timeout_ms)
            .await
            .map_err(|e| PaymentError::Transient(e.to_string()))?;

        if initial.status() != reqwest::StatusCode::PAYMENT_REQUIRED {
            let body = self.read_json(initial).await?;
            return Ok(FetchOutcome {
                response: body,
                paid: false,
                receipt: None,
            });
        }

        let headers = initial.headers().clone();
        let status = initial.status();
        let body_text = initial
            .text()
            .await
            .map_err(|e| PaymentError::Transient(e.to_string()))?;
        let body_json: Value = serde_json::from_str(&body_text).unwrap_or(Value::Null);

        let parsed = dialect::parse(&headers, &body_json)
            .ok_or_else(|| PaymentError::Protocol(format!("status={status} body={body_text:.200}")))?;

        self.events
            .append(Event::new(
                &opts.run_id,
                &opts.workspace_id,
                event_types::PAYMENT_REQUIRED_RECEIVED,
                serde_json::json!({ "dialect": parsed.dialect.as_str(), "network": parsed.network }),
                Actor::system(),
            ))
            .await
            .map_err(|e| PaymentError::Transient(e.to_string()))?;

        let network = match normalize_network(&parsed.network) {
            Some(n) => n,
            None => {
                self.fail(&opts, "unsupported network").await;
                return Err(PaymentError::PolicyRejected("unsupported network".to_string()));
            }
        };

        if parsed.amount_atomic > opts.max_payment_atomic {
            self.fail(&opts, "amount exceeds max").await;
            return Err(PaymentError::PolicyRejected("amount exceeds max".to_string()));
        }

        let balance = wallet
            .balance(&wallet.address(), &network)
            .await
            .map_err(|e| PaymentError::Transient(e.to_string()))?;
        if balance < parsed.amount_atomic {
            self.fail(&opts, "insufficient wallet balance").await;
            return Err(PaymentError::PolicyRejected("insufficient balance".to_string()));
        }

        self.events
            .append(Event::new(
                &opts.run_id,
                &opts.workspace_id,
                event_types::PAYMENT_SENT,
                serde_json::json!({ "amountAtomic": parsed.amount_atomic.to_string(), "network": network }),
                Actor::system(),
            ))
            .await
            .map_err(|e| PaymentError::Transient(e.to_string()))?;

        let requirement = PaymentRequirement {
            scheme: parsed.scheme.clone(),
            network: network.clone(),
            asset: parsed.asset.clone(),
            amount_atomic: parsed.amount_atomic,
            recipient: parsed.recipient.clone(),
            deadline: parsed.deadline,
            raw: parsed.raw.clone(),
        };
        let signature = wallet
            .sign(&requirement)
            .await
            .map_err(|e| PaymentError::Transient(e.to_string()))?;
        let signature_encoded = BASE64.encode(signature);

        let paid_response = self
            .send(
                &self.http,
                url,
                &request,
                Some((parsed.dialect, signature_encoded.clone())),
                opts.timeout_ms,
            )
            .await
            .map_err(|e| PaymentError::Transient(e.to_string()))?;

        let settled = paid_response.status().is_success();
        let response_headers = paid_response.headers().clone();
        let tx_hash = dialect::extract_tx_hash(&response_headers, parsed.dialect);
        let raw_settlement = dialect::extract_raw_settlement(&response_headers, parsed.dialect);
        let response_body = self.read_json(paid_response).await?;

        let receipt = PaymentReceipt {
            id: wfe_types::new_id(),
            run_id: opts.run_id.clone(),
            step_id: opts.step_id.clone(),
            tool_id: opts.tool_id.clone().unwrap_or_default(),
            network: network.clone(),
            asset: parsed.asset.clone(),
            amount_atomic: parsed.amount_atomic,
            payment_required_encoded: parsed.encoded_requirement.clone(),
            payment_signature_encoded: signature_encoded,
            payment_response_encoded: raw_settlement.unwrap_or_default(),
            tx_hash: tx_hash.clone(),
            status: if settled {
                ReceiptStatus::Settled
            } else {
                ReceiptStatus::Rejected
            },
            created_at: wfe_types::now(),
        };
        self.store
            .insert_receipt(receipt.clone())
            .await
            .map_err(|e| PaymentError::Transient(e.to_string()))?;

        self.events
            .append(Event::new(
                &opts.run_id,
                &opts.workspace_id,
                if settled {
                    event_types::PAYMENT_CONFIRMED
                } else {
                    event_types::PAYMENT_FAILED
                },
                serde_json::json!({ "receiptId": receipt.id, "amountAtomic": receipt.amount_atomic.to_string() }),
                Actor::system(),
            ))
            .await
            .map_err(|e| PaymentError::Transient(e.to_string()))?;

        if !settled {
            return Err(PaymentError::Protocol("payment settlement rejected".to_string()));
        }

        Ok(FetchOutcome {
            response: response_body,
            paid: true,
            receipt: Some(ReceiptSummary {
                id: receipt.id,
                amount_atomic: receipt.amount_atomic,
                tx_hash: receipt.tx_hash,
            }),
        })
    }

    async fn send(
        &self,
        client: &reqwest::Client,
        url: &str,
        request: &RequestSpec,
        payment_header: Option<(PaymentDialect, String)>,
        timeout_ms: u64,
    ) -> reqwest::Result<reqwest::Response> {
        let mut builder = client
            .request(request.method.clone(), url)
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .header("accept", "application/json");
        for (k, v) in &request.headers {
            builder = builder.header(k, v);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        if let Some((dialect, encoded)) = payment_header {
            let header_name = match dialect {
                PaymentDialect::A => "PAYMENT-SIGNATURE",
                PaymentDialect::B => "X-PAYMENT",
            };
            builder = builder.header(header_name, encoded);
        }
        builder.send().await
    }

    async fn read_json(&self, response: reqwest::Response) -> Result<Value, PaymentError> {
        let text = response
            .text()
            .await
            .map_err(|e| PaymentError::Transient(e.to_string()))?;
        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }

    async fn fail(&self, opts: &FetchOpts, reason: &str) {
        let _ = self
            .events
            .append(Event::new(
                &opts.run_id,
                &opts.workspace_id,
                event_types::PAYMENT_FAILED,
                serde_json::json!({ "reason": reason }),
                Actor::system(),
            ))
            .await;
    }
}
