use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentDialect {
    /// Canonical: `PAYMENT-REQUIRED` header, base64-encoded JSON.
    A,
    /// Legacy: `x402Version: 1` JSON body with an `accepts[]` array.
    B,
}

impl PaymentDialect {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentDialect::A => "a",
            PaymentDialect::B => "b",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParsedRequirement {
    pub dialect: PaymentDialect,
    pub scheme: String,
    pub network: String,
    pub asset: String,
    pub amount_atomic: u128,
    pub recipient: String,
    pub deadline: Option<DateTime<Utc>>,
    pub raw: Value,
    pub encoded_requirement: String,
}

fn field<'a>(obj: &'a Value, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|n| obj.get(n))
}

fn as_u128(v: &Value) -> Option<u128> {
    match v {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_u64().map(|x| x as u128),
        _ => None,
    }
}

fn as_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        other => other.as_str().map(|s| s.to_string()),
    }
}

/// Version-detects and parses a 402 response. Dialect A wins when both a
/// `PAYMENT-REQUIRED` header and a dialect-B body are present.
pub fn parse(headers: &HeaderMap, body: &Value) -> Option<ParsedRequirement> {
    if let Some(header_value) = headers.get("PAYMENT-REQUIRED") {
        if let Some(parsed) = parse_dialect_a(header_value.to_str().ok()?) {
            return Some(parsed);
        }
    }
    parse_dialect_b(body)
}

fn parse_dialect_a(encoded: &str) -> Option<ParsedRequirement> {
    let decoded = BASE64.decode(encoded).ok()?;
    let value: Value = serde_json::from_slice(&decoded).ok()?;
    let obj = match &value {
        Value::Array(items) => items.first()?,
        Value::Object(_) => &value,
        _ => return None,
    };

    let amount_atomic = as_u128(field(obj, &["amount", "maxAmountRequired"])?)?;
    let network = as_string(field(obj, &["network", "networkId"])?)?;
    let asset = as_string(field(obj, &["asset", "resource"])?).unwrap_or_else(|| "USDC".to_string());
    let recipient = as_string(field(obj, &["recipient", "payTo"])?)?;
    let scheme = field(obj, &["scheme"])
        .and_then(as_string)
        .unwrap_or_else(|| "exact".to_string());
    let deadline = field(obj, &["deadline", "validUntil"])
        .and_then(as_string)
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|d| d.with_timezone(&Utc));

    Some(ParsedRequirement {
        dialect: PaymentDialect::A,
        scheme,
        network,
        asset,
        amount_atomic,
        recipient,
        deadline,
        raw: value,
        encoded_requirement: encoded.to_string(),
    })
}

fn parse_dialect_b(body: &Value) -> Option<ParsedRequirement> {
    let version = body.get("x402Version")?.as_u64()?;
    if version != 1 {
        return None;
    }
    let accepts = body.get("accepts")?.as_array()?;
    let first = accepts.first()?;

    let amount_atomic = as_u128(field(first, &["maxAmountRequired"])?)?;
    let network = as_string(field(first, &["network"])?)?;
    let asset = as_string(field(first, &["asset"])?).unwrap_or_else(|| "USDC".to_string());
    let recipient = as_string(field(first, &["payTo"])?)?;
    let scheme = field(first, &["scheme"])
        .and_then(as_string)
        .unwrap_or_else(|| "exact".to_string());
    let deadline = first
        .get("maxTimeoutSeconds")
        .and_then(|v| v.as_i64())
        .map(|secs| Utc::now() + chrono::Duration::seconds(secs));

    let encoded_requirement = BASE64.encode(serde_json::to_vec(body).unwrap_or_default());

    Some(ParsedRequirement {
        dialect: PaymentDialect::B,
        scheme,
        network,
        asset,
        amount_atomic,
        recipient,
        deadline,
        raw: body.clone(),
        encoded_requirement,
    })
}

fn settlement_header_name(dialect: PaymentDialect) -> &'static str {
    match dialect {
        PaymentDialect::A => "PAYMENT-RESPONSE",
        PaymentDialect::B => "X-PAYMENT-RESPONSE",
    }
}

/// Raw base64 settlement header value, stored verbatim as
/// `payment_response_encoded` on the receipt.
pub fn extract_raw_settlement(headers: &HeaderMap, dialect: PaymentDialect) -> Option<String> {
    headers
        .get(settlement_header_name(dialect))
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

pub fn extract_tx_hash(headers: &HeaderMap, dialect: PaymentDialect) -> Option<String> {
    let raw = headers.get(settlement_header_name(dialect))?.to_str().ok()?;
    let decoded = BASE64.decode(raw).ok()?;
    let value: Value = serde_json::from_slice(&decoded).ok()?;
    value
        .get("txHash")
        .and_then(as_string)
        .or_else(|| value.get("tx_hash").and_then(as_string))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dialect_a_takes_first_array_entry() {
        let payload = serde_json::json!([
            { "amount": "50000", "network": "base-sepolia", "payTo": "0xabc" },
            { "amount": "999", "network": "base", "payTo": "0xdef" },
        ]);
        let encoded = BASE64.encode(serde_json::to_vec(&payload).unwrap());
        let mut headers = HeaderMap::new();
        headers.insert("PAYMENT-REQUIRED", encoded.parse().unwrap());
        let parsed = parse(&headers, &Value::Null).unwrap();
        assert_eq!(parsed.amount_atomic, 50_000);
        assert_eq!(parsed.network, "base-sepolia");
    }

    #[test]
    fn dialect_a_wins_over_dialect_b_when_both_present() {
        let payload = serde_json::json!({ "amount": "1", "network": "base", "payTo": "0xabc" });
        let encoded = BASE64.encode(serde_json::to_vec(&payload).unwrap());
        let mut headers = HeaderMap::new();
        headers.insert("PAYMENT-REQUIRED", encoded.parse().unwrap());
        let body = serde_json::json!({
            "x402Version": 1,
            "accepts": [{ "maxAmountRequired": "999", "network": "eip155:1", "payTo": "0xdef" }]
        });
        let parsed = parse(&headers, &body).unwrap();
        assert_eq!(parsed.dialect, PaymentDialect::A);
    }

    #[test]
    fn dialect_b_parses_legacy_body() {
        let body = serde_json::json!({
            "x402Version": 1,
            "accepts": [{ "maxAmountRequired": "2500", "network": "base", "payTo": "0xdef", "maxTimeoutSeconds": 60 }]
        });
        let parsed = parse(&HeaderMap::new(), &body).unwrap();
        assert_eq!(parsed.dialect, PaymentDialect::B);
        assert_eq!(parsed.amount_atomic, 2_500);
        assert!(parsed.deadline.is_some());
    }

    #[test]
    fn neither_dialect_parses_returns_none() {
        let body = serde_json::json!({ "unrelated": true });
        assert!(parse(&HeaderMap::new(), &body).is_none());
    }
}
