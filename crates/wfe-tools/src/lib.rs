//! Tool catalog and request templating for `tool_call` steps.

use serde_json::Value;

use wfe_store::{SharedStore, StoreResult};
use wfe_types::{Node, NodePayment, Tool};

#[derive(Clone)]
pub struct ToolRegistry {
    store: SharedStore,
}

impl ToolRegistry {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    pub async fn register(&self, tool: Tool) -> StoreResult<()> {
        self.store.put_tool(tool).await
    }

    pub async fn get(&self, tool_id: &str) -> StoreResult<Tool> {
        self.store.get_tool(tool_id).await
    }

    pub async fn list(&self, workspace_id: &str) -> Vec<Tool> {
        self.store.list_tools_by_workspace(workspace_id).await
    }

    /// Updates reputation EMA and, on a paid success, the typical-amount
    /// pricing hint (same EMA weighting as reputation).
    pub async fn record_invocation(
        &self,
        tool_id: &str,
        success: bool,
        latency_ms: f64,
        paid_amount_atomic: Option<u128>,
    ) -> StoreResult<()> {
        let mut tool = self.store.get_tool(tool_id).await?;
        tool.record_invocation(success, latency_ms);
        if let Some(amount) = paid_amount_atomic {
            let alpha = wfe_types::REPUTATION_EMA_ALPHA;
            let prior = tool.pricing_hints.typical_amount_atomic.unwrap_or(amount);
            let blended = alpha * amount as f64 + (1.0 - alpha) * prior as f64;
            tool.pricing_hints.typical_amount_atomic = Some(blended.round() as u128);
        }
        self.store.put_tool(tool).await
    }
}

/// Substitutes `{{key}}` placeholders in `template` with the stringified
/// value of `inputs[key]`. Unmatched placeholders are left verbatim.
pub fn render_template(template: &str, inputs: &Value) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        let Some(end) = rest[start..].find("}}") else {
            out.push_str(rest);
            return out;
        };
        out.push_str(&rest[..start]);
        let key = rest[start + 2..start + end].trim();
        match inputs.get(key) {
            Some(Value::String(s)) => out.push_str(s),
            Some(other) => out.push_str(&other.to_string()),
            None => {
                out.push_str("{{");
                out.push_str(key);
                out.push_str("}}");
            }
        }
        rest = &rest[start + end + 2..];
    }
    out.push_str(rest);
    out
}

/// Walks a dotted path (`"classify.category"`) into a JSON value, same
/// traversal a branch node uses to read its `branchExpr` out of the merged
/// step inputs. `None` on a missing key or a path through a non-object.
pub fn resolve_path(value: &Value, path: &str) -> Option<Value> {
    path.split('.').try_fold(value.clone(), |current, key| {
        current.get(key).cloned()
    })
}

/// Stringifies a resolved branch value for comparison against an edge's
/// `condition`: strings pass through verbatim, everything else is rendered
/// via its JSON form so `true`/`42` compare the same way a template would.
pub fn stringify_branch_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PaymentAllowance {
    pub allowed: bool,
    pub max_atomic: u128,
}

/// Resolves whether a `tool_call` step may pay, and its ceiling:
/// node-level `payment.allowed` overrides the workspace auto-pay flag; the
/// max falls back from node to workspace to the engine-wide default.
pub fn resolve_payment_allowance(
    node: &Node,
    workspace_auto_pay_enabled: bool,
    workspace_auto_pay_max_per_step_atomic: u128,
    default_payment_max_atomic: u128,
) -> PaymentAllowance {
    let payment: Option<&NodePayment> = node.payment.as_ref();
    let allowed = payment
        .map(|p| p.allowed)
        .unwrap_or(workspace_auto_pay_enabled);
    let max_atomic = payment
        .and_then(|p| p.max_atomic)
        .unwrap_or_else(|| {
            if workspace_auto_pay_max_per_step_atomic > 0 {
                workspace_auto_pay_max_per_step_atomic
            } else {
                default_payment_max_atomic
            }
        });
    PaymentAllowance { allowed, max_atomic }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn renders_known_and_leaves_unknown_placeholders() {
        let rendered = render_template(
            r#"{"city": "{{city}}", "x": "{{missing}}"}"#,
            &json!({ "city": "Lagos" }),
        );
        assert_eq!(rendered, r#"{"city": "Lagos", "x": "{{missing}}"}"#);
    }

    #[test]
    fn resolve_path_walks_nested_objects() {
        let inputs = json!({ "classify": { "category": "refund" } });
        assert_eq!(
            resolve_path(&inputs, "classify.category"),
            Some(Value::String("refund".to_string()))
        );
        assert_eq!(resolve_path(&inputs, "classify.missing"), None);
        assert_eq!(resolve_path(&inputs, "missing.category"), None);
    }

    #[test]
    fn stringify_branch_value_unwraps_strings_but_renders_other_types() {
        assert_eq!(stringify_branch_value(&json!("refund")), "refund");
        assert_eq!(stringify_branch_value(&json!(true)), "true");
        assert_eq!(stringify_branch_value(&json!(3)), "3");
    }

    #[test]
    fn node_level_payment_overrides_workspace_default() {
        let node = Node {
            id: "n1".to_string(),
            node_type: wfe_types::NodeType::ToolCall,
            label: "call tool".to_string(),
            depends_on: vec![],
            policy: wfe_types::NodePolicy::default(),
            payment: Some(NodePayment {
                allowed: false,
                max_atomic: Some(50_000),
            }),
            tool_id: None,
            endpoint: None,
            request_template: None,
            system_prompt: None,
            user_prompt_template: None,
            output_format: None,
            output_template: None,
            branch_expr: None,
            status_url: None,
            completion_field: None,
            completion_value: None,
        };
        let allowance = resolve_payment_allowance(&node, true, 1_000_000, 1_000_000);
        assert!(!allowance.allowed);
        assert_eq!(allowance.max_atomic, 50_000);
    }
}
