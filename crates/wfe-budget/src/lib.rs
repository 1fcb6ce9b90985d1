//! Per-run spend counter with optimistic deduction.

use wfe_store::{SharedStore, StoreError, StoreResult};
use wfe_types::{PaymentReceipt, ReceiptStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeductionOutcome {
    pub allowed: bool,
    pub reason: Option<&'static str>,
}

impl DeductionOutcome {
    fn allowed() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    fn rejected(reason: &'static str) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
        }
    }
}

#[derive(Clone)]
pub struct BudgetLedger {
    store: SharedStore,
}

impl BudgetLedger {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Checks the per-run cap, then deducts `amount_atomic` from
    /// `budget.spent_atomic` using compare-and-set on the observed prior
    /// value. Retries on conflict with unbounded attempts, re-reading state
    /// on every retry — bounded in practice by the number of concurrently
    /// racing payments on this run.
    pub async fn check_and_deduct(
        &self,
        run_id: &str,
        amount_atomic: u128,
    ) -> StoreResult<DeductionOutcome> {
        loop {
            let run = self.store.get_run(run_id).await?;
            let spent = run.budget.spent_atomic;
            if spent + amount_atomic > run.budget.max_atomic {
                return Ok(DeductionOutcome::rejected("budget"));
            }
            match self
                .store
                .compare_and_set_spent(run_id, spent, spent + amount_atomic)
                .await
            {
                Ok(_) => return Ok(DeductionOutcome::allowed()),
                Err(StoreError::Conflict(_)) => continue,
                Err(other) => return Err(other),
            }
        }
    }

    /// Applies, in order, the auto-pay policy checks against the run's
    /// **frozen** `auto_pay_policy` snapshot — never the live workspace
    /// settings.
    pub async fn check_auto_pay_policy(
        &self,
        run_id: &str,
        amount_atomic: u128,
    ) -> StoreResult<DeductionOutcome> {
        let run = self.store.get_run(run_id).await?;
        let policy = &run.auto_pay_policy;
        if !policy.auto_pay_enabled {
            return Ok(DeductionOutcome::rejected("disabled"));
        }
        if amount_atomic > policy.auto_pay_max_per_step_atomic {
            return Ok(DeductionOutcome::rejected("per-step"));
        }
        let spent = run.budget.spent_atomic;
        if spent + amount_atomic > policy.auto_pay_max_per_run_atomic {
            return Ok(DeductionOutcome::rejected("per-run"));
        }
        if spent + amount_atomic > run.budget.max_atomic {
            return Ok(DeductionOutcome::rejected("budget"));
        }
        Ok(DeductionOutcome::allowed())
    }

    pub async fn record_receipt(&self, receipt: PaymentReceipt) -> StoreResult<()> {
        self.store.insert_receipt(receipt).await
    }

    /// Sum of `amount_atomic` over settled receipts for a run — used by the
    /// receipt/spend coupling invariant.
    pub async fn settled_total(&self, run_id: &str) -> u128 {
        self.store
            .list_receipts_by_run(run_id)
            .await
            .into_iter()
            .filter(|r| r.status == ReceiptStatus::Settled)
            .map(|r| r.amount_atomic)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use wfe_types::{AutoPayPolicySnapshot, Graph, Run, RunBudget, RunInput, WorkspaceSettings};

    async fn run_with_budget(max_atomic: u128) -> (Arc<wfe_store::Store>, String) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(wfe_store::Store::new(dir.path()).await.unwrap());
        let graph = Graph {
            nodes: vec![],
            edges: vec![],
            entry_node_id: "a".to_string(),
        };
        let run = Run::new(
            "w1",
            "u1",
            RunInput::default(),
            graph,
            RunBudget {
                asset: "USDC".to_string(),
                network: "eip155:84532".to_string(),
                max_atomic,
                spent_atomic: 0,
            },
            AutoPayPolicySnapshot::from(WorkspaceSettings {
                auto_pay_enabled: true,
                auto_pay_max_per_step_atomic: max_atomic,
                auto_pay_max_per_run_atomic: max_atomic,
                tool_allowlist: vec![],
            }),
        );
        let run_id = run.id.clone();
        store.put_run(run).await.unwrap();
        (store, run_id)
    }

    #[tokio::test]
    async fn deduction_rejects_when_over_budget() {
        let (store, run_id) = run_with_budget(1_000_000).await;
        let ledger = BudgetLedger::new(store);
        let outcome = ledger.check_and_deduct(&run_id, 2_000_000).await.unwrap();
        assert!(!outcome.allowed);
        assert_eq!(outcome.reason, Some("budget"));
    }

    #[tokio::test]
    async fn deduction_is_monotonic_and_bounded() {
        let (store, run_id) = run_with_budget(1_000_000).await;
        let ledger = BudgetLedger::new(store.clone());
        ledger.check_and_deduct(&run_id, 400_000).await.unwrap();
        ledger.check_and_deduct(&run_id, 400_000).await.unwrap();
        let run = store.get_run(&run_id).await.unwrap();
        assert_eq!(run.budget.spent_atomic, 800_000);
        let rejected = ledger.check_and_deduct(&run_id, 400_000).await.unwrap();
        assert!(!rejected.allowed);
        let run = store.get_run(&run_id).await.unwrap();
        assert_eq!(run.budget.spent_atomic, 800_000);
    }

    proptest::proptest! {
        /// Against a fixed budget ceiling, driving `check_and_deduct` through
        /// any sequence of deduction amounts never lets `spent_atomic` exceed
        /// `max_atomic`, and it never decreases — every accepted deduction
        /// only moves it up by exactly the amount requested.
        #[test]
        fn deduction_is_monotonic_and_never_exceeds_the_budget(
            max_atomic in 1_000u128..10_000_000,
            amounts in proptest::collection::vec(1u128..2_000_000, 1..15),
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async move {
                let (store, run_id) = run_with_budget(max_atomic).await;
                let ledger = BudgetLedger::new(store.clone());
                let mut previous_spent = 0u128;
                for amount in amounts {
                    let outcome = ledger.check_and_deduct(&run_id, amount).await.unwrap();
                    let spent = store.get_run(&run_id).await.unwrap().budget.spent_atomic;
                    assert!(spent <= max_atomic);
                    assert!(spent >= previous_spent);
                    if outcome.allowed {
                        assert_eq!(spent, previous_spent + amount);
                    } else {
                        assert_eq!(spent, previous_spent);
                    }
                    previous_spent = spent;
                }
            });
        }
    }

    #[tokio::test]
    async fn auto_pay_policy_checks_per_step_cap_before_per_run() {
        let (store, run_id) = run_with_budget(1_000_000).await;
        store
            .update_run(&run_id, |r| {
                r.auto_pay_policy.auto_pay_max_per_step_atomic = 100_000;
            })
            .await
            .unwrap();
        let ledger = BudgetLedger::new(store);
        let outcome = ledger.check_auto_pay_policy(&run_id, 200_000).await.unwrap();
        assert_eq!(outcome.reason, Some("per-step"));
    }
}
