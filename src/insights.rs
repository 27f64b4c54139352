//! Settlement snapshot: balances, transfer plan and spending summary derived
//! from a replay of the expense log. Never stored.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;

use crate::balance::{compute_balance, Balance};
use crate::exchange::{get_simplified_transfers, Transfer};
use crate::schemas::{Category, Expense, ExpenseId, UserId};

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SettlementSnapshot {
    /// Unit of account every amount below is expressed in.
    pub currency: String,
    pub balances: Balance,
    pub transfers: Vec<Transfer>,
    pub total: i64,
    pub count: usize,
    pub top_spender: Option<UserId>,
    pub paid_by: BTreeMap<UserId, i64>,
    pub by_category: BTreeMap<Category, i64>,
}

/// Result of an insights read. Missing exchange rates degrade the read to
/// `Unavailable` instead of failing the request.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Insights {
    Available(SettlementSnapshot),
    Unavailable { reason: String },
}

/// Builds the snapshot for expenses already normalized to `currency`.
pub fn summarize(expenses: &[Expense], currency: &str) -> SettlementSnapshot {
    let balances = compute_balance(expenses);
    let transfers = get_simplified_transfers(&balances);

    let reversed: HashSet<&ExpenseId> = expenses
        .iter()
        .filter_map(|expense| expense.reverses.as_ref())
        .collect();

    let mut total = 0;
    let mut paid_by: BTreeMap<UserId, i64> = BTreeMap::new();
    let mut by_category: BTreeMap<Category, i64> = BTreeMap::new();
    // First ledger position at which each user paid, for tie-breaks.
    let mut first_paid: HashMap<UserId, usize> = HashMap::new();

    for (position, expense) in expenses.iter().enumerate() {
        let signed = if expense.is_reversal() {
            -expense.amount
        } else {
            expense.amount
        };
        total += signed;
        *paid_by.entry(expense.payer.clone()).or_insert(0) += signed;
        *by_category.entry(expense.category).or_insert(0) += signed;
        first_paid.entry(expense.payer.clone()).or_insert(position);
    }

    let count = expenses
        .iter()
        .filter(|expense| !expense.is_reversal() && !reversed.contains(&expense.id))
        .count();

    let top_spender = paid_by
        .iter()
        .filter(|(_, paid)| **paid > 0)
        .min_by_key(|(user, paid)| {
            let first = first_paid.get(*user).copied().unwrap_or(usize::MAX);
            (-**paid, first)
        })
        .map(|(user, _)| user.clone());

    SettlementSnapshot {
        currency: currency.to_string(),
        balances,
        transfers,
        total,
        count,
        top_spender,
        paid_by,
        by_category,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::ExpenseSource;
    use chrono::Utc;

    fn expense(id: &str, amount: i64, payer: &str, participants: &[&str]) -> Expense {
        Expense {
            id: id.into(),
            group_id: "g".into(),
            seq: 1,
            title: "t".into(),
            amount,
            currency: "USD".into(),
            category: Category::Food,
            payer: payer.into(),
            participants: participants.iter().map(|p| p.to_string()).collect(),
            notes: None,
            created_at: Utc::now(),
            source: ExpenseSource::Manual,
            reverses: None,
        }
    }

    #[test]
    fn dinner_scenario() {
        let snapshot = summarize(&[expense("e1", 3000, "a", &["a", "b"])], "USD");
        assert_eq!(snapshot.balances["a"], 1500);
        assert_eq!(snapshot.balances["b"], -1500);
        assert_eq!(snapshot.total, 3000);
        assert_eq!(snapshot.count, 1);
        assert_eq!(snapshot.top_spender.as_deref(), Some("a"));
        assert_eq!(snapshot.transfers.len(), 1);
        assert_eq!(snapshot.by_category[&Category::Food], 3000);
    }

    #[test]
    fn empty_ledger() {
        let snapshot = summarize(&[], "USD");
        assert!(snapshot.balances.is_empty());
        assert!(snapshot.transfers.is_empty());
        assert_eq!(snapshot.total, 0);
        assert_eq!(snapshot.count, 0);
        assert_eq!(snapshot.top_spender, None);
    }

    #[test]
    fn top_spender_tie_goes_to_earliest_payer() {
        let snapshot = summarize(
            &[
                expense("e1", 500, "zed", &["amy", "zed"]),
                expense("e2", 500, "amy", &["amy", "zed"]),
            ],
            "USD",
        );
        assert_eq!(snapshot.top_spender.as_deref(), Some("zed"));
        assert!(snapshot.transfers.is_empty());
    }

    #[test]
    fn reversal_removes_expense_from_totals() {
        let original = expense("e1", 1200, "a", &["a", "b"]);
        let mut reversal = expense("e2", 1200, "a", &["a", "b"]);
        reversal.reverses = Some("e1".into());
        let snapshot = summarize(&[original, expense("e3", 100, "b", &["a"]), reversal], "USD");
        assert_eq!(snapshot.total, 100);
        assert_eq!(snapshot.count, 1);
        assert_eq!(snapshot.top_spender.as_deref(), Some("b"));
        assert_eq!(snapshot.balances["a"], -100);
        assert_eq!(snapshot.balances["b"], 100);
    }
}
