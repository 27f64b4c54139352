use std::collections::BTreeMap;

use crate::schemas::{Expense, UserId};

/// Net position per user in minor units: positive is owed to them, negative
/// means they owe.
pub type Balance = BTreeMap<UserId, i64>;

/// Splits `amount` across `participants` so the shares add up to `amount`
/// exactly. The first `amount % n` participants in list order absorb one extra
/// minor unit each.
pub fn split_shares(amount: i64, participants: &[UserId]) -> Vec<(&UserId, i64)> {
    let count = participants.len() as i64;
    if count == 0 {
        return Vec::new();
    }
    let base = amount / count;
    let remainder = amount % count;
    participants
        .iter()
        .enumerate()
        .map(|(index, participant)| {
            let extra = if (index as i64) < remainder { 1 } else { 0 };
            (participant, base + extra)
        })
        .collect()
}

/// Replays expenses in order. Reversal entries apply with the opposite sign so
/// an expense and its reversal cancel out exactly.
pub fn compute_balance(expenses: &[Expense]) -> Balance {
    let mut balance = Balance::new();
    for expense in expenses {
        let sign = if expense.is_reversal() { -1 } else { 1 };
        *balance.entry(expense.payer.clone()).or_insert(0) += sign * expense.amount;
        for (participant, share) in split_shares(expense.amount, &expense.participants) {
            *balance.entry(participant.clone()).or_insert(0) -= sign * share;
        }
    }
    balance
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::{Category, ExpenseSource};
    use chrono::Utc;
    use proptest::prelude::*;
    use rstest::rstest;

    fn users(names: &[&str]) -> Vec<UserId> {
        names.iter().map(|name| name.to_string()).collect()
    }

    fn expense(amount: i64, payer: &str, participants: &[&str]) -> Expense {
        Expense {
            id: format!("e-{payer}-{amount}"),
            group_id: "g".into(),
            seq: 1,
            title: "t".into(),
            amount,
            currency: "USD".into(),
            category: Category::Misc,
            payer: payer.into(),
            participants: users(participants),
            notes: None,
            created_at: Utc::now(),
            source: ExpenseSource::Manual,
            reverses: None,
        }
    }

    #[rstest]
    #[case(1000, &["a", "b", "c"], vec![334, 333, 333])]
    #[case(3000, &["a", "b"], vec![1500, 1500])]
    #[case(7, &["a"], vec![7])]
    #[case(2, &["a", "b", "c"], vec![1, 1, 0])]
    fn splits_remainder_to_first_participants(
        #[case] amount: i64,
        #[case] participants: &[&str],
        #[case] expected: Vec<i64>,
    ) {
        let participants = users(participants);
        let shares: Vec<i64> = split_shares(amount, &participants)
            .into_iter()
            .map(|(_, share)| share)
            .collect();
        assert_eq!(shares, expected);
    }

    #[test]
    fn payer_nets_against_own_share() {
        let balance = compute_balance(&[expense(3000, "a", &["a", "b"])]);
        assert_eq!(balance["a"], 1500);
        assert_eq!(balance["b"], -1500);
    }

    #[test]
    fn payer_outside_participants_is_credited_in_full() {
        let balance = compute_balance(&[expense(900, "a", &["b", "c"])]);
        assert_eq!(balance["a"], 900);
        assert_eq!(balance["b"], -450);
        assert_eq!(balance["c"], -450);
    }

    #[test]
    fn reversal_cancels_original() {
        let original = expense(1000, "a", &["a", "b", "c"]);
        let mut reversal = original.clone();
        reversal.id = "r".into();
        reversal.reverses = Some(original.id.clone());
        let balance = compute_balance(&[original, reversal]);
        assert!(balance.values().all(|value| *value == 0));
    }

    #[test]
    fn empty_ledger_has_no_balances() {
        assert!(compute_balance(&[]).is_empty());
    }

    proptest! {
        #[test]
        fn shares_sum_to_amount(amount in 1i64..10_000_000, count in 1usize..40) {
            let participants: Vec<UserId> = (0..count).map(|i| format!("u{i}")).collect();
            let total: i64 = split_shares(amount, &participants).iter().map(|(_, s)| s).sum();
            prop_assert_eq!(total, amount);
        }

        #[test]
        fn balances_sum_to_zero(
            entries in prop::collection::vec(
                (1i64..1_000_000, 0usize..6, prop::collection::vec(0usize..6, 1..6)),
                0..30,
            )
        ) {
            let names = ["a", "b", "c", "d", "e", "f"];
            let expenses: Vec<Expense> = entries
                .iter()
                .map(|(amount, payer, participants)| {
                    let participants: Vec<&str> = participants.iter().map(|i| names[*i]).collect();
                    expense(*amount, names[*payer], &participants)
                })
                .collect();
            let total: i64 = compute_balance(&expenses).values().sum();
            prop_assert_eq!(total, 0);
        }
    }
}
