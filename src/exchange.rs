use crate::balance::Balance;
use crate::schemas::UserId;
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Transfer {
    pub from: UserId,
    pub to: UserId,
    /// Minor units of the reference currency.
    pub amount: i64,
}

// Index of the entry with the largest magnitude. Entries are in ascending id
// order and only a strictly larger value replaces the current pick, so ties go
// to the lowest user id.
fn largest(entries: &[(UserId, i64)]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (index, (_, amount)) in entries.iter().enumerate() {
        match best {
            Some(current) if entries[current].1 >= *amount => {}
            _ => best = Some(index),
        }
    }
    best
}

/// Greedy largest-pair matching: the biggest debtor pays the biggest creditor
/// `min(debt, credit)` until every balance is zero. Ties go to the lowest user
/// id on both sides. Not always the shortest possible plan, but always at most
/// one transfer fewer than the number of unsettled users.
pub fn get_simplified_transfers(balance: &Balance) -> Vec<Transfer> {
    let mut debtors: Vec<(UserId, i64)> = Vec::new();
    let mut creditors: Vec<(UserId, i64)> = Vec::new();
    for (user, amount) in balance {
        if *amount < 0 {
            debtors.push((user.clone(), -amount));
        } else if *amount > 0 {
            creditors.push((user.clone(), *amount));
        }
    }

    let mut transfers = Vec::new();
    while let (Some(debtor), Some(creditor)) = (largest(&debtors), largest(&creditors)) {
        let amount = debtors[debtor].1.min(creditors[creditor].1);
        transfers.push(Transfer {
            from: debtors[debtor].0.clone(),
            to: creditors[creditor].0.clone(),
            amount,
        });
        debtors[debtor].1 -= amount;
        creditors[creditor].1 -= amount;
        if debtors[debtor].1 == 0 {
            debtors.remove(debtor);
        }
        if creditors[creditor].1 == 0 {
            creditors.remove(creditor);
        }
    }
    transfers
}
