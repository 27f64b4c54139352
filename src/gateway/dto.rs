//! Request and response bodies. Amounts cross the wire in major units with at
//! most two decimals and are carried as integer minor units everywhere else.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ServiceError;
use crate::exchange::Transfer;
use crate::insights::Insights;
use crate::receipt::DraftHint;
use crate::schemas::{
    Category, Expense, ExpenseDraft, ExpenseId, ExpenseSource, GroupId, Group, Member, UserId,
};

/// Upper bound for a single amount, in major units.
const MAX_MAJOR_AMOUNT: f64 = 1e11;

pub fn to_minor_units(amount: f64) -> Result<i64, ServiceError> {
    if !amount.is_finite() || amount.abs() > MAX_MAJOR_AMOUNT {
        return Err(ServiceError::invalid("amount is out of range"));
    }
    let scaled = amount * 100.0;
    let rounded = scaled.round();
    if (scaled - rounded).abs() > 1e-6 {
        return Err(ServiceError::invalid(
            "amount must have at most two decimal places",
        ));
    }
    Ok(rounded as i64)
}

pub fn to_major_units(amount: i64) -> f64 {
    amount as f64 / 100.0
}

#[derive(Deserialize)]
pub struct GroupNameJson {
    pub name: String,
}

#[derive(Deserialize)]
pub struct JoinCodeJson {
    pub code: String,
}

#[derive(Deserialize)]
pub struct ExpenseJson {
    pub group_id: GroupId,
    pub title: String,
    pub amount: f64,
    /// Defaults to the reference currency.
    pub currency: Option<String>,
    pub category: Category,
    pub payer_id: UserId,
    pub participants: Vec<UserId>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub source: ExpenseSource,
}

impl ExpenseJson {
    pub fn into_draft(self, reference_currency: &str) -> Result<(GroupId, ExpenseDraft), ServiceError> {
        let amount = to_minor_units(self.amount)?;
        let draft = ExpenseDraft {
            title: self.title,
            amount,
            currency: self
                .currency
                .unwrap_or_else(|| reference_currency.to_string()),
            category: self.category,
            payer: self.payer_id,
            participants: self.participants,
            notes: self.notes,
            source: self.source,
        };
        Ok((self.group_id, draft))
    }
}

#[derive(Serialize)]
pub struct GroupView<'a> {
    pub group_id: &'a str,
    #[serde(flatten)]
    pub group: &'a Group,
}

impl<'a> From<&'a Group> for GroupView<'a> {
    fn from(group: &'a Group) -> Self {
        GroupView {
            group_id: &group.id,
            group,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ExpenseView {
    pub id: ExpenseId,
    pub group_id: GroupId,
    pub seq: i64,
    pub title: String,
    pub amount: f64,
    pub amount_minor: i64,
    pub currency: String,
    pub category: Category,
    pub payer_id: UserId,
    pub participants: Vec<UserId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub source: ExpenseSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reverses: Option<ExpenseId>,
}

impl From<&Expense> for ExpenseView {
    fn from(expense: &Expense) -> Self {
        ExpenseView {
            id: expense.id.clone(),
            group_id: expense.group_id.clone(),
            seq: expense.seq,
            title: expense.title.clone(),
            amount: to_major_units(expense.amount),
            amount_minor: expense.amount,
            currency: expense.currency.clone(),
            category: expense.category,
            payer_id: expense.payer.clone(),
            participants: expense.participants.clone(),
            notes: expense.notes.clone(),
            created_at: expense.created_at,
            source: expense.source,
            reverses: expense.reverses.clone(),
        }
    }
}

#[derive(Serialize)]
pub struct TransferView {
    pub from: UserId,
    pub to: UserId,
    pub amount: f64,
}

impl From<&Transfer> for TransferView {
    fn from(transfer: &Transfer) -> Self {
        TransferView {
            from: transfer.from.clone(),
            to: transfer.to.clone(),
            amount: to_major_units(transfer.amount),
        }
    }
}

#[derive(Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum InsightsView {
    Available {
        currency: String,
        total: f64,
        count: usize,
        top_spender: Option<UserId>,
        balances: BTreeMap<UserId, f64>,
        transfers: Vec<TransferView>,
        paid_by: BTreeMap<UserId, f64>,
        by_category: BTreeMap<Category, f64>,
    },
    Unavailable {
        reason: String,
    },
}

impl From<Insights> for InsightsView {
    fn from(insights: Insights) -> Self {
        match insights {
            Insights::Available(snapshot) => InsightsView::Available {
                total: to_major_units(snapshot.total),
                count: snapshot.count,
                top_spender: snapshot.top_spender,
                balances: major_map(snapshot.balances),
                transfers: snapshot.transfers.iter().map(TransferView::from).collect(),
                paid_by: major_map(snapshot.paid_by),
                by_category: major_map(snapshot.by_category),
                currency: snapshot.currency,
            },
            Insights::Unavailable { reason } => InsightsView::Unavailable { reason },
        }
    }
}

fn major_map<K: Ord>(map: BTreeMap<K, i64>) -> BTreeMap<K, f64> {
    map.into_iter()
        .map(|(key, amount)| (key, to_major_units(amount)))
        .collect()
}

#[derive(Serialize)]
pub struct ReceiptScanView {
    pub text: String,
    pub title: Option<String>,
    pub amount: Option<f64>,
}

impl ReceiptScanView {
    pub fn new(text: String, hint: DraftHint) -> Self {
        ReceiptScanView {
            text,
            title: hint.title,
            amount: hint.amount.map(to_major_units),
        }
    }
}

/// Frames a WebSocket client may send.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientFrame {
    Subscribe { group_id: GroupId },
    Unsubscribe { group_id: GroupId },
}

/// Frames pushed to a WebSocket client.
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    #[serde(rename = "subscribed")]
    Subscribed { group_id: GroupId },
    #[serde(rename = "unsubscribed")]
    Unsubscribed { group_id: GroupId },
    #[serde(rename = "expense:new")]
    ExpenseNew { expense: ExpenseView },
    #[serde(rename = "member:joined")]
    MemberJoined { group_id: GroupId, member: Member },
    #[serde(rename = "error")]
    Error {
        code: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        group_id: Option<GroupId>,
    },
}

impl ServerFrame {
    pub fn error(err: &ServiceError, group_id: Option<GroupId>) -> Self {
        ServerFrame::Error {
            code: err.code().to_string(),
            message: err.to_string(),
            group_id,
        }
    }
}
