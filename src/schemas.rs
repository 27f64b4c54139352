use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type UserId = String;
pub type GroupId = String;
pub type ExpenseId = String;

/// Join code alphabet. Ambiguous glyphs (0/O, 1/I/L) are left out so codes
/// can be read aloud and typed without mistakes.
pub const JOIN_CODE_ALPHABET: &[u8] = b"23456789ABCDEFGHJKMNPQRSTUVWXYZ";
pub const JOIN_CODE_LEN: usize = 6;

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Member {
    pub user_id: UserId,
    pub joined_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    pub code: String,
    /// Join order. A user appears at most once.
    pub members: Vec<Member>,
    pub created_at: DateTime<Utc>,
}

impl Group {
    pub fn is_member(&self, user: &str) -> bool {
        self.members.iter().any(|member| member.user_id == user)
    }

    pub fn member_ids(&self) -> impl Iterator<Item = &UserId> {
        self.members.iter().map(|member| &member.user_id)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Food,
    Stay,
    Travel,
    Misc,
}

/// Informational only; OCR-assisted drafts are validated like manual ones.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpenseSource {
    #[default]
    Manual,
    Ocr,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Expense {
    pub id: ExpenseId,
    pub group_id: GroupId,
    /// 1-based position in the group's ledger, assigned by the store.
    pub seq: i64,
    pub title: String,
    /// Integer minor units of `currency`. Always positive.
    pub amount: i64,
    pub currency: String,
    pub category: Category,
    #[serde(rename = "payer_id")]
    pub payer: UserId,
    pub participants: Vec<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub source: ExpenseSource,
    /// Set when this entry cancels an earlier expense.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reverses: Option<ExpenseId>,
}

impl Expense {
    pub fn is_reversal(&self) -> bool {
        self.reverses.is_some()
    }
}

/// Client-supplied part of an expense. Identifier, sequence and timestamp are
/// always assigned server-side.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct ExpenseDraft {
    pub title: String,
    pub amount: i64,
    pub currency: String,
    pub category: Category,
    pub payer: UserId,
    pub participants: Vec<UserId>,
    pub notes: Option<String>,
    pub source: ExpenseSource,
}

/// An expense that passed validation but has not been sequenced yet.
#[derive(Clone, Debug, PartialEq)]
pub struct NewExpense {
    pub id: ExpenseId,
    pub group_id: GroupId,
    pub draft: ExpenseDraft,
    pub created_at: DateTime<Utc>,
    pub reverses: Option<ExpenseId>,
}

impl NewExpense {
    pub fn into_expense(self, seq: i64) -> Expense {
        Expense {
            id: self.id,
            group_id: self.group_id,
            seq,
            title: self.draft.title,
            amount: self.draft.amount,
            currency: self.draft.currency,
            category: self.draft.category,
            payer: self.draft.payer,
            participants: self.draft.participants,
            notes: self.draft.notes,
            created_at: self.created_at,
            source: self.draft.source,
            reverses: self.reverses,
        }
    }
}
