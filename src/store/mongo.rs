use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::{
    bson::doc,
    error::{Error as MongoError, ErrorKind, WriteFailure},
    options::{FindOneAndUpdateOptions, FindOptions, IndexOptions, ReturnDocument},
    Client, Collection, IndexModel,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::LedgerStore;
use crate::error::LedgerError;
use crate::schemas::{Expense, Group, GroupId, Member, NewExpense};

const GROUPS: &str = "Groups";
const EXPENSES: &str = "Expenses";
const DUPLICATE_KEY: i32 = 11000;

/// Stored shape of a group: the public fields plus the per-group expense
/// counter used to hand out sequence numbers atomically.
#[derive(Clone, Debug, Deserialize, Serialize)]
struct GroupDocument {
    id: GroupId,
    name: String,
    code: String,
    members: Vec<Member>,
    created_at: DateTime<Utc>,
    #[serde(default)]
    expense_seq: i64,
}

impl From<Group> for GroupDocument {
    fn from(group: Group) -> Self {
        Self {
            id: group.id,
            name: group.name,
            code: group.code,
            members: group.members,
            created_at: group.created_at,
            expense_seq: 0,
        }
    }
}

impl From<GroupDocument> for Group {
    fn from(document: GroupDocument) -> Self {
        Self {
            id: document.id,
            name: document.name,
            code: document.code,
            members: document.members,
            created_at: document.created_at,
        }
    }
}

fn is_duplicate_key(err: &MongoError) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(failure)) if failure.code == DUPLICATE_KEY
    )
}

fn backend(err: impl std::fmt::Display) -> LedgerError {
    LedgerError::Backend(err.to_string())
}

/// MongoDB-backed ledger. Groups and expenses live in separate collections;
/// unique indexes on ids, join codes and `(group_id, seq)` back the per-group
/// atomicity guarantees across processes.
#[derive(Clone)]
pub struct MongoLedger {
    groups: Collection<GroupDocument>,
    expenses: Collection<Expense>,
}

impl MongoLedger {
    pub async fn connect(uri: &str, database: &str) -> Result<Self, LedgerError> {
        let client = Client::with_uri_str(uri).await.map_err(backend)?;
        let database = client.database(database);
        let ledger = Self {
            groups: database.collection(GROUPS),
            expenses: database.collection(EXPENSES),
        };
        ledger.ensure_indexes().await?;
        info!(database = %database.name(), "connected to MongoDB ledger");
        Ok(ledger)
    }

    async fn ensure_indexes(&self) -> Result<(), LedgerError> {
        let unique = || IndexOptions::builder().unique(true).build();
        for keys in [doc! { "id": 1 }, doc! { "code": 1 }] {
            let index = IndexModel::builder().keys(keys).options(unique()).build();
            self.groups.create_index(index, None).await.map_err(backend)?;
        }
        for keys in [doc! { "id": 1 }, doc! { "group_id": 1, "seq": 1 }] {
            let index = IndexModel::builder().keys(keys).options(unique()).build();
            self.expenses
                .create_index(index, None)
                .await
                .map_err(backend)?;
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for MongoLedger {
    async fn create_group(&self, group: Group) -> Result<Group, LedgerError> {
        match self
            .groups
            .insert_one(GroupDocument::from(group.clone()), None)
            .await
        {
            Ok(_) => Ok(group),
            Err(err) if is_duplicate_key(&err) => Err(LedgerError::Conflict(format!(
                "group id or join code {} already in use",
                group.code
            ))),
            Err(err) => Err(backend(err)),
        }
    }

    async fn find_group(&self, group_id: &str) -> Result<Option<Group>, LedgerError> {
        let found = self
            .groups
            .find_one(doc! { "id": group_id }, None)
            .await
            .map_err(backend)?;
        Ok(found.map(Group::from))
    }

    async fn find_group_by_code(&self, code: &str) -> Result<Option<Group>, LedgerError> {
        let found = self
            .groups
            .find_one(doc! { "code": code }, None)
            .await
            .map_err(backend)?;
        Ok(found.map(Group::from))
    }

    async fn add_member(&self, group_id: &str, member: Member) -> Result<Group, LedgerError> {
        let user_id = member.user_id.clone();
        let member = bson::to_bson(&member).map_err(backend)?;
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();
        // The filter only matches while the user is absent, so concurrent
        // joins cannot push the same member twice.
        let updated = self
            .groups
            .find_one_and_update(
                doc! { "id": group_id, "members.user_id": { "$ne": user_id.as_str() } },
                doc! { "$push": { "members": member } },
                options,
            )
            .await
            .map_err(backend)?;
        match updated {
            Some(document) => Ok(document.into()),
            None => self.find_group(group_id).await?.ok_or(LedgerError::NotFound),
        }
    }

    async fn append_expense(&self, expense: NewExpense) -> Result<Expense, LedgerError> {
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();
        let counter = self
            .groups
            .find_one_and_update(
                doc! { "id": expense.group_id.as_str() },
                doc! { "$inc": { "expense_seq": 1_i64 } },
                options,
            )
            .await
            .map_err(backend)?
            .ok_or(LedgerError::NotFound)?;

        let expense = expense.into_expense(counter.expense_seq);
        match self.expenses.insert_one(&expense, None).await {
            Ok(_) => Ok(expense),
            Err(err) if is_duplicate_key(&err) => Err(LedgerError::Conflict(format!(
                "expense {} already exists",
                expense.id
            ))),
            Err(err) => Err(backend(err)),
        }
    }

    async fn list_expenses(&self, group_id: &str) -> Result<Vec<Expense>, LedgerError> {
        let options = FindOptions::builder().sort(doc! { "seq": 1 }).build();
        let cursor = self
            .expenses
            .find(doc! { "group_id": group_id }, options)
            .await
            .map_err(backend)?;
        cursor.try_collect().await.map_err(backend)
    }

    async fn find_expense(
        &self,
        group_id: &str,
        expense_id: &str,
    ) -> Result<Option<Expense>, LedgerError> {
        self.expenses
            .find_one(doc! { "group_id": group_id, "id": expense_id }, None)
            .await
            .map_err(backend)
    }
}
