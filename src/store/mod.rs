//! Durable keyed storage for groups, memberships and expenses.
//!
//! Every mutating operation is atomic per group: concurrent `add_member` calls
//! never duplicate a member and concurrent `append_expense` calls never share
//! an identifier or a sequence number. Expenses are listed oldest-first (by
//! `seq`), the order settlement replays them in.

use async_trait::async_trait;

use crate::error::LedgerError;
use crate::schemas::{Expense, Group, Member, NewExpense};

mod memory;
mod mongo;

pub use memory::MemoryLedger;
pub use mongo::MongoLedger;

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Fails with `Conflict` when the id or join code is already taken.
    async fn create_group(&self, group: Group) -> Result<Group, LedgerError>;

    async fn find_group(&self, group_id: &str) -> Result<Option<Group>, LedgerError>;

    async fn find_group_by_code(&self, code: &str) -> Result<Option<Group>, LedgerError>;

    /// Appends `member` unless the user already belongs to the group; either
    /// way the current group is returned.
    async fn add_member(&self, group_id: &str, member: Member) -> Result<Group, LedgerError>;

    /// Assigns the next sequence number of the group and persists.
    async fn append_expense(&self, expense: NewExpense) -> Result<Expense, LedgerError>;

    async fn list_expenses(&self, group_id: &str) -> Result<Vec<Expense>, LedgerError>;

    async fn find_expense(
        &self,
        group_id: &str,
        expense_id: &str,
    ) -> Result<Option<Expense>, LedgerError>;
}
