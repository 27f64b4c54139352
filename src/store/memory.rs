use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;

use super::LedgerStore;
use crate::error::LedgerError;
use crate::schemas::{Expense, Group, GroupId, Member, NewExpense};

#[derive(Debug)]
struct GroupEntry {
    group: Group,
    expenses: Vec<Expense>,
}

/// In-process ledger for tests and single-node development.
///
/// Each group lives behind its own mutex; the outer map is only write-locked
/// while a group is being created.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    groups: RwLock<HashMap<GroupId, Arc<Mutex<GroupEntry>>>>,
    codes: Mutex<HashMap<String, GroupId>>,
}

fn poisoned<T>(_: T) -> LedgerError {
    LedgerError::Backend("lock poisoned".to_string())
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, group_id: &str) -> Result<Option<Arc<Mutex<GroupEntry>>>, LedgerError> {
        let groups = self.groups.read().map_err(poisoned)?;
        Ok(groups.get(group_id).cloned())
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn create_group(&self, group: Group) -> Result<Group, LedgerError> {
        let mut codes = self.codes.lock().map_err(poisoned)?;
        if codes.contains_key(&group.code) {
            return Err(LedgerError::Conflict(format!(
                "join code {} already in use",
                group.code
            )));
        }
        let mut groups = self.groups.write().map_err(poisoned)?;
        if groups.contains_key(&group.id) {
            return Err(LedgerError::Conflict(format!(
                "group {} already exists",
                group.id
            )));
        }
        codes.insert(group.code.clone(), group.id.clone());
        groups.insert(
            group.id.clone(),
            Arc::new(Mutex::new(GroupEntry {
                group: group.clone(),
                expenses: Vec::new(),
            })),
        );
        Ok(group)
    }

    async fn find_group(&self, group_id: &str) -> Result<Option<Group>, LedgerError> {
        match self.entry(group_id)? {
            Some(entry) => Ok(Some(entry.lock().map_err(poisoned)?.group.clone())),
            None => Ok(None),
        }
    }

    async fn find_group_by_code(&self, code: &str) -> Result<Option<Group>, LedgerError> {
        let group_id = {
            let codes = self.codes.lock().map_err(poisoned)?;
            codes.get(code).cloned()
        };
        match group_id {
            Some(id) => self.find_group(&id).await,
            None => Ok(None),
        }
    }

    async fn add_member(&self, group_id: &str, member: Member) -> Result<Group, LedgerError> {
        let entry = self.entry(group_id)?.ok_or(LedgerError::NotFound)?;
        let mut entry = entry.lock().map_err(poisoned)?;
        if !entry.group.is_member(&member.user_id) {
            entry.group.members.push(member);
        }
        Ok(entry.group.clone())
    }

    async fn append_expense(&self, expense: NewExpense) -> Result<Expense, LedgerError> {
        let entry = self.entry(&expense.group_id)?.ok_or(LedgerError::NotFound)?;
        let mut entry = entry.lock().map_err(poisoned)?;
        if entry.expenses.iter().any(|existing| existing.id == expense.id) {
            return Err(LedgerError::Conflict(format!(
                "expense {} already exists",
                expense.id
            )));
        }
        let seq = entry.expenses.len() as i64 + 1;
        let expense = expense.into_expense(seq);
        entry.expenses.push(expense.clone());
        Ok(expense)
    }

    async fn list_expenses(&self, group_id: &str) -> Result<Vec<Expense>, LedgerError> {
        let entry = self.entry(group_id)?.ok_or(LedgerError::NotFound)?;
        let entry = entry.lock().map_err(poisoned)?;
        Ok(entry.expenses.clone())
    }

    async fn find_expense(
        &self,
        group_id: &str,
        expense_id: &str,
    ) -> Result<Option<Expense>, LedgerError> {
        let entry = self.entry(group_id)?.ok_or(LedgerError::NotFound)?;
        let entry = entry.lock().map_err(poisoned)?;
        Ok(entry
            .expenses
            .iter()
            .find(|expense| expense.id == expense_id)
            .cloned())
    }
}
