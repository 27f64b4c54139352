//! Group Service: membership, validation and the write path of the ledger.
//!
//! Mutations of one group (joining, appending expenses) run inside that
//! group's critical section; different groups proceed in parallel. Every store
//! call is bounded by `store_timeout`. Reads that time out are retried with
//! backoff, writes never are, so an ambiguous write surfaces to the caller
//! instead of risking a duplicate expense.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{LedgerError, ServiceError, ServiceResult};
use crate::hub::{EventPublisher, HubEvent, MembershipAuthority};
use crate::insights::{summarize, Insights};
use crate::locks::GroupLocks;
use crate::rates::{normalize, RateProvider};
use crate::schemas::{
    Expense, ExpenseDraft, ExpenseSource, Group, Member, NewExpense, JOIN_CODE_ALPHABET,
    JOIN_CODE_LEN,
};
use crate::store::LedgerStore;

const MAX_NAME_LEN: usize = 100;
const MAX_TITLE_LEN: usize = 200;
const MAX_NOTES_LEN: usize = 1000;

#[derive(Clone, Debug)]
pub struct ServiceSettings {
    pub store_timeout: Duration,
    pub join_code_attempts: u32,
    pub read_retries: u32,
    pub retry_backoff: Duration,
    pub reference_currency: String,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            store_timeout: Duration::from_secs(2),
            join_code_attempts: 8,
            read_retries: 2,
            retry_backoff: Duration::from_millis(50),
            reference_currency: "USD".to_string(),
        }
    }
}

type CodeGenerator = Box<dyn Fn() -> String + Send + Sync>;

pub fn random_join_code() -> String {
    let mut rng = rand::thread_rng();
    (0..JOIN_CODE_LEN)
        .map(|_| JOIN_CODE_ALPHABET[rng.gen_range(0..JOIN_CODE_ALPHABET.len())] as char)
        .collect()
}

pub struct GroupService {
    store: Arc<dyn LedgerStore>,
    publisher: Arc<dyn EventPublisher>,
    rates: Arc<dyn RateProvider>,
    locks: GroupLocks,
    settings: ServiceSettings,
    next_code: CodeGenerator,
}

impl GroupService {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        publisher: Arc<dyn EventPublisher>,
        rates: Arc<dyn RateProvider>,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            store,
            publisher,
            rates,
            locks: GroupLocks::new(),
            settings,
            next_code: Box::new(random_join_code),
        }
    }

    pub fn with_code_generator(
        mut self,
        generator: impl Fn() -> String + Send + Sync + 'static,
    ) -> Self {
        self.next_code = Box::new(generator);
        self
    }

    pub fn reference_currency(&self) -> &str {
        &self.settings.reference_currency
    }

    /// Creates a group with a fresh join code and `creator` as first member.
    pub async fn create_group(&self, name: &str, creator: &str) -> ServiceResult<Group> {
        let name = name.trim();
        if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
            return Err(ServiceError::invalid(format!(
                "group name must be 1 to {MAX_NAME_LEN} characters"
            )));
        }

        for attempt in 1..=self.settings.join_code_attempts {
            let code = (self.next_code)();
            let code_ref = code.as_str();
            let taken = self
                .read("find group by code", move || {
                    self.store.find_group_by_code(code_ref)
                })
                .await?;
            if taken.is_some() {
                warn!(attempt, "join code collision, regenerating");
                continue;
            }

            let now = Utc::now();
            let group = Group {
                id: Uuid::new_v4().to_string(),
                name: name.to_string(),
                code,
                members: vec![Member {
                    user_id: creator.to_string(),
                    joined_at: now,
                }],
                created_at: now,
            };
            // The store enforces code uniqueness, so a group created by a
            // concurrent caller between the lookup and this insert shows up
            // as a conflict here.
            match self
                .bounded("create group", self.store.create_group(group))
                .await
            {
                Ok(group) => {
                    info!(group = %group.id, code = %group.code, creator, "group created");
                    return Ok(group);
                }
                Err(ServiceError::Conflict(_)) => {
                    warn!(attempt, "join code taken on insert, regenerating");
                }
                Err(err) => return Err(err),
            }
        }

        Err(ServiceError::Conflict(
            "could not allocate a unique join code".to_string(),
        ))
    }

    /// Adds `user` to the group behind `code`. Joining again is a no-op that
    /// returns the group unchanged.
    pub async fn join_group(&self, code: &str, user: &str) -> ServiceResult<Group> {
        let code = code.trim().to_uppercase();
        let code_ref = code.as_str();
        let group = self
            .read("find group by code", move || {
                self.store.find_group_by_code(code_ref)
            })
            .await?
            .ok_or_else(|| ServiceError::not_found("group"))?;
        if group.is_member(user) {
            return Ok(group);
        }

        let _section = self.locks.acquire(&group.id).await;
        let group_id = group.id.as_str();
        let current = self
            .read("find group", move || self.store.find_group(group_id))
            .await?
            .ok_or_else(|| ServiceError::not_found("group"))?;
        if current.is_member(user) {
            return Ok(current);
        }

        let member = Member {
            user_id: user.to_string(),
            joined_at: Utc::now(),
        };
        let updated = self
            .bounded("add member", self.store.add_member(group_id, member.clone()))
            .await?;
        info!(group = %updated.id, user, "member joined");
        self.announce(
            &updated.id,
            HubEvent::MemberJoined {
                group_id: updated.id.clone(),
                member,
            },
        );
        Ok(updated)
    }

    pub async fn get_group(&self, group_id: &str, user: &str) -> ServiceResult<Group> {
        let group = self
            .read("find group", move || self.store.find_group(group_id))
            .await?
            .ok_or_else(|| ServiceError::not_found("group"))?;
        if !group.is_member(user) {
            return Err(ServiceError::Forbidden);
        }
        Ok(group)
    }

    /// Validates and records an expense, then hands it to the realtime hub.
    /// Identifier and timestamp are always assigned here.
    pub async fn add_expense(
        &self,
        group_id: &str,
        user: &str,
        draft: ExpenseDraft,
    ) -> ServiceResult<Expense> {
        let group = self.get_group(group_id, user).await?;
        let draft = validate_draft(&group, draft)?;
        let expense = NewExpense {
            id: Uuid::new_v4().to_string(),
            group_id: group.id.clone(),
            draft,
            created_at: Utc::now(),
            reverses: None,
        };

        let _section = self.locks.acquire(&group.id).await;
        let expense = self.commit(expense).await?;
        info!(
            group = %expense.group_id,
            expense = %expense.id,
            seq = expense.seq,
            amount = expense.amount,
            currency = %expense.currency,
            "expense recorded"
        );
        Ok(expense)
    }

    /// Oldest first.
    pub async fn list_expenses(&self, group_id: &str, user: &str) -> ServiceResult<Vec<Expense>> {
        self.get_group(group_id, user).await?;
        self.read("list expenses", move || self.store.list_expenses(group_id))
            .await
    }

    pub async fn get_expense(
        &self,
        group_id: &str,
        user: &str,
        expense_id: &str,
    ) -> ServiceResult<Expense> {
        self.get_group(group_id, user).await?;
        self.read("find expense", move || {
            self.store.find_expense(group_id, expense_id)
        })
        .await?
        .ok_or_else(|| ServiceError::not_found("expense"))
    }

    /// Appends an entry that cancels `expense_id`. The original stays in the
    /// ledger untouched.
    pub async fn reverse_expense(
        &self,
        group_id: &str,
        user: &str,
        expense_id: &str,
    ) -> ServiceResult<Expense> {
        let group = self.get_group(group_id, user).await?;

        let _section = self.locks.acquire(&group.id).await;
        let expenses = self
            .read("list expenses", move || self.store.list_expenses(group_id))
            .await?;
        let original = expenses
            .iter()
            .find(|expense| expense.id == expense_id)
            .ok_or_else(|| ServiceError::not_found("expense"))?;
        if original.is_reversal() {
            return Err(ServiceError::invalid("a reversal cannot be reversed"));
        }
        if expenses
            .iter()
            .any(|expense| expense.reverses.as_deref() == Some(expense_id))
        {
            return Err(ServiceError::Conflict(format!(
                "expense {expense_id} is already reversed"
            )));
        }

        let reversal = NewExpense {
            id: Uuid::new_v4().to_string(),
            group_id: group.id.clone(),
            draft: ExpenseDraft {
                title: format!("Reversal: {}", original.title),
                amount: original.amount,
                currency: original.currency.clone(),
                category: original.category,
                payer: original.payer.clone(),
                participants: original.participants.clone(),
                notes: None,
                source: ExpenseSource::Manual,
            },
            created_at: Utc::now(),
            reverses: Some(original.id.clone()),
        };
        let reversal = self.commit(reversal).await?;
        info!(group = %group.id, expense = %expense_id, reversal = %reversal.id, user, "expense reversed");
        Ok(reversal)
    }

    /// Settlement snapshot over the whole ledger, in the reference currency.
    pub async fn get_insights(&self, group_id: &str, user: &str) -> ServiceResult<Insights> {
        let expenses = self.list_expenses(group_id, user).await?;
        let reference = self.reference_currency();
        match normalize(expenses, reference, self.rates.as_ref()).await {
            Ok(expenses) => Ok(Insights::Available(summarize(&expenses, reference))),
            Err(err) => {
                warn!(group = %group_id, error = %err, "insights unavailable");
                Ok(Insights::Unavailable {
                    reason: err.to_string(),
                })
            }
        }
    }

    // Caller holds the group's critical section, so publication order matches
    // ledger order. Nothing is published unless the append succeeded.
    async fn commit(&self, expense: NewExpense) -> ServiceResult<Expense> {
        let expense = self
            .bounded("append expense", self.store.append_expense(expense))
            .await?;
        self.announce(
            &expense.group_id,
            HubEvent::ExpenseNew {
                expense: expense.clone(),
            },
        );
        Ok(expense)
    }

    fn announce(&self, group_id: &str, event: HubEvent) {
        if let Err(err) = self.publisher.publish(group_id, event) {
            warn!(group = %group_id, error = %err, "publish failed; clients will catch up on next list");
        }
    }

    async fn bounded<T>(
        &self,
        what: &str,
        operation: impl Future<Output = Result<T, LedgerError>>,
    ) -> ServiceResult<T> {
        match tokio::time::timeout(self.settings.store_timeout, operation).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => {
                if matches!(err, LedgerError::Backend(_)) {
                    error!(operation = what, error = %err, "ledger store failure");
                }
                Err(err.into())
            }
            Err(_) => Err(ServiceError::Timeout(what.to_string())),
        }
    }

    async fn read<T, F, Fut>(&self, what: &str, operation: F) -> ServiceResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, LedgerError>>,
    {
        let mut backoff = self.settings.retry_backoff;
        let mut attempt = 0;
        loop {
            match self.bounded(what, operation()).await {
                Err(ServiceError::Timeout(_)) if attempt < self.settings.read_retries => {
                    attempt += 1;
                    warn!(operation = what, attempt, "store read timed out, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                result => return result,
            }
        }
    }
}

#[async_trait]
impl MembershipAuthority for GroupService {
    async fn authorize_subscription(&self, group_id: &str, user_id: &str) -> ServiceResult<()> {
        self.get_group(group_id, user_id).await.map(|_| ())
    }
}

fn validate_draft(group: &Group, mut draft: ExpenseDraft) -> ServiceResult<ExpenseDraft> {
    draft.title = draft.title.trim().to_string();
    if draft.title.is_empty() || draft.title.chars().count() > MAX_TITLE_LEN {
        return Err(ServiceError::invalid(format!(
            "title must be 1 to {MAX_TITLE_LEN} characters"
        )));
    }
    if draft.amount <= 0 {
        return Err(ServiceError::invalid("amount must be positive"));
    }
    draft.currency = draft.currency.trim().to_uppercase();
    if draft.currency.len() != 3 || !draft.currency.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(ServiceError::invalid("currency must be a 3-letter code"));
    }
    if draft.participants.is_empty() {
        return Err(ServiceError::invalid("participants must not be empty"));
    }
    let mut seen = HashSet::new();
    if let Some(duplicate) = draft
        .participants
        .iter()
        .find(|participant| !seen.insert(participant.as_str()))
    {
        return Err(ServiceError::invalid(format!(
            "participant {duplicate} listed twice"
        )));
    }
    if !group.is_member(&draft.payer) {
        return Err(ServiceError::invalid(format!(
            "payer {} is not a member of the group",
            draft.payer
        )));
    }
    if let Some(outsider) = draft
        .participants
        .iter()
        .find(|participant| !group.is_member(participant))
    {
        return Err(ServiceError::invalid(format!(
            "participant {outsider} is not a member of the group"
        )));
    }
    draft.notes = draft
        .notes
        .map(|notes| notes.trim().to_string())
        .filter(|notes| !notes.is_empty());
    if draft
        .notes
        .as_ref()
        .is_some_and(|notes| notes.chars().count() > MAX_NOTES_LEN)
    {
        return Err(ServiceError::invalid(format!(
            "notes must be at most {MAX_NOTES_LEN} characters"
        )));
    }
    Ok(draft)
}
