//! Per-group live fan-out of ledger events to connected sessions.
//!
//! Delivery is best-effort and at-most-once: nothing is queued for sessions
//! that are not connected, and each session has a bounded outbox that drops
//! its oldest event when full, so one slow client never holds up the others.
//! Clients reconcile through `listExpenses` after reconnecting.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, info};

use crate::error::{ServiceError, ServiceResult};
use crate::schemas::{Expense, GroupId, Member, UserId};

pub type SessionId = u64;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum HubEvent {
    #[serde(rename = "expense:new")]
    ExpenseNew { expense: Expense },
    #[serde(rename = "member:joined")]
    MemberJoined { group_id: GroupId, member: Member },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HubError {
    #[error("hub state poisoned")]
    Poisoned,
    #[error("hub unavailable: {0}")]
    Unavailable(String),
}

/// Decides whether a user may receive a group's events. Asked on every
/// subscribe, never cached.
#[async_trait]
pub trait MembershipAuthority: Send + Sync {
    async fn authorize_subscription(&self, group_id: &str, user_id: &str) -> ServiceResult<()>;
}

/// Sink for committed ledger events.
pub trait EventPublisher: Send + Sync {
    /// Returns how many sessions the event was queued for.
    fn publish(&self, group_id: &str, event: HubEvent) -> Result<usize, HubError>;
}

/// Bounded per-session queue; overflow evicts the oldest event.
#[derive(Debug)]
pub struct Outbox {
    queue: Mutex<VecDeque<Arc<HubEvent>>>,
    capacity: usize,
    notify: Notify,
    closed: AtomicBool,
    dropped: AtomicU64,
}

impl Outbox {
    fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        }
    }

    fn push(&self, event: Arc<HubEvent>) -> bool {
        if self.is_closed() {
            return false;
        }
        {
            let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
            if queue.len() >= self.capacity {
                queue.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            queue.push_back(event);
        }
        self.notify.notify_one();
        true
    }

    /// Next queued event; `None` once the session is closed and drained.
    pub async fn recv(&self) -> Option<Arc<HubEvent>> {
        loop {
            if let Some(event) = self
                .queue
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front()
            {
                return Some(event);
            }
            if self.is_closed() {
                return None;
            }
            self.notify.notified().await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Events evicted because the session fell behind.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }
}

/// A connected session. Dropping the handle does not disconnect; call
/// `RealtimeHub::disconnect`.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    pub id: SessionId,
    pub user_id: UserId,
    outbox: Arc<Outbox>,
}

impl SessionHandle {
    pub async fn recv(&self) -> Option<Arc<HubEvent>> {
        self.outbox.recv().await
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }
}

#[derive(Debug)]
struct SessionState {
    user_id: UserId,
    outbox: Arc<Outbox>,
    groups: HashSet<GroupId>,
}

type Subscribers = HashMap<SessionId, Arc<Outbox>>;

/// Lock order is sessions, then the group map, then a group's subscriber set.
/// Publishing only touches the last two.
#[derive(Debug)]
pub struct RealtimeHub {
    groups: RwLock<HashMap<GroupId, Arc<Mutex<Subscribers>>>>,
    sessions: Mutex<HashMap<SessionId, SessionState>>,
    next_session: AtomicU64,
    outbox_capacity: usize,
}

impl RealtimeHub {
    pub fn new(outbox_capacity: usize) -> Self {
        Self {
            groups: RwLock::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
            next_session: AtomicU64::new(1),
            outbox_capacity,
        }
    }

    /// Registers a session for an authenticated user. It starts with no
    /// subscriptions.
    pub fn connect(&self, user_id: impl Into<UserId>) -> SessionHandle {
        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        let user_id = user_id.into();
        let outbox = Arc::new(Outbox::new(self.outbox_capacity));
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                id,
                SessionState {
                    user_id: user_id.clone(),
                    outbox: outbox.clone(),
                    groups: HashSet::new(),
                },
            );
        debug!(session = id, user = %user_id, "session connected");
        SessionHandle {
            id,
            user_id,
            outbox,
        }
    }

    pub async fn subscribe(
        &self,
        session: SessionId,
        group_id: &str,
        authority: &dyn MembershipAuthority,
    ) -> ServiceResult<()> {
        let user_id = {
            let sessions = self.sessions.lock().map_err(|_| internal())?;
            sessions
                .get(&session)
                .map(|state| state.user_id.clone())
                .ok_or_else(|| ServiceError::not_found("session"))?
        };

        authority.authorize_subscription(group_id, &user_id).await?;

        let mut sessions = self.sessions.lock().map_err(|_| internal())?;
        // The session may have disconnected while membership was checked.
        let state = sessions
            .get_mut(&session)
            .ok_or_else(|| ServiceError::not_found("session"))?;
        state.groups.insert(group_id.to_string());
        let subscribers = {
            let mut groups = self.groups.write().map_err(|_| internal())?;
            groups.entry(group_id.to_string()).or_default().clone()
        };
        subscribers
            .lock()
            .map_err(|_| internal())?
            .insert(session, state.outbox.clone());
        info!(session, group = %group_id, user = %user_id, "subscribed");
        Ok(())
    }

    /// Returns whether the session was subscribed.
    pub fn unsubscribe(&self, session: SessionId, group_id: &str) -> bool {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let removed = sessions
            .get_mut(&session)
            .map(|state| state.groups.remove(group_id))
            .unwrap_or(false);
        if removed {
            self.remove_subscriber(session, group_id);
        }
        removed
    }

    /// Drops every subscription of the session and closes its outbox. Other
    /// sessions are unaffected.
    pub fn disconnect(&self, session: SessionId) {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(state) = sessions.remove(&session) else {
            return;
        };
        for group_id in &state.groups {
            self.remove_subscriber(session, group_id);
        }
        state.outbox.close();
        debug!(session, user = %state.user_id, "session disconnected");
    }

    pub fn subscriber_count(&self, group_id: &str) -> usize {
        let groups = self.groups.read().unwrap_or_else(PoisonError::into_inner);
        groups
            .get(group_id)
            .map(|subscribers| {
                subscribers
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .len()
            })
            .unwrap_or(0)
    }

    // Caller holds the sessions lock.
    fn remove_subscriber(&self, session: SessionId, group_id: &str) {
        let mut groups = self.groups.write().unwrap_or_else(PoisonError::into_inner);
        let now_empty = match groups.get(group_id) {
            Some(subscribers) => {
                let mut subscribers = subscribers.lock().unwrap_or_else(PoisonError::into_inner);
                subscribers.remove(&session);
                subscribers.is_empty()
            }
            None => false,
        };
        if now_empty {
            groups.remove(group_id);
        }
    }
}

fn internal() -> ServiceError {
    ServiceError::Internal("hub state poisoned".into())
}

impl EventPublisher for RealtimeHub {
    fn publish(&self, group_id: &str, event: HubEvent) -> Result<usize, HubError> {
        let subscribers = {
            let groups = self.groups.read().map_err(|_| HubError::Poisoned)?;
            match groups.get(group_id) {
                Some(subscribers) => subscribers.clone(),
                None => return Ok(0),
            }
        };
        let outboxes: Vec<Arc<Outbox>> = subscribers
            .lock()
            .map_err(|_| HubError::Poisoned)?
            .values()
            .cloned()
            .collect();

        let event = Arc::new(event);
        let delivered = outboxes
            .iter()
            .filter(|outbox| outbox.push(event.clone()))
            .count();
        debug!(group = %group_id, delivered, "event published");
        Ok(delivered)
    }
}
