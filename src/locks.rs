use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::schemas::GroupId;

/// One exclusive critical section per group id. Work on different groups never
/// contends; work on the same group runs one at a time in arrival order.
#[derive(Debug, Default)]
pub struct GroupLocks {
    sections: Mutex<HashMap<GroupId, Arc<AsyncMutex<()>>>>,
}

impl GroupLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, group_id: &str) -> OwnedMutexGuard<()> {
        let section = {
            let mut sections = self.sections.lock().unwrap_or_else(PoisonError::into_inner);
            // Sections nobody holds or waits on can go.
            sections.retain(|id, section| id == group_id || Arc::strong_count(section) > 1);
            sections
                .entry(group_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        section.lock_owned().await
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.sections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
