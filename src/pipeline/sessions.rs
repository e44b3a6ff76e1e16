//! Per-session serialisation and state persistence.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, warn};

use crate::error::DatabaseError;
use crate::pipeline::ConversationState;
use crate::store::SessionStore;

type LockMap = Arc<StdMutex<HashMap<String, Arc<Mutex<()>>>>>;

/// Conversation state checked out for one turn.
///
/// Holding the handle holds the session's lock; turns for the same session
/// id queue behind it. Dropping the last handle for a session evicts its
/// lock from the registry.
pub struct SessionHandle {
    pub session_id: String,
    pub user_id: String,
    pub state: ConversationState,
    version: i64,
    /// Loading failed; the state is ephemeral and must not overwrite the
    /// stored record.
    detached: bool,
    guard: OwnedMutexGuard<()>,
    locks: LockMap,
}

impl SessionHandle {
    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn is_detached(&self) -> bool {
        self.detached
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // One reference in the map, one in our guard: nobody else is waiting.
        if let Some(lock) = locks.get(&self.session_id)
            && Arc::ptr_eq(lock, OwnedMutexGuard::mutex(&self.guard))
            && Arc::strong_count(lock) == 2
        {
            locks.remove(&self.session_id);
        }
    }
}

/// Hands out one lock per active session id and loads/saves session state.
pub struct SessionRegistry {
    store: Arc<dyn SessionStore>,
    locks: LockMap,
}

impl SessionRegistry {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            store,
            locks: Arc::new(StdMutex::new(HashMap::new())),
        }
    }

    fn lock_for(&self, session_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.locks.lock().unwrap().len()
    }

    /// Lock the session and load its state. A store failure yields a fresh,
    /// detached state rather than an error.
    pub async fn checkout(&self, session_id: &str, user_id: &str) -> SessionHandle {
        let guard = self.lock_for(session_id).lock_owned().await;
        let handle = |user_id: String, state: ConversationState, version: i64, detached: bool| SessionHandle {
            session_id: session_id.to_string(),
            user_id,
            state,
            version,
            detached,
            guard,
            locks: self.locks.clone(),
        };

        match self.store.load_conversation(session_id).await {
            Ok(Some(stored)) => {
                if stored.user_id != user_id {
                    warn!(session_id, "Session resumed under a different user id");
                }
                debug!(session_id, version = stored.version, "Session loaded");
                handle(stored.user_id, stored.state, stored.version, false)
            }
            Ok(None) => handle(user_id.to_string(), ConversationState::default(), 0, false),
            Err(e) => {
                warn!(session_id, error = %e, "Session store failed, continuing with fresh state");
                handle(user_id.to_string(), ConversationState::default(), 0, true)
            }
        }
    }

    /// Persist the handle's state. Detached handles are not written.
    pub async fn save(&self, handle: &mut SessionHandle) -> Result<(), DatabaseError> {
        if handle.detached {
            return Ok(());
        }
        match self
            .store
            .save_conversation(&handle.session_id, &handle.user_id, &handle.state, handle.version)
            .await
        {
            Ok(version) => {
                handle.version = version;
                Ok(())
            }
            Err(e) => {
                error!(session_id = %handle.session_id, error = %e, "Failed to persist session state");
                Err(e)
            }
        }
    }

    /// Append transcript lines. Failures are logged, never surfaced.
    pub async fn record_exchange(&self, session_id: &str, user_text: &str, reply: &str) {
        for (role, content) in [("user", user_text), ("assistant", reply)] {
            if let Err(e) = self.store.append_message(session_id, role, content).await {
                warn!(session_id, role, error = %e, "Failed to append conversation message");
            }
        }
    }

    /// Stored state for `session_id` without taking its lock.
    pub async fn snapshot(&self, session_id: &str) -> Result<Option<(ConversationState, i64)>, DatabaseError> {
        Ok(self
            .store
            .load_conversation(session_id)
            .await?
            .map(|stored| (stored.state, stored.version)))
    }
}
