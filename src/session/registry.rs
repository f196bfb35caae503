//! `SessionRegistry` — owns the single current session identifier.

use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

/// An operator-defined workshop epoch. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkshopSession {
    pub id: String,
    pub created_at: DateTime<Utc>,
}

impl WorkshopSession {
    /// Create a new session with a timestamped, collision-free identifier,
    /// e.g. `session_20261019_101500_3f2a9c1d`.
    pub fn new() -> Self {
        let created_at = Utc::now();
        let suffix = Uuid::new_v4().simple().to_string();
        Self {
            id: format!("session_{}_{}", created_at.format("%Y%m%d_%H%M%S"), &suffix[..8]),
            created_at,
        }
    }
}

impl Default for WorkshopSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Holds the current session behind a read-mostly lock.
///
/// Every `current()` that starts after `install()`/`rotate()` returns sees
/// the new session: the write lock totally orders rotations against reads.
pub struct SessionRegistry {
    current: RwLock<Arc<WorkshopSession>>,
}

impl SessionRegistry {
    /// Start with an existing session (e.g. restored from the database).
    pub fn new(initial: WorkshopSession) -> Self {
        Self {
            current: RwLock::new(Arc::new(initial)),
        }
    }

    /// The current session.
    pub fn current(&self) -> Arc<WorkshopSession> {
        let guard = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    /// Identifier of the current session.
    pub fn current_id(&self) -> String {
        self.current().id.clone()
    }

    /// Create and atomically install a fresh session, returning it.
    pub fn rotate(&self) -> Arc<WorkshopSession> {
        self.install(WorkshopSession::new())
    }

    /// Atomically install `session` as current, returning it.
    pub fn install(&self, session: WorkshopSession) -> Arc<WorkshopSession> {
        let next = Arc::new(session);
        let previous = {
            let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *guard, Arc::clone(&next))
        };
        info!(previous = %previous.id, current = %next.id, "Workshop session rotated");
        next
    }

    /// Whether a participant bound to `session_id` belongs to the current session.
    pub fn belongs_to_current(&self, session_id: &str) -> bool {
        let guard = self.current.read().unwrap_or_else(PoisonError::into_inner);
        guard.id == session_id
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(WorkshopSession::new())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    use super::*;

    #[test]
    fn session_ids_are_unique_and_prefixed() {
        let ids: HashSet<String> = (0..100).map(|_| WorkshopSession::new().id).collect();
        assert_eq!(ids.len(), 100);
        assert!(ids.iter().all(|id| id.starts_with("session_")));
    }

    #[test]
    fn rotate_changes_current() {
        let registry = SessionRegistry::default();
        let first = registry.current();
        let second = registry.rotate();
        assert_ne!(first.id, second.id);
        assert_eq!(registry.current_id(), second.id);
    }

    #[test]
    fn belongs_to_current_tracks_rotation() {
        let registry = SessionRegistry::default();
        let old = registry.current_id();
        assert!(registry.belongs_to_current(&old));

        let new = registry.rotate();
        assert!(!registry.belongs_to_current(&old));
        assert!(registry.belongs_to_current(&new.id));
    }

    #[test]
    fn install_uses_given_session() {
        let registry = SessionRegistry::default();
        let restored = WorkshopSession {
            id: "session_restored".to_string(),
            created_at: Utc::now(),
        };
        registry.install(restored.clone());
        assert_eq!(*registry.current(), restored);
    }

    #[test]
    fn reads_after_rotate_returns_never_see_old_session() {
        let registry = Arc::new(SessionRegistry::default());
        let stop = Arc::new(AtomicBool::new(false));

        // Readers hammer current() while the main thread rotates.
        let readers: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let stop = Arc::clone(&stop);
                thread::spawn(move || {
                    let mut reads = 0u64;
                    while !stop.load(Ordering::Relaxed) {
                        let _ = registry.current();
                        reads += 1;
                    }
                    reads
                })
            })
            .collect();

        for _ in 0..200 {
            let installed = registry.rotate();
            // A read that begins after rotate() returned observes the new id.
            assert_eq!(registry.current_id(), installed.id);
        }

        stop.store(true, Ordering::Relaxed);
        for reader in readers {
            reader.join().unwrap();
        }
    }
}
