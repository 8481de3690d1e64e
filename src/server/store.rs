//! The bounded, insertion-ordered registry of live sessions.

use super::transport::SessionTransport;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Opaque session identifier.
pub type SessionId = String;

/// One live session: an identifier bound to exactly one transport.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub transport: Arc<SessionTransport>,
    pub created_at: Instant,
}

impl Session {
    pub fn last_activity(&self) -> Instant {
        self.transport.last_activity()
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity())
    }
}

/// What [`SessionStore::add`] did with a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    Inserted,
    /// The id was already present; its transport was swapped in place.
    Replaced,
    /// Inserted after evicting the oldest session, whose transport has been closed.
    Evicted(SessionId),
    /// The store is draining; the incoming transport has been closed.
    Rejected,
}

impl AddOutcome {
    pub fn evicted(&self) -> Option<&str> {
        match self {
            AddOutcome::Evicted(id) => Some(id),
            _ => None,
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, AddOutcome::Rejected)
    }
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<SessionId, Session>,
    // Insertion order, oldest at the front. Always holds exactly the keys of `sessions`.
    order: VecDeque<SessionId>,
    // Set by `close_all`; no session may be added afterwards.
    draining: bool,
}

impl Inner {
    fn unlink(&mut self, id: &str) -> Option<Session> {
        let session = self.sessions.remove(id)?;
        if let Some(pos) = self.order.iter().position(|k| k == id) {
            self.order.remove(pos);
        }
        Some(session)
    }
}

/// Registry of sessions with a hard capacity bound.
///
/// Every operation runs under one lock, so capacity eviction and insertion
/// are a single atomic step and the count never exceeds `max_sessions` as
/// observed by any reader.
pub struct SessionStore {
    max_sessions: usize,
    inner: parking_lot::Mutex<Inner>,
}

impl SessionStore {
    /// `max_sessions` is clamped to at least one.
    pub fn new(max_sessions: usize) -> Self {
        Self {
            max_sessions: max_sessions.max(1),
            inner: parking_lot::Mutex::new(Inner::default()),
        }
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    /// Registers a session, evicting the oldest one first if the store is
    /// full.
    ///
    /// Re-adding an existing id replaces its transport in place without
    /// changing its position. Once [`close_all`](Self::close_all) has run,
    /// every addition is rejected and the incoming transport closed.
    pub fn add(&self, id: SessionId, transport: Arc<SessionTransport>) -> AddOutcome {
        let incoming = Arc::clone(&transport);
        let (evicted, replaced, total) = {
            let mut inner = self.inner.lock();
            if inner.draining {
                drop(inner);
                incoming.close();
                warn!(session_id = %id, "Store is draining, session rejected");
                return AddOutcome::Rejected;
            }
            let session = Session {
                id: id.clone(),
                transport,
                created_at: Instant::now(),
            };

            if let Some(existing) = inner.sessions.get_mut(&id) {
                let old = std::mem::replace(existing, session);
                (None, Some(old), inner.sessions.len())
            } else {
                let evicted = if inner.sessions.len() >= self.max_sessions {
                    inner
                        .order
                        .pop_front()
                        .and_then(|oldest| inner.sessions.remove(&oldest))
                } else {
                    None
                };
                inner.order.push_back(id.clone());
                inner.sessions.insert(id.clone(), session);
                (evicted, None, inner.sessions.len())
            }
        };

        if let Some(old) = replaced {
            if !Arc::ptr_eq(&old.transport, &incoming) {
                old.transport.close();
            }
            debug!(session_id = %id, "Session transport replaced");
            return AddOutcome::Replaced;
        }

        match evicted {
            Some(old) => {
                old.transport.close();
                warn!(
                    evicted_session_id = %old.id,
                    session_id = %id,
                    max_sessions = self.max_sessions,
                    "Session limit reached, evicted oldest session"
                );
                info!(session_id = %id, total, "Session added");
                AddOutcome::Evicted(old.id)
            }
            None => {
                info!(session_id = %id, total, "Session added");
                AddOutcome::Inserted
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<Session> {
        self.inner.lock().sessions.get(id).cloned()
    }

    pub fn get_transport(&self, id: &str) -> Option<Arc<SessionTransport>> {
        self.inner
            .lock()
            .sessions
            .get(id)
            .map(|s| Arc::clone(&s.transport))
    }

    pub fn has(&self, id: &str) -> bool {
        self.inner.lock().sessions.contains_key(id)
    }

    /// Removes a session and closes its transport. Returns whether anything
    /// was removed.
    pub fn remove(&self, id: &str) -> bool {
        let removed = {
            let mut inner = self.inner.lock();
            inner.unlink(id).map(|s| (s, inner.sessions.len()))
        };
        match removed {
            Some((session, total)) => {
                session.transport.close();
                info!(session_id = %id, total, "Session removed");
                true
            }
            None => false,
        }
    }

    /// Removes `id` only while it is still bound to `transport`.
    ///
    /// Used by the reaper so that a session replaced since the sweep began
    /// is left alone.
    pub fn remove_if_same(&self, id: &str, transport: &Arc<SessionTransport>) -> bool {
        let removed = {
            let mut inner = self.inner.lock();
            let same = inner
                .sessions
                .get(id)
                .is_some_and(|s| Arc::ptr_eq(&s.transport, transport));
            if same {
                inner.unlink(id).map(|s| (s, inner.sessions.len()))
            } else {
                None
            }
        };
        match removed {
            Some((session, total)) => {
                session.transport.close();
                info!(session_id = %id, total, "Session removed");
                true
            }
            None => false,
        }
    }

    pub fn count(&self) -> usize {
        self.inner.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// True once `close_all` has run.
    pub fn is_draining(&self) -> bool {
        self.inner.lock().draining
    }

    /// Session ids, oldest first.
    pub fn ids(&self) -> Vec<SessionId> {
        self.inner.lock().order.iter().cloned().collect()
    }

    /// A snapshot of every session, oldest first.
    pub fn snapshot(&self) -> Vec<Session> {
        let inner = self.inner.lock();
        inner
            .order
            .iter()
            .filter_map(|id| inner.sessions.get(id).cloned())
            .collect()
    }

    /// Removes every session, closes every transport and refuses further
    /// additions. Returns how many sessions were closed.
    pub fn close_all(&self) -> usize {
        let drained: Vec<Session> = {
            let mut inner = self.inner.lock();
            inner.draining = true;
            inner.order.clear();
            inner.sessions.drain().map(|(_, s)| s).collect()
        };
        for session in &drained {
            session.transport.close();
            debug!(session_id = %session.id, "Session closed");
        }
        if !drained.is_empty() {
            info!(closed = drained.len(), "All sessions closed");
        }
        drained.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::DispatchTable;

    fn transport(id: &str) -> Arc<SessionTransport> {
        Arc::new(SessionTransport::new(id, Arc::new(DispatchTable::new("test"))))
    }

    fn add(store: &SessionStore, id: &str) -> (Arc<SessionTransport>, AddOutcome) {
        let t = transport(id);
        let outcome = store.add(id.to_string(), Arc::clone(&t));
        (t, outcome)
    }

    #[test]
    fn test_add_get_remove() {
        let store = SessionStore::new(4);
        let (t, outcome) = add(&store, "a");
        assert_eq!(outcome, AddOutcome::Inserted);
        assert!(store.has("a"));
        assert!(Arc::ptr_eq(&store.get_transport("a").unwrap(), &t));
        assert_eq!(store.get("a").unwrap().id, "a");
        assert_eq!(store.count(), 1);

        assert!(store.remove("a"));
        assert!(t.is_closed());
        assert!(!store.has("a"));
        assert!(!store.remove("a"), "second remove is a no-op");
        assert!(store.get("a").is_none());
    }

    #[test]
    fn test_capacity_evicts_oldest_and_closes_it() {
        let store = SessionStore::new(2);
        let (a, _) = add(&store, "a");
        add(&store, "b");
        let (_, outcome) = add(&store, "c");

        assert_eq!(outcome.evicted(), Some("a"));
        assert!(a.is_closed());
        assert_eq!(store.count(), 2);
        assert_eq!(store.ids(), vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_capacity_of_one() {
        let store = SessionStore::new(1);
        add(&store, "a");
        let (_, outcome) = add(&store, "b");
        assert_eq!(outcome.evicted(), Some("a"));
        assert_eq!(store.ids(), vec!["b".to_string()]);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let store = SessionStore::new(0);
        assert_eq!(store.max_sessions(), 1);
        add(&store, "a");
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn test_readd_replaces_in_place() {
        let store = SessionStore::new(2);
        let (first, _) = add(&store, "a");
        add(&store, "b");
        let (second, outcome) = add(&store, "a");

        assert_eq!(outcome, AddOutcome::Replaced);
        assert!(first.is_closed());
        assert!(!second.is_closed());
        assert_eq!(store.ids(), vec!["a".to_string(), "b".to_string()]);

        // "a" kept its original position, so it is still evicted first.
        let (_, outcome) = add(&store, "c");
        assert_eq!(outcome.evicted(), Some("a"));
    }

    #[test]
    fn test_remove_if_same_ignores_replaced_transport() {
        let store = SessionStore::new(2);
        let (old, _) = add(&store, "a");
        let (new, _) = add(&store, "a");
        assert!(!store.remove_if_same("a", &old));
        assert!(store.has("a"));
        assert!(store.remove_if_same("a", &new));
        assert!(!store.has("a"));
    }

    #[test]
    fn test_close_all() {
        let store = SessionStore::new(8);
        let transports: Vec<_> = ["a", "b", "c"].iter().map(|id| add(&store, id).0).collect();
        assert_eq!(store.close_all(), 3);
        assert!(store.is_empty());
        assert!(transports.iter().all(|t| t.is_closed()));
        assert_eq!(store.close_all(), 0);

        let (late, outcome) = add(&store, "d");
        assert!(outcome.is_rejected());
        assert!(late.is_closed(), "a draining store closes late arrivals");
        assert!(store.is_draining());
        assert!(!store.has("d"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_adds_never_exceed_capacity() {
        let store = Arc::new(SessionStore::new(5));
        let mut tasks = Vec::new();
        for i in 0..64 {
            let store = Arc::clone(&store);
            tasks.push(tokio::spawn(async move {
                let id = format!("s-{}", i);
                store.add(id.clone(), transport(&id));
                assert!(store.count() <= 5);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(store.count(), 5);
        assert_eq!(store.ids().len(), 5);
    }
}
