//! In-process counter store with a manual clock.
//!
//! Mirrors the store semantics the limiter relies on (GET of a missing key,
//! INCR creating at 1, EXPIRE arming a TTL) and records how often each
//! primitive was called. Time only moves when [`MemoryStore::advance`] is
//! called, so window expiry can be exercised without sleeping.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use super::store::{CounterStore, HandshakeError, StoreConnector};
use crate::wire::{CommandError, ConnectError, ConnectOptions};

/// Number of namespaces accepted by SELECT.
const NAMESPACE_COUNT: u32 = 16;

#[derive(Debug, Clone, Copy, Default)]
struct Entry {
    value: i64,
    /// Clock second at which the key disappears.
    expires_at: Option<u64>,
}

impl Entry {
    fn is_live(&self, now: u64) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// Snapshot of how many times each operation ran.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub connects: usize,
    pub gets: usize,
    pub incrs: usize,
    pub expires: usize,
    pub closes: usize,
}

#[derive(Debug, Default)]
struct Calls {
    connects: AtomicUsize,
    gets: AtomicUsize,
    incrs: AtomicUsize,
    expires: AtomicUsize,
    closes: AtomicUsize,
}

#[derive(Debug, Default)]
struct Inner {
    entries: DashMap<(u32, String), Entry>,
    now_secs: AtomicU64,
    password: Option<String>,
    calls: Calls,
    unreachable: Mutex<bool>,
    failing_verb: Mutex<Option<&'static str>>,
}

/// Shared in-memory store; clones see the same keys and clock.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that only accepts sessions authenticating with `password`.
    pub fn with_password(password: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                password: Some(password.into()),
                ..Inner::default()
            }),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        self.inner.now_secs.fetch_add(by.as_secs(), Ordering::SeqCst);
    }

    /// Make subsequent connects fail as if the store were down.
    pub fn set_unreachable(&self, unreachable: bool) {
        *self.inner.unreachable.lock() = unreachable;
    }

    /// Make every command with this verb fail with a dropped connection.
    pub fn fail_command(&self, verb: Option<&'static str>) {
        *self.inner.failing_verb.lock() = verb;
    }

    pub fn calls(&self) -> CallCounts {
        let calls = &self.inner.calls;
        CallCounts {
            connects: calls.connects.load(Ordering::SeqCst),
            gets: calls.gets.load(Ordering::SeqCst),
            incrs: calls.incrs.load(Ordering::SeqCst),
            expires: calls.expires.load(Ordering::SeqCst),
            closes: calls.closes.load(Ordering::SeqCst),
        }
    }

    /// Live value of `key` in namespace 0, without counting a call.
    pub fn value(&self, key: &str) -> Option<i64> {
        self.live_entry(0, key).map(|e| e.value)
    }

    /// Remaining time to live of `key` in namespace 0, in seconds.
    pub fn ttl(&self, key: &str) -> Option<u64> {
        let now = self.now();
        self.live_entry(0, key)
            .and_then(|e| e.expires_at)
            .map(|at| at - now)
    }

    fn now(&self) -> u64 {
        self.inner.now_secs.load(Ordering::SeqCst)
    }

    fn live_entry(&self, namespace: u32, key: &str) -> Option<Entry> {
        let now = self.now();
        self.inner
            .entries
            .get(&(namespace, key.to_string()))
            .map(|e| *e)
            .filter(|e| e.is_live(now))
    }

    fn check_failure(&self, verb: &'static str) -> Result<(), CommandError> {
        match *self.inner.failing_verb.lock() {
            Some(failing) if failing == verb => Err(CommandError::PeerClosed),
            _ => Ok(()),
        }
    }
}

/// One session opened against a [`MemoryStore`].
#[derive(Debug)]
pub struct MemorySession {
    store: MemoryStore,
    namespace: u32,
    closed: bool,
}

#[async_trait]
impl StoreConnector for MemoryStore {
    type Store = MemorySession;

    async fn connect(&self, options: &ConnectOptions) -> Result<MemorySession, HandshakeError> {
        self.inner.calls.connects.fetch_add(1, Ordering::SeqCst);

        if *self.inner.unreachable.lock() {
            return Err(HandshakeError::Connect(ConnectError::ConnectFailure {
                endpoint: options.endpoint(),
                source: std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "memory store marked unreachable",
                ),
            }));
        }

        if let Some(expected) = &self.inner.password {
            let offered = options.password.as_deref().unwrap_or_default();
            if offered != expected {
                return Err(HandshakeError::Auth);
            }
        }

        if options.namespace >= NAMESPACE_COUNT {
            return Err(HandshakeError::Connect(ConnectError::Select {
                namespace: options.namespace,
                reply: "-ERR DB index is out of range".to_string(),
            }));
        }

        Ok(MemorySession {
            store: self.clone(),
            namespace: options.namespace,
            closed: false,
        })
    }
}

impl MemorySession {
    fn ensure_open(&self) -> Result<(), CommandError> {
        if self.closed {
            Err(CommandError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CounterStore for MemorySession {
    async fn get(&mut self, key: &str) -> Result<Option<i64>, CommandError> {
        self.ensure_open()?;
        self.store.inner.calls.gets.fetch_add(1, Ordering::SeqCst);
        self.store.check_failure("GET")?;
        Ok(self.store.live_entry(self.namespace, key).map(|e| e.value))
    }

    async fn incr(&mut self, key: &str) -> Result<i64, CommandError> {
        self.ensure_open()?;
        self.store.inner.calls.incrs.fetch_add(1, Ordering::SeqCst);
        self.store.check_failure("INCR")?;

        let now = self.store.now();
        let mut entry = self
            .store
            .inner
            .entries
            .entry((self.namespace, key.to_string()))
            .or_default();
        if !entry.is_live(now) {
            *entry = Entry::default();
        }
        entry.value += 1;
        Ok(entry.value)
    }

    async fn expire(&mut self, key: &str, seconds: u64) -> Result<bool, CommandError> {
        self.ensure_open()?;
        self.store.inner.calls.expires.fetch_add(1, Ordering::SeqCst);
        self.store.check_failure("EXPIRE")?;

        let now = self.store.now();
        match self
            .store
            .inner
            .entries
            .get_mut(&(self.namespace, key.to_string()))
        {
            Some(mut entry) if entry.is_live(now) => {
                entry.expires_at = Some(now + seconds);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.store.inner.calls.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> ConnectOptions {
        ConnectOptions::new("memory", 6379)
    }

    #[tokio::test]
    async fn test_incr_creates_at_one() {
        let store = MemoryStore::new();
        let mut session = store.connect(&options()).await.unwrap();

        assert_eq!(session.get("k").await.unwrap(), None);
        assert_eq!(session.incr("k").await.unwrap(), 1);
        assert_eq!(session.incr("k").await.unwrap(), 2);
        assert_eq!(session.get("k").await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_expire_removes_key_after_ttl() {
        let store = MemoryStore::new();
        let mut session = store.connect(&options()).await.unwrap();

        session.incr("k").await.unwrap();
        assert!(session.expire("k", 10).await.unwrap());
        assert_eq!(store.ttl("k"), Some(10));

        store.advance(Duration::from_secs(9));
        assert_eq!(store.value("k"), Some(1));

        store.advance(Duration::from_secs(1));
        assert_eq!(store.value("k"), None);
        assert_eq!(session.incr("k").await.unwrap(), 1);
        assert_eq!(store.ttl("k"), None);
    }

    #[tokio::test]
    async fn test_expire_missing_key() {
        let store = MemoryStore::new();
        let mut session = store.connect(&options()).await.unwrap();

        assert!(!session.expire("missing", 10).await.unwrap());
    }

    #[tokio::test]
    async fn test_namespaces_are_separate() {
        let store = MemoryStore::new();
        let mut db0 = store.connect(&options()).await.unwrap();
        let mut db3 = store.connect(&options().with_namespace(3)).await.unwrap();

        db3.incr("k").await.unwrap();
        assert_eq!(db0.get("k").await.unwrap(), None);
        assert_eq!(db3.get("k").await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_password_and_namespace_checks() {
        let store = MemoryStore::with_password("secret");

        let err = store.connect(&options().with_password("nope")).await.unwrap_err();
        assert!(matches!(err, HandshakeError::Auth));

        let err = store
            .connect(&options().with_password("secret").with_namespace(16))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            HandshakeError::Connect(ConnectError::Select { namespace: 16, .. })
        ));

        assert!(store
            .connect(&options().with_password("secret"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_closed_session_rejects_commands() {
        let store = MemoryStore::new();
        let mut session = store.connect(&options()).await.unwrap();

        session.close().await;
        session.close().await;
        assert!(matches!(session.get("k").await, Err(CommandError::Closed)));
        assert_eq!(store.calls().closes, 1);
    }
}
