//! Fixed-window rate limiter backed by a remote counter store.

use thiserror::Error;
use tracing::{debug, instrument, trace, warn};

use super::key::{CounterKey, DEFAULT_KEY_PREFIX};
use super::policy::{Admission, Decision, FailureMode, Policy};
use super::store::{CounterStore, HandshakeError, StoreConnector, WireConnector};
use crate::wire::{is_inline_arg, CommandError, ConnectError, ConnectOptions};

/// Why a decision could not be reached.
///
/// None of these is an allow or a deny; the caller picks the fallback.
#[derive(Debug, Error)]
pub enum LimitError {
    /// The identity cannot be turned into a counter key.
    #[error("invalid client identity {0:?}")]
    InvalidIdentity(String),

    /// The configured key prefix cannot be sent as part of a key.
    #[error("invalid counter key prefix {0:?}")]
    InvalidKeyPrefix(String),

    /// The store rejected the configured password.
    #[error("store authentication failed")]
    AuthFailure,

    /// The store rejected the configured namespace.
    #[error("store namespace {namespace} could not be selected: {reply}")]
    NamespaceFailure { namespace: u32, reply: String },

    /// The store could not be reached, or a command failed mid-decision.
    #[error("store unavailable: {0}")]
    Unavailable(#[source] StoreFailure),
}

/// The transport-level cause behind [`LimitError::Unavailable`].
#[derive(Debug, Error)]
pub enum StoreFailure {
    #[error(transparent)]
    Connect(ConnectError),

    #[error(transparent)]
    Command(#[from] CommandError),
}

impl LimitError {
    /// The admission outcome for a request whose evaluation failed.
    ///
    /// A request that cannot be keyed is refused; every store problem
    /// follows `failure_mode`.
    pub fn admission(&self, failure_mode: FailureMode) -> Admission {
        match self {
            LimitError::InvalidIdentity(_) | LimitError::InvalidKeyPrefix(_) => {
                Admission::Throttled
            }
            _ => Admission::unavailable(failure_mode),
        }
    }
}

impl From<HandshakeError> for LimitError {
    fn from(err: HandshakeError) -> Self {
        match err {
            HandshakeError::Auth => LimitError::AuthFailure,
            HandshakeError::Connect(ConnectError::Select { namespace, reply }) => {
                LimitError::NamespaceFailure { namespace, reply }
            }
            HandshakeError::Connect(e) => LimitError::Unavailable(StoreFailure::Connect(e)),
        }
    }
}

impl From<CommandError> for LimitError {
    fn from(err: CommandError) -> Self {
        LimitError::Unavailable(StoreFailure::Command(err))
    }
}

/// Decides allow or deny per identity using a counter that lives in the store.
///
/// Every evaluation opens its own session, so the limiter holds no mutable
/// state and can be shared freely between tasks.
///
/// The window check reads the counter and increments it in two round trips.
/// Concurrent requests for one identity can both pass the read, so a window
/// may admit up to `max + concurrency - 1` requests.
///
/// The TTL is armed by a separate EXPIRE after the INCR that created the
/// key. If that EXPIRE fails on the transport the decision is reported as
/// unavailable, but the key stays in the store without a TTL. No later INCR
/// returns 1 for it, so once it reaches `max` the identity is denied until
/// the key is removed or given a TTL out of band.
#[derive(Debug, Clone)]
pub struct RateLimiter<C = WireConnector> {
    connector: C,
    key_prefix: String,
}

impl RateLimiter<WireConnector> {
    /// Create a rate limiter that talks to the store over TCP.
    pub fn new() -> Self {
        Self::with_connector(WireConnector)
    }
}

impl Default for RateLimiter<WireConnector> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: StoreConnector> RateLimiter<C> {
    pub fn with_connector(connector: C) -> Self {
        Self {
            connector,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }

    /// Use `prefix` in front of every identity when naming counter keys.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Evaluate one request from `identity` against `policy`.
    #[instrument(
        skip(self, policy, store),
        fields(max = policy.max(), window_seconds = policy.window_seconds())
    )]
    pub async fn evaluate(
        &self,
        identity: &str,
        policy: &Policy,
        store: &ConnectOptions,
    ) -> Result<Decision, LimitError> {
        if !self.key_prefix.is_empty() && !is_inline_arg(&self.key_prefix) {
            return Err(LimitError::InvalidKeyPrefix(self.key_prefix.clone()));
        }
        let key = CounterKey::new(&self.key_prefix, identity)
            .ok_or_else(|| LimitError::InvalidIdentity(identity.to_string()))?;

        let mut session = self.connector.connect(store).await.map_err(|e| {
            warn!(endpoint = %store.endpoint(), error = %e, "Could not open store session");
            LimitError::from(e)
        })?;

        let result = check_window(&mut session, &key, policy).await;
        session.close().await;

        if let Err(ref e) = result {
            warn!(key = %key, error = %e, "Store command failed during decision");
        }
        result
    }

    /// Evaluate and fold the result into an admission outcome.
    pub async fn admit(
        &self,
        identity: &str,
        policy: &Policy,
        store: &ConnectOptions,
        failure_mode: FailureMode,
    ) -> Admission {
        match self.evaluate(identity, policy, store).await {
            Ok(decision) => Admission::from_decision(decision),
            Err(e) => e.admission(failure_mode),
        }
    }
}

/// The fixed-window step on an open session.
async fn check_window<S: CounterStore>(
    session: &mut S,
    key: &CounterKey,
    policy: &Policy,
) -> Result<Decision, LimitError> {
    let current = session.get(key.as_str()).await?;
    trace!(key = %key, current = ?current, "Read window counter");

    if let Some(count) = current {
        if policy.is_exhausted(count) {
            debug!(key = %key, count, max = policy.max(), "Rate limit exceeded");
            return Ok(Decision::Deny);
        }
    }

    let updated = session.incr(key.as_str()).await?;
    trace!(key = %key, count = updated, "Incremented window counter");

    // Only the increment that created the key arms the TTL; re-arming would
    // let the window slide forward under sustained traffic.
    if updated == 1 {
        let armed = session.expire(key.as_str(), policy.window_seconds()).await?;
        if armed {
            debug!(key = %key, window_seconds = policy.window_seconds(), "Opened new window");
        } else {
            warn!(key = %key, "Counter vanished before its window could be armed");
        }
    }

    Ok(Decision::Allow)
}
