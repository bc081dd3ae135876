//! Store abstraction used by the rate limiter.
//!
//! The limiter only needs three counter primitives plus a way to open a fresh
//! session per decision. [`WireConnector`] provides them over a real
//! [`Connection`]; tests substitute [`MemoryStore`](super::MemoryStore).

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::warn;

use crate::wire::{AuthState, CommandError, ConnectError, ConnectOptions, Connection};

/// Why a session to the store could not be opened.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// The store rejected the configured password.
    #[error("store rejected authentication")]
    Auth,

    #[error(transparent)]
    Connect(#[from] ConnectError),
}

/// Counter primitives on one open session.
#[async_trait]
pub trait CounterStore: Send {
    /// Current value, `None` when the key does not exist.
    async fn get(&mut self, key: &str) -> Result<Option<i64>, CommandError>;

    /// Increment, creating the key at 1 when absent, and return the new value.
    async fn incr(&mut self, key: &str) -> Result<i64, CommandError>;

    /// Set the key's time to live. `false` when the key does not exist.
    async fn expire(&mut self, key: &str, seconds: u64) -> Result<bool, CommandError>;

    /// Release the session.
    async fn close(&mut self) {}
}

/// Opens one session per rate-limit decision.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    type Store: CounterStore;

    async fn connect(&self, options: &ConnectOptions) -> Result<Self::Store, HandshakeError>;
}

#[async_trait]
impl<S> CounterStore for Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn get(&mut self, key: &str) -> Result<Option<i64>, CommandError> {
        Connection::get(self, key).await
    }

    async fn incr(&mut self, key: &str) -> Result<i64, CommandError> {
        Connection::incr(self, key).await
    }

    async fn expire(&mut self, key: &str, seconds: u64) -> Result<bool, CommandError> {
        Connection::expire(self, key, seconds).await
    }

    async fn close(&mut self) {
        Connection::close(self).await
    }
}

/// Connector that dials the store over TCP for every decision.
#[derive(Debug, Clone, Copy, Default)]
pub struct WireConnector;

#[async_trait]
impl StoreConnector for WireConnector {
    type Store = Connection;

    async fn connect(&self, options: &ConnectOptions) -> Result<Connection, HandshakeError> {
        let mut connection = Connection::connect(options).await?;

        if connection.auth_state() == AuthState::Failed {
            warn!(
                endpoint = %connection.endpoint(),
                "Authentication failed, abandoning connection"
            );
            connection.close().await;
            return Err(HandshakeError::Auth);
        }

        Ok(connection)
    }
}
