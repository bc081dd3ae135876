//! A single connection to the counter store.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{lookup_host, TcpSocket, TcpStream};
use tracing::{debug, trace, warn};

use super::command::Command;
use super::error::{CommandError, ConnectError};
use super::reply::{Reply, ReplyDecoder};

/// Bytes requested from the socket per read call.
const READ_CHUNK: usize = 1024;

/// Where and how to reach the counter store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    pub host: String,
    pub port: u16,
    /// Sent with AUTH when present and non-empty.
    pub password: Option<String>,
    /// Database index sent with SELECT when non-zero.
    pub namespace: u32,
    /// Bound on name resolution plus TCP connect.
    pub connect_timeout: Option<Duration>,
    /// Bound on each write and each reply read.
    pub io_timeout: Option<Duration>,
}

impl ConnectOptions {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            password: None,
            namespace: 0,
            connect_timeout: None,
            io_timeout: None,
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_namespace(mut self, namespace: u32) -> Self {
        self.namespace = namespace;
        self
    }

    pub fn with_timeouts(mut self, connect: Option<Duration>, io: Option<Duration>) -> Self {
        self.connect_timeout = connect;
        self.io_timeout = io;
        self
    }

    /// `host:port` as used in logs and errors.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Outcome of the AUTH step of the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    /// No password was configured, so AUTH was never sent.
    Unauthenticated,
    Authenticated,
    /// The store rejected the password. Further commands are a caller error.
    Failed,
}

/// An exclusively owned connection to the store.
///
/// The socket is released when the connection is dropped or closed, so every
/// exit path of a caller gives it back. After a transport or framing error
/// the connection closes itself and later sends fail with
/// [`CommandError::Closed`].
#[derive(Debug)]
pub struct Connection<S = TcpStream> {
    stream: Option<S>,
    endpoint: String,
    auth: AuthState,
    decoder: ReplyDecoder,
    io_timeout: Option<Duration>,
}

impl Connection<TcpStream> {
    /// Resolve, connect, and run the AUTH/SELECT handshake.
    ///
    /// A rejected password does not fail the call: the connection is
    /// returned with [`AuthState::Failed`] and the caller decides what to do.
    /// A rejected SELECT fails the call and closes the socket.
    pub async fn connect(options: &ConnectOptions) -> Result<Self, ConnectError> {
        let endpoint = options.endpoint();

        let stream = match options.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, open_stream(&options.host, options.port))
                .await
                .map_err(|_| ConnectError::Timeout {
                    endpoint: endpoint.clone(),
                    timeout: limit,
                })??,
            None => open_stream(&options.host, options.port).await?,
        };

        debug!(endpoint = %endpoint, "Connected to counter store");

        let mut connection = Connection::from_stream(stream, endpoint, options.io_timeout);
        connection
            .handshake(options.password.as_deref(), options.namespace)
            .await?;
        Ok(connection)
    }
}

async fn open_stream(host: &str, port: u16) -> Result<TcpStream, ConnectError> {
    let endpoint = format!("{}:{}", host, port);

    let addrs: Vec<SocketAddr> = lookup_host((host, port))
        .await
        .map_err(|source| ConnectError::DnsFailure {
            endpoint: endpoint.clone(),
            source,
        })?
        .collect();

    if addrs.is_empty() {
        return Err(ConnectError::DnsFailure {
            endpoint,
            source: io::Error::new(io::ErrorKind::NotFound, "no addresses resolved"),
        });
    }

    let mut last_error = None;
    for addr in addrs {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(ConnectError::SocketFailure)?;

        match socket.connect(addr).await {
            Ok(stream) => {
                stream.set_nodelay(true).map_err(ConnectError::SocketFailure)?;
                return Ok(stream);
            }
            Err(e) => {
                debug!(addr = %addr, error = %e, "Connect attempt failed");
                last_error = Some(e);
            }
        }
    }

    Err(ConnectError::ConnectFailure {
        endpoint,
        source: last_error
            .unwrap_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no address connected")),
    })
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap an already connected stream. No handshake is performed.
    pub fn from_stream(
        stream: S,
        endpoint: impl Into<String>,
        io_timeout: Option<Duration>,
    ) -> Self {
        Self {
            stream: Some(stream),
            endpoint: endpoint.into(),
            auth: AuthState::Unauthenticated,
            decoder: ReplyDecoder::new(),
            io_timeout,
        }
    }

    /// Send AUTH (when a password is given) and SELECT (when the namespace
    /// is not the default one).
    pub async fn handshake(
        &mut self,
        password: Option<&str>,
        namespace: u32,
    ) -> Result<(), ConnectError> {
        if let Some(password) = password.filter(|p| !p.is_empty()) {
            let reply = self
                .send(&Command::auth(password))
                .await
                .map_err(ConnectError::Handshake)?;

            if reply.is_ok() {
                self.auth = AuthState::Authenticated;
            } else {
                warn!(endpoint = %self.endpoint, reply = %reply, "Store rejected AUTH");
                self.auth = AuthState::Failed;
                return Ok(());
            }
        }

        if namespace != 0 {
            let reply = self
                .send(&Command::select(namespace))
                .await
                .map_err(ConnectError::Handshake)?;

            if !reply.is_ok() {
                warn!(
                    endpoint = %self.endpoint,
                    namespace,
                    reply = %reply,
                    "Store rejected SELECT"
                );
                self.close().await;
                return Err(ConnectError::Select {
                    namespace,
                    reply: reply.to_string(),
                });
            }
        }

        Ok(())
    }

    pub fn auth_state(&self) -> AuthState {
        self.auth
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }

    /// Write one command and read exactly one reply frame.
    pub async fn send(&mut self, command: &Command) -> Result<Reply, CommandError> {
        let bytes = command.encode()?;

        trace!(endpoint = %self.endpoint, command = %command, "Sending command");

        let result = self.exchange(&bytes).await;
        match &result {
            Ok(reply) => trace!(endpoint = %self.endpoint, reply = %reply, "Received reply"),
            Err(CommandError::Closed) => {}
            Err(e) => {
                debug!(
                    endpoint = %self.endpoint,
                    command = command.verb(),
                    error = %e,
                    "Command failed, closing connection"
                );
                self.stream = None;
            }
        }
        result
    }

    async fn exchange(&mut self, bytes: &[u8]) -> Result<Reply, CommandError> {
        let io_timeout = self.io_timeout;
        let Self {
            stream, decoder, ..
        } = self;
        let stream = stream.as_mut().ok_or(CommandError::Closed)?;

        with_timeout(io_timeout, "write", async {
            stream.write_all(bytes).await?;
            stream.flush().await?;
            Ok::<(), io::Error>(())
        })
        .await?
        .map_err(CommandError::WriteFailure)?;

        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            if let Some(reply) = decoder.decode()? {
                if decoder.buffered() > 0 {
                    return Err(CommandError::malformed(format!(
                        "{} unexpected bytes after reply",
                        decoder.buffered()
                    )));
                }
                return Ok(reply);
            }

            let n = with_timeout(io_timeout, "read", stream.read(&mut chunk))
                .await?
                .map_err(CommandError::ReadFailure)?;

            if n == 0 {
                return Err(if decoder.buffered() == 0 {
                    CommandError::PeerClosed
                } else {
                    CommandError::malformed("connection closed mid-frame")
                });
            }

            decoder.feed(&chunk[..n])?;
        }
    }

    /// `GET key`: `None` when the key does not exist.
    pub async fn get(&mut self, key: &str) -> Result<Option<i64>, CommandError> {
        match self.send(&Command::get(key)).await? {
            Reply::Bulk(None) => Ok(None),
            Reply::Bulk(Some(value)) => match value.parse() {
                Ok(n) => Ok(Some(n)),
                Err(_) => Err(CommandError::UnexpectedReply {
                    verb: "GET",
                    reply: Reply::Bulk(Some(value)),
                }),
            },
            Reply::Integer(n) => Ok(Some(n)),
            Reply::Error(e) => Err(CommandError::Server(e)),
            reply => Err(CommandError::UnexpectedReply { verb: "GET", reply }),
        }
    }

    /// `INCR key`: the value after the increment.
    pub async fn incr(&mut self, key: &str) -> Result<i64, CommandError> {
        match self.send(&Command::incr(key)).await? {
            Reply::Integer(n) => Ok(n),
            Reply::Error(e) => Err(CommandError::Server(e)),
            reply => Err(CommandError::UnexpectedReply { verb: "INCR", reply }),
        }
    }

    /// `EXPIRE key seconds`: `false` when the key no longer exists.
    pub async fn expire(&mut self, key: &str, seconds: u64) -> Result<bool, CommandError> {
        match self.send(&Command::expire(key, seconds)).await? {
            Reply::Integer(1) => Ok(true),
            Reply::Integer(0) => Ok(false),
            Reply::Error(e) => Err(CommandError::Server(e)),
            reply => Err(CommandError::UnexpectedReply {
                verb: "EXPIRE",
                reply,
            }),
        }
    }

    /// Shut down and release the socket. Safe to call more than once.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                trace!(endpoint = %self.endpoint, error = %e, "Shutdown after close failed");
            }
            debug!(endpoint = %self.endpoint, "Closed store connection");
        }
    }
}

async fn with_timeout<T>(
    limit: Option<Duration>,
    operation: &'static str,
    fut: impl Future<Output = T>,
) -> Result<T, CommandError> {
    match limit {
        Some(timeout) => tokio::time::timeout(timeout, fut)
            .await
            .map_err(|_| CommandError::Timeout { operation, timeout }),
        None => Ok(fut.await),
    }
}
