//! Transport client: connect, handshake and framed request/response with
//! bounded retry.
//!
//! The client owns at most one [`Connection`]. A connection only exists once
//! its handshake succeeded; every failure path closes the stream before
//! returning, so callers never observe a half-open handle.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use gazeshim_config::TransportConfig;

use super::protocol::{
    self, GazesResponse, GetGazesRequest, HandshakeRequest, HandshakeResult, ProtocolError,
    Request, Response,
};
use super::transport::{self, BoxedStream, Connector};

/// Errors establishing a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("gaze server unavailable: {0}")]
    Unavailable(#[source] io::Error),

    #[error("gaze server still busy after {attempts} connect attempts")]
    RetryBudgetExhausted { attempts: u32 },

    #[error("handshake failed: {0}")]
    Handshake(#[source] TransportError),

    #[error("handshake refused: {0}")]
    Rejected(HandshakeResult),
}

/// Errors exchanging a request/response pair.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("not connected")]
    NotConnected,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("request write timed out")]
    WriteTimeout,

    #[error("read {received} of {expected} bytes in {attempts} attempts")]
    RetryBudgetExhausted {
        attempts: u32,
        received: usize,
        expected: usize,
    },

    #[error("server closed the connection after {received} of {expected} bytes")]
    ConnectionClosed { received: usize, expected: usize },

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl TransportError {
    /// Whether the stream position is unknown after this error, so the
    /// connection can no longer be used.
    pub fn breaks_connection(&self) -> bool {
        !matches!(self, Self::NotConnected | Self::Protocol(_))
    }
}

/// Retry budgets for connect and read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub connect_attempts: u32,
    pub connect_wait: Duration,
    /// Bound on one open attempt. Expiry counts as a transient failure.
    pub connect_timeout: Duration,
    pub read_attempts: u32,
    pub read_wait: Duration,
    pub write_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &TransportConfig) -> Self {
        Self {
            connect_attempts: config.connect_attempts,
            connect_wait: Duration::from_millis(config.connect_retry_ms),
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
            read_attempts: config.read_attempts,
            read_wait: Duration::from_millis(config.read_wait_ms),
            write_timeout: Duration::from_millis(config.write_timeout_ms),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&TransportConfig::default())
    }
}

/// A handshaken stream with a numeric identity.
pub struct Connection {
    id: u64,
    stream: BoxedStream,
}

impl Connection {
    pub fn id(&self) -> u64 {
        self.id
    }

    async fn close(mut self) {
        let _ = self.stream.shutdown().await;
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").field("id", &self.id).finish()
    }
}

/// Client for the gaze server.
pub struct TransportClient {
    connector: Box<dyn Connector>,
    policy: RetryPolicy,
    protocol_version: u32,
    connection: Option<Connection>,
    next_id: u64,
}

impl TransportClient {
    pub fn new(connector: Box<dyn Connector>, policy: RetryPolicy, protocol_version: u32) -> Self {
        Self {
            connector,
            policy,
            protocol_version,
            connection: None,
            next_id: 1,
        }
    }

    /// Client for the transport selected in `config`.
    pub fn from_config(config: &TransportConfig) -> Self {
        Self::new(
            transport::connector_from_config(config),
            RetryPolicy::from_config(config),
            config.protocol_version,
        )
    }

    pub fn endpoint(&self) -> String {
        self.connector.endpoint()
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn connection_id(&self) -> Option<u64> {
        self.connection.as_ref().map(Connection::id)
    }

    /// Open the stream and handshake. A no-op when already connected.
    pub async fn connect(&mut self) -> Result<(), ConnectError> {
        if self.connection.is_some() {
            return Ok(());
        }

        let stream = open_stream(self.connector.as_ref(), self.policy).await?;
        let id = self.next_id;
        self.next_id += 1;
        let mut conn = Connection { id, stream };

        let request = HandshakeRequest::current(self.protocol_version);
        match exchange(&mut conn.stream, &self.policy, &request).await {
            Ok(response) if response.result == HandshakeResult::Success => {
                info!(
                    endpoint = %self.connector.endpoint(),
                    connection = id,
                    version = self.protocol_version,
                    "Connected to gaze server"
                );
                self.connection = Some(conn);
                Ok(())
            }
            Ok(response) => {
                warn!(
                    endpoint = %self.connector.endpoint(),
                    result = %response.result,
                    "Gaze server refused handshake"
                );
                conn.close().await;
                Err(ConnectError::Rejected(response.result))
            }
            Err(e) => {
                debug!(endpoint = %self.connector.endpoint(), error = %e, "Handshake failed");
                conn.close().await;
                Err(ConnectError::Handshake(e))
            }
        }
    }

    /// Close the connection if there is one. Safe to call repeatedly.
    pub async fn disconnect(&mut self) {
        if let Some(conn) = self.connection.take() {
            info!(connection = conn.id, "Disconnected from gaze server");
            conn.close().await;
        }
    }

    /// Send one request and wait for its response.
    pub async fn request<R: Request>(&mut self, request: &R) -> Result<R::Response, TransportError> {
        let conn = self.connection.as_mut().ok_or(TransportError::NotConnected)?;
        let result = exchange(&mut conn.stream, &self.policy, request).await;
        if let Err(e) = &result
            && e.breaks_connection()
            && let Some(conn) = self.connection.take()
        {
            info!(connection = conn.id, error = %e, "Lost gaze server connection");
            conn.close().await;
        }
        result
    }

    pub async fn get_gazes(&mut self) -> Result<GazesResponse, TransportError> {
        self.request(&GetGazesRequest).await
    }
}

impl std::fmt::Debug for TransportClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportClient")
            .field("endpoint", &self.connector.endpoint())
            .field("connection", &self.connection)
            .finish()
    }
}

async fn open_stream(connector: &dyn Connector, policy: RetryPolicy) -> Result<BoxedStream, ConnectError> {
    let attempts = policy.connect_attempts;
    for attempt in 1..=attempts {
        let opened = timeout(policy.connect_timeout, connector.connect())
            .await
            .unwrap_or_else(|_| {
                Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "connect attempt timed out",
                ))
            });
        match opened {
            Ok(stream) => return Ok(stream),
            Err(e) if transport::is_transient(&e) => {
                trace!(attempt, error = %e, "Gaze server busy, retrying");
                if attempt < attempts {
                    tokio::time::sleep(policy.connect_wait).await;
                }
            }
            Err(e) => return Err(ConnectError::Unavailable(e)),
        }
    }
    debug!(endpoint = %connector.endpoint(), attempts, "Connect retry budget exhausted");
    Err(ConnectError::RetryBudgetExhausted { attempts })
}

async fn exchange<R: Request>(
    stream: &mut BoxedStream,
    policy: &RetryPolicy,
    request: &R,
) -> Result<R::Response, TransportError> {
    let frame = request.encode();
    let write = async {
        stream.write_all(&frame).await?;
        stream.flush().await
    };
    match timeout(policy.write_timeout, write).await {
        Err(_) => return Err(TransportError::WriteTimeout),
        Ok(Err(e)) => return Err(TransportError::Io(e)),
        Ok(Ok(())) => {}
    }

    let expected = <R::Response as Response>::SIZE;
    let mut buf = vec![0u8; expected];
    let mut received = 0;
    for _ in 0..policy.read_attempts {
        match timeout(policy.read_wait, stream.read(&mut buf[received..])).await {
            Err(_) => continue,
            Ok(Ok(0)) => return Err(TransportError::ConnectionClosed { received, expected }),
            Ok(Ok(n)) => {
                received += n;
                if received == expected {
                    return Ok(protocol::decode_response(&buf)?);
                }
            }
            Ok(Err(e)) if e.kind() == io::ErrorKind::Interrupted => continue,
            Ok(Err(e)) => return Err(TransportError::Io(e)),
        }
    }
    Err(TransportError::RetryBudgetExhausted {
        attempts: policy.read_attempts,
        received,
        expected,
    })
}
