//! Byte-stream transports to the gaze server.
//!
//! Both bindings hand back a [`BoxedStream`], so the client never knows
//! which one it is talking over. The choice is made once from configuration.

use std::io;

use tokio::io::{AsyncRead, AsyncWrite};

use gazeshim_config::{TransportConfig, TransportKind};

use crate::BoxFuture;

/// OS error code for "all pipe instances are busy" (`ERROR_PIPE_BUSY`).
pub const PIPE_BUSY_OS_CODE: i32 = 231;

/// A bidirectional async byte stream.
pub trait ByteStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> ByteStream for T {}

pub type BoxedStream = Box<dyn ByteStream>;

/// Opens one byte stream to the server per call.
pub trait Connector: Send + Sync {
    /// Human-readable endpoint for logs.
    fn endpoint(&self) -> String;

    fn connect(&self) -> BoxFuture<'_, io::Result<BoxedStream>>;
}

/// Whether a connect error means "busy or not listening yet, try again".
pub fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::NotFound
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
            | io::ErrorKind::Interrupted
    ) || (cfg!(windows) && err.raw_os_error() == Some(PIPE_BUSY_OS_CODE))
}

/// TCP loopback transport.
#[derive(Debug, Clone)]
pub struct SocketConnector {
    addr: String,
}

impl SocketConnector {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            addr: format!("{host}:{port}"),
        }
    }
}

impl Connector for SocketConnector {
    fn endpoint(&self) -> String {
        format!("tcp://{}", self.addr)
    }

    fn connect(&self) -> BoxFuture<'_, io::Result<BoxedStream>> {
        Box::pin(async move {
            let stream = tokio::net::TcpStream::connect(&self.addr).await?;
            stream.set_nodelay(true)?;
            Ok(Box::new(stream) as BoxedStream)
        })
    }
}

/// Named channel transport: a Unix domain socket path, or a message-mode
/// named pipe on Windows.
#[derive(Debug, Clone)]
pub struct PipeConnector {
    name: String,
}

impl PipeConnector {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Connector for PipeConnector {
    fn endpoint(&self) -> String {
        format!("pipe://{}", self.name)
    }

    #[cfg(unix)]
    fn connect(&self) -> BoxFuture<'_, io::Result<BoxedStream>> {
        Box::pin(async move {
            let stream = tokio::net::UnixStream::connect(&self.name).await?;
            Ok(Box::new(stream) as BoxedStream)
        })
    }

    #[cfg(windows)]
    fn connect(&self) -> BoxFuture<'_, io::Result<BoxedStream>> {
        use tokio::net::windows::named_pipe::{ClientOptions, PipeMode};

        Box::pin(async move {
            let pipe = ClientOptions::new()
                .pipe_mode(PipeMode::Message)
                .open(&self.name)?;
            Ok(Box::new(pipe) as BoxedStream)
        })
    }

    #[cfg(not(any(unix, windows)))]
    fn connect(&self) -> BoxFuture<'_, io::Result<BoxedStream>> {
        Box::pin(async {
            Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "named pipes are not supported on this platform",
            ))
        })
    }
}

/// Build the connector selected by `config.kind`.
pub fn connector_from_config(config: &TransportConfig) -> Box<dyn Connector> {
    match config.kind {
        TransportKind::Pipe => Box::new(PipeConnector::new(config.pipe_name.clone())),
        TransportKind::Socket => Box::new(SocketConnector::new(
            &config.socket_addr,
            config.socket_port,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn test_transient_kinds() {
        for kind in [
            io::ErrorKind::ConnectionRefused,
            io::ErrorKind::NotFound,
            io::ErrorKind::WouldBlock,
            io::ErrorKind::TimedOut,
            io::ErrorKind::Interrupted,
        ] {
            assert!(is_transient(&io::Error::from(kind)), "{kind:?}");
        }
        assert!(!is_transient(&io::Error::from(
            io::ErrorKind::PermissionDenied
        )));
        assert!(!is_transient(&io::Error::from(io::ErrorKind::InvalidInput)));
    }

    #[test]
    fn test_connector_from_config() {
        let mut config = TransportConfig::default();
        config.socket_port = 40001;
        assert_eq!(
            connector_from_config(&config).endpoint(),
            "tcp://127.0.0.1:40001"
        );

        config.kind = TransportKind::Pipe;
        config.pipe_name = "/tmp/gaze.sock".to_string();
        assert_eq!(connector_from_config(&config).endpoint(), "pipe:///tmp/gaze.sock");
    }

    #[tokio::test]
    async fn test_socket_connector_round_trip() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4];
            socket.read_exact(&mut buf).await.unwrap();
            socket.write_all(&buf).await.unwrap();
        });

        let mut stream = SocketConnector::new("127.0.0.1", port).connect().await.unwrap();
        stream.write_all(b"ping").await.unwrap();
        let mut echoed = [0u8; 4];
        stream.read_exact(&mut echoed).await.unwrap();
        assert_eq!(&echoed, b"ping");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_socket_connector_refused_is_transient() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = SocketConnector::new("127.0.0.1", port)
            .connect()
            .await
            .err()
            .unwrap();
        assert!(is_transient(&err));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_pipe_connector_missing_path_is_transient() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("absent.sock");
        let err = PipeConnector::new(path.to_string_lossy())
            .connect()
            .await
            .err()
            .unwrap();
        assert!(is_transient(&err));
    }
}
