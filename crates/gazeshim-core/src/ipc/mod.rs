//! Gaze server IPC.
//!
//! ```text
//! ┌───────────────┐  fixed-size LE frames  ┌──────────────┐
//! │TransportClient│───────────────────────▶│ gaze server  │
//! │  (retrying)   │◀───────────────────────│              │
//! └──────┬────────┘                        └──────────────┘
//!        │ Connector
//!   ┌────┴─────┐
//!   │ pipe     │  Unix socket / Windows named pipe
//!   │ socket   │  TCP loopback
//!   └──────────┘
//! ```

pub mod client;
pub mod protocol;
pub mod transport;

pub use client::{ConnectError, Connection, RetryPolicy, TransportClient, TransportError};
pub use protocol::{
    EyeRecord, GazesResponse, GetGazesRequest, HandshakeRequest, HandshakeResponse,
    HandshakeResult, ProtocolError, Request, Response,
};
pub use transport::{BoxedStream, ByteStream, Connector, PipeConnector, SocketConnector};
