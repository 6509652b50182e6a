//! An in-process gaze server on TCP loopback.
//!
//! [`FakeGazeServer`] speaks the real wire protocol so that tests can drive
//! the whole client stack through [`SocketConnector`]. Its behaviour and the
//! gazes it reports can be changed while clients are connected.
//!
//! [`SocketConnector`]: gazeshim_core::ipc::SocketConnector

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use gazeshim_core::ipc::protocol::{self, HEADER_LEN, Header, request_kind};
use gazeshim_core::ipc::{
    EyeRecord, GazesResponse, HandshakeRequest, HandshakeResponse, HandshakeResult, Response,
};

/// How the server answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerBehavior {
    /// Handshake succeeds and every request is answered.
    Accept,
    /// Handshake is answered with the given non-success result.
    RejectHandshake(HandshakeResult),
    /// An `ERROR` frame is sent in place of the handshake response.
    ErrorHandshake,
    /// Handshake succeeds, gaze requests get `ERROR` frames.
    ErrorOnGazes,
    /// Handshake succeeds, gaze requests are read but never answered.
    Silent,
    /// Handshake succeeds, then the connection is closed on the first
    /// gaze request.
    HangUp,
}

#[derive(Debug)]
struct ServerState {
    behavior: ServerBehavior,
    gazes: GazesResponse,
    connections: usize,
    handshakes: Vec<HandshakeRequest>,
    gaze_requests: usize,
}

/// Fake gaze server bound to an ephemeral loopback port. Aborted on drop.
pub struct FakeGazeServer {
    port: u16,
    state: Arc<Mutex<ServerState>>,
    task: JoinHandle<()>,
}

impl FakeGazeServer {
    /// Bind and start accepting.
    pub async fn start(behavior: ServerBehavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind fake gaze server");
        let port = listener.local_addr().expect("no local addr").port();
        let state = Arc::new(Mutex::new(ServerState {
            behavior,
            gazes: GazesResponse {
                left: EyeRecord::tracking([0.0, 0.0, -1.0]),
                right: EyeRecord::tracking([0.0, 0.0, -1.0]),
            },
            connections: 0,
            handshakes: Vec::new(),
            gaze_requests: 0,
        }));

        let accept_state = Arc::clone(&state);
        let task = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                lock(&accept_state).connections += 1;
                tokio::spawn(serve(socket, Arc::clone(&accept_state)));
            }
        });

        Self { port, state, task }
    }

    /// A server that accepts and reports straight-ahead gazes.
    pub async fn accepting() -> Self {
        Self::start(ServerBehavior::Accept).await
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn set_behavior(&self, behavior: ServerBehavior) {
        lock(&self.state).behavior = behavior;
    }

    pub fn set_gazes(&self, gazes: GazesResponse) {
        lock(&self.state).gazes = gazes;
    }

    /// Report both eyes tracking the given directions.
    pub fn set_directions(&self, left: [f32; 3], right: [f32; 3]) {
        self.set_gazes(GazesResponse {
            left: EyeRecord::tracking(left),
            right: EyeRecord::tracking(right),
        });
    }

    pub fn connections(&self) -> usize {
        lock(&self.state).connections
    }

    pub fn handshakes(&self) -> Vec<HandshakeRequest> {
        lock(&self.state).handshakes.clone()
    }

    pub fn gaze_requests(&self) -> usize {
        lock(&self.state).gaze_requests
    }
}

impl Drop for FakeGazeServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn lock(state: &Mutex<ServerState>) -> MutexGuard<'_, ServerState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn serve(mut socket: TcpStream, state: Arc<Mutex<ServerState>>) {
    let mut header = [0u8; HEADER_LEN];
    loop {
        if socket.read_exact(&mut header).await.is_err() {
            return;
        }
        let Some(parsed) = Header::decode(&header) else {
            return;
        };
        let mut frame = header.to_vec();
        frame.resize(HEADER_LEN + parsed.payload_len as usize, 0);
        if socket.read_exact(&mut frame[HEADER_LEN..]).await.is_err() {
            return;
        }

        let reply = match parsed.kind {
            request_kind::HANDSHAKE => {
                let Some(request) = HandshakeRequest::decode(&frame) else {
                    return;
                };
                let behavior = {
                    let mut state = lock(&state);
                    state.handshakes.push(request);
                    state.behavior
                };
                match behavior {
                    ServerBehavior::RejectHandshake(result) => {
                        Some(HandshakeResponse { result }.encode())
                    }
                    ServerBehavior::ErrorHandshake => {
                        Some(protocol::error_frame(HandshakeResponse::SIZE))
                    }
                    _ => Some(
                        HandshakeResponse {
                            result: HandshakeResult::Success,
                        }
                        .encode(),
                    ),
                }
            }
            request_kind::GET_GAZES => {
                let (behavior, gazes) = {
                    let mut state = lock(&state);
                    state.gaze_requests += 1;
                    (state.behavior, state.gazes)
                };
                match behavior {
                    ServerBehavior::ErrorOnGazes => {
                        Some(protocol::error_frame(GazesResponse::SIZE))
                    }
                    ServerBehavior::Silent => None,
                    ServerBehavior::HangUp => return,
                    _ => Some(gazes.encode()),
                }
            }
            _ => return,
        };

        if let Some(reply) = reply
            && socket.write_all(&reply).await.is_err()
        {
            return;
        }
    }
}

