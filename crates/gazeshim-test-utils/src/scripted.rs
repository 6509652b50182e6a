//! A [`Connector`] whose server side follows a fixed script.
//!
//! Each `connect()` consumes the next [`ConnectOutcome`]. An accepted
//! connection is a [`tokio::io::duplex`] pair; the server half runs the
//! script in a spawned task, which makes partial reads and stalls exactly
//! reproducible.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use gazeshim_core::BoxFuture;
use gazeshim_core::ipc::{
    BoxedStream, Connector, GazesResponse, GetGazesRequest, HandshakeRequest, HandshakeResponse,
    HandshakeResult, Request, Response,
};

/// One server-side step.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Read exactly this many bytes from the client and record them.
    Expect(usize),
    /// Write these bytes.
    Send(Vec<u8>),
    Pause(Duration),
    /// Close the server half.
    Close,
}

impl ScriptStep {
    /// Read the handshake and answer with `result`.
    pub fn handshake(result: HandshakeResult) -> Vec<ScriptStep> {
        vec![
            ScriptStep::Expect(HandshakeRequest::SIZE),
            ScriptStep::Send(HandshakeResponse { result }.encode()),
        ]
    }

    pub fn handshake_ok() -> Vec<ScriptStep> {
        Self::handshake(HandshakeResult::Success)
    }

    /// Read one gaze request and answer it in a single write.
    pub fn gazes(response: GazesResponse) -> Vec<ScriptStep> {
        vec![
            ScriptStep::Expect(GetGazesRequest::SIZE),
            ScriptStep::Send(response.encode()),
        ]
    }
}

/// What the next `connect()` does.
#[derive(Debug, Clone)]
pub enum ConnectOutcome {
    Refuse(io::ErrorKind),
    Accept(Vec<ScriptStep>),
    /// The open never completes, like a SYN to an address nobody answers.
    Stall,
}

#[derive(Debug, Default)]
struct Shared {
    outcomes: Mutex<VecDeque<ConnectOutcome>>,
    received: Mutex<Vec<Vec<u8>>>,
    attempts: AtomicUsize,
    client_closes: AtomicUsize,
}

/// Scripted connector. Clones share their queue and recordings. Once the
/// queue is empty every connect is refused.
#[derive(Debug, Clone, Default)]
pub struct ScriptedConnector {
    shared: Arc<Shared>,
}

impl ScriptedConnector {
    pub fn new(outcomes: impl IntoIterator<Item = ConnectOutcome>) -> Self {
        let connector = Self::default();
        lock(&connector.shared.outcomes).extend(outcomes);
        connector
    }

    pub fn push(&self, outcome: ConnectOutcome) {
        lock(&self.shared.outcomes).push_back(outcome);
    }

    /// Number of `connect()` calls so far.
    pub fn attempts(&self) -> usize {
        self.shared.attempts.load(Ordering::SeqCst)
    }

    /// How many scripted streams saw the client close its end.
    pub fn client_closes(&self) -> usize {
        self.shared.client_closes.load(Ordering::SeqCst)
    }

    /// Every chunk the scripts read, in order.
    pub fn received(&self) -> Vec<Vec<u8>> {
        lock(&self.shared.received).clone()
    }

    pub fn boxed(&self) -> Box<dyn Connector> {
        Box::new(self.clone())
    }
}

impl Connector for ScriptedConnector {
    fn endpoint(&self) -> String {
        "scripted://test".to_string()
    }

    fn connect(&self) -> BoxFuture<'_, io::Result<BoxedStream>> {
        Box::pin(async move {
            self.shared.attempts.fetch_add(1, Ordering::SeqCst);
            let outcome = lock(&self.shared.outcomes)
                .pop_front()
                .unwrap_or(ConnectOutcome::Refuse(io::ErrorKind::ConnectionRefused));
            match outcome {
                ConnectOutcome::Refuse(kind) => Err(io::Error::from(kind)),
                ConnectOutcome::Stall => std::future::pending().await,
                ConnectOutcome::Accept(script) => {
                    let (client, server) = tokio::io::duplex(4096);
                    tokio::spawn(run_script(server, script, Arc::clone(&self.shared)));
                    Ok(Box::new(client) as BoxedStream)
                }
            }
        })
    }
}

async fn run_script(mut server: DuplexStream, script: Vec<ScriptStep>, shared: Arc<Shared>) {
    for step in script {
        match step {
            ScriptStep::Expect(len) => {
                let mut buf = vec![0u8; len];
                if server.read_exact(&mut buf).await.is_err() {
                    shared.client_closes.fetch_add(1, Ordering::SeqCst);
                    return;
                }
                lock(&shared.received).push(buf);
            }
            ScriptStep::Send(bytes) => {
                if server.write_all(&bytes).await.is_err() {
                    return;
                }
            }
            ScriptStep::Pause(duration) => tokio::time::sleep(duration).await,
            ScriptStep::Close => return,
        }
    }

    // Hold the stream open until the client goes away.
    let mut sink = [0u8; 64];
    while matches!(server.read(&mut sink).await, Ok(n) if n > 0) {}
    shared.client_closes.fetch_add(1, Ordering::SeqCst);
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
