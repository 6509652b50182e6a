//! Device lifecycle: probe the host, then run the acquisition loop on its
//! own thread until deactivated.
//!
//! ```text
//! activate() ──▶ probe host ──▶ spawn "gaze-poller" ──▶ GazePoller::run
//!                                                          │
//! deactivate() / Drop ── ShutdownSignal ──▶ loop exits ◀───┘ ── join
//! ```

use std::thread::JoinHandle;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{error, info, warn};

use gazeshim_config::AppConfig;

use crate::build_info;
use crate::calibration::Calibrator;
use crate::gaze::{Eye, GazeReader};
use crate::host::{self, CapabilityProbe, HostContext, InterfaceKind};
use crate::ipc::{Connector, RetryPolicy, TransportClient};
use crate::poller::{CalibrationCommand, GazePoller, PollerCommand, ShutdownSignal};
use crate::tracker::GazeTracker;

/// Name of the acquisition thread.
pub const POLLER_THREAD_NAME: &str = "gaze-poller";

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("failed to spawn acquisition thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// An active gaze device. Dropping it deactivates.
pub struct GazeDevice {
    thread: Option<JoinHandle<()>>,
    shutdown_tx: broadcast::Sender<ShutdownSignal>,
    commands: mpsc::UnboundedSender<PollerCommand>,
    reader: GazeReader,
    publishing: Option<InterfaceKind>,
}

impl GazeDevice {
    /// Activate with the transport selected in `config`.
    pub fn activate(
        config: &AppConfig,
        host: &mut dyn HostContext,
        probe: &dyn CapabilityProbe,
    ) -> Result<Self, DeviceError> {
        let client = TransportClient::from_config(&config.transport);
        Self::activate_with_client(config, host, probe, client)
    }

    /// Activate over a caller-supplied connector.
    pub fn activate_with(
        config: &AppConfig,
        host: &mut dyn HostContext,
        probe: &dyn CapabilityProbe,
        connector: Box<dyn Connector>,
    ) -> Result<Self, DeviceError> {
        let client = TransportClient::new(
            connector,
            RetryPolicy::from_config(&config.transport),
            config.transport.protocol_version,
        );
        Self::activate_with_client(config, host, probe, client)
    }

    fn activate_with_client(
        config: &AppConfig,
        host: &mut dyn HostContext,
        probe: &dyn CapabilityProbe,
        client: TransportClient,
    ) -> Result<Self, DeviceError> {
        info!(
            version = build_info::VERSION,
            git_hash = build_info::GIT_HASH,
            transport = config.transport.kind.as_str(),
            "Activating gaze device"
        );

        let publisher = match host::probe_and_register(host, probe, &config.host.component_name) {
            Ok(publisher) => Some(publisher),
            Err(e) => {
                warn!(error = %e, "No eye tracking available, publishing disabled");
                None
            }
        };
        let publishing = publisher.as_ref().map(|p| p.kind());

        let tracker = GazeTracker::new(client, Calibrator::new(&config.calibration), &config.poller);
        let reader = tracker.reader();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let poller = GazePoller::new(
            tracker,
            publisher,
            command_rx,
            Duration::from_millis(config.poller.period_ms),
        );
        let load_on_start = config.calibration.load_on_start;

        let thread = std::thread::Builder::new()
            .name(POLLER_THREAD_NAME.to_string())
            .spawn(move || run_poller(poller, shutdown_rx, load_on_start))
            .map_err(DeviceError::Spawn)?;

        Ok(Self {
            thread: Some(thread),
            shutdown_tx,
            commands: command_tx,
            reader,
            publishing,
        })
    }

    pub fn reader(&self) -> GazeReader {
        self.reader.clone()
    }

    /// Interface gaze is published through, if any.
    pub fn publishing(&self) -> Option<InterfaceKind> {
        self.publishing
    }

    pub fn is_active(&self) -> bool {
        self.thread.is_some()
    }

    /// Stop the loop and wait for its thread. Idempotent.
    pub fn deactivate(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        let _ = self.shutdown_tx.send(ShutdownSignal);
        if thread.join().is_err() {
            error!("Gaze poller thread panicked");
        }
        info!("Gaze device deactivated");
    }

    fn send(&self, command: PollerCommand) {
        if self.commands.send(command).is_err() {
            warn!("Gaze poller is not running, command dropped");
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.send(PollerCommand::SetEnabled(enabled));
    }

    pub fn connect(&self) {
        self.send(PollerCommand::Connect);
    }

    pub fn disconnect(&self) {
        self.send(PollerCommand::Disconnect);
    }

    pub fn start_calibrating(&self) {
        self.send(PollerCommand::Calibration(CalibrationCommand::Start));
    }

    pub fn stop_calibrating(&self) {
        self.send(PollerCommand::Calibration(CalibrationCommand::Stop));
    }

    pub fn start_eye_calibration(&self, eye: Eye) {
        self.send(PollerCommand::Calibration(CalibrationCommand::StartEye(eye)));
    }

    pub fn stop_eye_calibration(&self) {
        self.send(PollerCommand::Calibration(CalibrationCommand::StopEye));
    }

    pub fn start_combined_calibration(&self) {
        self.send(PollerCommand::Calibration(CalibrationCommand::StartCombined));
    }

    pub fn stop_combined_calibration(&self) {
        self.send(PollerCommand::Calibration(CalibrationCommand::StopCombined));
    }

    pub fn increment_raster(&self) {
        self.send(PollerCommand::Calibration(CalibrationCommand::IncrementRaster));
    }

    pub fn set_apply_calibration(&self, apply: bool) {
        self.send(PollerCommand::Calibration(CalibrationCommand::SetApply(apply)));
    }

    pub fn toggle_apply_calibration(&self) {
        self.send(PollerCommand::Calibration(CalibrationCommand::ToggleApply));
    }

    pub fn reset_calibrations(&self) {
        self.send(PollerCommand::Calibration(CalibrationCommand::Reset));
    }

    /// Ask the loop to load persisted calibrations. Await the receiver, or
    /// call `blocking_recv` from outside an async context. A dropped reply
    /// means the loop is gone.
    pub fn load_calibrations(&self) -> oneshot::Receiver<bool> {
        let (tx, rx) = oneshot::channel();
        self.send(PollerCommand::Calibration(CalibrationCommand::Load(tx)));
        rx
    }

    /// Ask the loop to persist calibrated targets. See
    /// [`load_calibrations`](Self::load_calibrations).
    pub fn save_calibrations(&self) -> oneshot::Receiver<bool> {
        let (tx, rx) = oneshot::channel();
        self.send(PollerCommand::Calibration(CalibrationCommand::Save(tx)));
        rx
    }
}

impl Drop for GazeDevice {
    fn drop(&mut self) {
        self.deactivate();
    }
}

impl std::fmt::Debug for GazeDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GazeDevice")
            .field("active", &self.is_active())
            .field("publishing", &self.publishing)
            .finish()
    }
}

fn run_poller(
    poller: GazePoller,
    shutdown_rx: broadcast::Receiver<ShutdownSignal>,
    load_on_start: bool,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Failed to build gaze poller runtime");
            return;
        }
    };
    runtime.block_on(async move {
        let mut poller = poller;
        if load_on_start {
            let (tx, _rx) = oneshot::channel();
            poller
                .handle(PollerCommand::Calibration(CalibrationCommand::Load(tx)))
                .await;
        }
        poller.run(shutdown_rx).await;
    });
}
