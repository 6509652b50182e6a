//! Fixed-period acquisition loop.
//!
//! Each iteration drains pending commands, runs one tick
//! (connect → request → decode → publish) and then sleeps for the period,
//! waking early only for shutdown. Ticks never overlap.

use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, trace};

use crate::calibration::Calibrator;
use crate::gaze::{Eye, GazeDirection};
use crate::host::Publisher;
use crate::tracker::GazeTracker;

/// Shutdown signal sent via broadcast channel.
#[derive(Debug, Clone)]
pub struct ShutdownSignal;

/// Calibration control, applied on the loop thread.
#[derive(Debug)]
pub enum CalibrationCommand {
    Start,
    Stop,
    StartEye(Eye),
    StopEye,
    StartCombined,
    StopCombined,
    IncrementRaster,
    SetApply(bool),
    ToggleApply,
    Reset,
    Load(oneshot::Sender<bool>),
    Save(oneshot::Sender<bool>),
}

#[derive(Debug)]
pub enum PollerCommand {
    SetEnabled(bool),
    Connect,
    Disconnect,
    Calibration(CalibrationCommand),
}

/// What one tick did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickOutcome {
    /// No connection could be established; nothing was touched.
    Skipped,
    /// Fresh gazes were stored; carries what was published.
    Acquired(Option<GazeDirection>),
    /// The request failed; samples were invalidated.
    Failed,
}

pub struct GazePoller {
    tracker: GazeTracker,
    publisher: Option<Publisher>,
    commands: mpsc::UnboundedReceiver<PollerCommand>,
    period: Duration,
}

impl GazePoller {
    pub fn new(
        tracker: GazeTracker,
        publisher: Option<Publisher>,
        commands: mpsc::UnboundedReceiver<PollerCommand>,
        period: Duration,
    ) -> Self {
        Self {
            tracker,
            publisher,
            commands,
            period,
        }
    }

    pub fn tracker(&self) -> &GazeTracker {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut GazeTracker {
        &mut self.tracker
    }

    /// Run until shutdown is signalled or every sender is gone. Returns the
    /// tracker so callers can inspect final state.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<ShutdownSignal>) -> GazeTracker {
        info!(
            period_ms = self.period.as_millis() as u64,
            endpoint = %self.tracker.client().endpoint(),
            publishing = self.publisher.is_some(),
            "Gaze poller started"
        );

        loop {
            self.drain_commands().await;
            let outcome = self.tick().await;
            trace!(?outcome, "Tick");

            match shutdown.try_recv() {
                Ok(_) | Err(broadcast::error::TryRecvError::Closed) => break,
                Err(_) => {}
            }

            tokio::select! {
                _ = shutdown.recv() => break,
                _ = tokio::time::sleep(self.period) => {}
            }
        }

        self.tracker.disconnect().await;
        info!("Gaze poller stopped");
        self.tracker
    }

    /// One acquisition cycle.
    pub async fn tick(&mut self) -> TickOutcome {
        if !self.tracker.is_connected()
            && let Err(e) = self.tracker.connect().await
        {
            trace!(error = %e, "Gaze server not reachable");
            return TickOutcome::Skipped;
        }

        match self.tracker.update_gazes().await {
            Ok(()) => {
                for eye in Eye::BOTH {
                    self.tracker.get_per_eye_gaze(eye, true);
                }
                let combined = self.tracker.get_combined_gaze(true);
                if let Some(publisher) = &mut self.publisher {
                    publisher.publish(combined);
                }
                TickOutcome::Acquired(combined)
            }
            Err(_) => {
                if let Some(publisher) = &mut self.publisher {
                    publisher.publish(None);
                }
                TickOutcome::Failed
            }
        }
    }

    /// Apply every queued command.
    pub async fn drain_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            self.handle(command).await;
        }
    }

    /// Apply one command immediately.
    pub async fn handle(&mut self, command: PollerCommand) {
        debug!(?command, "Poller command");
        match command {
            PollerCommand::SetEnabled(enabled) => self.tracker.set_enabled(enabled),
            PollerCommand::Connect => {
                if let Err(e) = self.tracker.connect().await {
                    debug!(error = %e, "Connect request failed");
                }
            }
            PollerCommand::Disconnect => self.tracker.disconnect().await,
            PollerCommand::Calibration(CalibrationCommand::Load(reply)) => {
                let loaded = self.tracker.load_calibrations().await;
                let _ = reply.send(loaded);
            }
            PollerCommand::Calibration(CalibrationCommand::Save(reply)) => {
                let saved = self.tracker.save_calibrations().await;
                let _ = reply.send(saved);
            }
            PollerCommand::Calibration(command) => {
                self.tracker.with_calibrator(|c| apply_calibration(c, command));
            }
        }
    }
}

fn apply_calibration(calibrator: &mut Calibrator, command: CalibrationCommand) {
    match command {
        CalibrationCommand::Start => {
            calibrator.start_calibrating();
        }
        CalibrationCommand::Stop => {
            calibrator.stop_calibrating();
        }
        CalibrationCommand::StartEye(eye) => {
            calibrator.start_eye_calibration(eye);
        }
        CalibrationCommand::StopEye => {
            calibrator.stop_eye_calibration();
        }
        CalibrationCommand::StartCombined => {
            calibrator.start_combined_calibration();
        }
        CalibrationCommand::StopCombined => {
            calibrator.stop_combined_calibration();
        }
        CalibrationCommand::IncrementRaster => {
            calibrator.increment_raster();
        }
        CalibrationCommand::SetApply(apply) => calibrator.set_apply_calibration(apply),
        CalibrationCommand::ToggleApply => {
            calibrator.toggle_apply_calibration();
        }
        CalibrationCommand::Reset => calibrator.reset_calibrations(),
        // Handled asynchronously by the caller.
        CalibrationCommand::Load(_) | CalibrationCommand::Save(_) => {}
    }
}
