//! Gaze tracker: transport client, snapshot cache and calibrator behind one
//! owner.
//!
//! The tracker is the only writer of the [`GazeCache`]. Everything it learns
//! from the server or from calibration lands in the snapshot that
//! [`GazeReader`]s see.

use tracing::{debug, info, trace};

use gazeshim_config::{AppConfig, PollerConfig};

use crate::calibration::{Calibrator, TargetId};
use crate::gaze::{self, Eye, GazeCache, GazeDirection, GazeReader, GazeSample, GazeSnapshot};
use crate::ipc::{ConnectError, TransportClient, TransportError};

pub struct GazeTracker {
    client: TransportClient,
    cache: GazeCache,
    calibrator: Calibrator,
    requested_enabled: bool,
    enable_on_connect: bool,
    blink_invalidates: bool,
}

impl GazeTracker {
    pub fn new(client: TransportClient, calibrator: Calibrator, poller: &PollerConfig) -> Self {
        let tracker = Self {
            client,
            cache: GazeCache::new(),
            calibrator,
            requested_enabled: false,
            enable_on_connect: poller.enable_on_connect,
            blink_invalidates: poller.blink_invalidates,
        };
        tracker.refresh_calibration();
        tracker
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            TransportClient::from_config(&config.transport),
            Calibrator::new(&config.calibration),
            &config.poller,
        )
    }

    pub fn reader(&self) -> GazeReader {
        self.cache.reader()
    }

    pub fn snapshot(&self) -> GazeSnapshot {
        self.cache.current()
    }

    pub fn client(&self) -> &TransportClient {
        &self.client
    }

    pub fn calibrator(&self) -> &Calibrator {
        &self.calibrator
    }

    /// Mutate calibration state and republish the summary.
    pub fn with_calibrator<T>(&mut self, f: impl FnOnce(&mut Calibrator) -> T) -> T {
        let out = f(&mut self.calibrator);
        self.refresh_calibration();
        out
    }

    /// Async variant of [`with_calibrator`](Self::with_calibrator) for load.
    pub async fn load_calibrations(&mut self) -> bool {
        let loaded = self.calibrator.load_calibrations().await;
        self.refresh_calibration();
        loaded
    }

    pub async fn save_calibrations(&mut self) -> bool {
        self.calibrator.save_calibrations().await
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    pub fn is_enabled(&self) -> bool {
        self.client.is_connected() && self.requested_enabled
    }

    /// Connect and handshake. Leaves the snapshot untouched on failure.
    pub async fn connect(&mut self) -> Result<(), ConnectError> {
        if self.client.is_connected() {
            return Ok(());
        }
        self.client.connect().await?;
        if self.enable_on_connect {
            self.requested_enabled = true;
        }
        let enabled = self.is_enabled();
        self.cache.update(|s| {
            s.connected = true;
            s.enabled = enabled;
            true
        });
        Ok(())
    }

    pub async fn disconnect(&mut self) {
        let was_connected = self.client.is_connected();
        self.client.disconnect().await;
        if was_connected {
            self.cache.update(|s| {
                s.connected = false;
                s.enabled = false;
                s.invalidate();
                true
            });
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.requested_enabled = enabled;
        let effective = self.is_enabled();
        info!(requested = enabled, enabled = effective, "Gaze tracking enable changed");
        self.cache.update(|s| {
            let changed = s.enabled != effective;
            s.enabled = effective;
            changed
        });
    }

    /// Fetch one gaze set and write it into the snapshot. A failure
    /// invalidates every sample but keeps the last directions.
    pub async fn update_gazes(&mut self) -> Result<(), TransportError> {
        match self.client.get_gazes().await {
            Ok(response) => {
                let left = response.left.sample(self.blink_invalidates);
                let right = response.right.sample(self.blink_invalidates);
                let combined = gaze::combine(&left, &right);
                let enabled = self.is_enabled();
                trace!(?left, ?right, ?combined, "Gazes received");
                self.cache.update(|s| {
                    s.per_eye = [left, right];
                    match combined {
                        Some(direction) => s.combined = GazeSample::valid(direction),
                        None => s.combined.valid = false,
                    }
                    s.connected = true;
                    s.enabled = enabled;
                    s.sequence += 1;
                    true
                });
                Ok(())
            }
            Err(e) => {
                let connected = self.client.is_connected();
                let enabled = self.is_enabled();
                debug!(error = %e, connected, "Gaze update failed");
                self.cache.update(|s| {
                    s.invalidate();
                    s.connected = connected;
                    s.enabled = enabled;
                    true
                });
                Err(e)
            }
        }
    }

    pub fn combined_gaze_available(&self) -> bool {
        let s = self.cache.current();
        s.connected && s.enabled && s.combined.valid
    }

    pub fn gaze_available(&self, eye: Eye) -> bool {
        let s = self.cache.current();
        s.connected && s.enabled && s.eye(eye).valid
    }

    /// Combined direction, corrected when calibrated. With `should_sample`,
    /// the raw sample first feeds a calibrating combined target.
    pub fn get_combined_gaze(&mut self, should_sample: bool) -> Option<GazeDirection> {
        if !self.combined_gaze_available() {
            return None;
        }
        let raw = self.cache.current().combined.direction;
        Some(self.read_through(TargetId::Combined, raw, should_sample))
    }

    pub fn get_per_eye_gaze(&mut self, eye: Eye, should_sample: bool) -> Option<GazeDirection> {
        if !self.gaze_available(eye) {
            return None;
        }
        let raw = self.cache.current().eye(eye).direction;
        Some(self.read_through(eye.into(), raw, should_sample))
    }

    fn read_through(&mut self, id: TargetId, raw: GazeDirection, should_sample: bool) -> GazeDirection {
        if should_sample
            && self
                .calibrator
                .target(id)
                .is_some_and(|t| t.is_calibrating())
        {
            self.calibrator.sample(id, raw);
            self.refresh_calibration();
        }
        self.calibrator.apply(id, raw)
    }

    fn refresh_calibration(&self) {
        let summary = self.calibrator.summary();
        self.cache.update(|s| {
            let changed = s.calibration != summary;
            s.calibration = summary;
            changed
        });
    }
}

impl std::fmt::Debug for GazeTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GazeTracker")
            .field("client", &self.client)
            .field("calibrator", &self.calibrator)
            .field("requested_enabled", &self.requested_enabled)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tracker() -> GazeTracker {
        GazeTracker::from_config(&AppConfig::default())
    }

    #[test]
    fn test_enable_requires_connection() {
        let mut t = tracker();
        t.set_enabled(true);
        assert!(!t.is_enabled());
        assert!(!t.reader().is_enabled());
        assert!(!t.combined_gaze_available());
        assert_eq!(t.get_combined_gaze(true), None);
        assert_eq!(t.get_per_eye_gaze(Eye::Left, true), None);
    }

    #[test]
    fn test_calibration_changes_reach_readers() {
        let mut t = tracker();
        let mut reader = t.reader();
        reader.mark_seen();

        let started = t.with_calibrator(Calibrator::start_calibrating);
        assert_eq!(started, Some(TargetId::Left));
        assert!(reader.has_changed());
        let snapshot = reader.mark_seen();
        assert_eq!(snapshot.calibration.calibrating, Some(TargetId::Left));
        assert!(snapshot.calibration.current_target.is_some());
        assert_eq!(snapshot.sequence, 0);
    }

    #[tokio::test]
    async fn test_update_without_connection_invalidates() {
        let mut t = tracker();
        assert!(matches!(
            t.update_gazes().await,
            Err(TransportError::NotConnected)
        ));
        let s = t.snapshot();
        assert!(!s.connected && !s.combined.valid);
        assert_eq!(s.sequence, 0);
    }
}
