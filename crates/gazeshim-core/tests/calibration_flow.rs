//! Calibrating against a biased server, persisting and restoring.

use std::time::Duration;

use pretty_assertions::assert_eq;
use tempfile::TempDir;
use tokio::sync::{mpsc, oneshot};

use gazeshim_config::{AppConfig, CorrectionPolicy};
use gazeshim_core::calibration::raster::direction_from_angles;
use gazeshim_core::poller::{CalibrationCommand, TickOutcome};
use gazeshim_core::{
    DefaultProbe, Eye, GazeDevice, GazeDirection, GazePoller, GazeTracker, PollerCommand,
    TargetId,
};
use gazeshim_test_utils::{FakeGazeServer, RecordingHost, TestConfigBuilder};

const SAMPLES: u32 = 3;

/// The server reports every gaze rotated 4 degrees right of where the user
/// looks; the user looks straight ahead.
fn biased() -> GazeDirection {
    direction_from_angles(4.0, 0.0)
}

fn approx(a: GazeDirection, b: GazeDirection) -> bool {
    (a - b).length() < 1e-4
}

async fn biased_server() -> FakeGazeServer {
    let server = FakeGazeServer::accepting().await;
    server.set_directions(biased().to_array(), biased().to_array());
    server
}

fn config(server: &FakeGazeServer, dir: &TempDir) -> AppConfig {
    TestConfigBuilder::new()
        .socket_port(server.port())
        .data_dir(dir.path())
        .raster(1, 1, SAMPLES)
        .correction(CorrectionPolicy::Nearest)
        .build()
}

fn poller(config: &AppConfig) -> GazePoller {
    let (_tx, rx) = mpsc::unbounded_channel();
    GazePoller::new(GazeTracker::from_config(config), None, rx, Duration::ZERO)
}

async fn command(poller: &mut GazePoller, command: CalibrationCommand) {
    poller.handle(PollerCommand::Calibration(command)).await;
}

async fn persist(poller: &mut GazePoller, save: bool) -> bool {
    let (tx, rx) = oneshot::channel();
    let command = if save {
        CalibrationCommand::Save(tx)
    } else {
        CalibrationCommand::Load(tx)
    };
    poller.handle(PollerCommand::Calibration(command)).await;
    rx.await.unwrap()
}

async fn ticks(poller: &mut GazePoller, n: u32) -> TickOutcome {
    let mut last = TickOutcome::Skipped;
    for _ in 0..n {
        last = poller.tick().await;
    }
    last
}

/// Run every target through the 1x1 raster.
async fn calibrate_all(poller: &mut GazePoller) {
    for expected in TargetId::ALL {
        command(poller, CalibrationCommand::Start).await;
        assert_eq!(
            poller.tracker().calibrator().calibrating_target(),
            Some(expected)
        );
        ticks(poller, SAMPLES).await;
        assert!(poller.tracker().calibrator().is_calibrated(expected));
    }
}

#[tokio::test]
async fn test_calibration_corrects_bias() {
    let server = biased_server().await;
    let dir = TempDir::new().unwrap();
    let mut poller = poller(&config(&server, &dir));
    let reader = poller.tracker().reader();

    // Uncorrected before calibrating.
    match ticks(&mut poller, 1).await {
        TickOutcome::Acquired(Some(direction)) => assert!(approx(direction, biased())),
        other => panic!("expected a gaze, got {other:?}"),
    }

    calibrate_all(&mut poller).await;
    let summary = reader.snapshot().calibration;
    assert!(summary.fully_calibrated);
    assert_eq!(summary.calibrating, None);
    assert!(!summary.applying);

    command(&mut poller, CalibrationCommand::SetApply(true)).await;
    match ticks(&mut poller, 1).await {
        TickOutcome::Acquired(Some(direction)) => {
            assert!(approx(direction, GazeDirection::FORWARD), "{direction:?}");
        }
        other => panic!("expected a gaze, got {other:?}"),
    }
    let left = poller.tracker_mut().get_per_eye_gaze(Eye::Left, false);
    assert!(left.is_some_and(|d| approx(d, GazeDirection::FORWARD)));

    command(&mut poller, CalibrationCommand::ToggleApply).await;
    match ticks(&mut poller, 1).await {
        TickOutcome::Acquired(Some(direction)) => assert!(approx(direction, biased())),
        other => panic!("expected a gaze, got {other:?}"),
    }
}

#[tokio::test]
async fn test_stop_discards_partial_point() {
    let server = biased_server().await;
    let dir = TempDir::new().unwrap();
    let mut poller = poller(&config(&server, &dir));

    command(&mut poller, CalibrationCommand::Start).await;
    ticks(&mut poller, SAMPLES - 1).await;
    command(&mut poller, CalibrationCommand::Stop).await;

    let calibrator = poller.tracker().calibrator();
    assert!(!calibrator.is_calibrating());
    let left = calibrator.target(TargetId::Left).unwrap();
    assert_eq!(left.points()[0].samples(), 0);
    assert!(!left.is_calibrated());
}

#[tokio::test]
async fn test_save_then_load_restores_targets() {
    let server = biased_server().await;
    let dir = TempDir::new().unwrap();
    let config = config(&server, &dir);

    let mut first = poller(&config);
    // Nothing to save yet.
    assert!(!persist(&mut first, true).await);
    calibrate_all(&mut first).await;
    assert!(persist(&mut first, true).await);
    for id in TargetId::ALL {
        assert!(dir.path().join(format!("{}.json", id.as_str())).exists());
    }

    let mut second = poller(&config);
    assert!(!second.tracker().calibrator().is_fully_calibrated());
    assert!(persist(&mut second, false).await);
    assert!(second.tracker().calibrator().is_fully_calibrated());
    let restored = second.tracker().calibrator().target(TargetId::Combined).unwrap();
    let original = first.tracker().calibrator().target(TargetId::Combined).unwrap();
    assert_eq!(restored.points(), original.points());

    command(&mut second, CalibrationCommand::SetApply(true)).await;
    match ticks(&mut second, 1).await {
        TickOutcome::Acquired(Some(direction)) => assert!(approx(direction, GazeDirection::FORWARD)),
        other => panic!("expected a gaze, got {other:?}"),
    }
}

#[tokio::test]
async fn test_load_rejects_other_raster() {
    let server = biased_server().await;
    let dir = TempDir::new().unwrap();
    let mut first = poller(&config(&server, &dir));
    calibrate_all(&mut first).await;
    assert!(persist(&mut first, true).await);

    let wider = TestConfigBuilder::new()
        .socket_port(server.port())
        .data_dir(dir.path())
        .raster(3, 1, SAMPLES)
        .build();
    let mut second = poller(&wider);
    assert!(!persist(&mut second, false).await);
    for id in TargetId::ALL {
        assert!(!second.tracker().calibrator().is_calibrated(id));
    }
}

#[tokio::test]
async fn test_reset_forgets_calibration() {
    let server = biased_server().await;
    let dir = TempDir::new().unwrap();
    let mut poller = poller(&config(&server, &dir));
    calibrate_all(&mut poller).await;

    command(&mut poller, CalibrationCommand::Reset).await;
    let calibrator = poller.tracker().calibrator();
    assert!(!calibrator.is_fully_calibrated());
    for id in TargetId::ALL {
        assert!(!calibrator.is_calibrated(id));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_device_loads_calibration_on_start() {
    let server = biased_server().await;
    let dir = TempDir::new().unwrap();
    let mut first = poller(&config(&server, &dir));
    calibrate_all(&mut first).await;
    assert!(persist(&mut first, true).await);
    drop(first);

    let mut config = config(&server, &dir);
    config.calibration.load_on_start = true;
    config.calibration.apply_on_start = true;
    config.poller.period_ms = 2;
    let mut host = RecordingHost::primary(5);
    let device = GazeDevice::activate(&config, &mut host, &DefaultProbe::default()).unwrap();

    let mut reader = device.reader();
    let snapshot = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let s = reader.mark_seen();
            if s.sequence >= 1 && s.calibration.fully_calibrated {
                return s;
            }
            assert!(reader.changed().await);
        }
    })
    .await
    .expect("calibration never loaded");
    assert!(snapshot.calibration.applying);
    drop(device);

    let published = host.updates();
    let last = published.last().unwrap();
    assert!(last.is_available());
    assert!(approx(
        GazeDirection::new(last.vector[0], last.vector[1], last.vector[2]),
        GazeDirection::FORWARD
    ));
}
