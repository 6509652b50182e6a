#![deny(unsafe_code)]

//! gazeshim core acquisition runtime.
//!
//! Connects to an out-of-process gaze server, polls per-eye gaze at a fixed
//! cadence, keeps the latest samples in a non-blocking cache, optionally
//! corrects them through a calibration raster and pushes the result into a
//! host-provided eye-tracking interface.

use std::future::Future;
use std::pin::Pin;

/// A type-erased, `Send`-safe, boxed future for trait methods used through
/// `dyn Trait` (native `async fn` in traits is not object-safe).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Compile-time build metadata (version, git hash, profile).
pub mod build_info;
/// Calibration rasters, targets, correction and persistence.
pub mod calibration;
/// Background thread lifecycle around the acquisition loop.
pub mod device;
/// Gaze data model and the snapshot cache.
pub mod gaze;
/// Host capability probing and publishing.
pub mod host;
/// Gaze server protocol, transports and client.
pub mod ipc;
/// `tracing` layer forwarding events to a host log.
pub mod logging;
/// Fixed-period acquisition loop.
pub mod poller;
/// Client, cache and calibrator bundled behind one facade.
pub mod tracker;

pub use calibration::{Calibrator, TargetId};
pub use device::{DeviceError, GazeDevice};
pub use gaze::{Eye, GazeDirection, GazeReader, GazeSample, GazeSnapshot};
pub use host::{CapabilityProbe, DefaultProbe, HostContext, Publisher};
pub use ipc::{ConnectError, TransportClient, TransportError};
pub use logging::{HostLog, HostLogLayer};
pub use poller::{GazePoller, PollerCommand, ShutdownSignal};
pub use tracker::GazeTracker;
