#![deny(unsafe_code)]

//! Shared test utilities for the gazeshim workspace.
//!
//! Provides config builders, a fake gaze server, a scripted in-memory
//! connector, a recording host and tracing helpers so that integration
//! tests stay concise and consistent.
//!
//! Add this crate as a `[dev-dependency]` in any workspace member:
//!
//! ```toml
//! [dev-dependencies]
//! gazeshim-test-utils = { workspace = true }
//! ```

pub mod config;
pub mod host;
pub mod scripted;
pub mod server;
pub mod tracing_setup;

pub use config::TestConfigBuilder;
pub use host::{RecordingHost, Registration};
pub use scripted::{ConnectOutcome, ScriptStep, ScriptedConnector};
pub use server::{FakeGazeServer, ServerBehavior};
