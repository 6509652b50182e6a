#![deny(unsafe_code)]

//! Configuration loading and validation for gazeshim.
//!
//! Loads TOML configuration files and validates them. [`AppConfig`] is the
//! single construction-time description of the shim: which transport reaches
//! the gaze server, how hard to retry, how fast to poll, which calibration
//! targets exist, and how the host interface is probed.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

/// Top-level application configuration.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Gaze server transport and retry budgets.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Acquisition loop cadence and sample policy.
    #[serde(default)]
    pub poller: PollerConfig,

    /// Calibration targets, raster and persistence.
    #[serde(default)]
    pub calibration: CalibrationConfig,

    /// Host interface probing and registration.
    #[serde(default)]
    pub host: HostConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Which byte-stream binding reaches the gaze server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Named byte-stream channel (Unix domain socket / Windows named pipe).
    Pipe,
    /// Loopback TCP socket on a fixed port.
    Socket,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pipe => "pipe",
            Self::Socket => "socket",
        }
    }
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Transport binding: "pipe" or "socket".
    #[serde(default = "default_transport_kind")]
    pub kind: TransportKind,

    /// Well-known pipe name (socket path on Unix, `\\.\pipe\…` on Windows).
    #[serde(default = "default_pipe_name")]
    pub pipe_name: String,

    /// Loopback address of the gaze server socket.
    #[serde(default = "default_socket_addr")]
    pub socket_addr: String,

    /// Fixed port of the gaze server socket.
    #[serde(default = "default_socket_port")]
    pub socket_port: u16,

    /// Protocol version tag sent in the handshake.
    #[serde(default = "default_protocol_version")]
    pub protocol_version: u32,

    /// Attempts to open the channel while the server is busy or not listening.
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,

    /// Wait between channel open attempts, in milliseconds.
    #[serde(default = "default_connect_retry_ms")]
    pub connect_retry_ms: u64,

    /// Upper bound for a single channel open attempt, in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Read attempts allowed to accumulate one complete response.
    #[serde(default = "default_read_attempts")]
    pub read_attempts: u32,

    /// Longest wait of a single read attempt, in milliseconds.
    #[serde(default = "default_read_wait_ms")]
    pub read_wait_ms: u64,

    /// Upper bound for writing one request frame, in milliseconds.
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: default_transport_kind(),
            pipe_name: default_pipe_name(),
            socket_addr: default_socket_addr(),
            socket_port: default_socket_port(),
            protocol_version: default_protocol_version(),
            connect_attempts: default_connect_attempts(),
            connect_retry_ms: default_connect_retry_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            read_attempts: default_read_attempts(),
            read_wait_ms: default_read_wait_ms(),
            write_timeout_ms: default_write_timeout_ms(),
        }
    }
}

fn default_transport_kind() -> TransportKind {
    TransportKind::Socket
}

#[cfg(windows)]
fn default_pipe_name() -> String {
    r"\\.\pipe\GazeShimServerPipe".to_string()
}

#[cfg(not(windows))]
fn default_pipe_name() -> String {
    "/tmp/gazeshim-server.sock".to_string()
}

fn default_socket_addr() -> String {
    "127.0.0.1".to_string()
}

fn default_socket_port() -> u16 {
    38723
}

fn default_protocol_version() -> u32 {
    1
}

fn default_connect_attempts() -> u32 {
    5
}

fn default_connect_retry_ms() -> u64 {
    20
}

fn default_connect_timeout_ms() -> u64 {
    100
}

fn default_read_attempts() -> u32 {
    10
}

fn default_read_wait_ms() -> u64 {
    2
}

fn default_write_timeout_ms() -> u64 {
    50
}

/// Acquisition loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerConfig {
    /// Sleep between two acquisition ticks, in milliseconds.
    #[serde(default = "default_period_ms")]
    pub period_ms: u64,

    /// Enable gaze output as soon as the handshake succeeds.
    #[serde(default = "default_true")]
    pub enable_on_connect: bool,

    /// Treat an eye reported as blinking as having no valid gaze.
    #[serde(default = "default_true")]
    pub blink_invalidates: bool,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            period_ms: default_period_ms(),
            enable_on_connect: true,
            blink_invalidates: true,
        }
    }
}

fn default_period_ms() -> u64 {
    5
}

fn default_true() -> bool {
    true
}

/// How a fitted calibration is turned into a correction for a raw direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CorrectionPolicy {
    /// Use the correction of the angularly closest raster point.
    Nearest,
    /// Blend all point corrections weighted by inverse squared angle.
    InverseDistance,
}

/// Calibration configuration.
///
/// ## TOML Example
///
/// ```toml
/// [calibration]
/// combined = false
/// columns = 5
/// rows = 3
/// samples_per_point = 45
/// correction = "nearest"
/// data_dir = "/var/lib/gazeshim"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationConfig {
    /// Calibrate the left eye.
    #[serde(default = "default_true")]
    pub left: bool,

    /// Calibrate the right eye.
    #[serde(default = "default_true")]
    pub right: bool,

    /// Calibrate the combined gaze.
    #[serde(default = "default_true")]
    pub combined: bool,

    /// Raster columns (horizontal point count).
    #[serde(default = "default_raster_columns")]
    pub columns: u32,

    /// Raster rows (vertical point count).
    #[serde(default = "default_raster_rows")]
    pub rows: u32,

    /// Horizontal field covered by the raster, in degrees.
    #[serde(default = "default_horizontal_span_deg")]
    pub horizontal_span_deg: f32,

    /// Vertical field covered by the raster, in degrees.
    #[serde(default = "default_vertical_span_deg")]
    pub vertical_span_deg: f32,

    /// Samples a raster point must accept before it counts as calibrated.
    #[serde(default = "default_samples_per_point")]
    pub samples_per_point: u32,

    /// Advance the raster automatically once the current point is done.
    #[serde(default = "default_true")]
    pub auto_increment: bool,

    /// Correction policy for calibrated targets.
    #[serde(default = "default_correction")]
    pub correction: CorrectionPolicy,

    /// Apply loaded/fitted corrections from startup.
    #[serde(default)]
    pub apply_on_start: bool,

    /// Try to load persisted calibrations when the device activates.
    #[serde(default = "default_true")]
    pub load_on_start: bool,

    /// Directory holding one JSON file per calibration target.
    #[serde(default = "default_calibration_dir")]
    pub data_dir: String,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            left: true,
            right: true,
            combined: true,
            columns: default_raster_columns(),
            rows: default_raster_rows(),
            horizontal_span_deg: default_horizontal_span_deg(),
            vertical_span_deg: default_vertical_span_deg(),
            samples_per_point: default_samples_per_point(),
            auto_increment: true,
            correction: default_correction(),
            apply_on_start: false,
            load_on_start: true,
            data_dir: default_calibration_dir(),
        }
    }
}

fn default_raster_columns() -> u32 {
    3
}

fn default_raster_rows() -> u32 {
    3
}

fn default_horizontal_span_deg() -> f32 {
    30.0
}

fn default_vertical_span_deg() -> f32 {
    20.0
}

fn default_samples_per_point() -> u32 {
    30
}

fn default_correction() -> CorrectionPolicy {
    CorrectionPolicy::InverseDistance
}

fn default_calibration_dir() -> String {
    "data/calibration".to_string()
}

/// Host interface configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// Component path registered with the host.
    #[serde(default = "default_component_name")]
    pub component_name: String,

    /// Largest accepted distance between the probed operation-table entries.
    #[serde(default = "default_max_table_span")]
    pub max_table_span: usize,

    /// Lowest interface version accepted when the host advertises one.
    #[serde(default = "default_min_interface_version")]
    pub min_interface_version: u32,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            component_name: default_component_name(),
            max_table_span: default_max_table_span(),
            min_interface_version: default_min_interface_version(),
        }
    }
}

fn default_component_name() -> String {
    "/eyetracking".to_string()
}

fn default_max_table_span() -> usize {
    0x10000
}

fn default_min_interface_version() -> u32 {
    4
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g. "info", "debug", "trace").
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from a TOML file at the given path using async I/O.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        let config = Self::parse(&content)?;
        debug!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let transport = &self.transport;
        if transport.pipe_name.is_empty() {
            return Err(ConfigError::Validation(
                "transport.pipe_name must not be empty".to_string(),
            ));
        }
        if transport.socket_addr.is_empty() {
            return Err(ConfigError::Validation(
                "transport.socket_addr must not be empty".to_string(),
            ));
        }
        if !is_loopback(&transport.socket_addr) {
            return Err(ConfigError::Validation(format!(
                "transport.socket_addr must be a loopback address, got {:?}",
                transport.socket_addr
            )));
        }
        if transport.socket_port == 0 {
            return Err(ConfigError::Validation(
                "transport.socket_port must be non-zero".to_string(),
            ));
        }
        if transport.connect_attempts == 0 {
            return Err(ConfigError::Validation(
                "transport.connect_attempts must be at least 1".to_string(),
            ));
        }
        if transport.read_attempts == 0 {
            return Err(ConfigError::Validation(
                "transport.read_attempts must be at least 1".to_string(),
            ));
        }
        if transport.connect_timeout_ms == 0
            || transport.read_wait_ms == 0
            || transport.write_timeout_ms == 0
        {
            return Err(ConfigError::Validation(
                "transport.connect_timeout_ms, transport.read_wait_ms and \
                 transport.write_timeout_ms must be non-zero"
                    .to_string(),
            ));
        }

        if self.poller.period_ms == 0 {
            return Err(ConfigError::Validation(
                "poller.period_ms must be non-zero".to_string(),
            ));
        }

        let calibration = &self.calibration;
        if calibration.columns == 0 || calibration.rows == 0 {
            return Err(ConfigError::Validation(format!(
                "calibration raster must have at least one point, got {}x{}",
                calibration.columns, calibration.rows
            )));
        }
        if calibration.samples_per_point == 0 {
            return Err(ConfigError::Validation(
                "calibration.samples_per_point must be at least 1".to_string(),
            ));
        }
        for (name, span) in [
            ("horizontal_span_deg", calibration.horizontal_span_deg),
            ("vertical_span_deg", calibration.vertical_span_deg),
        ] {
            if !(span > 0.0 && span < 180.0) {
                return Err(ConfigError::Validation(format!(
                    "calibration.{name} must be in (0, 180), got {span}"
                )));
            }
        }

        if !self.host.component_name.starts_with('/') {
            return Err(ConfigError::Validation(format!(
                "host.component_name must start with '/', got {:?}",
                self.host.component_name
            )));
        }

        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::Validation(format!(
                "logging.level must be one of {:?}, got {:?}",
                valid_levels, self.logging.level
            )));
        }

        Ok(())
    }
}


/// The gaze server is local: `localhost` or a loopback IP literal.
fn is_loopback(addr: &str) -> bool {
    addr.eq_ignore_ascii_case("localhost")
        || addr
            .parse::<std::net::IpAddr>()
            .is_ok_and(|ip| ip.is_loopback())
}
