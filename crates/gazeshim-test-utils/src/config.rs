//! Configuration builders for tests.
//!
//! Use [`TestConfigBuilder`] to create customised [`AppConfig`] values without
//! repeating boilerplate across crate boundaries. The builder starts from
//! short retry budgets with calibration loading off, so a test against an
//! absent server fails in milliseconds.

use std::path::Path;

use gazeshim_config::{AppConfig, CorrectionPolicy, TransportKind};

/// Fluent builder for [`AppConfig`] in tests.
///
/// ```ignore
/// let config = TestConfigBuilder::new()
///     .socket_port(server.port())
///     .period_ms(2)
///     .build();
/// ```
pub struct TestConfigBuilder {
    config: AppConfig,
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        let mut config = AppConfig::default();
        config.transport.kind = TransportKind::Socket;
        config.transport.socket_addr = "127.0.0.1".to_string();
        config.transport.connect_attempts = 1;
        config.transport.connect_retry_ms = 1;
        config.transport.read_attempts = 50;
        config.transport.read_wait_ms = 20;
        config.transport.write_timeout_ms = 200;
        config.poller.period_ms = 5;
        config.calibration.load_on_start = false;
        Self { config }
    }

    pub fn socket_port(mut self, port: u16) -> Self {
        self.config.transport.socket_port = port;
        self
    }

    pub fn connect_budget(mut self, attempts: u32, retry_ms: u64) -> Self {
        self.config.transport.connect_attempts = attempts;
        self.config.transport.connect_retry_ms = retry_ms;
        self
    }

    pub fn read_budget(mut self, attempts: u32, wait_ms: u64) -> Self {
        self.config.transport.read_attempts = attempts;
        self.config.transport.read_wait_ms = wait_ms;
        self
    }

    pub fn period_ms(mut self, period_ms: u64) -> Self {
        self.config.poller.period_ms = period_ms;
        self
    }

    pub fn enable_on_connect(mut self, enable: bool) -> Self {
        self.config.poller.enable_on_connect = enable;
        self
    }

    pub fn blink_invalidates(mut self, invalidates: bool) -> Self {
        self.config.poller.blink_invalidates = invalidates;
        self
    }

    pub fn data_dir(mut self, dir: &Path) -> Self {
        self.config.calibration.data_dir = dir.to_string_lossy().into_owned();
        self
    }

    /// Raster size and samples needed per point.
    pub fn raster(mut self, columns: u32, rows: u32, samples_per_point: u32) -> Self {
        self.config.calibration.columns = columns;
        self.config.calibration.rows = rows;
        self.config.calibration.samples_per_point = samples_per_point;
        self
    }

    pub fn correction(mut self, policy: CorrectionPolicy) -> Self {
        self.config.calibration.correction = policy;
        self
    }

    pub fn auto_increment(mut self, enabled: bool) -> Self {
        self.config.calibration.auto_increment = enabled;
        self
    }

    pub fn load_on_start(mut self, enabled: bool) -> Self {
        self.config.calibration.load_on_start = enabled;
        self
    }

    pub fn log_level(mut self, level: &str) -> Self {
        self.config.logging.level = level.to_string();
        self
    }

    pub fn build(self) -> AppConfig {
        self.config
    }
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
