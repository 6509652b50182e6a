//! Host capability probing and gaze publishing.
//!
//! The host offers eye-tracking input through interface candidates of
//! differing shape. A [`CapabilityProbe`] decides whether a candidate is
//! safe to call; the first accepted one is registered and wrapped in a
//! [`Publisher`] that the acquisition loop pushes samples through.

use tracing::{debug, info, warn};

use gazeshim_config::HostConfig;

use crate::gaze::GazeDirection;

/// Interface shapes the host may expose, newest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterfaceKind {
    Primary,
    Legacy,
}

impl InterfaceKind {
    /// Probe order.
    pub const FALLBACK_ORDER: [InterfaceKind; 2] = [InterfaceKind::Primary, InterfaceKind::Legacy];

    /// Operation-table entries whose distance bounds a plausible table.
    pub fn span_entries(self) -> (usize, usize) {
        match self {
            Self::Primary => (0, 9),
            Self::Legacy => (0, 1),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Legacy => "legacy",
        }
    }
}

impl std::fmt::Display for InterfaceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Addresses of a candidate's operations, as advertised by the host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationTable(pub Vec<usize>);

impl OperationTable {
    pub fn entry(&self, index: usize) -> Option<usize> {
        self.0.get(index).copied()
    }

    /// Absolute distance between two entries.
    pub fn span(&self, a: usize, b: usize) -> Option<usize> {
        Some(self.entry(a)?.abs_diff(self.entry(b)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContainerHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ComponentHandle(pub u64);

/// Errors reported by host calls.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("host call failed with code {0}")]
    Call(i32),

    #[error("host call failed: {0}")]
    Other(String),
}

/// Eye-tracking input operations of an accepted interface.
pub trait EyeTrackingInput: Send {
    fn create_component(
        &mut self,
        container: ContainerHandle,
        name: &str,
    ) -> Result<ComponentHandle, HostError>;

    fn update_component(
        &mut self,
        handle: ComponentHandle,
        data: &EyeTrackingData,
    ) -> Result<(), HostError>;
}

pub struct InterfaceCandidate {
    pub kind: InterfaceKind,
    /// Advertised interface version, if the host negotiates one.
    pub version: Option<u32>,
    pub table: OperationTable,
    pub input: Box<dyn EyeTrackingInput>,
}

impl std::fmt::Debug for InterfaceCandidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterfaceCandidate")
            .field("kind", &self.kind)
            .field("version", &self.version)
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

/// The host side the device is activated against.
pub trait HostContext {
    /// Container new components are registered under.
    fn container(&self) -> ContainerHandle;

    fn find_interface(&mut self, kind: InterfaceKind) -> Option<InterfaceCandidate>;
}

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("host offers no {0} eye-tracking interface")]
    Unavailable(InterfaceKind),

    #[error("{kind} interface rejected: {reason}")]
    Ineligible { kind: InterfaceKind, reason: String },

    #[error("no compatible eye-tracking interface")]
    NoCompatibleInterface,

    #[error("registering with the {kind} interface failed: {source}")]
    Registration {
        kind: InterfaceKind,
        #[source]
        source: HostError,
    },
}

/// Decides whether a candidate interface is safe to call.
pub trait CapabilityProbe: Send + Sync {
    fn verify(&self, candidate: &InterfaceCandidate) -> Result<(), ProbeError>;
}

/// Version check when the host advertises one, table-span heuristic
/// otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefaultProbe {
    pub max_table_span: usize,
    pub min_interface_version: u32,
}

impl DefaultProbe {
    pub fn from_config(config: &HostConfig) -> Self {
        Self {
            max_table_span: config.max_table_span,
            min_interface_version: config.min_interface_version,
        }
    }
}

impl Default for DefaultProbe {
    fn default() -> Self {
        Self::from_config(&HostConfig::default())
    }
}

impl CapabilityProbe for DefaultProbe {
    fn verify(&self, candidate: &InterfaceCandidate) -> Result<(), ProbeError> {
        let kind = candidate.kind;
        if let Some(version) = candidate.version {
            if version >= self.min_interface_version {
                return Ok(());
            }
            return Err(ProbeError::Ineligible {
                kind,
                reason: format!(
                    "version {version} below required {}",
                    self.min_interface_version
                ),
            });
        }

        let (a, b) = kind.span_entries();
        match candidate.table.span(a, b) {
            Some(span) if span <= self.max_table_span => Ok(()),
            Some(span) => Err(ProbeError::Ineligible {
                kind,
                reason: format!(
                    "entries {a} and {b} are {span:#x} apart, limit {:#x}",
                    self.max_table_span
                ),
            }),
            None => Err(ProbeError::Ineligible {
                kind,
                reason: format!("operation table lacks entries {a} and {b}"),
            }),
        }
    }
}

/// Find the first usable interface in fallback order and register a
/// component named `component_name` with it.
///
/// A registration failure moves on to the next interface. If every
/// interface was tried, the last registration error is returned.
pub fn probe_and_register(
    host: &mut dyn HostContext,
    probe: &dyn CapabilityProbe,
    component_name: &str,
) -> Result<Publisher, ProbeError> {
    let mut registration_error = None;
    for kind in InterfaceKind::FALLBACK_ORDER {
        let Some(mut candidate) = host.find_interface(kind) else {
            debug!(kind = %kind, "{}", ProbeError::Unavailable(kind));
            continue;
        };
        if let Err(e) = probe.verify(&candidate) {
            warn!(kind = %kind, error = %e, "Eye-tracking interface failed probe");
            continue;
        }
        let handle = match candidate
            .input
            .create_component(host.container(), component_name)
        {
            Ok(handle) => handle,
            Err(source) => {
                let e = ProbeError::Registration { kind, source };
                warn!(kind = %kind, error = %e, "Eye-tracking component registration failed");
                registration_error = Some(e);
                continue;
            }
        };
        info!(kind = %kind, component = component_name, "Eye-tracking interface registered");
        return Ok(Publisher {
            kind,
            handle,
            input: candidate.input,
        });
    }
    Err(registration_error.unwrap_or(ProbeError::NoCompatibleInterface))
}

pub mod flags {
    pub const ORIENTATION_VALID: u16 = 0x0001;
    pub const ORIENTATION_TRACKED: u16 = 0x0100;
}

/// The record pushed to the host per tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EyeTrackingData {
    pub flags: u16,
    pub status: u8,
    pub vector: [f32; 4],
}

impl EyeTrackingData {
    pub const ENCODED_LEN: usize = 20;

    pub fn available(direction: GazeDirection) -> Self {
        Self {
            flags: flags::ORIENTATION_VALID | flags::ORIENTATION_TRACKED,
            status: 1,
            vector: [direction.x, direction.y, direction.z, 1.0],
        }
    }

    pub fn unavailable() -> Self {
        Self {
            flags: 0,
            status: 0,
            vector: [0.0, 0.0, -1.0, 1.0],
        }
    }

    pub fn from_gaze(direction: Option<GazeDirection>) -> Self {
        direction.map_or_else(Self::unavailable, Self::available)
    }

    pub fn is_available(&self) -> bool {
        self.status != 0
    }

    /// Little-endian: flags, status, one pad byte, four `f32`s.
    pub fn encode(&self) -> [u8; Self::ENCODED_LEN] {
        let mut out = [0u8; Self::ENCODED_LEN];
        out[0..2].copy_from_slice(&self.flags.to_le_bytes());
        out[2] = self.status;
        for (i, v) in self.vector.iter().enumerate() {
            let at = 4 + i * 4;
            out[at..at + 4].copy_from_slice(&v.to_le_bytes());
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != Self::ENCODED_LEN {
            return None;
        }
        let mut vector = [0f32; 4];
        for (i, v) in vector.iter_mut().enumerate() {
            let at = 4 + i * 4;
            *v = f32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
        }
        Some(Self {
            flags: u16::from_le_bytes([bytes[0], bytes[1]]),
            status: bytes[2],
            vector,
        })
    }
}

/// A registered component on an accepted interface.
pub struct Publisher {
    kind: InterfaceKind,
    handle: ComponentHandle,
    input: Box<dyn EyeTrackingInput>,
}

impl Publisher {
    pub fn kind(&self) -> InterfaceKind {
        self.kind
    }

    pub fn handle(&self) -> ComponentHandle {
        self.handle
    }

    /// Push one gaze (or its absence). Host errors are logged only.
    pub fn publish(&mut self, gaze: Option<GazeDirection>) {
        let data = EyeTrackingData::from_gaze(gaze);
        if let Err(e) = self.input.update_component(self.handle, &data) {
            warn!(kind = %self.kind, error = %e, "Host rejected eye-tracking update");
        }
    }
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("kind", &self.kind)
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::{HashMap, HashSet};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Log {
        created: Vec<(ContainerHandle, String)>,
        updates: Vec<EyeTrackingData>,
    }

    struct Input {
        log: Arc<Mutex<Log>>,
        fail_updates: bool,
        fail_create: bool,
    }

    impl EyeTrackingInput for Input {
        fn create_component(
            &mut self,
            container: ContainerHandle,
            name: &str,
        ) -> Result<ComponentHandle, HostError> {
            if self.fail_create {
                return Err(HostError::Call(-1));
            }
            self.log.lock().unwrap().created.push((container, name.to_string()));
            Ok(ComponentHandle(77))
        }

        fn update_component(
            &mut self,
            handle: ComponentHandle,
            data: &EyeTrackingData,
        ) -> Result<(), HostError> {
            assert_eq!(handle, ComponentHandle(77));
            if self.fail_updates {
                return Err(HostError::Call(-3));
            }
            self.log.lock().unwrap().updates.push(*data);
            Ok(())
        }
    }

    struct Host {
        offers: HashMap<InterfaceKind, (Option<u32>, Vec<usize>)>,
        log: Arc<Mutex<Log>>,
        fail_updates: bool,
        fail_create: HashSet<InterfaceKind>,
    }

    impl Host {
        fn new() -> Self {
            Self {
                offers: HashMap::new(),
                log: Arc::default(),
                fail_updates: false,
                fail_create: HashSet::new(),
            }
        }

        fn failing_create(mut self, kind: InterfaceKind) -> Self {
            self.fail_create.insert(kind);
            self
        }

        fn offer(mut self, kind: InterfaceKind, version: Option<u32>, table: Vec<usize>) -> Self {
            self.offers.insert(kind, (version, table));
            self
        }
    }

    impl HostContext for Host {
        fn container(&self) -> ContainerHandle {
            ContainerHandle(5)
        }

        fn find_interface(&mut self, kind: InterfaceKind) -> Option<InterfaceCandidate> {
            let (version, table) = self.offers.get(&kind)?.clone();
            Some(InterfaceCandidate {
                kind,
                version,
                table: OperationTable(table),
                input: Box::new(Input {
                    log: Arc::clone(&self.log),
                    fail_updates: self.fail_updates,
                    fail_create: self.fail_create.contains(&kind),
                }),
            })
        }
    }

    fn table(len: usize, stride: usize) -> Vec<usize> {
        (0..len).map(|i| 0x4000_0000 + i * stride).collect()
    }

    #[test]
    fn test_versioned_candidate() {
        let probe = DefaultProbe::default();
        let mut host = Host::new().offer(InterfaceKind::Primary, Some(4), vec![]);
        let publisher = probe_and_register(&mut host, &probe, "/eyetracking").unwrap();
        assert_eq!(publisher.kind(), InterfaceKind::Primary);
        assert_eq!(
            host.log.lock().unwrap().created,
            vec![(ContainerHandle(5), "/eyetracking".to_string())]
        );

        let mut old = Host::new().offer(InterfaceKind::Primary, Some(3), table(10, 8));
        assert!(matches!(
            probe_and_register(&mut old, &probe, "/eyetracking"),
            Err(ProbeError::NoCompatibleInterface)
        ));
    }

    #[test]
    fn test_table_span_heuristic() {
        let probe = DefaultProbe::default();
        let mut host = Host::new().offer(InterfaceKind::Primary, None, table(10, 0x100));
        assert!(probe_and_register(&mut host, &probe, "/eyetracking").is_ok());

        let scattered = vec![0x1000, 0, 0, 0, 0, 0, 0, 0, 0, 0x7fff_0000];
        let candidate = InterfaceCandidate {
            kind: InterfaceKind::Primary,
            version: None,
            table: OperationTable(scattered),
            input: Box::new(Input {
                log: Arc::default(),
                fail_updates: false,
                fail_create: false,
            }),
        };
        assert!(matches!(
            probe.verify(&candidate),
            Err(ProbeError::Ineligible { .. })
        ));
    }

    #[test]
    fn test_falls_back_to_legacy() {
        let probe = DefaultProbe::default();
        let mut host = Host::new()
            .offer(InterfaceKind::Primary, None, table(3, 8))
            .offer(InterfaceKind::Legacy, None, table(2, 8));
        let publisher = probe_and_register(&mut host, &probe, "/gaze").unwrap();
        assert_eq!(publisher.kind(), InterfaceKind::Legacy);
        assert_eq!(publisher.handle(), ComponentHandle(77));
    }

    #[test]
    fn test_registration_failure_falls_back_to_legacy() {
        let mut host = Host::new()
            .offer(InterfaceKind::Primary, Some(5), vec![])
            .offer(InterfaceKind::Legacy, None, table(2, 8))
            .failing_create(InterfaceKind::Primary);
        let publisher =
            probe_and_register(&mut host, &DefaultProbe::default(), "/eyetracking").unwrap();
        assert_eq!(publisher.kind(), InterfaceKind::Legacy);
        assert_eq!(host.log.lock().unwrap().created.len(), 1);
    }

    #[test]
    fn test_registration_failure_everywhere_is_reported() {
        let mut host = Host::new()
            .offer(InterfaceKind::Primary, Some(5), vec![])
            .offer(InterfaceKind::Legacy, None, table(2, 8))
            .failing_create(InterfaceKind::Primary)
            .failing_create(InterfaceKind::Legacy);
        assert!(matches!(
            probe_and_register(&mut host, &DefaultProbe::default(), "/eyetracking"),
            Err(ProbeError::Registration {
                kind: InterfaceKind::Legacy,
                ..
            })
        ));
    }

    #[test]
    fn test_no_interface() {
        let mut host = Host::new();
        assert!(matches!(
            probe_and_register(&mut host, &DefaultProbe::default(), "/eyetracking"),
            Err(ProbeError::NoCompatibleInterface)
        ));
    }

    #[test]
    fn test_publisher_marshals_gaze() {
        let mut host = Host::new().offer(InterfaceKind::Primary, Some(5), vec![]);
        let mut publisher =
            probe_and_register(&mut host, &DefaultProbe::default(), "/eyetracking").unwrap();
        publisher.publish(Some(GazeDirection::new(0.1, 0.2, -0.9)));
        publisher.publish(None);

        let updates = host.log.lock().unwrap().updates.clone();
        assert_eq!(
            updates,
            vec![
                EyeTrackingData {
                    flags: 0x101,
                    status: 1,
                    vector: [0.1, 0.2, -0.9, 1.0],
                },
                EyeTrackingData {
                    flags: 0,
                    status: 0,
                    vector: [0.0, 0.0, -1.0, 1.0],
                },
            ]
        );
    }

    #[test]
    fn test_host_update_errors_are_not_fatal() {
        let mut host = Host::new().offer(InterfaceKind::Primary, Some(5), vec![]);
        host.fail_updates = true;
        let mut publisher =
            probe_and_register(&mut host, &DefaultProbe::default(), "/eyetracking").unwrap();
        publisher.publish(Some(GazeDirection::FORWARD));
        assert!(host.log.lock().unwrap().updates.is_empty());
    }

    #[test]
    fn test_data_encoding() {
        let data = EyeTrackingData::available(GazeDirection::new(0.0, 0.5, -1.0));
        let bytes = data.encode();
        assert_eq!(&bytes[..4], &[0x01, 0x01, 0x01, 0x00]);
        assert_eq!(&bytes[4..8], &0.0f32.to_le_bytes());
        assert_eq!(&bytes[16..20], &1.0f32.to_le_bytes());
        assert_eq!(EyeTrackingData::decode(&bytes), Some(data));
        assert_eq!(EyeTrackingData::decode(&bytes[..19]), None);
        assert!(!EyeTrackingData::unavailable().is_available());
    }
}
