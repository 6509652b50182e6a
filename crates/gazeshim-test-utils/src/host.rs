//! A [`HostContext`] double that records registrations and updates.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use gazeshim_core::host::{
    ComponentHandle, ContainerHandle, EyeTrackingData, EyeTrackingInput, HostError,
    InterfaceCandidate, InterfaceKind, OperationTable,
};

/// Container handle every [`RecordingHost`] reports.
pub const TEST_CONTAINER: ContainerHandle = ContainerHandle(1);

/// One successful `create_component` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub kind: InterfaceKind,
    pub container: ContainerHandle,
    pub name: String,
    pub handle: ComponentHandle,
}

#[derive(Debug, Default)]
struct Recording {
    registrations: Vec<Registration>,
    updates: Vec<(ComponentHandle, EyeTrackingData)>,
    next_handle: u64,
    fail_updates: bool,
}

/// Offers configurable interface candidates and records every call made
/// through them. Clones share the recording, so a test can hand one clone
/// to the device and inspect another.
#[derive(Debug, Clone, Default)]
pub struct RecordingHost {
    offers: HashMap<InterfaceKind, (Option<u32>, Vec<usize>)>,
    recording: Arc<Mutex<Recording>>,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a primary interface advertising `version`.
    pub fn primary(version: u32) -> Self {
        Self::new().offer(InterfaceKind::Primary, Some(version), Vec::new())
    }

    pub fn offer(mut self, kind: InterfaceKind, version: Option<u32>, table: Vec<usize>) -> Self {
        self.offers.insert(kind, (version, table));
        self
    }

    /// Make every subsequent update fail with a host error.
    pub fn fail_updates(&self, fail: bool) {
        self.lock().fail_updates = fail;
    }

    pub fn registrations(&self) -> Vec<Registration> {
        self.lock().registrations.clone()
    }

    pub fn updates(&self) -> Vec<EyeTrackingData> {
        self.lock().updates.iter().map(|(_, data)| *data).collect()
    }

    pub fn update_count(&self) -> usize {
        self.lock().updates.len()
    }

    fn lock(&self) -> MutexGuard<'_, Recording> {
        self.recording
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl gazeshim_core::HostContext for RecordingHost {
    fn container(&self) -> ContainerHandle {
        TEST_CONTAINER
    }

    fn find_interface(&mut self, kind: InterfaceKind) -> Option<InterfaceCandidate> {
        let (version, table) = self.offers.get(&kind)?.clone();
        Some(InterfaceCandidate {
            kind,
            version,
            table: OperationTable(table),
            input: Box::new(RecordingInput {
                kind,
                recording: Arc::clone(&self.recording),
            }),
        })
    }
}

struct RecordingInput {
    kind: InterfaceKind,
    recording: Arc<Mutex<Recording>>,
}

impl EyeTrackingInput for RecordingInput {
    fn create_component(
        &mut self,
        container: ContainerHandle,
        name: &str,
    ) -> Result<ComponentHandle, HostError> {
        let mut recording = self
            .recording
            .lock()
            .map_err(|_| HostError::Other("recording poisoned".to_string()))?;
        recording.next_handle += 1;
        let handle = ComponentHandle(recording.next_handle);
        recording.registrations.push(Registration {
            kind: self.kind,
            container,
            name: name.to_string(),
            handle,
        });
        Ok(handle)
    }

    fn update_component(
        &mut self,
        handle: ComponentHandle,
        data: &EyeTrackingData,
    ) -> Result<(), HostError> {
        let mut recording = self
            .recording
            .lock()
            .map_err(|_| HostError::Other("recording poisoned".to_string()))?;
        if recording.fail_updates {
            return Err(HostError::Call(-1));
        }
        recording.updates.push((handle, *data));
        Ok(())
    }
}
