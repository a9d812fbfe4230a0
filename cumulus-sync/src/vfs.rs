use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Availability intent of a path in the virtual-file backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinState {
    Inherited,
    AlwaysLocal,
    /// Content lives on the server only; a placeholder stands in locally.
    OnlineOnly,
    Unspecified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvertToPlaceholderResult {
    Ok,
    /// The placeholder file is opened by another process right now.
    Locked,
}

/// Virtual-file backend surface the propagation needs: querying and
/// adjusting pin states. The real backend is platform plumbing outside
/// this crate.
pub trait Vfs: Send {
    fn pin_state(&self, file: &str) -> Option<PinState>;
    /// Returns false when the backend refused the change.
    fn set_pin_state(&mut self, file: &str, state: PinState) -> bool;
}

/// Backend used when virtual files are off: nothing is pinned, every
/// change is accepted.
#[derive(Debug, Clone, Copy, Default)]
pub struct OffVfs;

impl Vfs for OffVfs {
    fn pin_state(&self, _file: &str) -> Option<PinState> {
        None
    }

    fn set_pin_state(&mut self, _file: &str, _state: PinState) -> bool {
        true
    }
}

/// In-memory pin-state table. Clones share state, so tests can seed and
/// observe states while the propagator owns its own handle.
#[derive(Clone, Default)]
pub struct MemoryVfs(Arc<Mutex<HashMap<String, PinState>>>);

impl MemoryVfs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pin(&self, file: &str, state: PinState) {
        self.0
            .lock()
            .expect("vfs mutex poisoned")
            .insert(file.to_string(), state);
    }
}

impl Vfs for MemoryVfs {
    fn pin_state(&self, file: &str) -> Option<PinState> {
        self.0.lock().expect("vfs mutex poisoned").get(file).copied()
    }

    fn set_pin_state(&mut self, file: &str, state: PinState) -> bool {
        self.0
            .lock()
            .expect("vfs mutex poisoned")
            .insert(file.to_string(), state);
        true
    }
}
