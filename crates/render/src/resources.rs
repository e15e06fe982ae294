//! GPU resource accounting and deterministic teardown.
//!
//! The loader never talks to a graphics API directly. Instances allocate
//! through [`GpuResources`] and hand back every handle they own exactly once,
//! through [`ResourceDisposer`].

use crate::instance::LiveInstance;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// What a GPU handle refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Buffer,
    Material,
    Texture,
}

/// Opaque handle to one GPU-resident resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GpuHandle {
    pub id: u64,
    pub kind: ResourceKind,
}

impl fmt::Display for GpuHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}#{}", self.kind, self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResourceError {
    #[error("unknown or already released GPU handle {0}")]
    UnknownHandle(GpuHandle),
}

/// Allocation interface of the rendering backend.
pub trait GpuResources: Send {
    fn allocate(&mut self, kind: ResourceKind) -> GpuHandle;

    /// Release a handle. Releasing a handle twice is an error.
    fn release(&mut self, handle: GpuHandle) -> Result<(), ResourceError>;

    /// Number of handles allocated and not yet released.
    fn live_count(&self) -> usize;
}

/// Backend shared between the controller and the disposer.
pub type SharedGpu = Arc<Mutex<dyn GpuResources>>;

/// In-memory [`GpuResources`] that tracks every live handle.
///
/// Used headless and in tests to report leaks and double frees.
#[derive(Debug, Default)]
pub struct ResourceLedger {
    next_id: u64,
    live: BTreeMap<u64, ResourceKind>,
    allocated: u64,
    released: u64,
}

impl ResourceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a fresh ledger for sharing.
    pub fn shared() -> Arc<Mutex<ResourceLedger>> {
        Arc::new(Mutex::new(Self::new()))
    }

    pub fn live_of(&self, kind: ResourceKind) -> usize {
        self.live.values().filter(|k| **k == kind).count()
    }

    pub fn total_allocated(&self) -> u64 {
        self.allocated
    }

    pub fn total_released(&self) -> u64 {
        self.released
    }

    pub fn is_live(&self, handle: GpuHandle) -> bool {
        self.live.get(&handle.id) == Some(&handle.kind)
    }
}

impl GpuResources for ResourceLedger {
    fn allocate(&mut self, kind: ResourceKind) -> GpuHandle {
        self.next_id += 1;
        self.allocated += 1;
        self.live.insert(self.next_id, kind);
        GpuHandle {
            id: self.next_id,
            kind,
        }
    }

    fn release(&mut self, handle: GpuHandle) -> Result<(), ResourceError> {
        match self.live.get(&handle.id) {
            Some(kind) if *kind == handle.kind => {
                self.live.remove(&handle.id);
                self.released += 1;
                Ok(())
            }
            _ => Err(ResourceError::UnknownHandle(handle)),
        }
    }

    fn live_count(&self) -> usize {
        self.live.len()
    }
}

/// Frees the GPU resources owned exclusively by an instance.
///
/// Geometry and textures of a cached asset are shared and never owned by an
/// instance, so they are untouched here.
#[derive(Clone)]
pub struct ResourceDisposer {
    gpu: SharedGpu,
}

impl ResourceDisposer {
    pub fn new(gpu: SharedGpu) -> Self {
        Self { gpu }
    }

    /// Release everything `instance` owns. Idempotent: a second call finds
    /// nothing left to release. Returns the number of handles released.
    pub fn dispose(&self, instance: &mut LiveInstance) -> usize {
        let owned = instance.take_owned();
        if owned.is_empty() {
            tracing::trace!(instance = %instance.id(), "already disposed");
            return 0;
        }

        let mut gpu = self.gpu.lock();
        let mut released = 0;
        for handle in owned {
            match gpu.release(handle) {
                Ok(()) => released += 1,
                Err(err) => tracing::warn!(instance = %instance.id(), error = %err, "release failed"),
            }
        }
        tracing::debug!(instance = %instance.id(), released, "instance disposed");
        released
    }
}

impl fmt::Debug for ResourceDisposer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceDisposer")
            .field("live", &self.gpu.lock().live_count())
            .finish()
    }
}
