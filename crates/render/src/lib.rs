//! Rendering side of the loader: scene-resident instances, visualization
//! modes, GPU resource accounting and a renderer-agnostic interface.
//!
//! # Invariants
//! - An instance owns only per-instance state (material clones, marker
//!   geometry). Asset payloads are shared and never freed here.
//! - Disposal releases each owned handle exactly once.
//! - A mode switch that fails leaves the instance unchanged.

mod instance;
mod renderer;
mod resources;
mod scene;
mod visualization;

pub use instance::{
    AnatomyMarker, BlendMode, FallbackShape, InstanceSource, LiveInstance, MaterialState,
    ShadingModel,
};
pub use renderer::{DebugTextRenderer, RenderView, Renderer};
pub use resources::{
    GpuHandle, GpuResources, ResourceDisposer, ResourceError, ResourceKind, ResourceLedger,
    SharedGpu,
};
pub use scene::{InMemoryScene, SceneEvent, SceneGraph, SharedScene};
pub use visualization::{
    ModeInfo, ViewMode, VisualizationError, VisualizationRegistry, VisualizationStateManager,
    VisualizationStrategy,
};

pub fn crate_info() -> &'static str {
    "vetscan-render v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("render"));
    }
}
