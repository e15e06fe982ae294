use crate::scene::SceneGraph;
use glam::Vec3;

/// Camera/view configuration for rendering.
#[derive(Debug, Clone, Copy)]
pub struct RenderView {
    /// Camera position in world space.
    pub eye: Vec3,
    /// Point the camera is looking at.
    pub target: Vec3,
    /// Field of view in degrees.
    pub fov_degrees: f32,
}

impl Default for RenderView {
    fn default() -> Self {
        Self {
            eye: Vec3::new(0.0, 2.0, 5.0),
            target: Vec3::ZERO,
            fov_degrees: 75.0,
        }
    }
}

/// Renderer-agnostic interface.
///
/// A renderer reads attached instances and never mutates the scene.
pub trait Renderer {
    type Output;

    fn render(&self, scene: &dyn SceneGraph, view: &RenderView) -> Self::Output;
}

/// Produces a human-readable listing of the scene. Used by the CLI and tests.
#[derive(Debug, Default)]
pub struct DebugTextRenderer;

impl DebugTextRenderer {
    pub fn new() -> Self {
        Self
    }
}

impl Renderer for DebugTextRenderer {
    type Output = String;

    fn render(&self, scene: &dyn SceneGraph, view: &RenderView) -> String {
        let mut out = String::new();
        out.push_str(&format!("=== Scene ({} instances) ===\n", scene.len()));
        out.push_str(&format!(
            "Camera: eye=({:.1}, {:.1}, {:.1}) target=({:.1}, {:.1}, {:.1}) fov={:.0}\n",
            view.eye.x,
            view.eye.y,
            view.eye.z,
            view.target.x,
            view.target.y,
            view.target.z,
            view.fov_degrees
        ));

        for instance in scene.instances() {
            let p = instance.transform.position;
            let quality = instance
                .quality()
                .map_or_else(|| "fallback".to_string(), |q| q.to_string());
            out.push_str(&format!(
                "  [{}] session={} entity={} quality={} mode={} verts={} pos=({:.2}, {:.2}, {:.2})\n",
                instance.id(),
                instance.session(),
                instance.entity(),
                quality,
                instance.active_mode(),
                instance.vertex_count(),
                p.x,
                p.y,
                p.z
            ));
        }

        out
    }
}
