//! Named visualization modes and the state manager that keeps the active
//! mode stable across instance replacement.

use crate::instance::{BlendMode, LiveInstance, ShadingModel};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Key of a visualization mode.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    #[default]
    Normal,
    Xray,
    Ultrasound,
    Mri,
    Thermal,
}

impl ViewMode {
    pub const ALL: [ViewMode; 5] = [
        ViewMode::Normal,
        ViewMode::Xray,
        ViewMode::Ultrasound,
        ViewMode::Mri,
        ViewMode::Thermal,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Xray => "xray",
            Self::Ultrasound => "ultrasound",
            Self::Mri => "mri",
            Self::Thermal => "thermal",
        }
    }
}

impl fmt::Display for ViewMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ViewMode {
    type Err = VisualizationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ViewMode::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| VisualizationError::UnknownMode(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VisualizationError {
    #[error("unknown visualization mode: {0}")]
    UnknownMode(String),
}

/// Display metadata for a mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeInfo {
    pub name: &'static str,
    pub description: &'static str,
}

/// Appearance transform for one mode.
///
/// `apply` runs on freshly restored materials, so strategies never need to
/// undo another mode's changes.
pub trait VisualizationStrategy: Send + Sync {
    fn info(&self) -> ModeInfo;

    fn apply(&self, instance: &mut LiveInstance);

    /// Per-frame animation. `time` is seconds since the host started.
    fn tick(&self, _instance: &mut LiveInstance, _time: f32) {}
}

fn set_time(instance: &mut LiveInstance, time: f32) {
    for material in instance.materials_mut() {
        material.set_uniform("time", time);
    }
}

struct NormalMode;

impl VisualizationStrategy for NormalMode {
    fn info(&self) -> ModeInfo {
        ModeInfo {
            name: "Normal View",
            description: "Standard view with natural colours",
        }
    }

    fn apply(&self, _instance: &mut LiveInstance) {}
}

struct XrayMode;

impl VisualizationStrategy for XrayMode {
    fn info(&self) -> ModeInfo {
        ModeInfo {
            name: "X-Ray View",
            description: "Radiograph showing bone structure",
        }
    }

    fn apply(&self, instance: &mut LiveInstance) {
        for material in instance.materials_mut() {
            material.shading = ShadingModel::Custom("xray".into());
            material.base_color = [0.7, 0.8, 1.0, 1.0];
            material.transparent = true;
            material.double_sided = true;
            material.blend = BlendMode::Additive;
            material.set_uniform("time", 0.0);
            material.set_uniform("intensity", 0.8);
        }
    }

    fn tick(&self, instance: &mut LiveInstance, time: f32) {
        set_time(instance, time);
    }
}

struct UltrasoundMode;

impl VisualizationStrategy for UltrasoundMode {
    fn info(&self) -> ModeInfo {
        ModeInfo {
            name: "Ultrasound View",
            description: "Ultrasound scan showing soft tissue",
        }
    }

    fn apply(&self, instance: &mut LiveInstance) {
        for material in instance.materials_mut() {
            material.shading = ShadingModel::Custom("ultrasound".into());
            material.transparent = false;
            material.opacity = 1.0;
            material.set_uniform("time", 0.0);
            material.set_uniform("scanIntensity", 0.7);
        }
    }

    fn tick(&self, instance: &mut LiveInstance, time: f32) {
        set_time(instance, time);
    }
}

struct MriMode;

impl VisualizationStrategy for MriMode {
    fn info(&self) -> ModeInfo {
        ModeInfo {
            name: "MRI View",
            description: "Magnetic resonance imaging with detailed tissue contrast",
        }
    }

    fn apply(&self, instance: &mut LiveInstance) {
        for material in instance.materials_mut() {
            material.shading = ShadingModel::Lambert;
            material.base_color = [0.32, 0.384, 0.48, 1.0];
            material.transparent = true;
            material.opacity = 0.9;
        }
    }
}

struct ThermalMode;

impl VisualizationStrategy for ThermalMode {
    fn info(&self) -> ModeInfo {
        ModeInfo {
            name: "Thermal View",
            description: "Thermal image showing temperature distribution",
        }
    }

    fn apply(&self, instance: &mut LiveInstance) {
        for material in instance.materials_mut() {
            material.shading = ShadingModel::Custom("thermal".into());
            material.set_uniform("time", 0.0);
        }
    }

    fn tick(&self, instance: &mut LiveInstance, time: f32) {
        set_time(instance, time);
    }
}

/// Lookup table from mode key to strategy.
#[derive(Default)]
pub struct VisualizationRegistry {
    strategies: HashMap<ViewMode, Box<dyn VisualizationStrategy>>,
}

impl VisualizationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with all five built-in modes.
    pub fn with_builtin_modes() -> Self {
        let mut registry = Self::new();
        registry.register(ViewMode::Normal, Box::new(NormalMode));
        registry.register(ViewMode::Xray, Box::new(XrayMode));
        registry.register(ViewMode::Ultrasound, Box::new(UltrasoundMode));
        registry.register(ViewMode::Mri, Box::new(MriMode));
        registry.register(ViewMode::Thermal, Box::new(ThermalMode));
        registry
    }

    pub fn register(&mut self, mode: ViewMode, strategy: Box<dyn VisualizationStrategy>) {
        self.strategies.insert(mode, strategy);
    }

    pub fn get(&self, mode: ViewMode) -> Option<&dyn VisualizationStrategy> {
        self.strategies.get(&mode).map(|s| s.as_ref())
    }

    /// Registered modes with their metadata, in key order.
    pub fn modes(&self) -> Vec<(ViewMode, ModeInfo)> {
        let mut modes: Vec<_> = self
            .strategies
            .iter()
            .map(|(mode, strategy)| (*mode, strategy.info()))
            .collect();
        modes.sort_by_key(|(mode, _)| *mode);
        modes
    }
}

impl fmt::Debug for VisualizationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.modes().iter().map(|(m, _)| m))
            .finish()
    }
}

/// Applies modes to instances and re-applies the active one after every swap.
#[derive(Debug)]
pub struct VisualizationStateManager {
    registry: VisualizationRegistry,
}

impl Default for VisualizationStateManager {
    fn default() -> Self {
        Self::new(VisualizationRegistry::with_builtin_modes())
    }
}

impl VisualizationStateManager {
    pub fn new(registry: VisualizationRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &VisualizationRegistry {
        &self.registry
    }

    /// Switch `instance` to `mode`. On error the instance is left untouched.
    pub fn apply_mode(
        &self,
        instance: &mut LiveInstance,
        mode: ViewMode,
    ) -> Result<(), VisualizationError> {
        let strategy = self
            .registry
            .get(mode)
            .ok_or_else(|| VisualizationError::UnknownMode(mode.to_string()))?;
        instance.restore_original_materials();
        strategy.apply(instance);
        instance.set_active_mode(mode);
        tracing::debug!(instance = %instance.id(), %mode, "visualization mode applied");
        Ok(())
    }

    /// Same as [`apply_mode`](Self::apply_mode) for a string key.
    pub fn apply_mode_key(
        &self,
        instance: &mut LiveInstance,
        key: &str,
    ) -> Result<ViewMode, VisualizationError> {
        let mode = key.parse::<ViewMode>().inspect_err(|err| {
            tracing::warn!(instance = %instance.id(), error = %err, "mode switch ignored");
        })?;
        self.apply_mode(instance, mode)?;
        Ok(mode)
    }

    /// Copy transform and user data from `old` to `new`, then re-apply the
    /// mode `old` was showing. Runs synchronously as part of a swap.
    pub fn carry_over(
        &self,
        old: &LiveInstance,
        new: &mut LiveInstance,
    ) -> Result<(), VisualizationError> {
        new.transform = old.transform;
        new.user_data.clone_from(&old.user_data);
        self.apply_mode(new, old.active_mode())
    }

    /// Advance the active mode's animation.
    pub fn tick(&self, instance: &mut LiveInstance, time: f32) {
        if let Some(strategy) = self.registry.get(instance.active_mode()) {
            strategy.tick(instance, time);
        }
    }
}
