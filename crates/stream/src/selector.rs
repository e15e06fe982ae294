//! Device-driven quality selection.
//!
//! Pure functions of their inputs: no I/O, no randomness.

use serde::{Deserialize, Serialize};
use vetscan_assets::{EntityDescriptor, QualityLevel};

/// Coarse GPU class reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GpuTier {
    #[default]
    Unknown,
    Mobile,
    Integrated,
    Dedicated,
}

impl GpuTier {
    /// Rough memory estimate in MB.
    pub fn memory_mb(self) -> u32 {
        match self {
            Self::Unknown => 256,
            Self::Mobile => 512,
            Self::Integrated => 1024,
            Self::Dedicated => 2048,
        }
    }

    /// Classify from a renderer string such as `"ANGLE (Intel, ...)"`.
    pub fn from_renderer(renderer: &str) -> Self {
        let lower = renderer.to_ascii_lowercase();
        if ["mali", "adreno", "powervr"].iter().any(|k| lower.contains(k)) {
            Self::Mobile
        } else if lower.contains("intel") {
            Self::Integrated
        } else if lower.trim().is_empty() {
            Self::Unknown
        } else {
            Self::Dedicated
        }
    }
}

/// Read-only snapshot of the host's display and GPU.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub pixel_area: u64,
    pub pixel_density: f32,
    pub gpu_tier: GpuTier,
}

impl DeviceProfile {
    pub fn new(width: u32, height: u32, pixel_density: f32, gpu_tier: GpuTier) -> Self {
        Self {
            pixel_area: u64::from(width) * u64::from(height),
            pixel_density,
            gpu_tier,
        }
    }
}

impl Default for DeviceProfile {
    /// 1920x1080 at density 1 with an unknown GPU.
    fn default() -> Self {
        Self::new(1920, 1080, 1.0, GpuTier::Unknown)
    }
}

/// Fixed thresholds for the device heuristics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorThresholds {
    pub low_end_max_pixel_area: u64,
    pub low_end_min_density: f32,
    pub high_end_min_pixel_area: u64,
    pub high_end_min_density: f32,
    pub high_end_min_memory_mb: u32,
}

impl Default for SelectorThresholds {
    fn default() -> Self {
        Self {
            low_end_max_pixel_area: 1_000_000,
            low_end_min_density: 1.5,
            high_end_min_pixel_area: 2_000_000,
            high_end_min_density: 2.0,
            high_end_min_memory_mb: 1024,
        }
    }
}

/// Maps device signals and an optional preference to a quality chain.
#[derive(Debug, Clone, Default)]
pub struct QualitySelector {
    thresholds: SelectorThresholds,
}

impl QualitySelector {
    pub fn new(thresholds: SelectorThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &SelectorThresholds {
        &self.thresholds
    }

    /// Target level before expansion into a chain.
    pub fn target(
        &self,
        descriptor: &EntityDescriptor,
        device: &DeviceProfile,
        preferred: Option<QualityLevel>,
    ) -> QualityLevel {
        if let Some(quality) = preferred {
            return quality;
        }
        let t = &self.thresholds;
        let low_end = device.pixel_area < t.low_end_max_pixel_area
            || device.pixel_density < t.low_end_min_density;
        let high_end = device.pixel_area > t.high_end_min_pixel_area
            && device.pixel_density >= t.high_end_min_density
            && device.gpu_tier.memory_mb() > t.high_end_min_memory_mb;

        if low_end {
            QualityLevel::Mobile
        } else if high_end {
            QualityLevel::Desktop
        } else {
            descriptor.default_quality
        }
    }

    /// Ordered chain from the lowest level up to the resolved target.
    pub fn select_chain(
        &self,
        descriptor: &EntityDescriptor,
        device: &DeviceProfile,
        preferred: Option<QualityLevel>,
    ) -> Vec<QualityLevel> {
        let chain = self.target(descriptor, device, preferred).chain();
        tracing::debug!(entity = %descriptor.id, ?chain, "quality chain selected");
        chain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vetscan_assets::DescriptorRegistry;
    use vetscan_common::EntityId;

    fn dog() -> EntityDescriptor {
        DescriptorRegistry::builtin()
            .get(&EntityId::from("dog"))
            .cloned()
            .unwrap()
    }

    #[test]
    fn low_end_device_gets_single_level() {
        let selector = QualitySelector::default();
        let phone = DeviceProfile::new(800, 600, 2.0, GpuTier::Mobile);
        assert_eq!(selector.select_chain(&dog(), &phone, None), vec![QualityLevel::Mobile]);

        let low_density = DeviceProfile::new(1920, 1080, 1.0, GpuTier::Dedicated);
        assert_eq!(
            selector.select_chain(&dog(), &low_density, None),
            vec![QualityLevel::Mobile]
        );
    }

    #[test]
    fn high_end_device_targets_desktop() {
        let selector = QualitySelector::default();
        let workstation = DeviceProfile::new(2560, 1440, 2.0, GpuTier::Dedicated);
        assert_eq!(
            selector.select_chain(&dog(), &workstation, None),
            vec![QualityLevel::Mobile, QualityLevel::Tablet, QualityLevel::Desktop]
        );
    }

    #[test]
    fn ambiguous_device_uses_descriptor_default() {
        let selector = QualitySelector::default();
        let laptop = DeviceProfile::new(1920, 1080, 2.0, GpuTier::Integrated);
        let dog = dog();
        assert_eq!(selector.target(&dog, &laptop, None), dog.default_quality);
    }

    #[test]
    fn preference_overrides_heuristics() {
        let selector = QualitySelector::default();
        let phone = DeviceProfile::new(800, 600, 1.0, GpuTier::Mobile);
        let chain = selector.select_chain(&dog(), &phone, Some(QualityLevel::Pro));
        assert_eq!(chain, QualityLevel::ALL.to_vec());
    }

    #[test]
    fn same_inputs_same_chain() {
        let selector = QualitySelector::default();
        let device = DeviceProfile::new(1366, 768, 1.5, GpuTier::Integrated);
        assert_eq!(
            selector.select_chain(&dog(), &device, None),
            selector.select_chain(&dog(), &device, None)
        );
    }

    #[test]
    fn gpu_tier_from_renderer_string() {
        assert_eq!(GpuTier::from_renderer("Mali-G78"), GpuTier::Mobile);
        assert_eq!(GpuTier::from_renderer("Adreno (TM) 650"), GpuTier::Mobile);
        assert_eq!(GpuTier::from_renderer("ANGLE (Intel, Iris Xe)"), GpuTier::Integrated);
        assert_eq!(GpuTier::from_renderer("NVIDIA GeForce RTX 3080"), GpuTier::Dedicated);
        assert_eq!(GpuTier::from_renderer(""), GpuTier::Unknown);
        assert_eq!(GpuTier::Dedicated.memory_mb(), 2048);
    }
}
