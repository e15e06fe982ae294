use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Discrete fidelity tier of an entity's asset.
///
/// Variants are declared in ascending load priority, so the derived `Ord`
/// is the priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityLevel {
    Mobile,
    Tablet,
    Desktop,
    Pro,
}

/// Optional capability unlocked by a quality level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    BasicMaterials,
    SimpleShaders,
    AdvancedMaterials,
    MedicalShaders,
    AnatomyZones,
    UltraMaterials,
    AdvancedShaders,
    RealtimeSimulation,
}

/// Mesh compression expected for a quality level's asset files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Compression {
    DracoHigh,
    DracoMedium,
    DracoLow,
    None,
}

/// Static budget and feature set for one quality level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityProfile {
    pub vertex_budget: u32,
    pub load_priority: u8,
    pub features: &'static [Feature],
    pub compression: Compression,
}

impl QualityProfile {
    pub fn has(&self, feature: Feature) -> bool {
        self.features.contains(&feature)
    }
}

const MOBILE: QualityProfile = QualityProfile {
    vertex_budget: 800,
    load_priority: 1,
    features: &[Feature::BasicMaterials],
    compression: Compression::DracoHigh,
};

const TABLET: QualityProfile = QualityProfile {
    vertex_budget: 3000,
    load_priority: 2,
    features: &[Feature::BasicMaterials, Feature::SimpleShaders],
    compression: Compression::DracoMedium,
};

const DESKTOP: QualityProfile = QualityProfile {
    vertex_budget: 12000,
    load_priority: 3,
    features: &[
        Feature::AdvancedMaterials,
        Feature::MedicalShaders,
        Feature::AnatomyZones,
    ],
    compression: Compression::DracoLow,
};

const PRO: QualityProfile = QualityProfile {
    vertex_budget: 40000,
    load_priority: 4,
    features: &[
        Feature::UltraMaterials,
        Feature::AdvancedShaders,
        Feature::RealtimeSimulation,
    ],
    compression: Compression::None,
};

impl QualityLevel {
    /// All levels, lowest first.
    pub const ALL: [QualityLevel; 4] = [
        QualityLevel::Mobile,
        QualityLevel::Tablet,
        QualityLevel::Desktop,
        QualityLevel::Pro,
    ];

    pub const LOWEST: QualityLevel = QualityLevel::Mobile;

    pub fn profile(self) -> &'static QualityProfile {
        match self {
            Self::Mobile => &MOBILE,
            Self::Tablet => &TABLET,
            Self::Desktop => &DESKTOP,
            Self::Pro => &PRO,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mobile => "mobile",
            Self::Tablet => "tablet",
            Self::Desktop => "desktop",
            Self::Pro => "pro",
        }
    }

    /// Every level from the lowest up to and including `self`, never skipping one.
    pub fn chain(self) -> Vec<QualityLevel> {
        Self::ALL.iter().copied().take_while(|q| *q <= self).collect()
    }
}

impl fmt::Display for QualityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for quality names that are not one of the four levels.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown quality level: {0}")]
pub struct UnknownQuality(pub String);

impl FromStr for QualityLevel {
    type Err = UnknownQuality;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mobile" | "low" => Ok(Self::Mobile),
            "tablet" | "medium" => Ok(Self::Tablet),
            "desktop" | "high" => Ok(Self::Desktop),
            "pro" => Ok(Self::Pro),
            _ => Err(UnknownQuality(s.to_string())),
        }
    }
}
