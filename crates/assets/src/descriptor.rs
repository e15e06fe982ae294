use crate::quality::QualityLevel;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use vetscan_common::EntityId;

/// Default location of an entity's assets, parameterized by `{id}` and `{quality}`.
pub const DEFAULT_PATH_TEMPLATE: &str = "assets/models/animals/{id}/{id}_{quality}.glb";

/// Body plan shared by several species; selects the procedural fallback shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyTemplate {
    QuadrupedSmall,
    QuadrupedMedium,
    QuadrupedLarge,
    BirdSmall,
    BirdMedium,
    ReptileSnake,
    ReptileLizard,
    ReptileTurtle,
    Fish,
}

impl BodyTemplate {
    pub fn is_quadruped(self) -> bool {
        matches!(
            self,
            Self::QuadrupedSmall | Self::QuadrupedMedium | Self::QuadrupedLarge
        )
    }

    pub fn is_bird(self) -> bool {
        matches!(self, Self::BirdSmall | Self::BirdMedium)
    }
}

/// Static configuration for a loadable entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDescriptor {
    pub id: EntityId,
    pub name: String,
    pub template: BodyTemplate,
    /// Linear scale applied to every instance of this entity.
    pub display_scale: f32,
    /// Scale applied to anatomy marker radii.
    pub anatomy_scale: f32,
    pub default_quality: QualityLevel,
    #[serde(default = "default_path_template")]
    pub asset_path_template: String,
}

fn default_path_template() -> String {
    DEFAULT_PATH_TEMPLATE.to_string()
}

impl EntityDescriptor {
    pub fn new(
        id: &str,
        name: &str,
        template: BodyTemplate,
        display_scale: f32,
        anatomy_scale: f32,
        default_quality: QualityLevel,
    ) -> Self {
        Self {
            id: EntityId::from(id),
            name: name.to_string(),
            template,
            display_scale,
            anatomy_scale,
            default_quality,
            asset_path_template: default_path_template(),
        }
    }

    /// Asset path for one quality level. Deterministic in `(id, quality)`.
    pub fn asset_path(&self, quality: QualityLevel) -> String {
        self.asset_path_template
            .replace("{id}", self.id.as_str())
            .replace("{quality}", quality.as_str())
    }
}

/// Errors from building or loading a descriptor registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("duplicate entity id: {0}")]
    Duplicate(EntityId),
    #[error("entity {id} has a non-positive scale ({scale})")]
    InvalidScale { id: EntityId, scale: f32 },
}

/// Registry of entity descriptors keyed by id.
///
/// Built once at startup and read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct DescriptorRegistry {
    descriptors: BTreeMap<EntityId, EntityDescriptor>,
}

impl DescriptorRegistry {
    /// Build a registry, rejecting duplicate ids and non-positive scales.
    pub fn from_descriptors(
        descriptors: impl IntoIterator<Item = EntityDescriptor>,
    ) -> Result<Self, RegistryError> {
        let mut map = BTreeMap::new();
        for descriptor in descriptors {
            for scale in [descriptor.display_scale, descriptor.anatomy_scale] {
                if scale <= 0.0 || !scale.is_finite() {
                    return Err(RegistryError::InvalidScale {
                        id: descriptor.id.clone(),
                        scale,
                    });
                }
            }
            if map.contains_key(&descriptor.id) {
                return Err(RegistryError::Duplicate(descriptor.id));
            }
            map.insert(descriptor.id.clone(), descriptor);
        }
        Ok(Self { descriptors: map })
    }

    /// Parse a YAML list of descriptors.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, RegistryError> {
        let descriptors: Vec<EntityDescriptor> = serde_yaml::from_str(yaml)?;
        Self::from_descriptors(descriptors)
    }

    /// Load a YAML descriptor list from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let data = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&data)
    }

    /// The built-in species table.
    pub fn builtin() -> Self {
        use BodyTemplate::*;
        use QualityLevel::{Desktop, Tablet};

        let species = [
            EntityDescriptor::new("cat", "Cat", QuadrupedSmall, 0.6, 0.8, Tablet),
            EntityDescriptor::new("rabbit", "Rabbit", QuadrupedSmall, 0.4, 0.6, Tablet),
            EntityDescriptor::new("guinea_pig", "Guinea pig", QuadrupedSmall, 0.3, 0.5, Tablet),
            EntityDescriptor::new("ferret", "Ferret", QuadrupedSmall, 0.5, 0.7, Tablet),
            EntityDescriptor::new("dog", "Dog", QuadrupedMedium, 1.0, 1.0, Desktop),
            EntityDescriptor::new("sheep", "Sheep", QuadrupedMedium, 1.2, 1.1, Desktop),
            EntityDescriptor::new("goat", "Goat", QuadrupedMedium, 1.0, 0.9, Desktop),
            EntityDescriptor::new("pig", "Pig", QuadrupedMedium, 1.1, 1.0, Desktop),
            EntityDescriptor::new("horse", "Horse", QuadrupedLarge, 2.5, 2.0, Desktop),
            EntityDescriptor::new("cow", "Cow", QuadrupedLarge, 2.2, 1.8, Desktop),
            EntityDescriptor::new("llama", "Llama", QuadrupedLarge, 1.8, 1.5, Desktop),
            EntityDescriptor::new("canary", "Canary", BirdSmall, 0.15, 0.2, Tablet),
            EntityDescriptor::new("budgie", "Budgie", BirdSmall, 0.18, 0.2, Tablet),
            EntityDescriptor::new("parrot", "Parrot", BirdMedium, 0.4, 0.4, Desktop),
            EntityDescriptor::new("chicken", "Chicken", BirdMedium, 0.5, 0.5, Desktop),
            EntityDescriptor::new("snake", "Snake", ReptileSnake, 1.5, 1.0, Desktop),
            EntityDescriptor::new("lizard", "Lizard", ReptileLizard, 0.3, 0.4, Tablet),
            EntityDescriptor::new("turtle", "Turtle", ReptileTurtle, 0.6, 0.7, Desktop),
            EntityDescriptor::new("goldfish", "Goldfish", Fish, 0.2, 0.3, Tablet),
        ];

        Self {
            descriptors: species.into_iter().map(|d| (d.id.clone(), d)).collect(),
        }
    }

    pub fn get(&self, id: &EntityId) -> Option<&EntityDescriptor> {
        self.descriptors.get(id)
    }

    /// Descriptors in id order.
    pub fn iter(&self) -> impl Iterator<Item = &EntityDescriptor> {
        self.descriptors.values()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}
