//! Scene-resident instances.
//!
//! A [`LiveInstance`] is the mutable, renderable object for one session. It is
//! replaced, never upgraded in place, whenever a better asset arrives. Each
//! instance owns its own material clones and marker geometry; the decoded
//! asset payload behind it is shared with the cache.

use crate::resources::{GpuHandle, GpuResources, ResourceKind};
use crate::visualization::ViewMode;
use glam::Vec3;
use std::collections::BTreeMap;
use std::sync::Arc;
use vetscan_assets::{
    AssetPayload, BodyTemplate, EntityDescriptor, Feature, LoadedAsset, QualityLevel,
};
use vetscan_common::{EntityId, InstanceId, SessionId, Transform};

/// Procedural shape shown before any asset has loaded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FallbackShape {
    Box { width: f32, height: f32, depth: f32 },
    Sphere { radius: f32 },
    Cylinder { top: f32, bottom: f32, height: f32 },
}

impl FallbackShape {
    /// Shape and base colour for a body template.
    pub fn for_template(template: BodyTemplate) -> (Self, [f32; 4]) {
        if template.is_quadruped() {
            (
                Self::Box {
                    width: 1.5,
                    height: 0.8,
                    depth: 0.6,
                },
                [0.55, 0.27, 0.07, 1.0],
            )
        } else if template.is_bird() {
            (Self::Sphere { radius: 0.3 }, [0.29, 0.56, 0.89, 1.0])
        } else if template == BodyTemplate::Fish {
            (
                Self::Cylinder {
                    top: 0.1,
                    bottom: 0.2,
                    height: 0.8,
                },
                [1.0, 0.84, 0.0, 1.0],
            )
        } else {
            (
                Self::Box {
                    width: 1.0,
                    height: 1.0,
                    depth: 1.0,
                },
                [0.5, 0.5, 0.5, 1.0],
            )
        }
    }
}

/// What the instance renders.
#[derive(Debug, Clone)]
pub enum InstanceSource {
    Fallback(FallbackShape),
    Asset(Arc<LoadedAsset>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlendMode {
    #[default]
    Normal,
    Additive,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ShadingModel {
    #[default]
    Standard,
    Lambert,
    /// Mode-specific shader program, identified by name.
    Custom(String),
}

/// Per-instance material state. Cloned from the asset so modes can mutate it.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialState {
    pub name: String,
    pub base_color: [f32; 4],
    pub metallic: f32,
    pub roughness: f32,
    pub opacity: f32,
    pub transparent: bool,
    pub flat_shading: bool,
    pub env_intensity: f32,
    pub blend: BlendMode,
    pub double_sided: bool,
    pub cast_shadow: bool,
    pub receive_shadow: bool,
    pub shading: ShadingModel,
    pub uniforms: BTreeMap<String, f32>,
}

impl MaterialState {
    fn from_asset_material(material: &vetscan_assets::Material) -> Self {
        Self {
            name: material.name.clone(),
            base_color: material.base_color,
            metallic: material.metallic,
            roughness: material.roughness,
            opacity: material.base_color[3],
            transparent: material.base_color[3] < 1.0,
            flat_shading: false,
            env_intensity: 1.0,
            blend: BlendMode::Normal,
            double_sided: false,
            cast_shadow: true,
            receive_shadow: true,
            shading: ShadingModel::Standard,
            uniforms: BTreeMap::new(),
        }
    }

    pub fn set_uniform(&mut self, name: &str, value: f32) {
        self.uniforms.insert(name.to_string(), value);
    }

    pub fn uniform(&self, name: &str) -> Option<f32> {
        self.uniforms.get(name).copied()
    }
}

/// Secondary marker geometry placed on an entity.
#[derive(Debug, Clone, PartialEq)]
pub struct AnatomyMarker {
    pub name: &'static str,
    /// Position relative to the instance origin.
    pub position: Vec3,
    pub radius: f32,
}

const MARKERS: [(&str, [f32; 3], f32); 5] = [
    ("heart", [0.3, 0.6, 0.0], 0.1),
    ("lungs", [0.35, 0.65, 0.0], 0.12),
    ("stomach", [0.0, 0.4, 0.0], 0.15),
    ("liver", [-0.2, 0.45, 0.15], 0.1),
    ("brain", [0.6, 0.8, 0.0], 0.08),
];

fn anatomy_markers(descriptor: &EntityDescriptor) -> Vec<AnatomyMarker> {
    MARKERS
        .iter()
        .map(|&(name, pos, radius)| AnatomyMarker {
            name,
            position: Vec3::from_array(pos) * descriptor.display_scale,
            radius: radius * descriptor.anatomy_scale,
        })
        .collect()
}

/// The mutable, scene-attached object for one loaded entity in one session.
#[derive(Debug)]
pub struct LiveInstance {
    id: InstanceId,
    session: SessionId,
    entity: EntityId,
    source: InstanceSource,
    pub transform: Transform,
    active_mode: ViewMode,
    materials: Vec<MaterialState>,
    original_materials: Vec<MaterialState>,
    anatomy_markers: Vec<AnatomyMarker>,
    owned: Vec<GpuHandle>,
    /// Free-form host data, carried to every replacement.
    pub user_data: BTreeMap<String, String>,
    disposed: bool,
}

impl LiveInstance {
    /// Build the procedural placeholder for `descriptor`. Never fails and
    /// needs no I/O.
    pub fn fallback(
        session: SessionId,
        descriptor: &EntityDescriptor,
        gpu: &mut dyn GpuResources,
    ) -> Self {
        let (shape, color) = FallbackShape::for_template(descriptor.template);
        let material = MaterialState {
            name: format!("{}_fallback", descriptor.id),
            base_color: color,
            metallic: 0.0,
            roughness: 1.0,
            opacity: 0.8,
            transparent: true,
            flat_shading: false,
            env_intensity: 0.0,
            blend: BlendMode::Normal,
            double_sided: false,
            cast_shadow: false,
            receive_shadow: false,
            shading: ShadingModel::Standard,
            uniforms: BTreeMap::new(),
        };
        let owned = vec![
            gpu.allocate(ResourceKind::Buffer),
            gpu.allocate(ResourceKind::Material),
            gpu.allocate(ResourceKind::Buffer),
        ];
        Self::assemble(
            session,
            descriptor,
            InstanceSource::Fallback(shape),
            vec![material],
            owned,
        )
    }

    /// Wrap a loaded asset. Materials are cloned per instance and tuned to
    /// the asset's quality level.
    pub fn from_asset(
        session: SessionId,
        descriptor: &EntityDescriptor,
        asset: Arc<LoadedAsset>,
        gpu: &mut dyn GpuResources,
    ) -> Self {
        let profile = asset.quality().profile();
        let mut materials: Vec<MaterialState> = if asset.payload.materials.is_empty() {
            vec![MaterialState::from_asset_material(&Default::default())]
        } else {
            asset
                .payload
                .materials
                .iter()
                .map(MaterialState::from_asset_material)
                .collect()
        };

        for material in &mut materials {
            if profile.has(Feature::AdvancedMaterials) {
                material.roughness = 0.8;
                material.metallic = 0.1;
                material.env_intensity = 0.5;
            }
            if asset.quality() == QualityLevel::Mobile {
                material.flat_shading = true;
                material.env_intensity = 0.0;
            }
        }

        let mut owned: Vec<GpuHandle> = materials
            .iter()
            .map(|_| gpu.allocate(ResourceKind::Material))
            .collect();
        owned.push(gpu.allocate(ResourceKind::Buffer));

        Self::assemble(
            session,
            descriptor,
            InstanceSource::Asset(asset),
            materials,
            owned,
        )
    }

    fn assemble(
        session: SessionId,
        descriptor: &EntityDescriptor,
        source: InstanceSource,
        materials: Vec<MaterialState>,
        owned: Vec<GpuHandle>,
    ) -> Self {
        Self {
            id: InstanceId::new(),
            session,
            entity: descriptor.id.clone(),
            source,
            transform: Transform::uniform_scale(descriptor.display_scale),
            active_mode: ViewMode::Normal,
            original_materials: materials.clone(),
            materials,
            anatomy_markers: anatomy_markers(descriptor),
            owned,
            user_data: BTreeMap::new(),
            disposed: false,
        }
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn entity(&self) -> &EntityId {
        &self.entity
    }

    pub fn source(&self) -> &InstanceSource {
        &self.source
    }

    /// Quality of the wrapped asset, `None` for the fallback.
    pub fn quality(&self) -> Option<QualityLevel> {
        match &self.source {
            InstanceSource::Fallback(_) => None,
            InstanceSource::Asset(asset) => Some(asset.quality()),
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self.source, InstanceSource::Fallback(_))
    }

    pub fn payload(&self) -> Option<&AssetPayload> {
        match &self.source {
            InstanceSource::Fallback(_) => None,
            InstanceSource::Asset(asset) => Some(&asset.payload),
        }
    }

    pub fn vertex_count(&self) -> u32 {
        self.payload().map_or(0, AssetPayload::vertex_count)
    }

    pub fn active_mode(&self) -> ViewMode {
        self.active_mode
    }

    pub(crate) fn set_active_mode(&mut self, mode: ViewMode) {
        self.active_mode = mode;
    }

    pub fn materials(&self) -> &[MaterialState] {
        &self.materials
    }

    pub fn materials_mut(&mut self) -> &mut [MaterialState] {
        &mut self.materials
    }

    /// Reset every material to its state at construction.
    pub fn restore_original_materials(&mut self) {
        self.materials.clone_from(&self.original_materials);
    }

    pub fn anatomy_markers(&self) -> &[AnatomyMarker] {
        &self.anatomy_markers
    }

    /// Marker containing `point`, given relative to the instance origin.
    pub fn marker_at(&self, point: Vec3) -> Option<&AnatomyMarker> {
        self.anatomy_markers
            .iter()
            .filter(|m| m.position.distance(point) <= m.radius)
            .min_by(|a, b| {
                a.position
                    .distance(point)
                    .total_cmp(&b.position.distance(point))
            })
    }

    pub fn owned_handles(&self) -> &[GpuHandle] {
        &self.owned
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Hand over every owned handle and mark the instance disposed.
    pub(crate) fn take_owned(&mut self) -> Vec<GpuHandle> {
        self.disposed = true;
        std::mem::take(&mut self.owned)
    }
}
