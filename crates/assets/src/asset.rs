use crate::quality::QualityLevel;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use vetscan_common::EntityId;

/// Content-addressed asset ID computed from the raw asset bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssetId(pub u64);

impl AssetId {
    pub fn of(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        AssetId(u64::from_le_bytes(prefix))
    }
}

/// Cache key: one entity at one quality level.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssetKey {
    pub entity: EntityId,
    pub quality: QualityLevel,
}

impl AssetKey {
    pub fn new(entity: impl Into<EntityId>, quality: QualityLevel) -> Self {
        Self {
            entity: entity.into(),
            quality,
        }
    }
}

impl fmt::Display for AssetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.entity, self.quality)
    }
}

/// Bytes returned by an asset source, before decoding.
#[derive(Debug, Clone)]
pub struct RawAsset {
    pub path: String,
    pub bytes: Vec<u8>,
}

/// Failure to obtain a usable asset. `Clone` so one failure reaches every waiter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("asset not found: {0}")]
    NotFound(String),
    #[error("malformed asset {path}: {reason}")]
    Malformed { path: String, reason: String },
    #[error("IO error reading {path}: {reason}")]
    Io { path: String, reason: String },
    #[error("fetch rejected: {0}")]
    Rejected(String),
}

impl FetchError {
    pub fn from_io(path: &str, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            FetchError::NotFound(path.to_string())
        } else {
            FetchError::Io {
                path: path.to_string(),
                reason: err.to_string(),
            }
        }
    }
}

/// Mesh metadata decoded from a glTF document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mesh {
    pub name: String,
    pub vertex_count: u32,
    pub index_count: u32,
}

/// PBR material parameters decoded from a glTF document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Material {
    pub name: String,
    pub base_color: [f32; 4],
    pub metallic: f32,
    pub roughness: f32,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            name: "default".into(),
            base_color: [0.8, 0.8, 0.8, 1.0],
            metallic: 0.0,
            roughness: 1.0,
        }
    }
}

/// Decoded geometry/material payload, shared by every instance built from it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetPayload {
    pub meshes: Vec<Mesh>,
    pub materials: Vec<Material>,
    pub texture_count: usize,
}

impl AssetPayload {
    /// Decode glTF JSON or binary GLB bytes.
    pub fn decode(raw: &RawAsset) -> Result<Self, FetchError> {
        let gltf = gltf::Gltf::from_slice(&raw.bytes).map_err(|e| FetchError::Malformed {
            path: raw.path.clone(),
            reason: e.to_string(),
        })?;

        let overflow = |what: &str| FetchError::Malformed {
            path: raw.path.clone(),
            reason: format!("{what} count does not fit in u32"),
        };
        let accumulate = |total: u32, count: usize, what: &str| {
            u32::try_from(count)
                .ok()
                .and_then(|count| total.checked_add(count))
                .ok_or_else(|| overflow(what))
        };

        let mut total_vertices = 0u32;
        let mut meshes = Vec::new();
        for mesh in gltf.meshes() {
            let mut vertex_count = 0u32;
            let mut index_count = 0u32;
            for primitive in mesh.primitives() {
                if let Some(positions) = primitive.get(&gltf::Semantic::Positions) {
                    vertex_count = accumulate(vertex_count, positions.count(), "vertex")?;
                }
                if let Some(indices) = primitive.indices() {
                    index_count = accumulate(index_count, indices.count(), "index")?;
                }
            }
            total_vertices = accumulate(total_vertices, vertex_count as usize, "vertex")?;
            meshes.push(Mesh {
                name: mesh
                    .name()
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("mesh_{}", mesh.index())),
                vertex_count,
                index_count,
            });
        }

        let materials = gltf
            .materials()
            .map(|material| {
                let pbr = material.pbr_metallic_roughness();
                Material {
                    name: material
                        .name()
                        .map(str::to_string)
                        .unwrap_or_else(|| "unnamed".to_string()),
                    base_color: pbr.base_color_factor(),
                    metallic: pbr.metallic_factor(),
                    roughness: pbr.roughness_factor(),
                }
            })
            .collect();

        Ok(Self {
            meshes,
            materials,
            texture_count: gltf.textures().count(),
        })
    }

    pub fn vertex_count(&self) -> u32 {
        self.meshes.iter().map(|m| m.vertex_count).sum()
    }
}

/// Immutable result of fetching one `(entity, quality)` pair.
#[derive(Debug, Clone)]
pub struct LoadedAsset {
    pub key: AssetKey,
    pub id: AssetId,
    pub payload: Arc<AssetPayload>,
    pub load_duration: Duration,
}

impl LoadedAsset {
    /// Decode a raw asset fetched for `key`.
    pub fn decode(key: AssetKey, raw: &RawAsset, load_duration: Duration) -> Result<Self, FetchError> {
        let payload = AssetPayload::decode(raw)?;
        if payload.meshes.is_empty() {
            return Err(FetchError::Malformed {
                path: raw.path.clone(),
                reason: "document contains no meshes".into(),
            });
        }
        Ok(Self {
            key,
            id: AssetId::of(&raw.bytes),
            payload: Arc::new(payload),
            load_duration,
        })
    }

    pub fn quality(&self) -> QualityLevel {
        self.key.quality
    }

    pub fn vertex_count(&self) -> u32 {
        self.payload.vertex_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::placeholder::placeholder_glb;

    fn raw(path: &str, bytes: Vec<u8>) -> RawAsset {
        RawAsset {
            path: path.to_string(),
            bytes,
        }
    }

    #[test]
    fn decodes_placeholder_glb() {
        let bytes = placeholder_glb("dog", QualityLevel::Mobile, 24);
        let asset = LoadedAsset::decode(
            AssetKey::new("dog", QualityLevel::Mobile),
            &raw("dog_mobile.glb", bytes),
            Duration::from_millis(5),
        )
        .unwrap();
        assert_eq!(asset.vertex_count(), 24);
        assert_eq!(asset.payload.meshes.len(), 1);
        assert_eq!(asset.payload.materials.len(), 1);
        assert_eq!(asset.quality(), QualityLevel::Mobile);
    }

    #[test]
    fn malformed_bytes_are_reported() {
        let err = LoadedAsset::decode(
            AssetKey::new("dog", QualityLevel::Mobile),
            &raw("dog_mobile.glb", b"not a model".to_vec()),
            Duration::ZERO,
        )
        .unwrap_err();
        assert!(matches!(err, FetchError::Malformed { .. }));
    }

    #[test]
    fn document_without_meshes_is_malformed() {
        let json = br#"{"asset":{"version":"2.0"}}"#.to_vec();
        let err = LoadedAsset::decode(
            AssetKey::new("dog", QualityLevel::Tablet),
            &raw("empty.gltf", json),
            Duration::ZERO,
        )
        .unwrap_err();
        assert!(matches!(err, FetchError::Malformed { .. }));
    }

    /// A document whose accessors claim more vertices than fit in a `u32`.
    fn oversized_gltf() -> Vec<u8> {
        let accessor = r#"{"componentType":5126,"count":3000000000,"type":"VEC3","min":[0,0,0],"max":[1,1,1]}"#;
        format!(
            r#"{{"asset":{{"version":"2.0"}},"accessors":[{accessor},{accessor}],"meshes":[{{"primitives":[{{"attributes":{{"POSITION":0}}}},{{"attributes":{{"POSITION":1}}}}]}}]}}"#
        )
        .into_bytes()
    }

    #[test]
    fn oversized_vertex_counts_are_malformed() {
        let err = LoadedAsset::decode(
            AssetKey::new("dog", QualityLevel::Pro),
            &raw("huge.gltf", oversized_gltf()),
            Duration::ZERO,
        )
        .unwrap_err();
        assert!(matches!(err, FetchError::Malformed { .. }), "{err:?}");
    }

    #[test]
    fn content_id_is_deterministic() {
        let a = placeholder_glb("cat", QualityLevel::Tablet, 8);
        let b = placeholder_glb("cat", QualityLevel::Tablet, 8);
        let c = placeholder_glb("cat", QualityLevel::Desktop, 8);
        assert_eq!(AssetId::of(&a), AssetId::of(&b));
        assert_ne!(AssetId::of(&a), AssetId::of(&c));
    }

    #[test]
    fn asset_key_display() {
        assert_eq!(AssetKey::new("dog", QualityLevel::Pro).to_string(), "dog@pro");
    }

    #[test]
    fn missing_file_maps_to_not_found() {
        let err = FetchError::from_io(
            "x.glb",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert_eq!(err, FetchError::NotFound("x.glb".into()));
    }
}
