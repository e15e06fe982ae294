//! Placeholder GLB writer.
//!
//! Produces a minimal valid binary glTF with a single point-cloud mesh and one
//! material. Used to stage asset directories before real models exist.

use crate::descriptor::EntityDescriptor;
use crate::quality::QualityLevel;
use serde_json::json;
use std::path::{Path, PathBuf};

const GLB_MAGIC: &[u8; 4] = b"glTF";
const GLB_VERSION: u32 = 2;
const CHUNK_JSON: u32 = 0x4E4F_534A;
const CHUNK_BIN: u32 = 0x004E_4942;
const FLOAT: u32 = 5126;
const ARRAY_BUFFER: u32 = 34962;

/// Base colour per quality so placeholder tiers are visually distinct.
fn tier_color(quality: QualityLevel) -> [f32; 4] {
    match quality {
        QualityLevel::Mobile => [0.55, 0.27, 0.07, 1.0],
        QualityLevel::Tablet => [0.63, 0.40, 0.20, 1.0],
        QualityLevel::Desktop => [0.72, 0.53, 0.33, 1.0],
        QualityLevel::Pro => [0.80, 0.65, 0.45, 1.0],
    }
}

/// Build GLB bytes for `entity` at `quality` with `vertex_count` vertices.
pub fn placeholder_glb(entity: &str, quality: QualityLevel, vertex_count: u32) -> Vec<u8> {
    let count = vertex_count.max(1);
    let name = format!("{entity}_{quality}");

    let mut bin = Vec::with_capacity(count as usize * 12);
    for i in 0..count {
        let angle = i as f32 * std::f32::consts::TAU / count as f32;
        let y = if i % 2 == 0 { -0.5f32 } else { 0.5 };
        for v in [0.5 * angle.cos(), y, 0.5 * angle.sin()] {
            bin.extend_from_slice(&v.to_le_bytes());
        }
    }

    let document = json!({
        "asset": { "version": "2.0", "generator": "vetscan placeholder" },
        "scene": 0,
        "scenes": [{ "nodes": [0] }],
        "nodes": [{ "mesh": 0, "name": name }],
        "meshes": [{
            "name": name,
            "primitives": [{ "attributes": { "POSITION": 0 }, "material": 0 }]
        }],
        "materials": [{
            "name": format!("{name}_skin"),
            "pbrMetallicRoughness": {
                "baseColorFactor": tier_color(quality),
                "metallicFactor": 0.1,
                "roughnessFactor": 0.8
            }
        }],
        "accessors": [{
            "bufferView": 0,
            "componentType": FLOAT,
            "count": count,
            "type": "VEC3",
            "min": [-0.5, -0.5, -0.5],
            "max": [0.5, 0.5, 0.5]
        }],
        "bufferViews": [{ "buffer": 0, "byteLength": bin.len(), "target": ARRAY_BUFFER }],
        "buffers": [{ "byteLength": bin.len() }]
    });

    let mut json_chunk = document.to_string().into_bytes();
    while json_chunk.len() % 4 != 0 {
        json_chunk.push(b' ');
    }
    while bin.len() % 4 != 0 {
        bin.push(0);
    }

    let total = 12 + 8 + json_chunk.len() + 8 + bin.len();
    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(GLB_MAGIC);
    out.extend_from_slice(&GLB_VERSION.to_le_bytes());
    out.extend_from_slice(&(total as u32).to_le_bytes());
    out.extend_from_slice(&(json_chunk.len() as u32).to_le_bytes());
    out.extend_from_slice(&CHUNK_JSON.to_le_bytes());
    out.extend_from_slice(&json_chunk);
    out.extend_from_slice(&(bin.len() as u32).to_le_bytes());
    out.extend_from_slice(&CHUNK_BIN.to_le_bytes());
    out.extend_from_slice(&bin);
    out
}

/// Write one placeholder per quality level for `descriptor` under `root`,
/// following the descriptor's path template. Returns the written paths.
pub fn write_placeholders(
    root: impl AsRef<Path>,
    descriptor: &EntityDescriptor,
) -> std::io::Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    for quality in QualityLevel::ALL {
        let path = root.as_ref().join(descriptor.asset_path(quality));
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let bytes = placeholder_glb(
            descriptor.id.as_str(),
            quality,
            quality.profile().vertex_budget,
        );
        std::fs::write(&path, bytes)?;
        tracing::debug!(path = %path.display(), %quality, "wrote placeholder asset");
        written.push(path);
    }
    Ok(written)
}
