//! Loadable entities and their assets: descriptors, quality levels, glTF
//! decoding, asset sources and the de-duplicating cache.
//!
//! Assets are addressed by `(entity, quality)` and identified by a content
//! hash of their bytes. Decoded payloads are shared through `Arc` and never
//! mutated once cached.

mod asset;
mod cache;
mod descriptor;
mod placeholder;
mod quality;
mod source;

pub use asset::{
    AssetId, AssetKey, AssetPayload, FetchError, LoadedAsset, Material, Mesh, RawAsset,
};
pub use cache::{AssetCache, CacheStats, FetchResult};
pub use descriptor::{
    BodyTemplate, DEFAULT_PATH_TEMPLATE, DescriptorRegistry, EntityDescriptor, RegistryError,
};
pub use placeholder::{placeholder_glb, write_placeholders};
pub use quality::{Compression, Feature, QualityLevel, QualityProfile, UnknownQuality};
pub use source::{AssetSource, FileAssetSource};

pub fn crate_info() -> &'static str {
    "vetscan-assets v0.1.0"
}
