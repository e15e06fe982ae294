//! Asset sources: where raw bytes come from.

use crate::asset::{FetchError, RawAsset};
use futures::future::{BoxFuture, FutureExt};
use std::path::PathBuf;

/// Fetches raw asset bytes by path. Paths come from
/// `EntityDescriptor::asset_path`.
pub trait AssetSource: Send + Sync {
    fn fetch(&self, path: &str) -> BoxFuture<'static, Result<RawAsset, FetchError>>;
}

/// Reads assets from a directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct FileAssetSource {
    root: PathBuf,
}

impl FileAssetSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }
}

impl AssetSource for FileAssetSource {
    fn fetch(&self, path: &str) -> BoxFuture<'static, Result<RawAsset, FetchError>> {
        let full = self.root.join(path);
        let path = path.to_string();
        async move {
            match tokio::fs::read(&full).await {
                Ok(bytes) => {
                    tracing::debug!(%path, len = bytes.len(), "read asset");
                    Ok(RawAsset { path, bytes })
                }
                Err(err) => Err(FetchError::from_io(&path, err)),
            }
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_relative_to_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("models")).unwrap();
        std::fs::write(dir.path().join("models/a.glb"), b"abc").unwrap();

        let source = FileAssetSource::new(dir.path());
        let raw = source.fetch("models/a.glb").await.unwrap();
        assert_eq!(raw.bytes, b"abc");
        assert_eq!(raw.path, "models/a.glb");
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let source = FileAssetSource::new(dir.path());
        let err = source.fetch("nope.glb").await.unwrap_err();
        assert_eq!(err, FetchError::NotFound("nope.glb".into()));
    }
}
