use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use shared::FileAsset;
use tracing::warn;

/// Where the original (unstamped) product files live.
#[async_trait]
pub trait AssetStore: Send + Sync {
    /// `Ok(None)` when the file is not there.
    async fn load(&self, asset: &FileAsset) -> std::io::Result<Option<Vec<u8>>>;
}

/// Files under a media directory, addressed by their bare file name.
pub struct FsAssetStore {
    root: PathBuf,
}

impl FsAssetStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, filename: &str) -> Option<PathBuf> {
        let mut components = Path::new(filename).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(name)), None) => Some(self.root.join(name)),
            _ => None,
        }
    }
}

#[async_trait]
impl AssetStore for FsAssetStore {
    async fn load(&self, asset: &FileAsset) -> std::io::Result<Option<Vec<u8>>> {
        let Some(path) = self.path_for(&asset.filename) else {
            warn!(filename = %asset.filename, "Refusing asset name that is not a plain file name");
            return Ok(None);
        };

        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(filename: &str) -> FileAsset {
        FileAsset {
            filename: filename.to_string(),
            filesize: None,
        }
    }

    #[tokio::test]
    async fn reads_files_from_the_media_root() {
        let store = FsAssetStore::new(concat!(env!("CARGO_MANIFEST_DIR"), "/assets/fonts"));
        let bytes = store.load(&asset("DejaVuSans.ttf")).await.unwrap();
        assert!(bytes.is_some_and(|b| !b.is_empty()));
        assert!(store.load(&asset("missing.pdf")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn paths_cannot_escape_the_root() {
        let store = FsAssetStore::new(concat!(env!("CARGO_MANIFEST_DIR"), "/assets/fonts"));
        assert!(store.load(&asset("../fonts/DejaVuSans.ttf")).await.unwrap().is_none());
        assert!(store.load(&asset("/etc/passwd")).await.unwrap().is_none());
    }
}
