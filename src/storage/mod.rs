use async_trait::async_trait;
use std::io;
use std::path::{Component, Path, PathBuf};

use crate::native::{FileStore, StoreResult};

/// Reads submission file payloads from a directory tree.
///
/// Stored paths are relative to `root`; anything that would escape it is refused.
pub struct DiskFileStore {
    root: PathBuf,
}

impl DiskFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> io::Result<PathBuf> {
        let relative = Path::new(path);
        let escapes = path.is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("refusing file path outside storage root: {:?}", path),
            ));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl FileStore for DiskFileStore {
    async fn read_bytes(&self, path: &str) -> StoreResult<Vec<u8>> {
        let full = self.resolve(path)?;
        Ok(tokio::fs::read(full).await?)
    }
}

pub fn ensure_dirs(files_folder: &Path) -> io::Result<()> {
    std::fs::create_dir_all(files_folder)
}
