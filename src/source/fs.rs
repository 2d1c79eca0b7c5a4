//! Local directory image source.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::SourceError;

use super::ImageSource;

/// Serves images from files under a root directory.
///
/// Identifiers are joined onto the root after rejecting anything that could
/// escape it (`..`, absolute paths, drive prefixes).
#[derive(Debug, Clone)]
pub struct FsImageSource {
    root: PathBuf,
}

impl FsImageSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map an identifier to a path under the root.
    pub fn resolve(&self, id: &str) -> Result<PathBuf, SourceError> {
        let relative = Path::new(id.trim_start_matches('/'));

        let mut path = self.root.clone();
        let mut segments = 0;
        for component in relative.components() {
            match component {
                Component::Normal(part) => {
                    path.push(part);
                    segments += 1;
                }
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(SourceError::InvalidPath(id.to_string()));
                }
            }
        }

        if segments == 0 {
            return Err(SourceError::InvalidPath(id.to_string()));
        }
        Ok(path)
    }
}

#[async_trait]
impl ImageSource for FsImageSource {
    async fn fetch(&self, id: &str) -> Result<Bytes, SourceError> {
        let path = self.resolve(id)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(SourceError::NotFound(path.display().to_string()))
            }
            // Reading a directory is reported as a missing image
            Err(_) if path.is_dir() => Err(SourceError::NotFound(path.display().to_string())),
            Err(e) => Err(SourceError::Io(format!("{}: {}", path.display(), e))),
        }
    }

    fn describe(&self) -> String {
        self.root.display().to_string()
    }
}
