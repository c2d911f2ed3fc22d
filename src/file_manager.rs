// src/file_manager.rs - Sound asset directory
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;

pub const ASSET_EXTENSION: &str = "wav";

#[derive(Debug, Error)]
pub enum AssetError {
    #[error("Sound directory {0} does not exist")]
    Missing(PathBuf),
    #[error("{0} is not a directory")]
    NotADirectory(PathBuf),
    #[error("Sound directory {0} contains no .wav files")]
    Empty(PathBuf),
    #[error("Failed to read sound directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct AssetLibrary {
    directory: PathBuf,
    assets: Vec<PathBuf>,
}

impl AssetLibrary {
    /// List the directory's `.wav` files, sorted by name. A missing directory
    /// or one without any playable file is an error.
    pub async fn open(directory: impl AsRef<Path>) -> Result<Self, AssetError> {
        let directory = directory.as_ref().to_path_buf();
        let assets = list_assets(&directory).await?;
        tracing::info!("Found {} sound assets in {}", assets.len(), directory.display());
        Ok(Self { directory, assets })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn assets(&self) -> &[PathBuf] {
        &self.assets
    }

    pub fn into_assets(self) -> Vec<PathBuf> {
        self.assets
    }
}

/// The asset whose file name is exactly `file_name`.
pub fn find_asset<'a>(assets: &'a [PathBuf], file_name: &str) -> Option<&'a PathBuf> {
    assets
        .iter()
        .find(|path| path.file_name().and_then(|n| n.to_str()) == Some(file_name))
}

fn is_asset(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(ASSET_EXTENSION))
}

pub async fn list_assets(directory: &Path) -> Result<Vec<PathBuf>, AssetError> {
    let io_error = |source| AssetError::Io { path: directory.to_path_buf(), source };

    let metadata = match fs::metadata(directory).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(AssetError::Missing(directory.to_path_buf()));
        }
        Err(e) => return Err(io_error(e)),
    };
    if !metadata.is_dir() {
        return Err(AssetError::NotADirectory(directory.to_path_buf()));
    }

    let mut entries = fs::read_dir(directory).await.map_err(io_error)?;
    let mut assets = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(io_error)? {
        let path = entry.path();
        let file_type = entry.file_type().await.map_err(io_error)?;
        if file_type.is_dir() || !is_asset(&path) {
            tracing::debug!("Skipping {}", path.display());
            continue;
        }
        assets.push(path);
    }

    if assets.is_empty() {
        return Err(AssetError::Empty(directory.to_path_buf()));
    }
    assets.sort();
    Ok(assets)
}
