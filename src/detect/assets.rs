//! One-time installation of bundled detector model files

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument};

use crate::error::DetectorError;

/// Copies `source` into `dir` unless a file of the same name is already
/// there. Returns the destination path either way.
///
/// The copy goes through a temporary name so an interrupted copy never
/// leaves a truncated model that later calls would treat as installed.
pub fn copy_asset(source: &Path, dir: &Path) -> io::Result<PathBuf> {
    let name = source.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("asset path has no file name: {}", source.display()),
        )
    })?;
    fs::create_dir_all(dir)?;
    let target = dir.join(name);
    if target.exists() {
        debug!(target = %target.display(), "asset already installed");
        return Ok(target);
    }

    let mut partial_name = name.to_os_string();
    partial_name.push(".partial");
    let partial = dir.join(partial_name);
    fs::copy(source, &partial)?;
    fs::rename(&partial, &target)?;
    info!(target = %target.display(), "installed asset");
    Ok(target)
}

/// Bundled model files and where they get installed
#[derive(Debug, Clone)]
pub struct ModelAssets {
    source_dir: PathBuf,
    model_dir: PathBuf,
    files: Vec<String>,
}

impl ModelAssets {
    pub fn new(
        source_dir: impl Into<PathBuf>,
        model_dir: impl Into<PathBuf>,
        files: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            source_dir: source_dir.into(),
            model_dir: model_dir.into(),
            files: files.into_iter().map(Into::into).collect(),
        }
    }

    /// Where the installed files will live, in declaration order
    pub fn model_paths(&self) -> Vec<PathBuf> {
        self.files.iter().map(|f| self.model_dir.join(f)).collect()
    }

    /// Installs every model file, skipping those already present
    #[instrument(skip(self), fields(model_dir = %self.model_dir.display()))]
    pub fn install(&self) -> Result<Vec<PathBuf>, DetectorError> {
        self.files
            .iter()
            .map(|file| {
                let source = self.source_dir.join(file);
                if !source.exists() && !self.model_dir.join(file).exists() {
                    return Err(DetectorError::MissingModel(source));
                }
                Ok(copy_asset(&source, &self.model_dir)?)
            })
            .collect()
    }
}
