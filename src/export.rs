use std::fmt;
use std::path::{Path, PathBuf};

use burn::{
    prelude::*,
    record::{BinFileRecorder, FullPrecisionSettings, NamedMpkFileRecorder},
};

use crate::error::{Result, TrainError};
use crate::model::{Model, ModelConfig};

type LegacyRecorder = BinFileRecorder<FullPrecisionSettings>;
type ModernRecorder = NamedMpkFileRecorder<FullPrecisionSettings>;

// Extensions appended by the recorders above.
const LEGACY_EXTENSION: &str = "bin";
const MODERN_EXTENSION: &str = "mpk";

const EXPORT_CONFIG: &str = "config.json";
const EXPORT_WEIGHTS: &str = "model";

/// Where the three model artifacts are written.
///
/// The single-file paths are given without extension; the recorder appends its
/// own (`.bin` for the legacy format, `.mpk` for the modern one).
#[derive(Clone, Debug)]
pub struct ArtifactPaths {
    pub legacy: PathBuf,
    pub modern: PathBuf,
    pub export_dir: PathBuf,
}

impl Default for ArtifactPaths {
    fn default() -> Self {
        Self {
            legacy: PathBuf::from("mnist_model"),
            modern: PathBuf::from("mnist_model"),
            export_dir: PathBuf::from("saved_mnist"),
        }
    }
}

impl ArtifactPaths {
    /// Same layout as [`ArtifactPaths::default`], rooted at `dir`.
    pub fn in_dir<P: AsRef<Path>>(dir: P) -> Self {
        let defaults = Self::default();
        let dir = dir.as_ref();

        Self {
            legacy: dir.join(defaults.legacy),
            modern: dir.join(defaults.modern),
            export_dir: dir.join(defaults.export_dir),
        }
    }

    pub fn legacy_file(&self) -> PathBuf {
        self.legacy.with_extension(LEGACY_EXTENSION)
    }

    pub fn modern_file(&self) -> PathBuf {
        self.modern.with_extension(MODERN_EXTENSION)
    }
}

impl fmt::Display for ArtifactPaths {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}, {}, and exported model to {}",
            self.legacy_file().display(),
            self.modern_file().display(),
            self.export_dir.display()
        )
    }
}

/// Save the model in the legacy binary format, the named MessagePack format
/// and as a self-describing directory (topology config plus weights).
///
/// Returns every path written.
pub fn save_artifacts<B: Backend>(
    model: &Model<B>,
    config: &ModelConfig,
    paths: &ArtifactPaths,
) -> Result<Vec<PathBuf>> {
    model
        .clone()
        .save_file(&paths.legacy, &LegacyRecorder::new())?;
    model
        .clone()
        .save_file(&paths.modern, &ModernRecorder::new())?;

    let export_dir = &paths.export_dir;
    std::fs::create_dir_all(export_dir).map_err(|err| TrainError::io(export_dir, err))?;
    let config_path = export_dir.join(EXPORT_CONFIG);
    config
        .save(&config_path)
        .map_err(|err| TrainError::io(&config_path, err))?;
    model
        .clone()
        .save_file(export_dir.join(EXPORT_WEIGHTS), &ModernRecorder::new())?;

    log::info!("Model artifacts written: {paths}");

    Ok(vec![
        paths.legacy_file(),
        paths.modern_file(),
        export_dir.clone(),
    ])
}

/// Rebuild a model from an exported directory, without any other input.
pub fn load_exported<B: Backend, P: AsRef<Path>>(dir: P, device: &B::Device) -> Result<Model<B>> {
    let dir = dir.as_ref();
    let config = ModelConfig::load(dir.join(EXPORT_CONFIG))?;
    let model = config
        .init::<B>(device)
        .load_file(dir.join(EXPORT_WEIGHTS), &ModernRecorder::new(), device)?;

    Ok(model)
}

/// Load weights saved in the legacy binary format into the given topology.
pub fn load_legacy<B: Backend>(
    config: &ModelConfig,
    paths: &ArtifactPaths,
    device: &B::Device,
) -> Result<Model<B>> {
    let model = config
        .init::<B>(device)
        .load_file(&paths.legacy, &LegacyRecorder::new(), device)?;

    Ok(model)
}

/// Load weights saved in the named MessagePack format into the given topology.
pub fn load_modern<B: Backend>(
    config: &ModelConfig,
    paths: &ArtifactPaths,
    device: &B::Device,
) -> Result<Model<B>> {
    let model = config
        .init::<B>(device)
        .load_file(&paths.modern, &ModernRecorder::new(), device)?;

    Ok(model)
}
