#![recursion_limit = "256"]

use std::path::Path;

use burn::backend::Autodiff;
use mnist_export::{
    data::{load_mnist, MnistSplit},
    export::{save_artifacts, ArtifactPaths},
    logger::install_logger,
    training::{self, CnnTrainingConfig},
    TrainError,
};

#[cfg(feature = "tch-cpu")]
mod backend {
    use burn::backend::libtorch::{LibTorch, LibTorchDevice};

    pub type Backend = LibTorch;

    pub fn device() -> LibTorchDevice {
        LibTorchDevice::Cpu
    }
}

#[cfg(all(feature = "wgpu", not(feature = "tch-cpu")))]
mod backend {
    use burn::backend::wgpu::{Wgpu, WgpuDevice};

    pub type Backend = Wgpu;

    pub fn device() -> WgpuDevice {
        WgpuDevice::default()
    }
}

#[cfg(all(
    feature = "cpu",
    not(any(feature = "wgpu", feature = "tch-cpu"))
))]
mod backend {
    use burn::backend::ndarray::{NdArray, NdArrayDevice};

    pub type Backend = NdArray;

    pub fn device() -> NdArrayDevice {
        NdArrayDevice::Cpu
    }
}

fn main() -> Result<(), TrainError> {
    let config = CnnTrainingConfig::mnist();
    let artifact_dir = Path::new(&config.artifact_dir);
    std::fs::create_dir_all(artifact_dir).map_err(|source| TrainError::Io {
        path: artifact_dir.to_path_buf(),
        source,
    })?;
    install_logger(false, Some(&artifact_dir.join("experiment.log")));

    let train_set = load_mnist(MnistSplit::Train)?;
    let test_set = load_mnist(MnistSplit::Test)?;

    let model = training::train::<Autodiff<backend::Backend>, _, _>(
        &config,
        train_set,
        test_set,
        backend::device(),
    )?;

    let paths = ArtifactPaths::default();
    save_artifacts(&model, &config.model, &paths)?;

    println!("Saved: {paths}");

    Ok(())
}
