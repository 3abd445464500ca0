use ort::{CPUExecutionProvider, CUDAExecutionProvider};
use std::env;
use tracing::info;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::{Layer, Registry};

pub mod align;
pub mod audio;
pub mod config;
pub mod convert;
pub mod denoiser;
pub mod error;
pub mod ppg;
pub mod ppg2mel;
pub mod prosody;
pub mod speaker;
pub mod stft;
pub mod waveglow;

pub use convert::*;
pub use error::VcError;

pub fn setup_logging() {
    let filter = match env::var("RUST_LOG") {
        Ok(_) => EnvFilter::from_env("RUST_LOG"),
        _ => EnvFilter::new("ppg_vc=info,convert=info"),
    };

    let fmt = tracing_subscriber::fmt::Layer::default();

    let subscriber = filter.and_then(fmt).with_subscriber(Registry::default());

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("Logging was already set up");
    }
}

/// ort calls into a C++ library which has its own global initialisation that needs to be ran
/// before any session is created. Execution providers are tried in order so asking for CUDA on
/// a machine without it still ends up on the CPU.
pub fn init_runtime(use_cuda: bool) -> anyhow::Result<()> {
    let providers = if use_cuda {
        info!("Requesting CUDA execution provider");
        vec![
            CUDAExecutionProvider::default().build(),
            CPUExecutionProvider::default().build(),
        ]
    } else {
        vec![CPUExecutionProvider::default().build()]
    };

    ort::init()
        .with_name("ppg_vc")
        .with_execution_providers(&providers)
        .commit()?;
    Ok(())
}
