//! WaveGlow vocoder. A flow based model, during inference it samples a gaussian latent and
//! pushes it through the inverted flow conditioned on the mel-spectrogram. `sigma` scales that
//! latent: lower values give cleaner but flatter audio, the usual range is 0.6 to 1.0.
//!
//! The noise is sampled inside the exported graph so it only needs the mel and sigma. The graph
//! can be exported in half precision, in which case the mel has to be fed in as `f16` too.
use crate::error::VcError;
use anyhow::Context;
use half::f16;
use ndarray::{arr1, Array2, ArrayViewD, Axis};
use ort::{inputs, GraphOptimizationLevel, Session};
use std::path::Path;
use tracing::debug;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Precision {
    #[default]
    Full,
    Half,
}

pub struct WaveGlow {
    model: Session,
    precision: Precision,
}

impl WaveGlow {
    pub fn load(path: impl AsRef<Path>, precision: Precision) -> anyhow::Result<Self> {
        let model = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_model_from_file(path)
            .context("converting waveglow to runnable model")?;

        Ok(Self { model, precision })
    }

    pub fn precision(&self) -> Precision {
        self.precision
    }

    /// Generates `[-1, 1]` audio from a `(n_mel_channels, frames)` mel-spectrogram.
    pub fn infer(&self, mel: &Array2<f32>, sigma: f32) -> anyhow::Result<Vec<f32>> {
        let mel = mel.view().insert_axis(Axis(0));
        let sigma = arr1(&[sigma]);

        let audio = match self.precision {
            Precision::Full => {
                let output = self.model.run(inputs![
                    "mel" => mel,
                    "sigma" => sigma,
                ]?)?;
                let audio = output["audio"].extract_tensor::<f32>()?;
                flatten_audio(audio.view().clone())?
            }
            Precision::Half => {
                let mel = mel.mapv(f16::from_f32);
                let output = self.model.run(inputs![
                    "mel" => mel,
                    "sigma" => sigma,
                ]?)?;
                let audio = output["audio"].extract_tensor::<f16>()?;
                flatten_audio(audio.view().clone())?
                    .into_iter()
                    .map(f16::to_f32)
                    .collect()
            }
        };
        debug!("Vocoded {} samples", audio.len());
        Ok(audio)
    }
}

/// The audio comes back as `(1, samples)` or `(samples,)`.
fn flatten_audio<T: Copy>(audio: ArrayViewD<T>) -> Result<Vec<T>, VcError> {
    let leading = audio.shape().iter().rev().skip(1).all(|x| *x == 1);
    if audio.ndim() == 0 || !leading {
        return Err(VcError::UnexpectedShape {
            name: "audio",
            shape: audio.shape().to_vec(),
        });
    }
    Ok(audio.iter().copied().collect())
}
