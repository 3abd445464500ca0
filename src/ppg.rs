//! Phonetic posteriorgram extraction. The acoustic model is an exported ONNX graph taking the
//! padded 16-bit range waveform and returning a probability distribution over phonetic classes
//! for every 10ms frame that has full context.
use crate::error::VcError;
use anyhow::Context;
use ndarray::{Array2, ArrayView2, Axis, Ix2, Ix3};
use ort::{inputs, GraphOptimizationLevel, Session};
use std::path::Path;
use tracing::debug;

pub struct PpgExtractor {
    model: Session,
}

impl PpgExtractor {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let model = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_model_from_file(path)
            .context("converting ppg model to runnable model")?;

        Ok(Self { model })
    }

    /// Runs the extractor over a padded waveform, returning a `(frames, classes)` array.
    pub fn infer(&self, padded: &[f32]) -> anyhow::Result<Array2<f32>> {
        let waveform = ArrayView2::from_shape((1, padded.len()), padded)
            .context("failed to make waveform tensor")?;

        let output = self.model.run(inputs!["waveform" => waveform]?)?;
        let ppg = output["ppg"].extract_tensor::<f32>()?;
        let ppg = ppg.view();
        debug!("PPG shape: {:?}", ppg.shape());

        // Some exports keep the batch axis, some don't
        let ppg = match ppg.ndim() {
            2 => ppg.clone().into_dimensionality::<Ix2>()?.to_owned(),
            3 if ppg.shape()[0] == 1 => ppg
                .clone()
                .into_dimensionality::<Ix3>()?
                .remove_axis(Axis(0))
                .to_owned(),
            _ => {
                return Err(VcError::UnexpectedShape {
                    name: "ppg",
                    shape: ppg.shape().to_vec(),
                }
                .into())
            }
        };
        Ok(ppg)
    }
}
