//! The mel generator is a multi-speaker Tacotron2. Where the text to speech version encodes a
//! sequence of characters or phonemes, this one encodes the per-frame posteriorgram (with the
//! prosody features appended) alongside a speaker d-vector repeated for every frame. The
//! decoder then attends over the encoded sequence and predicts mel frames in the voice of the
//! speaker it was conditioned on.
//!
//! Because the linguistic content is already time aligned the attention mostly has to learn a
//! near diagonal path, but the decoder is still autoregressive: it is run one step at a time with
//! all of its recurrent state fed back in until the gate output says the utterance is finished.
//!
//! The exported model is split into three graphs:
//!
//! 1. encoder.onnx
//! 2. decoder_iter.onnx
//! 3. postnet.onnx
//!
//! The split is forced by the decoder loop, ONNX graphs can't express the stop condition without
//! unrolling it so the loop lives here instead.
use crate::config::Ppg2MelConfig;
use crate::error::VcError;
use anyhow::Context;
use ndarray::{concatenate, prelude::*};
use ort::{inputs, GraphOptimizationLevel, Session, Tensor};
use std::path::Path;
use tracing::debug;

/// Sigmoid function, the gate comes out of the decoder graph as a logit.
fn sigmoid(x: f32) -> f32 {
    if x >= 0.0 {
        let x = -x;
        1.0 / (1.0 + x.exp())
    } else {
        x.exp() / (1.0 + x.exp())
    }
}

/// Repeats the speaker embedding along the time axis, `(1, embedding_dim, frames)`.
pub fn speaker_condition(dvec: &Array1<f32>, frames: usize) -> Array3<f32> {
    Array3::from_shape_fn((1, dvec.len(), frames), |(_, i, _)| dvec[i])
}

/// Handle to the mel generator ONNX graphs.
pub struct Ppg2Mel {
    /// Encoder over the posteriorgram and speaker condition
    encoder: Session,
    /// Decoder update part
    decoder: Session,
    /// A post network to adjust the outputs
    postnet: Session,
    config: Ppg2MelConfig,
}

/// Recurrent state carried between decoder steps. The attention fields guide the decoder
/// forwards through the encoded sequence, the LSTM hidden and cell states are the memory of the
/// two recurrent layers and `decoder_input` is the previously generated mel frame.
struct DecoderState {
    /// Input to the decoder LSTM
    decoder_input: Array2<f32>,
    /// Hidden state of the attention LSTM node
    attention_hidden: Array2<f32>,
    /// Cell state of the attention LSTM node
    attention_cell: Array2<f32>,
    /// Hidden state of the decoder LSTM node
    decoder_hidden: Array2<f32>,
    /// Cell state of the decoder LSTM node
    decoder_cell: Array2<f32>,
    attention_weights: Array2<f32>,
    /// Cumulative weights of the attention mechanism
    attention_weights_cum: Array2<f32>,
    /// Output of the attention part of the decoder from the previous step
    attention_context: Array2<f32>,
    /// True past the end of the sequence, only relevant for batches
    mask: Array2<bool>,
}

impl DecoderState {
    /// Creates a zeroed decoder state for an encoder output of shape `(batch, frames, dim)`.
    fn new(memory: &ArrayViewD<f32>, config: &Ppg2MelConfig) -> Self {
        let bs = memory.shape()[0];
        let seq_len = memory.shape()[1];

        Self {
            decoder_input: Array2::zeros((bs, config.n_mel_channels)),
            attention_hidden: Array2::zeros((bs, config.attention_rnn_dim)),
            attention_cell: Array2::zeros((bs, config.attention_rnn_dim)),
            decoder_hidden: Array2::zeros((bs, config.decoder_rnn_dim)),
            decoder_cell: Array2::zeros((bs, config.decoder_rnn_dim)),
            attention_weights: Array2::zeros((bs, seq_len)),
            attention_weights_cum: Array2::zeros((bs, seq_len)),
            attention_context: Array2::zeros((bs, config.encoder_embedding_dim)),
            mask: Array2::from_elem((bs, seq_len), false),
        }
    }
}

impl Ppg2Mel {
    /// Load the mel generator from a directory containing the three graphs and optionally a
    /// `config.json`.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let config = Ppg2MelConfig::load(path)?;
        debug!("Mel generator config: {:?}", config);

        // Context is added to the error so we can tell easily which network messes things up
        let encoder = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level1)?
            .with_model_from_file(path.join("encoder.onnx"))
            .context("converting encoder to runnable model")?;

        let decoder = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level1)?
            .with_model_from_file(path.join("decoder_iter.onnx"))
            .context("converting decoder_iter to runnable model")?;

        let postnet = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level1)?
            .with_model_from_file(path.join("postnet.onnx"))
            .context("converting postnet to runnable model")?;

        Ok(Self {
            encoder,
            decoder,
            postnet,
            config,
        })
    }

    pub fn config(&self) -> &Ppg2MelConfig {
        &self.config
    }

    /// Run the decoder until the gate fires, then the postnet over the stacked frames.
    fn run_decoder(
        &self,
        memory: &Array<f32, IxDyn>,
        processed_memory: &Array<f32, IxDyn>,
        state: &DecoderState,
    ) -> anyhow::Result<Array2<f32>> {
        let mut inputs = inputs![
            "decoder_input" => state.decoder_input.view(),
            "attention_hidden" => state.attention_hidden.view(),
            "attention_cell" => state.attention_cell.view(),
            "decoder_hidden" => state.decoder_hidden.view(),
            "decoder_cell" => state.decoder_cell.view(),
            "attention_weights" => state.attention_weights.view(),
            "attention_weights_cum" => state.attention_weights_cum.view(),
            "attention_context" => state.attention_context.view(),
            "memory" => memory.view(),
            "processed_memory" => processed_memory.view(),
            "mask" => state.mask.view()
        ]?;

        let mut mel_spec = Array2::zeros((0, self.config.n_mel_channels));

        for i in 0..self.config.max_decoder_steps {
            let mut infer = self.decoder.run(inputs)?;

            let gate = {
                let gate_prediction = infer["gate_prediction"].extract_tensor::<f32>()?;
                let mel_output = infer["decoder_output"].extract_tensor::<f32>()?;
                let mel_output = mel_output.view().clone().into_dimensionality::<Ix2>()?;

                mel_spec = concatenate(Axis(0), &[mel_spec.view(), mel_output])
                    .context("Joining decoder iter output")?;

                let gate = gate_prediction.view().iter().next().copied();
                gate.context("empty gate prediction")?
            };

            if sigmoid(gate) > self.config.gate_threshold {
                debug!("Stopping after {} steps", i + 1);
                break;
            }
            if i + 1 == self.config.max_decoder_steps {
                debug!("Reached max decoder steps without the gate firing");
                break;
            }

            // The outputs are moved into the next step's inputs, the names differ only by the
            // `out_` prefix
            inputs = inputs![
                "memory" => memory.view(),
                "processed_memory" => processed_memory.view(),
                "mask" => state.mask.view(),
            ]?;
            inputs.insert(
                "decoder_input",
                infer
                    .remove("decoder_output")
                    .context("decoder_iter has no output 'decoder_output'")?,
            );
            for name in [
                "attention_hidden",
                "attention_cell",
                "decoder_hidden",
                "decoder_cell",
                "attention_weights",
                "attention_weights_cum",
                "attention_context",
            ] {
                let output = format!("out_{}", name);
                let value = infer
                    .remove(output.as_str())
                    .with_context(|| format!("decoder_iter has no output '{}'", output))?;
                inputs.insert(name, value);
            }
        }

        // (frames, mels) to (1, mels, frames)
        let mel_spec = mel_spec.t().insert_axis(Axis(0));

        let post = self.postnet.run(inputs![mel_spec.view()]?)?;

        let post = post["mel_outputs_postnet"]
            .extract_tensor::<f32>()?
            .view()
            .clone()
            .remove_axis(Axis(0))
            .into_dimensionality()?
            .into_owned();

        Ok(post)
    }

    /// Generates a `(n_mel_channels, frames)` mel-spectrogram from the `(1, features, frames)`
    /// model input built by [`crate::align::to_model_input`] and the target speaker d-vector.
    pub fn infer(&self, features: &Array3<f32>, dvec: &Array1<f32>) -> anyhow::Result<Array2<f32>> {
        let frames = features.shape()[2];
        if features.shape()[0] != 1 || frames == 0 {
            return Err(VcError::UnexpectedShape {
                name: "mel generator input",
                shape: features.shape().to_vec(),
            }
            .into());
        }
        let speaker = speaker_condition(dvec, frames);
        let input_lengths = arr1(&[frames as i64]);

        let encoder_outputs = self.encoder.run(inputs![
            "ppg" => features.view(),
            "speaker" => speaker.view(),
            "input_lengths" => input_lengths,
        ]?)?;

        let memory: Tensor<f32> = encoder_outputs["memory"].extract_tensor()?;
        let processed_memory: Tensor<f32> = encoder_outputs["processed_memory"].extract_tensor()?;

        let decoder_state = DecoderState::new(&memory.view(), &self.config);

        let memory = memory.view().to_owned();
        let processed_memory = processed_memory.view().to_owned();

        self.run_decoder(&memory, &processed_memory, &decoder_state)
    }
}
