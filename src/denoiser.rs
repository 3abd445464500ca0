//! WaveGlow leaves a faint constant hiss in everything it generates. Running the vocoder on an
//! all-zero mel with no latent noise produces only that hiss, so its spectrum is kept as a bias
//! and scaled copies of it are subtracted from the magnitude of every generated frame.
use crate::stft::Stft;
use crate::waveglow::WaveGlow;
use ndarray::{Array1, Array2, Axis};
use tracing::debug;

const FILTER_LENGTH: usize = 1024;
const N_OVERLAP: usize = 4;
/// Frames of silent mel used to capture the bias
const BIAS_FRAMES: usize = 88;

pub struct Denoiser {
    stft: Stft,
    /// Magnitude of the first frame of the bias audio, one value per bin
    bias_spec: Array1<f32>,
}

impl Denoiser {
    /// Captures the bias of a vocoder by running it on silence.
    pub fn new(vocoder: &WaveGlow, n_mel_channels: usize) -> anyhow::Result<Self> {
        let silence = Array2::zeros((n_mel_channels, BIAS_FRAMES));
        let bias_audio = vocoder.infer(&silence, 0.0)?;
        debug!("Denoiser bias from {} samples", bias_audio.len());
        Ok(Self::from_bias_audio(&bias_audio))
    }

    pub fn from_bias_audio(bias_audio: &[f32]) -> Self {
        let stft = Stft::new(FILTER_LENGTH, FILTER_LENGTH / N_OVERLAP);
        let spec = stft.transform(bias_audio);
        let bias_spec = if spec.frames() == 0 {
            Array1::zeros(stft.n_bins())
        } else {
            spec.magnitude.index_axis(Axis(1), 0).to_owned()
        };
        Self { stft, bias_spec }
    }

    /// Subtracts `strength` times the bias spectrum from every frame, clamping at zero, and
    /// resynthesises with the original phase.
    pub fn denoise(&self, audio: &[f32], strength: f32) -> Vec<f32> {
        let spec = self.stft.transform(audio);
        let bias = self.bias_spec.view().insert_axis(Axis(1));
        let mut magnitude = spec.magnitude;
        magnitude.zip_mut_with(&bias, |x, b| *x = (*x - b * strength).max(0.0));
        self.stft.inverse(&magnitude, &spec.phase)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::f32::consts::PI;

    fn tone(len: usize, freq: f32, amplitude: f32) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * PI * freq * i as f32 / 22050.0).sin() * amplitude)
            .collect()
    }

    /// Stationary signal whose reflection at the start is seamless, so the first frame looks
    /// like every other one
    fn hiss(len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * PI * 5000.0 * i as f32 / 22050.0).cos() * 0.05)
            .collect()
    }

    fn energy(x: &[f32]) -> f32 {
        x.iter().map(|x| x * x).sum()
    }

    #[test]
    fn zero_strength_is_transparent() {
        let bias = tone(4096, 5000.0, 0.01);
        let denoiser = Denoiser::from_bias_audio(&bias);
        let audio = tone(256 * 40, 440.0, 0.5);

        let out = denoiser.denoise(&audio, 0.0);
        assert_eq!(out.len(), audio.len());
        for (a, b) in out[1024..].iter().zip(audio[1024..].iter()) {
            assert!((a - b).abs() < 1e-3);
        }
    }

    #[test]
    fn removes_bias_signature() {
        let hiss = hiss(256 * 40);
        let denoiser = Denoiser::from_bias_audio(&hiss);

        let denoised = denoiser.denoise(&hiss, 1.0);
        assert!(energy(&denoised[2048..8192]) < 0.05 * energy(&hiss[2048..8192]));

        let speech = tone(256 * 40, 300.0, 0.5);
        let kept = denoiser.denoise(&speech, 1.0);
        assert!(energy(&kept[2048..8192]) > 0.9 * energy(&speech[2048..8192]));
    }

    #[test]
    fn empty_bias_is_a_no_op() {
        let denoiser = Denoiser::from_bias_audio(&[]);
        assert!(denoiser.bias_spec.iter().all(|x| *x == 0.0));
        assert_eq!(denoiser.bias_spec.len(), 513);
    }
}
