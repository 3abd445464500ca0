//! Short-time Fourier transform with an inverse, used by the denoiser to work on the magnitude
//! of the vocoder output while keeping its phase.
use ndarray::Array2;
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::f32::consts::PI;
use std::sync::Arc;

/// Magnitude and phase of a signal, both `(filter_length / 2 + 1, frames)`.
#[derive(Clone, Debug)]
pub struct Spectrogram {
    pub magnitude: Array2<f32>,
    pub phase: Array2<f32>,
}

impl Spectrogram {
    pub fn frames(&self) -> usize {
        self.magnitude.ncols()
    }
}

pub struct Stft {
    filter_length: usize,
    hop_length: usize,
    window: Vec<f32>,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
}

/// Periodic Hann window
pub fn hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|n| 0.5 - 0.5 * (2.0 * PI * n as f32 / size as f32).cos())
        .collect()
}

impl Stft {
    /// The window length is always the filter length here, so a single size describes both.
    pub fn new(filter_length: usize, hop_length: usize) -> Self {
        let mut planner = FftPlanner::new();
        Self {
            filter_length,
            hop_length,
            window: hann_window(filter_length),
            forward: planner.plan_fft_forward(filter_length),
            inverse: planner.plan_fft_inverse(filter_length),
        }
    }

    pub fn n_bins(&self) -> usize {
        self.filter_length / 2 + 1
    }

    fn pad_length(&self) -> usize {
        self.filter_length / 2
    }

    pub fn transform(&self, signal: &[f32]) -> Spectrogram {
        let pad = self.pad_length();
        let padded = pad_reflect(signal, pad);
        let frames = if padded.len() < self.filter_length {
            0
        } else {
            (padded.len() - self.filter_length) / self.hop_length + 1
        };

        let n_bins = self.n_bins();
        let mut magnitude = Array2::zeros((n_bins, frames));
        let mut phase = Array2::zeros((n_bins, frames));
        let mut buffer = vec![Complex::new(0.0, 0.0); self.filter_length];

        for frame in 0..frames {
            let start = frame * self.hop_length;
            for (i, x) in buffer.iter_mut().enumerate() {
                *x = Complex::new(padded[start + i] * self.window[i], 0.0);
            }
            self.forward.process(&mut buffer);
            for (bin, value) in buffer.iter().take(n_bins).enumerate() {
                magnitude[[bin, frame]] = value.norm();
                phase[[bin, frame]] = value.arg();
            }
        }

        Spectrogram { magnitude, phase }
    }

    /// Windowed overlap-add inverse, normalised by the summed squared window so a transform
    /// followed by an inverse reproduces the input. The reflection padding is trimmed off so the
    /// output has `(frames - 1) * hop_length` samples.
    pub fn inverse(&self, magnitude: &Array2<f32>, phase: &Array2<f32>) -> Vec<f32> {
        let frames = magnitude.ncols();
        if frames == 0 {
            return vec![];
        }
        let n = self.filter_length;
        let n_bins = self.n_bins();
        let full_len = (frames - 1) * self.hop_length + n;

        let mut output = vec![0.0f32; full_len];
        let mut window_sum = vec![0.0f32; full_len];
        let mut buffer = vec![Complex::new(0.0, 0.0); n];

        for frame in 0..frames {
            for bin in 0..n_bins {
                buffer[bin] = Complex::from_polar(magnitude[[bin, frame]], phase[[bin, frame]]);
            }
            // Hermitian symmetry gives the negative frequencies
            for bin in n_bins..n {
                buffer[bin] = buffer[n - bin].conj();
            }
            self.inverse.process(&mut buffer);

            let start = frame * self.hop_length;
            for (i, x) in buffer.iter().enumerate() {
                output[start + i] += x.re / n as f32 * self.window[i];
                window_sum[start + i] += self.window[i] * self.window[i];
            }
        }

        for (x, w) in output.iter_mut().zip(window_sum.iter()) {
            if *w > f32::MIN_POSITIVE {
                *x /= w;
            }
        }

        let pad = self.pad_length();
        output[pad..full_len - pad].to_vec()
    }
}

/// Reflect pads without repeating the edge sample. Signals too short to reflect are zero padded
/// instead.
fn pad_reflect(signal: &[f32], pad: usize) -> Vec<f32> {
    let len = signal.len();
    let mut padded = Vec::with_capacity(len + 2 * pad);
    if len <= pad {
        padded.resize(pad, 0.0);
        padded.extend_from_slice(signal);
        padded.resize(len + 2 * pad, 0.0);
        return padded;
    }
    padded.extend((1..=pad).rev().map(|i| signal[i]));
    padded.extend_from_slice(signal);
    padded.extend((0..pad).map(|i| signal[len - 2 - i]));
    padded
}
