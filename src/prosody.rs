//! Hand computed prosodic features. The posteriorgram carries the linguistic content but throws
//! away most of the loudness and voicing information, so log-energy and zero-crossing rate are
//! computed per frame on the same grid as the posteriorgram and appended to it.
//!
//! The grid is defined by a hop of 160 samples (10ms at 16kHz) and a 512 sample analysis
//! window. The posteriorgram extractor looks at 7 frames of context either side of the frame
//! it's predicting, so the waveform is zero padded to give it full context at the edges and the
//! frames which only exist because of that padding are trimmed back off afterwards.

/// Samples between consecutive frames.
pub const HOP_LENGTH: usize = 160;
/// Samples in each analysis window.
pub const WINDOW_LENGTH: usize = 512;
/// Frames of context the posteriorgram extractor consumes on each side.
pub const CONTEXT_FRAMES: usize = 7;
/// Frames of context the extractor's own framing already accounts for.
const EXTRACTOR_OVERLAP_FRAMES: usize = 3;
/// Zeros added to each side of the waveform, `512 + 160 * (7 - 3)`.
pub const PADDING: usize = WINDOW_LENGTH + HOP_LENGTH * (CONTEXT_FRAMES - EXTRACTOR_OVERLAP_FRAMES);

/// Full scale of a 16-bit sample.
const PCM_SCALE: f32 = 32768.0;
/// Level the energy gain normalises the loudest sample to.
const TARGET_PEAK: f32 = 0.8;
const LOG_FLOOR: f32 = 1e-8;

/// Per frame prosody features, both sequences always have the same length.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProsodyFeatures {
    /// Natural log of the gain adjusted window energy
    pub log_energy: Vec<f32>,
    /// Fraction of adjacent sample pairs in the window whose sign differs
    pub zcr: Vec<f32>,
}

impl ProsodyFeatures {
    pub fn len(&self) -> usize {
        self.log_energy.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log_energy.is_empty()
    }

    /// `ln(zcr + 1e-8)`, the form the mel generator was trained on.
    pub fn log_zcr(&self) -> impl Iterator<Item = f32> + '_ {
        self.zcr.iter().map(|x| (x + LOG_FLOOR).ln())
    }
}

/// Zero pads the waveform symmetrically with [`PADDING`] samples on each side.
pub fn pad_waveform(samples: &[f32]) -> Vec<f32> {
    let mut padded = Vec::with_capacity(samples.len() + 2 * PADDING);
    padded.resize(PADDING, 0.0);
    padded.extend_from_slice(samples);
    padded.resize(samples.len() + 2 * PADDING, 0.0);
    padded
}

/// Number of slots in the frame grid of a waveform with `len` samples, `ceil(len / 160)`.
pub fn frame_count(len: usize) -> usize {
    len.div_ceil(HOP_LENGTH)
}

/// Number of grid slots which have a complete analysis window behind them. Only these get
/// features computed.
pub fn full_window_count(len: usize) -> usize {
    if len < WINDOW_LENGTH {
        0
    } else {
        (len - WINDOW_LENGTH) / HOP_LENGTH + 1
    }
}

/// Length of the feature sequences [`extract`] returns for a padded waveform of `len` samples.
pub fn trimmed_frame_count(len: usize) -> usize {
    full_window_count(len).saturating_sub(2 * CONTEXT_FRAMES)
}

/// Gain applied to window energies so the loudest sample of the padded waveform sits at 80%
/// of full scale. A silent waveform gets unit gain rather than an infinite one.
fn energy_gain(padded: &[f32]) -> f32 {
    let peak = padded.iter().fold(0.0f32, |acc, x| acc.max(x.abs()));
    if peak > 0.0 {
        PCM_SCALE * TARGET_PEAK / peak
    } else {
        1.0
    }
}

/// Sign with zero kept distinct from both positive and negative.
fn sign(x: f32) -> i8 {
    if x > 0.0 {
        1
    } else if x < 0.0 {
        -1
    } else {
        0
    }
}

fn zero_crossing_rate(segment: &[f32]) -> f32 {
    let crossings = segment
        .windows(2)
        .filter(|pair| sign(pair[0]) != sign(pair[1]))
        .count();
    crossings as f32 / (segment.len() - 1) as f32
}

/// Computes log-energy and zero-crossing rate for a waveform already padded with
/// [`pad_waveform`] and scaled to the 16-bit range. The frames introduced by the padding are
/// trimmed so the output lines up with the posteriorgram.
pub fn extract(padded: &[f32]) -> ProsodyFeatures {
    let gain_root = energy_gain(padded).sqrt();
    let frames = full_window_count(padded.len());

    let mut log_energy = Vec::with_capacity(frames);
    let mut zcr = Vec::with_capacity(frames);
    for start in (0..frames).map(|i| i * HOP_LENGTH) {
        let segment = padded[start..start + WINDOW_LENGTH]
            .iter()
            .map(|x| x / PCM_SCALE)
            .collect::<Vec<_>>();
        let energy = segment.iter().map(|x| x * x).sum::<f32>();
        log_energy.push((gain_root * energy + LOG_FLOOR).ln());
        zcr.push(zero_crossing_rate(&segment));
    }

    ProsodyFeatures {
        log_energy: trim_context(log_energy),
        zcr: trim_context(zcr),
    }
}

fn trim_context(mut frames: Vec<f32>) -> Vec<f32> {
    if frames.len() <= 2 * CONTEXT_FRAMES {
        return vec![];
    }
    frames.truncate(frames.len() - CONTEXT_FRAMES);
    frames.drain(..CONTEXT_FRAMES);
    frames
}

#[cfg(test)]
mod test {
    use super::*;

    fn noise(len: usize) -> Vec<f32> {
        // Cheap deterministic pseudo random signal, a LCG is plenty for this
        let mut state = 12345u32;
        (0..len)
            .map(|_| {
                state = state.wrapping_mul(1103515245).wrapping_add(12345);
                ((state >> 16) as f32 / 32768.0 - 1.0) * 10000.0
            })
            .collect()
    }

    #[test]
    fn padding_is_symmetric() {
        assert_eq!(PADDING, 1152);
        let padded = pad_waveform(&[1.0, 2.0, 3.0]);
        assert_eq!(padded.len(), 3 + 2 * 1152);
        assert!(padded[..1152].iter().all(|x| *x == 0.0));
        assert_eq!(&padded[1152..1155], &[1.0, 2.0, 3.0]);
        assert!(padded[1155..].iter().all(|x| *x == 0.0));
    }

    #[test]
    fn frame_grid_sizes() {
        assert_eq!(frame_count(0), 0);
        assert_eq!(frame_count(160), 1);
        assert_eq!(frame_count(161), 2);
        assert_eq!(frame_count(16000), 100);

        assert_eq!(full_window_count(511), 0);
        assert_eq!(full_window_count(512), 1);
        assert_eq!(full_window_count(671), 1);
        assert_eq!(full_window_count(672), 2);
    }

    #[test]
    fn trimmed_length_matches_grid() {
        // Below roughly 400 samples the padding frames are all there is
        for len in [0, 100] {
            assert!(extract(&pad_waveform(&noise(len))).is_empty());
        }
        for len in [1600, 16000, 16001, 23456] {
            let padded = pad_waveform(&noise(len));
            let features = extract(&padded);
            let filled = full_window_count(padded.len());
            assert!(filled <= frame_count(padded.len()));
            assert_eq!(features.len(), filled - 2 * CONTEXT_FRAMES);
            assert_eq!(features.len(), trimmed_frame_count(padded.len()));
            assert_eq!(features.zcr.len(), features.log_energy.len());
        }
    }

    #[test]
    fn one_second_gives_one_hundred_frames() {
        // 16000 + 2304 samples, 112 full windows, minus the 14 context frames
        let padded = pad_waveform(&noise(16000));
        assert_eq!(frame_count(padded.len()), 115);
        assert_eq!(extract(&padded).len(), 98);
    }

    #[test]
    fn deterministic() {
        let padded = pad_waveform(&noise(8000));
        assert_eq!(extract(&padded), extract(&padded));
    }

    #[test]
    fn zcr_of_alternating_signal() {
        let alternating = (0..512)
            .map(|i| if i % 2 == 0 { 1.0 } else { -1.0 })
            .collect::<Vec<f32>>();
        assert_eq!(zero_crossing_rate(&alternating), 1.0);
        assert_eq!(zero_crossing_rate(&[1.0; 512]), 0.0);
        // Zero is its own sign so 1, 0, 1 crosses twice
        assert_eq!(zero_crossing_rate(&[1.0, 0.0, 1.0]), 1.0);
    }

    #[test]
    fn silence_has_floor_energy() {
        let padded = pad_waveform(&vec![0.0; 4000]);
        let features = extract(&padded);
        assert!(!features.is_empty());
        for e in &features.log_energy {
            assert!((e - LOG_FLOOR.ln()).abs() < 1e-3);
        }
        assert!(features.zcr.iter().all(|x| *x == 0.0));
        assert!(features.log_zcr().all(|x| (x - LOG_FLOOR.ln()).abs() < 1e-3));
    }

    #[test]
    fn energy_is_gain_normalised() {
        // Scaling the input changes the energy by the square of the scale but the gain by the
        // inverse, so the log energies shift by ln(scale^1.5)
        let quiet = pad_waveform(&noise(4000));
        let loud = quiet.iter().map(|x| x * 2.0).collect::<Vec<_>>();
        let a = extract(&quiet);
        let b = extract(&loud);
        let shift = 2.0f32.powf(1.5).ln();
        for (x, y) in a.log_energy.iter().zip(b.log_energy.iter()) {
            if *x > -10.0 {
                assert!((y - x - shift).abs() < 1e-3, "{} {}", x, y);
            }
        }
        assert_eq!(a.zcr, b.zcr);
    }
}
