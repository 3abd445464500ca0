//! Reading and writing WAV files. Everything downstream of the loader works on mono `f32` samples
//! at a fixed rate, so the loader mixes channels down and resamples on the way in.
use crate::error::VcError;
use anyhow::Context;
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use rubato::{FftFixedIn, Resampler};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use tracing::debug;

/// Rate the posteriorgram extractor was trained on.
pub const SOURCE_SAMPLE_RATE: u32 = 16000;

/// Scale between `[-1, 1]` floats and 16-bit PCM.
pub const MAX_WAV_VALUE: f32 = 32768.0;

const RESAMPLE_CHUNK: usize = 1024;

#[derive(Clone, Debug, PartialEq)]
pub struct Waveform {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl Waveform {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Rescales `[-1, 1]` samples to the 16-bit integer range
    pub fn into_pcm_range(mut self) -> Self {
        self.samples.iter_mut().for_each(|x| *x *= MAX_WAV_VALUE);
        self
    }
}

/// Load a WAV file as mono samples in `[-1, 1]`, resampled to `sample_rate`.
pub fn load_wav(path: impl AsRef<Path>, sample_rate: u32) -> anyhow::Result<Waveform> {
    let path = path.as_ref();
    let reader =
        WavReader::open(path).with_context(|| format!("opening {}", path.display()))?;
    let spec = reader.spec();
    debug!(
        "{}: {} channels, {}Hz, {} bits {:?}",
        path.display(),
        spec.channels,
        spec.sample_rate,
        spec.bits_per_sample,
        spec.sample_format
    );

    let interleaved = match spec.sample_format {
        SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<Vec<_>, _>>()?,
        SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|x| x.map(|x| x as f32 / scale))
                .collect::<Result<Vec<_>, _>>()?
        }
    };

    if interleaved.is_empty() {
        return Err(VcError::EmptyAudio(path.display().to_string()).into());
    }

    let mono = mix_to_mono(&interleaved, spec.channels as usize);
    let samples = resample(&mono, spec.sample_rate, sample_rate)
        .with_context(|| format!("resampling {}", path.display()))?;
    Ok(Waveform::new(samples, sample_rate))
}

/// Averages interleaved channels into a single channel.
pub fn mix_to_mono(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Band-limited resampling. The output is trimmed to `ceil(len * to / from)` samples with the
/// resampler's delay removed so it lines up with the input.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> anyhow::Result<Vec<f32>> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }
    let mut resampler = FftFixedIn::<f32>::new(
        from_rate as usize,
        to_rate as usize,
        RESAMPLE_CHUNK,
        2,
        1,
    )?;

    let expected_len =
        (samples.len() as f64 * to_rate as f64 / from_rate as f64).ceil() as usize;
    let delay = resampler.output_delay();
    let mut out = Vec::with_capacity(expected_len + delay + RESAMPLE_CHUNK);

    let mut pos = 0;
    // Keep feeding zero padded chunks until the delayed tail has come out as well
    while out.len() < expected_len + delay {
        let needed = resampler.input_frames_next();
        let end = (pos + needed).min(samples.len());
        let mut chunk = vec![0.0; needed];
        if pos < end {
            chunk[..end - pos].copy_from_slice(&samples[pos..end]);
        }
        pos += needed;

        let block = resampler.process(&[chunk], None)?;
        out.extend_from_slice(&block[0]);
    }

    Ok(out[delay..delay + expected_len].to_vec())
}

/// Creates a 16-bit mono writer, the only format the output needs.
pub fn create_wav_writer(
    output: &Path,
    sample_rate: u32,
) -> anyhow::Result<WavWriter<BufWriter<File>>> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let w = WavWriter::create(output, spec)
        .with_context(|| format!("creating {}", output.display()))?;
    Ok(w)
}

/// Writes `[-1, 1]` samples as 16-bit PCM. Values outside the range are clipped rather than
/// allowed to wrap around.
pub fn write_wav(output: &Path, samples: &[f32], sample_rate: u32) -> anyhow::Result<()> {
    let mut writer = create_wav_writer(output, sample_rate)?;
    for sample in samples {
        writer.write_sample(to_pcm16(*sample))?;
    }
    writer.finalize()?;
    Ok(())
}

fn to_pcm16(sample: f32) -> i16 {
    (sample * MAX_WAV_VALUE).clamp(i16::MIN as f32, i16::MAX as f32) as i16
}
