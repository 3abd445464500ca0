//! Orchestration of the whole conversion. Every source utterance is analysed once (posteriorgram
//! plus prosody) and then resynthesised once per target speaker.
use crate::align::{align_features, to_model_input};
use crate::audio::{self, SOURCE_SAMPLE_RATE};
use crate::denoiser::Denoiser;
use crate::error::VcError;
use crate::ppg::PpgExtractor;
use crate::ppg2mel::Ppg2Mel;
use crate::prosody::{self, pad_waveform};
use crate::speaker::DvecStore;
use crate::waveglow::{Precision, WaveGlow};
use anyhow::Context;
use ndarray::{Array1, Array2, Array3};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

/// Locations of the three pretrained models.
#[derive(Clone, Debug)]
pub struct ModelPaths {
    /// Directory holding the mel generator graphs
    pub ppg2mel: PathBuf,
    pub waveglow: PathBuf,
    pub ppg: PathBuf,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SynthesisOptions {
    /// Scale of the vocoder's latent noise
    pub sigma: f32,
    /// Denoiser strength, the denoiser isn't created at all when this isn't positive
    pub denoiser_strength: f32,
    pub precision: Precision,
}

impl Default for SynthesisOptions {
    fn default() -> Self {
        Self {
            sigma: 0.8,
            denoiser_strength: 0.08,
            precision: Precision::Full,
        }
    }
}

/// The two halves of a conversion, split so the analysis can be shared between targets.
pub trait Synthesiser {
    /// Loads a source utterance and builds the `(1, features, frames)` mel generator input.
    fn prepare_source(&self, path: &Path) -> anyhow::Result<Array3<f32>>;

    /// Generates `[-1, 1]` audio for the prepared source in the voice of `dvec`.
    fn synthesise(&self, features: &Array3<f32>, dvec: &Array1<f32>) -> anyhow::Result<Vec<f32>>;
}

/// Builds the mel generator input from a padded 16-bit range waveform and its posteriorgram.
pub fn build_model_input(padded: &[f32], ppg: &Array2<f32>) -> Result<Array3<f32>, VcError> {
    let prosody = prosody::extract(padded);
    let features = align_features(ppg, &prosody)?;
    Ok(to_model_input(&features))
}

pub struct VoiceConverter {
    ppg: PpgExtractor,
    ppg2mel: Ppg2Mel,
    vocoder: WaveGlow,
    denoiser: Option<Denoiser>,
    options: SynthesisOptions,
}

impl VoiceConverter {
    pub fn load(paths: &ModelPaths, options: SynthesisOptions) -> anyhow::Result<Self> {
        info!("Loading posteriorgram model");
        let ppg = PpgExtractor::load(&paths.ppg)?;
        info!("Loading mel generator");
        let ppg2mel = Ppg2Mel::load(&paths.ppg2mel)?;
        info!("Loading vocoder");
        let vocoder = WaveGlow::load(&paths.waveglow, options.precision)?;

        let denoiser = if options.denoiser_strength > 0.0 {
            info!("Capturing vocoder bias for the denoiser");
            Some(Denoiser::new(&vocoder, ppg2mel.config().n_mel_channels)?)
        } else {
            None
        };

        Ok(Self {
            ppg,
            ppg2mel,
            vocoder,
            denoiser,
            options,
        })
    }
}

impl Synthesiser for VoiceConverter {
    fn prepare_source(&self, path: &Path) -> anyhow::Result<Array3<f32>> {
        let source = audio::load_wav(path, SOURCE_SAMPLE_RATE)?.into_pcm_range();
        let padded = pad_waveform(&source.samples);

        let ppg = self
            .ppg
            .infer(&padded)
            .with_context(|| format!("extracting posteriorgram for {}", path.display()))?;
        debug!("{}: ppg {:?}", path.display(), ppg.shape());

        let features = build_model_input(&padded, &ppg)?;
        Ok(features)
    }

    fn synthesise(&self, features: &Array3<f32>, dvec: &Array1<f32>) -> anyhow::Result<Vec<f32>> {
        let mel = self.ppg2mel.infer(features, dvec)?;
        debug!("Generated mel {:?}", mel.shape());
        let audio = self.vocoder.infer(&mel, self.options.sigma)?;
        match &self.denoiser {
            Some(denoiser) => Ok(denoiser.denoise(&audio, self.options.denoiser_strength)),
            None => Ok(audio),
        }
    }
}

/// What to convert and where to put it.
#[derive(Clone, Debug)]
pub struct ConversionPlan {
    /// Root containing one directory of utterances per source group
    pub source_root: PathBuf,
    pub sources: Vec<String>,
    /// Target speaker ids, every speaker in the store when empty
    pub targets: Vec<String>,
    pub output_dir: PathBuf,
    pub output_sample_rate: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConversionSummary {
    pub sources: usize,
    pub outputs: usize,
}

impl ConversionPlan {
    /// Files in a source group's directory, sorted so runs are repeatable.
    pub fn source_files(&self, group: &str) -> anyhow::Result<Vec<PathBuf>> {
        let dir = self.source_root.join(group);
        let mut files = vec![];
        for entry in
            fs::read_dir(&dir).with_context(|| format!("listing {}", dir.display()))?
        {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }

    /// `{target}_{source}_{file name}` inside the output directory
    pub fn output_path(&self, target: &str, source: &str, file_name: &str) -> PathBuf {
        self.output_dir
            .join(format!("{}_{}_{}", target, source, file_name))
    }

    fn target_ids(&self, store: &DvecStore) -> Vec<String> {
        if self.targets.is_empty() {
            store.speaker_ids().map(|x| x.to_string()).collect()
        } else {
            self.targets.clone()
        }
    }

    /// Converts every source file to every target. Any failure stops the whole run, a frame
    /// mismatch in particular means the models and the framing disagree so carrying on with
    /// other files would only produce garbage.
    pub fn run(
        &self,
        synthesiser: &impl Synthesiser,
        store: &DvecStore,
    ) -> anyhow::Result<ConversionSummary> {
        fs::create_dir_all(&self.output_dir)
            .with_context(|| format!("creating {}", self.output_dir.display()))?;

        // Resolve every embedding up front so a typo in a target id fails before any work
        let targets = self
            .target_ids(store)
            .into_iter()
            .map(|id| store.mean_embedding(&id).map(|dvec| (id, dvec)))
            .collect::<Result<Vec<_>, _>>()?;

        let mut summary = ConversionSummary::default();
        for source in &self.sources {
            let files = self.source_files(source)?;
            for (i, path) in files.iter().enumerate() {
                let file_name = path
                    .file_name()
                    .map(|x| x.to_string_lossy().to_string())
                    .unwrap_or_default();

                let features = match synthesiser.prepare_source(path) {
                    Ok(features) => features,
                    Err(e) => {
                        if let Some(mismatch @ VcError::FrameMismatch { .. }) =
                            e.downcast_ref::<VcError>()
                        {
                            error!("Error. {}", mismatch);
                        }
                        return Err(e.context(format!("preparing {}", path.display())));
                    }
                };
                summary.sources += 1;

                for (target, dvec) in &targets {
                    info!(
                        "Source: {}, {}/{}, Wav: {}, Target: {}",
                        source,
                        i + 1,
                        files.len(),
                        file_name,
                        target
                    );
                    let audio = synthesiser.synthesise(&features, dvec)?;
                    let output = self.output_path(target, source, &file_name);
                    audio::write_wav(&output, &audio, self.output_sample_rate)?;
                    summary.outputs += 1;
                }
            }
        }
        info!(
            "Converted {} source files into {} outputs",
            summary.sources, summary.outputs
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::prosody::trimmed_frame_count;
    use ndarray::{arr2, Array2};
    use std::collections::BTreeMap;

    /// Stand in for the models, the posteriorgram is a constant with a configurable frame
    /// offset so mismatches can be provoked.
    struct FakeSynthesiser {
        ppg_width: usize,
        frame_offset: isize,
    }

    impl Synthesiser for FakeSynthesiser {
        fn prepare_source(&self, path: &Path) -> anyhow::Result<Array3<f32>> {
            let source = audio::load_wav(path, SOURCE_SAMPLE_RATE)?.into_pcm_range();
            let padded = pad_waveform(&source.samples);
            let frames = trimmed_frame_count(padded.len()) as isize + self.frame_offset;
            let ppg = Array2::from_elem((frames as usize, self.ppg_width), 0.1);
            Ok(build_model_input(&padded, &ppg)?)
        }

        fn synthesise(
            &self,
            features: &Array3<f32>,
            dvec: &Array1<f32>,
        ) -> anyhow::Result<Vec<f32>> {
            Ok(vec![dvec[0]; features.shape()[2]])
        }
    }

    fn setup(files: &[(&str, &str)]) -> (tempfile::TempDir, ConversionPlan, DvecStore) {
        let dir = tempfile::tempdir().unwrap();
        for (group, name) in files {
            let group_dir = dir.path().join("sources").join(group);
            fs::create_dir_all(&group_dir).unwrap();
            let samples = (0..8000).map(|i| ((i % 50) as f32 - 25.0) / 100.0).collect::<Vec<_>>();
            audio::write_wav(&group_dir.join(name), &samples, SOURCE_SAMPLE_RATE).unwrap();
        }

        let mut speakers = BTreeMap::new();
        speakers.insert("4".to_string(), arr2(&[[0.25f32, 0.0], [0.25, 1.0]]));
        speakers.insert("5".to_string(), arr2(&[[0.5f32, 0.0]]));
        let store = DvecStore::from_map(speakers);

        let plan = ConversionPlan {
            source_root: dir.path().join("sources"),
            sources: vec!["chinese".to_string(), "english".to_string()],
            targets: vec![],
            output_dir: dir.path().join("out"),
            output_sample_rate: 24000,
        };
        (dir, plan, store)
    }

    #[test]
    fn model_input_width() {
        let padded = pad_waveform(&vec![100.0; 4800]);
        let frames = trimmed_frame_count(padded.len());
        let ppg = Array2::from_elem((frames, 144), 1.0 / 144.0);

        let input = build_model_input(&padded, &ppg).unwrap();
        assert_eq!(input.shape(), &[1, 146, frames]);

        let short = Array2::from_elem((frames - 1, 144), 1.0 / 144.0);
        assert_eq!(
            build_model_input(&padded, &short),
            Err(VcError::FrameMismatch {
                ppg: frames - 1,
                prosody: frames
            })
        );
    }

    #[test]
    fn output_naming() {
        let (_dir, plan, _) = setup(&[]);
        assert_eq!(
            plan.output_path("5", "english", "E10001.wav"),
            plan.output_dir.join("5_english_E10001.wav")
        );
    }

    #[test]
    fn converts_every_pair() {
        let (_dir, plan, store) = setup(&[
            ("chinese", "b.wav"),
            ("chinese", "a.wav"),
            ("english", "c.wav"),
        ]);
        assert_eq!(
            plan.source_files("chinese")
                .unwrap()
                .iter()
                .map(|x| x.file_name().unwrap().to_str().unwrap())
                .collect::<Vec<_>>(),
            vec!["a.wav", "b.wav"]
        );

        let synth = FakeSynthesiser {
            ppg_width: 8,
            frame_offset: 0,
        };
        let summary = plan.run(&synth, &store).unwrap();
        assert_eq!(
            summary,
            ConversionSummary {
                sources: 3,
                outputs: 6
            }
        );

        for name in [
            "4_chinese_a.wav",
            "4_chinese_b.wav",
            "4_english_c.wav",
            "5_chinese_a.wav",
            "5_chinese_b.wav",
            "5_english_c.wav",
        ] {
            assert!(plan.output_dir.join(name).exists(), "missing {}", name);
        }
        let reader = hound::WavReader::open(plan.output_dir.join("5_english_c.wav")).unwrap();
        assert_eq!(reader.spec().sample_rate, 24000);
    }

    #[test]
    fn explicit_targets() {
        let (_dir, mut plan, store) = setup(&[("english", "c.wav")]);
        plan.sources = vec!["english".to_string()];
        plan.targets = vec!["5".to_string()];

        let synth = FakeSynthesiser {
            ppg_width: 8,
            frame_offset: 0,
        };
        let summary = plan.run(&synth, &store).unwrap();
        assert_eq!(summary.outputs, 1);
        assert!(!plan.output_dir.join("4_english_c.wav").exists());

        plan.targets = vec!["99".to_string()];
        let err = plan.run(&synth, &store).unwrap_err();
        assert_eq!(
            err.downcast_ref::<VcError>(),
            Some(&VcError::UnknownSpeaker("99".to_string()))
        );
    }

    #[test]
    fn mismatch_aborts_without_output() {
        let (_dir, plan, store) = setup(&[("chinese", "a.wav"), ("english", "c.wav")]);
        let synth = FakeSynthesiser {
            ppg_width: 8,
            frame_offset: 1,
        };

        let err = plan.run(&synth, &store).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<VcError>(),
            Some(VcError::FrameMismatch { .. })
        ));
        let outputs = fs::read_dir(&plan.output_dir).unwrap().count();
        assert_eq!(outputs, 0);
    }
}
