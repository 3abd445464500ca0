//! Hyper-parameters of the exported mel generator. Every graph directory can ship a
//! `config.json` next to the ONNX files so a retrained model with different dimensions can be
//! swapped in without touching the code. Missing fields fall back to the Tacotron2 defaults.
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

/// Name of the config file looked for inside a model directory
pub const CONFIG_FILE: &str = "config.json";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Ppg2MelConfig {
    pub n_mel_channels: usize,
    pub attention_rnn_dim: usize,
    pub decoder_rnn_dim: usize,
    pub encoder_embedding_dim: usize,
    /// Sigmoid of the gate output above which decoding stops
    pub gate_threshold: f32,
    pub max_decoder_steps: usize,
}

impl Default for Ppg2MelConfig {
    fn default() -> Self {
        Self {
            n_mel_channels: 80,
            attention_rnn_dim: 1024,
            decoder_rnn_dim: 1024,
            encoder_embedding_dim: 512,
            gate_threshold: 0.5,
            max_decoder_steps: 1000,
        }
    }
}

impl Ppg2MelConfig {
    /// Loads `config.json` from the model directory, or the defaults if there isn't one.
    pub fn load(dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = dir.as_ref().join(CONFIG_FILE);
        if !path.exists() {
            info!("No {} in {}, using defaults", CONFIG_FILE, dir.as_ref().display());
            return Ok(Self::default());
        }
        let text =
            fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        let config =
            serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn partial_config_keeps_defaults() {
        let config: Ppg2MelConfig =
            serde_json::from_str(r#"{"gate_threshold": 0.6, "max_decoder_steps": 2000}"#).unwrap();
        assert_eq!(config.gate_threshold, 0.6);
        assert_eq!(config.max_decoder_steps, 2000);
        assert_eq!(config.n_mel_channels, 80);
        assert_eq!(config.encoder_embedding_dim, 512);
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(Ppg2MelConfig::load(dir.path()).unwrap(), Ppg2MelConfig::default());

        fs::write(dir.path().join(CONFIG_FILE), r#"{"n_mel_channels": 100}"#).unwrap();
        assert_eq!(Ppg2MelConfig::load(dir.path()).unwrap().n_mel_channels, 100);

        fs::write(dir.path().join(CONFIG_FILE), "not json").unwrap();
        assert!(Ppg2MelConfig::load(dir.path()).is_err());
    }
}
