//! Target speaker embeddings. The store is an `.npz` archive with one array per speaker id, each
//! array holding a d-vector per reference utterance (`utterances x embedding_dim`). The speaker
//! encoder that produced them isn't part of this crate.
use crate::error::VcError;
use anyhow::Context;
use ndarray::{Array1, Array2, Axis};
use ndarray_npy::NpzReader;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Default, Clone)]
pub struct DvecStore {
    /// Per utterance embeddings keyed by speaker id
    speakers: BTreeMap<String, Array2<f32>>,
}

impl DvecStore {
    /// Opens a store from an `.npz` file
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let file =
            File::open(path).with_context(|| format!("opening dvec store {}", path.display()))?;
        let store = Self::from_reader(file)
            .with_context(|| format!("reading dvec store {}", path.display()))?;
        info!("Loaded embeddings for {} speakers", store.len());
        Ok(store)
    }

    fn from_reader(reader: impl Read + Seek) -> anyhow::Result<Self> {
        let mut npz = NpzReader::new(reader)?;
        let mut speakers = BTreeMap::new();
        for name in npz.names()? {
            let dvecs: Array2<f32> = npz
                .by_name(&name)
                .with_context(|| format!("loading embeddings for '{}'", name))?;
            debug!("Speaker {}: {:?}", name, dvecs.shape());
            let id = name.trim_end_matches(".npy").to_string();
            speakers.insert(id, dvecs);
        }
        Ok(Self { speakers })
    }

    pub fn from_map(speakers: BTreeMap<String, Array2<f32>>) -> Self {
        Self { speakers }
    }

    /// Number of speakers in the store
    pub fn len(&self) -> usize {
        self.speakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.speakers.is_empty()
    }

    /// Speaker ids in sorted order
    pub fn speaker_ids(&self) -> impl Iterator<Item = &str> {
        self.speakers.keys().map(|x| x.as_str())
    }

    /// Averages a speaker's reference utterance embeddings into a single d-vector.
    pub fn mean_embedding(&self, id: &str) -> Result<Array1<f32>, VcError> {
        let dvecs = self
            .speakers
            .get(id)
            .ok_or_else(|| VcError::UnknownSpeaker(id.to_string()))?;
        dvecs
            .mean_axis(Axis(0))
            .filter(|x| !x.is_empty())
            .ok_or_else(|| VcError::EmptyEmbedding(id.to_string()))
    }
}
