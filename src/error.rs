//! Errors a caller may want to match on. Everything else is propagated as `anyhow::Error` with
//! context attached, these get carried inside it and can be recovered with `downcast_ref`.
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VcError {
    /// The prosody features and the posteriorgram disagree on how many frames the input has.
    #[error("Frame length mismatched. {ppg} != {prosody}")]
    FrameMismatch { ppg: usize, prosody: usize },
    #[error("speaker '{0}' not found in the embedding store")]
    UnknownSpeaker(String),
    #[error("speaker '{0}' has no reference embeddings")]
    EmptyEmbedding(String),
    #[error("audio file '{0}' contains no samples")]
    EmptyAudio(String),
    #[error("{name} has unexpected shape {shape:?}")]
    UnexpectedShape { name: &'static str, shape: Vec<usize> },
}
