use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_TARGET_STEM: &str = "vocals";
pub const DEFAULT_MODEL: &str = "htdemucs";

#[derive(Clone, Debug)]
pub struct AudioData {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioData {
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Silent buffer with the same shape as `self`.
    pub fn silence_like(&self) -> Self {
        Self {
            samples: vec![0.0; self.samples.len()],
            sample_rate: self.sample_rate,
            channels: self.channels,
        }
    }
}

/// Body of `POST /predict`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SeparationRequest {
    /// Base64-encoded audio file. Optional on the wire so that a missing
    /// payload is reported as a decoding error.
    #[serde(default)]
    pub audio_content: Option<String>,
    #[serde(default = "default_target_stem")]
    pub target_stem: String,
    #[serde(default = "default_model")]
    pub model: String,
}

impl SeparationRequest {
    pub fn new(audio_content: impl Into<String>) -> Self {
        Self {
            audio_content: Some(audio_content.into()),
            target_stem: default_target_stem(),
            model: default_model(),
        }
    }
}

fn default_target_stem() -> String {
    DEFAULT_TARGET_STEM.into()
}

fn default_model() -> String {
    DEFAULT_MODEL.into()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SeparationResult {
    /// Base64-encoded container bytes of the requested stem.
    pub vocal_audio: String,
    /// Base64-encoded container bytes of everything except the requested stem.
    pub bg_audio: String,
    pub target_stem: String,
    pub content_type: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StemFile {
    pub name: String,
    pub path: PathBuf,
}

/// Raw per-stem files written by the external separator.
#[derive(Clone, Debug, Default)]
pub struct SeparationOutputSet {
    pub stems: Vec<StemFile>,
}

impl SeparationOutputSet {
    pub fn is_empty(&self) -> bool {
        self.stems.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.stems.iter().map(|s| s.name.clone()).collect()
    }

    /// Splits the set into the stem named exactly `target` and all others.
    /// Matching is case-sensitive; no aliases.
    pub fn split_target(&self, target: &str) -> Option<(&StemFile, Vec<&StemFile>)> {
        let hit = self.stems.iter().find(|s| s.name == target)?;
        let rest = self.stems.iter().filter(|s| s.name != target).collect();
        Some((hit, rest))
    }
}

/// Encoded container bytes for the two returned tracks.
#[derive(Clone, Debug)]
pub struct SeparatedTracks {
    pub target: Vec<u8>,
    pub background: Vec<u8>,
}
