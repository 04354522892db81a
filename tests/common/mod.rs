#![allow(dead_code)]

use std::{
    f32::consts::PI,
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use stem_splitter_server::{
    core::separator::collect_stems, read_audio, write_audio, AudioData, InputLimits, OutputPolicy,
    Pipeline, Result, SeparationError, SeparationOutputSet, Separator, Workspace, WorkspaceManager,
};

pub const FOUR_STEMS: &[&str] = &["vocals", "drums", "bass", "other"];

pub fn sine(seconds: f32, sample_rate: u32, channels: u16, freq: f32) -> AudioData {
    let frames = (seconds * sample_rate as f32) as usize;
    let mut samples = Vec::with_capacity(frames * channels as usize);
    for i in 0..frames {
        let t = i as f32 / sample_rate as f32;
        let s = (2.0 * PI * freq * t).sin() * 0.4;
        for _ in 0..channels {
            samples.push(s);
        }
    }
    AudioData {
        samples,
        sample_rate,
        channels,
    }
}

pub fn wav_bytes(audio: &AudioData) -> Vec<u8> {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("clip.wav");
    write_audio(&path, audio).unwrap();
    fs::read(path).unwrap()
}

/// Decodes container bytes by writing them next to a temp file with `ext`.
pub fn decode_bytes(bytes: &[u8], ext: &str) -> AudioData {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join(format!("out.{ext}"));
    fs::write(&path, bytes).unwrap();
    read_audio(&path).unwrap()
}

pub fn pipeline_with(root: &Path, separator: impl Separator + 'static) -> Pipeline {
    Pipeline::new(
        WorkspaceManager::new(root),
        Box::new(separator),
        OutputPolicy::default(),
        InputLimits::default(),
    )
}

/// Splits the input evenly across a fixed set of stems, so the stems sum
/// back to the input.
pub struct MockSeparator {
    pub stems: Vec<&'static str>,
    pub delay: Option<Duration>,
    pub calls: Calls,
}

/// (staged input path, workspace path, first input sample) per call.
pub type Calls = Arc<Mutex<Vec<(PathBuf, PathBuf, f32)>>>;

impl MockSeparator {
    pub fn new(stems: &[&'static str]) -> Self {
        Self {
            stems: stems.to_vec(),
            delay: None,
            calls: Calls::default(),
        }
    }

    pub fn four_stems() -> Self {
        Self::new(FOUR_STEMS)
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Handle that stays readable after the separator is boxed into a pipeline.
    pub fn calls(&self) -> Calls {
        self.calls.clone()
    }
}

impl Separator for MockSeparator {
    fn separate(
        &self,
        input: &Path,
        _model_id: &str,
        workspace: &Workspace,
    ) -> Result<SeparationOutputSet> {
        assert!(input.starts_with(workspace.path()), "input must be staged in the workspace");
        let audio = read_audio(input)?;
        let first = audio.samples.iter().copied().find(|s| *s != 0.0).unwrap_or(0.0);
        self.calls.lock().unwrap().push((
            input.to_path_buf(),
            workspace.path().to_path_buf(),
            first,
        ));

        if let Some(d) = self.delay {
            thread::sleep(d);
        }

        let out_dir = workspace.path().join("separated");
        fs::create_dir_all(&out_dir)?;
        let share = 1.0 / self.stems.len() as f32;
        for stem in &self.stems {
            let part = AudioData {
                samples: audio.samples.iter().map(|s| s * share).collect(),
                sample_rate: audio.sample_rate,
                channels: audio.channels,
            };
            write_audio(out_dir.join(format!("{stem}.wav")), &part)?;
        }
        collect_stems(&out_dir)
    }
}

/// Always fails the way a crashed model process does.
#[derive(Default)]
pub struct CrashingSeparator {
    pub workspaces: Arc<Mutex<Vec<PathBuf>>>,
}

impl Separator for CrashingSeparator {
    fn separate(
        &self,
        _input: &Path,
        _model_id: &str,
        workspace: &Workspace,
    ) -> Result<SeparationOutputSet> {
        self.workspaces
            .lock()
            .unwrap()
            .push(workspace.path().to_path_buf());
        Err(SeparationError::SeparationExecution(
            "command failed: `python3 -m demucs.separate` (status: 1); stderr: CUDA out of memory".into(),
        ))
    }

    fn check(&self) -> Result<()> {
        Err(SeparationError::SeparationExecution("demucs is not accessible".into()))
    }
}

/// Writes stems with mismatched sample rates.
pub struct MismatchedSeparator;

impl Separator for MismatchedSeparator {
    fn separate(
        &self,
        _input: &Path,
        _model_id: &str,
        workspace: &Workspace,
    ) -> Result<SeparationOutputSet> {
        let out_dir = workspace.path().join("separated");
        fs::create_dir_all(&out_dir)?;
        write_audio(out_dir.join("vocals.wav"), &sine(0.5, 44_100, 2, 440.0))?;
        write_audio(out_dir.join("drums.wav"), &sine(0.5, 44_100, 2, 220.0))?;
        write_audio(out_dir.join("bass.wav"), &sine(0.5, 22_050, 2, 110.0))?;
        collect_stems(&out_dir)
    }
}
