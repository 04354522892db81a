use std::{
    fs::{self, File},
    io::{Cursor, ErrorKind},
    path::{Path, PathBuf},
};

use hound::WavWriter;
use symphonia::core::{
    audio::SampleBuffer,
    codecs::{
        CodecParameters, CodecType, DecoderOptions, CODEC_TYPE_AAC, CODEC_TYPE_ALAC,
        CODEC_TYPE_FLAC, CODEC_TYPE_MP1, CODEC_TYPE_MP2, CODEC_TYPE_MP3, CODEC_TYPE_NULL,
        CODEC_TYPE_OPUS, CODEC_TYPE_VORBIS,
    },
    errors::Error as SymphoniaError,
    formats::{FormatOptions, FormatReader},
    io::{MediaSource, MediaSourceStream},
    meta::MetadataOptions,
    probe::Hint,
};
use symphonia::default::{get_codecs, get_probe};
use tracing::debug;

use crate::{
    core::{dsp::sum_into, workspace::Workspace},
    error::{Result, SeparationError},
    types::AudioData,
};

/// Packets tried while validating an upload before giving up.
const PROBE_PACKETS: usize = 16;

/// What the container sniffing learned about an uploaded payload.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioProbe {
    /// File extension matching the detected codec, used to name the staged file.
    pub extension: &'static str,
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
    pub frames: Option<u64>,
}

impl AudioProbe {
    /// Duration in seconds when the container reports its length.
    pub fn duration_secs(&self) -> Option<f64> {
        match (self.frames, self.sample_rate) {
            (Some(frames), Some(rate)) if rate > 0 => Some(frames as f64 / rate as f64),
            _ => None,
        }
    }
}

/// Checks that `bytes` is an audio container we can decode.
///
/// The container is probed from its content alone and at least one packet
/// must decode, so arbitrary binary data is rejected up front.
pub fn probe_audio(bytes: &[u8]) -> Result<AudioProbe> {
    if bytes.is_empty() {
        return Err(SeparationError::Decoding("audio payload is empty".into()));
    }

    let source: Box<dyn MediaSource> = Box::new(Cursor::new(bytes.to_vec()));
    let mut format = open_format(source, &Hint::new())
        .map_err(|e| SeparationError::Decoding(format!("not a recognized audio container: {e}")))?;

    let (track_id, params) = default_track(&*format)
        .ok_or_else(|| SeparationError::Decoding("container has no audio track".into()))?;
    let mut decoder = get_codecs()
        .make(&params, &DecoderOptions::default())
        .map_err(|e| SeparationError::Decoding(format!("unsupported audio codec: {e}")))?;

    let mut attempts = 0;
    while attempts < PROBE_PACKETS {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(e) => {
                return Err(SeparationError::Decoding(format!(
                    "no decodable audio frames: {e}"
                )))
            }
        };
        if packet.track_id() != track_id {
            continue;
        }
        attempts += 1;
        if decoder.decode(&packet).is_ok() {
            return Ok(AudioProbe {
                extension: extension_for(params.codec),
                sample_rate: params.sample_rate,
                channels: params.channels.map(|c| c.count() as u16),
                frames: params.n_frames,
            });
        }
    }

    Err(SeparationError::Decoding("no decodable audio frames".into()))
}

/// Persists decoded upload bytes inside the workspace.
pub fn write_to_workspace(bytes: &[u8], workspace: &Workspace, filename: &str) -> Result<PathBuf> {
    let path = workspace.file(filename)?;
    fs::write(&path, bytes).map_err(SeparationError::Workspace)?;
    debug!(path = %path.display(), bytes = bytes.len(), "staged input audio");
    Ok(path)
}

/// Decodes an audio file into interleaved f32 samples.
///
/// Used on separator output, so an unreadable file is a separation failure.
pub fn read_audio<P: AsRef<Path>>(path: P) -> Result<AudioData> {
    let path: &Path = path.as_ref();
    let unreadable =
        |e: String| SeparationError::SeparationExecution(format!("unreadable audio {}: {e}", path.display()));

    let file = File::open(path)?;
    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let mut format = open_format(Box::new(file), &hint).map_err(|e| unreadable(e.to_string()))?;
    let (track_id, params) =
        default_track(&*format).ok_or_else(|| unreadable("no audio track".into()))?;
    let mut decoder = get_codecs()
        .make(&params, &DecoderOptions::default())
        .map_err(|e| unreadable(e.to_string()))?;

    let mut samples: Vec<f32> = Vec::new();
    let mut sample_rate = params.sample_rate.unwrap_or(0);
    let mut channels = params.channels.map(|c| c.count() as u16).unwrap_or(0);

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(e)) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(unreadable(e.to_string())),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            // Corrupt frames are skipped, as players do.
            Err(SymphoniaError::DecodeError(_)) => continue,
            Err(e) => return Err(unreadable(e.to_string())),
        };
        sample_rate = decoded.spec().rate;
        channels = decoded.spec().channels.count() as u16;

        let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, *decoded.spec());
        buffer.copy_interleaved_ref(decoded);
        samples.extend_from_slice(buffer.samples());
    }

    debug!(
        path = %path.display(),
        sample_rate,
        channels,
        samples = samples.len(),
        "read audio"
    );

    Ok(AudioData {
        samples,
        sample_rate,
        channels,
    })
}

/// Writes 16-bit PCM WAV.
pub fn write_audio<P: AsRef<Path>>(path: P, audio: &AudioData) -> Result<()> {
    let spec = hound::WavSpec {
        channels: audio.channels,
        sample_rate: audio.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = WavWriter::create(path, spec)?;
    for sample in &audio.samples {
        let s = (sample * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        writer.write_sample(s)?;
    }

    writer.finalize()?;
    Ok(())
}

/// Reads every file and sums them sample-wise into one buffer.
///
/// All files must share sample rate and channel count; shorter files are
/// zero-padded to the longest.
pub fn load_and_mix<P: AsRef<Path>>(paths: &[P]) -> Result<AudioData> {
    let (first, rest) = paths
        .split_first()
        .ok_or_else(|| SeparationError::FormatMismatch("no stem files to mix".into()))?;

    let base = read_audio(first)?;
    let mut mix = base.samples;

    for path in rest {
        let stem = read_audio(path)?;
        if stem.sample_rate != base.sample_rate || stem.channels != base.channels {
            return Err(SeparationError::FormatMismatch(format!(
                "{} is {} Hz / {} ch, expected {} Hz / {} ch",
                path.as_ref().display(),
                stem.sample_rate,
                stem.channels,
                base.sample_rate,
                base.channels
            )));
        }
        sum_into(&mut mix, &stem.samples);
    }

    Ok(AudioData {
        samples: mix,
        sample_rate: base.sample_rate,
        channels: base.channels,
    })
}

fn open_format(
    source: Box<dyn MediaSource>,
    hint: &Hint,
) -> std::result::Result<Box<dyn FormatReader>, SymphoniaError> {
    let mss = MediaSourceStream::new(source, Default::default());
    let probed = get_probe().format(
        hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;
    Ok(probed.format)
}

fn default_track(format: &dyn FormatReader) -> Option<(u32, CodecParameters)> {
    format
        .default_track()
        .filter(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .map(|t| (t.id, t.codec_params.clone()))
}

fn extension_for(codec: CodecType) -> &'static str {
    if codec == CODEC_TYPE_MP3 || codec == CODEC_TYPE_MP2 || codec == CODEC_TYPE_MP1 {
        "mp3"
    } else if codec == CODEC_TYPE_FLAC {
        "flac"
    } else if codec == CODEC_TYPE_VORBIS || codec == CODEC_TYPE_OPUS {
        "ogg"
    } else if codec == CODEC_TYPE_AAC || codec == CODEC_TYPE_ALAC {
        "m4a"
    } else {
        "wav"
    }
}
