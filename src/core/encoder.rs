//! MP3 rendering of separated tracks.
//!
//! Output format is a service policy: fixed bitrate, fixed sample rate,
//! always stereo. Clients cannot influence any of it.

use mp3lame_encoder::{Bitrate, Builder, DualPcm, FlushNoGap, Quality};
use serde::{Deserialize, Serialize};

use crate::{
    core::dsp::{resample_interleaved, to_planar_stereo},
    error::{Result, SeparationError},
    types::AudioData,
};

pub const MP3_CONTENT_TYPE: &str = "audio/mpeg";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputPolicy {
    pub bitrate_kbps: u32,
    pub sample_rate: u32,
}

impl Default for OutputPolicy {
    fn default() -> Self {
        Self {
            bitrate_kbps: 320,
            sample_rate: 44_100,
        }
    }
}

impl OutputPolicy {
    pub fn content_type(&self) -> &'static str {
        MP3_CONTENT_TYPE
    }

    fn lame_bitrate(&self) -> Bitrate {
        match self.bitrate_kbps {
            0..=111 => Bitrate::Kbps96,
            112..=127 => Bitrate::Kbps112,
            128..=159 => Bitrate::Kbps128,
            160..=191 => Bitrate::Kbps160,
            192..=223 => Bitrate::Kbps192,
            224..=255 => Bitrate::Kbps224,
            256..=319 => Bitrate::Kbps256,
            _ => Bitrate::Kbps320,
        }
    }
}

/// Renders `audio` to MP3 bytes according to `policy`.
pub fn encode_to_container(audio: &AudioData, policy: &OutputPolicy) -> Result<Vec<u8>> {
    if audio.frames() == 0 {
        return Err(SeparationError::Encoding("cannot encode an empty buffer".into()));
    }

    let samples = resample_interleaved(
        &audio.samples,
        audio.channels,
        audio.sample_rate,
        policy.sample_rate,
    )?;
    let frames = to_planar_stereo(&samples, audio.channels);

    let mut builder = Builder::new()
        .ok_or_else(|| SeparationError::Encoding("LAME encoder init failed".into()))?;
    builder
        .set_num_channels(2)
        .map_err(|e| SeparationError::Encoding(format!("LAME set channels failed: {e:?}")))?;
    builder
        .set_sample_rate(policy.sample_rate)
        .map_err(|e| SeparationError::Encoding(format!("LAME set sample rate failed: {e:?}")))?;
    builder
        .set_brate(policy.lame_bitrate())
        .map_err(|e| SeparationError::Encoding(format!("LAME set bitrate failed: {e:?}")))?;
    builder
        .set_quality(Quality::NearBest)
        .map_err(|e| SeparationError::Encoding(format!("LAME set quality failed: {e:?}")))?;
    let mut encoder = builder
        .build()
        .map_err(|e| SeparationError::Encoding(format!("LAME build failed: {e:?}")))?;

    let (left, right): (Vec<i16>, Vec<i16>) = frames
        .iter()
        .map(|[l, r]| (to_i16(*l), to_i16(*r)))
        .unzip();

    let mut out: Vec<u8> = Vec::with_capacity(mp3lame_encoder::max_required_buffer_size(left.len()));
    let encoded = encoder
        .encode(
            DualPcm {
                left: &left,
                right: &right,
            },
            out.spare_capacity_mut(),
        )
        .map_err(|e| SeparationError::Encoding(format!("LAME encode failed: {e:?}")))?;
    // SAFETY: the encoder initialised exactly `encoded` bytes of spare capacity.
    unsafe {
        out.set_len(encoded);
    }

    out.reserve(7200);
    let flushed = encoder
        .flush::<FlushNoGap>(out.spare_capacity_mut())
        .map_err(|e| SeparationError::Encoding(format!("LAME flush failed: {e:?}")))?;
    // SAFETY: the encoder initialised exactly `flushed` bytes past the current length.
    unsafe {
        out.set_len(out.len() + flushed);
    }

    Ok(out)
}

fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}
