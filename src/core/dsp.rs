use ndarray::{ArrayView1, ArrayViewMut1};
use rubato::{FftFixedIn, Resampler};

use crate::error::{Result, SeparationError};

const RESAMPLE_CHUNK: usize = 1024;
const RESAMPLE_SUB_CHUNKS: usize = 2;

/// Interleaved samples to stereo frames. Mono is duplicated; channels past
/// the second are dropped.
pub fn to_planar_stereo(interleaved: &[f32], channels: u16) -> Vec<[f32; 2]> {
    match channels {
        0 => Vec::new(),
        1 => interleaved.iter().map(|&x| [x, x]).collect(),
        n => interleaved
            .chunks_exact(n as usize)
            .map(|frame| [frame[0], frame[1]])
            .collect(),
    }
}

/// Adds `samples` into `acc` element-wise, growing `acc` with zeros when
/// `samples` is longer.
pub fn sum_into(acc: &mut Vec<f32>, samples: &[f32]) {
    if acc.len() < samples.len() {
        acc.resize(samples.len(), 0.0);
    }
    let mut dst = ArrayViewMut1::from(&mut acc[..samples.len()]);
    dst += &ArrayView1::from(samples);
}

/// Resamples interleaved audio from `from` Hz to `to` Hz.
///
/// Output has `round(frames * to / from)` frames, aligned with the input.
pub fn resample_interleaved(samples: &[f32], channels: u16, from: u32, to: u32) -> Result<Vec<f32>> {
    if from == to || samples.is_empty() {
        return Ok(samples.to_vec());
    }
    if channels == 0 || from == 0 || to == 0 {
        return Err(SeparationError::Encoding(format!(
            "cannot resample {channels} channel(s) from {from} Hz to {to} Hz"
        )));
    }

    let ch = channels as usize;
    let frames = samples.len() / ch;
    let expected = ((frames as f64) * (to as f64) / (from as f64)).round() as usize;

    let mut planar: Vec<Vec<f32>> = vec![Vec::with_capacity(frames); ch];
    for frame in samples.chunks_exact(ch) {
        for (c, &s) in frame.iter().enumerate() {
            planar[c].push(s);
        }
    }

    let mut resampler =
        FftFixedIn::<f32>::new(from as usize, to as usize, RESAMPLE_CHUNK, RESAMPLE_SUB_CHUNKS, ch)
            .map_err(|e| SeparationError::Encoding(format!("resampler init failed: {e}")))?;
    let delay = fft_output_delay(from as usize, to as usize);

    let mut out: Vec<Vec<f32>> = vec![Vec::with_capacity(delay + expected + RESAMPLE_CHUNK); ch];
    let mut pos = 0usize;
    // Keep feeding (zero-padded past the end) until the delayed output
    // covers the full input.
    while out[0].len() < delay + expected {
        let need = resampler.input_frames_next();
        let chunk: Vec<Vec<f32>> = planar
            .iter()
            .map(|p| {
                let mut c = vec![0.0f32; need];
                if pos < p.len() {
                    let end = (pos + need).min(p.len());
                    c[..end - pos].copy_from_slice(&p[pos..end]);
                }
                c
            })
            .collect();
        pos += need;

        let processed = resampler
            .process(&chunk, None)
            .map_err(|e| SeparationError::Encoding(format!("resampling failed: {e}")))?;
        for (dst, src) in out.iter_mut().zip(processed) {
            dst.extend_from_slice(&src);
        }
    }

    let mut interleaved = Vec::with_capacity(expected * ch);
    for i in delay..delay + expected {
        for channel in &out {
            interleaved.push(channel[i]);
        }
    }
    Ok(interleaved)
}

/// Output latency of `FftFixedIn`: half its output FFT length. Mirrors the
/// sizing in `FftFixedIn::new`, which does not expose it.
fn fft_output_delay(from: usize, to: usize) -> usize {
    let g = gcd(from, to);
    let fft_chunks = (RESAMPLE_CHUNK / RESAMPLE_SUB_CHUNKS).div_ceil(from / g);
    fft_chunks * (to / g) / 2
}

fn gcd(mut a: usize, mut b: usize) -> usize {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}
