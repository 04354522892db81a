//! Text-safe transport encoding for audio payloads (base64).

use base64::{
    alphabet,
    engine::{general_purpose::STANDARD, DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
    Engine,
};

use crate::error::{Result, SeparationError};

/// Accepts padded and unpadded input.
const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Decodes a base64 payload into raw audio bytes.
///
/// ASCII whitespace is ignored and a leading `data:<mime>;base64,` prefix is
/// stripped. An empty result is rejected.
pub fn decode(transport_text: &str) -> Result<Vec<u8>> {
    let body = strip_data_url(transport_text.trim());
    let compact: String = body.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    if compact.is_empty() {
        return Err(SeparationError::Decoding("audio_content is empty".into()));
    }

    let bytes = LENIENT
        .decode(compact.as_bytes())
        .map_err(|e| SeparationError::Decoding(format!("audio_content is not valid base64: {e}")))?;

    if bytes.is_empty() {
        return Err(SeparationError::Decoding("audio_content decodes to zero bytes".into()));
    }
    Ok(bytes)
}

pub fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

fn strip_data_url(s: &str) -> &str {
    if s.starts_with("data:") {
        if let Some(idx) = s.find(";base64,") {
            return &s[idx + ";base64,".len()..];
        }
    }
    s
}
