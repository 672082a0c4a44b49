//! Audio payload inspection. An upload is kept only when the container
//! parses and carries at least the configured minimum of audio.

use lofty::prelude::*;
use lofty::probe::Probe;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioVerdict {
    Valid(Duration),
    /// Parsed, but shorter than the minimum (or with no duration at all).
    TooShort,
    /// The container could not be parsed. Terminal for this upload.
    Malformed,
}

pub fn inspect_payload(path: &Path, min_seconds: f64) -> AudioVerdict {
    let tagged_file = match Probe::open(path).and_then(|probe| probe.read()) {
        Ok(tagged_file) => tagged_file,
        Err(e) => {
            tracing::debug!("Audio probe failed for {}: {}", path.display(), e);
            return AudioVerdict::Malformed;
        }
    };

    let duration = tagged_file.properties().duration();
    if duration.as_secs_f64() < min_seconds {
        AudioVerdict::TooShort
    } else {
        AudioVerdict::Valid(duration)
    }
}

/// Minimal mono 16-bit PCM WAV file of the given length, for tests that
/// need a real parsable payload on disk.
#[cfg(test)]
pub(crate) fn write_test_wav(path: &Path, seconds: f64) {
    let sample_rate: u32 = 8_000;
    let byte_rate = sample_rate * 2;
    let data_len = (seconds * byte_rate as f64) as u32;

    let mut bytes = Vec::with_capacity(44 + data_len as usize);
    bytes.extend_from_slice(b"RIFF");
    bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
    bytes.extend_from_slice(b"WAVE");
    bytes.extend_from_slice(b"fmt ");
    bytes.extend_from_slice(&16u32.to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes()); // PCM
    bytes.extend_from_slice(&1u16.to_le_bytes()); // mono
    bytes.extend_from_slice(&sample_rate.to_le_bytes());
    bytes.extend_from_slice(&byte_rate.to_le_bytes());
    bytes.extend_from_slice(&2u16.to_le_bytes()); // block align
    bytes.extend_from_slice(&16u16.to_le_bytes()); // bits per sample
    bytes.extend_from_slice(b"data");
    bytes.extend_from_slice(&data_len.to_le_bytes());
    bytes.resize(44 + data_len as usize, 0);

    std::fs::write(path, bytes).unwrap();
}
