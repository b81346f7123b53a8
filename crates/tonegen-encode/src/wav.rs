//! Uncompressed PCM container.
//!
//! 16-bit little-endian stereo with the canonical 44-byte header, written
//! through `hound` into memory.

use std::io::Cursor;

use hound::{SampleFormat, WavSpec, WavWriter};
use tonegen_core::{Error, RenderedAudio, Result, Sample};

/// Size of the header in front of the sample data
pub const HEADER_BYTES: usize = 44;

/// Bytes per stereo frame
pub const BLOCK_ALIGN: usize = 4;

/// Convert a sample to 16-bit PCM: clamp to [-1, 1], scale by 32767,
/// truncate toward zero.
#[allow(clippy::cast_possible_truncation)]
pub fn to_pcm16(sample: Sample) -> i16 {
    (sample.clamp(-1.0, 1.0) * 32767.0) as i16
}

/// Encode a rendered buffer as a PCM WAV file.
///
/// # Errors
///
/// `EmptyAudio` for a zero-length buffer, `EncodingFailure` if the channels
/// differ in length or the writer fails.
pub fn encode_pcm(audio: &RenderedAudio) -> Result<Vec<u8>> {
    if audio.left.len() != audio.right.len() {
        return Err(Error::EncodingFailure(format!(
            "channel lengths differ: {} left, {} right",
            audio.left.len(),
            audio.right.len()
        )));
    }
    if audio.is_empty() {
        return Err(Error::EmptyAudio);
    }

    let spec = WavSpec {
        channels: 2,
        sample_rate: audio.sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut bytes = Vec::with_capacity(HEADER_BYTES + audio.frames() * BLOCK_ALIGN);
    {
        let mut writer = WavWriter::new(Cursor::new(&mut bytes), spec).map_err(wav_failure)?;
        // Interleaved, left first
        for (&left, &right) in audio.left.iter().zip(&audio.right) {
            writer.write_sample(to_pcm16(left)).map_err(wav_failure)?;
            writer.write_sample(to_pcm16(right)).map_err(wav_failure)?;
        }
        writer.finalize().map_err(wav_failure)?;
    }

    tracing::debug!(
        "Encoded {} frames at {} Hz into {} bytes of PCM",
        audio.frames(),
        audio.sample_rate,
        bytes.len()
    );
    Ok(bytes)
}

fn wav_failure(e: hound::Error) -> Error {
    Error::EncodingFailure(format!("WAV writer failed: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u32_at(bytes: &[u8], offset: usize) -> u32 {
        u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
    }

    fn u16_at(bytes: &[u8], offset: usize) -> u16 {
        u16::from_le_bytes(bytes[offset..offset + 2].try_into().unwrap())
    }

    #[test]
    fn test_header_layout() {
        let n = 1000;
        let audio = RenderedAudio::new(44100, vec![0.1; n], vec![-0.1; n]);
        let bytes = encode_pcm(&audio).unwrap();

        assert_eq!(bytes.len(), HEADER_BYTES + n * 4);
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(u32_at(&bytes, 4), (36 + n * 4) as u32);
        assert_eq!(&bytes[8..12], b"WAVE");
        assert_eq!(&bytes[12..16], b"fmt ");
        assert_eq!(u32_at(&bytes, 16), 16);
        assert_eq!(u16_at(&bytes, 20), 1);
        assert_eq!(u16_at(&bytes, 22), 2);
        assert_eq!(u32_at(&bytes, 24), 44100);
        assert_eq!(u32_at(&bytes, 28), 44100 * 4);
        assert_eq!(u16_at(&bytes, 32), 4);
        assert_eq!(u16_at(&bytes, 34), 16);
        assert_eq!(&bytes[36..40], b"data");
        assert_eq!(u32_at(&bytes, 40), (n * 4) as u32);
    }

    #[test]
    fn test_samples_interleaved_and_truncated() {
        let audio = RenderedAudio::new(8000, vec![0.5, 1.5, -0.3], vec![-0.5, -2.0, 0.99999]);
        let bytes = encode_pcm(&audio).unwrap();

        let samples: Vec<i16> = bytes[HEADER_BYTES..]
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        assert_eq!(
            samples,
            vec![
                16383,
                -16383,
                32767,
                -32767,
                to_pcm16(-0.3),
                to_pcm16(0.999_99)
            ]
        );
        assert_eq!(to_pcm16(-0.3), -9830);
    }

    #[test]
    fn test_reparses_with_hound() {
        let audio = RenderedAudio::new(44100, vec![0.25; 441], vec![-0.25; 441]);
        let bytes = encode_pcm(&audio).unwrap();

        let mut reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 2);
        assert_eq!(spec.sample_rate, 44100);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(reader.duration(), 441);

        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples[0], 8191);
        assert_eq!(samples[1], -8191);
    }

    #[test]
    fn test_empty_audio_rejected() {
        let audio = RenderedAudio::new(44100, Vec::new(), Vec::new());
        assert!(matches!(encode_pcm(&audio), Err(Error::EmptyAudio)));
    }

    #[test]
    fn test_unequal_channels_rejected() {
        let audio = RenderedAudio::new(44100, vec![0.0; 3], vec![0.0; 2]);
        assert!(matches!(encode_pcm(&audio), Err(Error::EncodingFailure(_))));
    }

    #[test]
    fn test_nan_encodes_as_silence() {
        assert_eq!(to_pcm16(f32::NAN), 0);
    }
}
