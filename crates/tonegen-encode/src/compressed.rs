//! Compressed container, driven block by block through a codec.
//!
//! The codec itself is external. This module only slices the rendered
//! buffer into fixed-size blocks, converts samples, concatenates whatever
//! the codec returns and reports progress.

use std::ops::ControlFlow;

use tonegen_core::{Error, RenderedAudio, Result, STEREO, Sample, SampleRate};

/// Target bitrate
pub const BITRATE_KBPS: u32 = 128;

/// Samples per channel fed to the codec per call
pub const BLOCK_FRAMES: usize = 1152;

/// An open encoding stream
pub trait BlockEncoder {
    /// Encode one block of planar samples, returning any finished output
    fn encode_block(&mut self, left: &[i16], right: &[i16]) -> Result<Vec<u8>>;

    /// Finish the stream, returning the remaining output
    fn flush(&mut self) -> Result<Vec<u8>>;
}

/// Factory for encoding streams
pub trait CompressedCodec: Send + Sync {
    /// Human-readable codec name
    fn name(&self) -> &str;

    /// Open a stream for `channels` channels at `sample_rate`
    fn open(
        &self,
        sample_rate: SampleRate,
        channels: usize,
        bitrate_kbps: u32,
    ) -> Result<Box<dyn BlockEncoder>>;
}

/// Convert a sample to 16-bit: clamp to [-1, 1], scale by 32767, round.
#[allow(clippy::cast_possible_truncation)]
pub fn to_i16_rounded(sample: Sample) -> i16 {
    (sample.clamp(-1.0, 1.0) * 32767.0).round() as i16
}

/// Encode `audio` with `codec`.
///
/// `on_progress` gets the fraction of blocks done after each block; returning
/// `ControlFlow::Break` abandons the stream with `RenderCancelled`.
///
/// # Errors
///
/// `EmptyAudio` for zero-length input, `EncodingFailure` if the codec fails
/// at any point (no partial output is returned).
pub fn encode_compressed(
    codec: &dyn CompressedCodec,
    audio: &RenderedAudio,
    mut on_progress: impl FnMut(f32) -> ControlFlow<()>,
) -> Result<Vec<u8>> {
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

    let mut encoder = codec.open(audio.sample_rate, STEREO, BITRATE_KBPS)?;
    let total_blocks = audio.frames().div_ceil(BLOCK_FRAMES);

    let mut output = Vec::new();
    let mut left = Vec::with_capacity(BLOCK_FRAMES);
    let mut right = Vec::with_capacity(BLOCK_FRAMES);

    for (index, (left_block, right_block)) in audio
        .left
        .chunks(BLOCK_FRAMES)
        .zip(audio.right.chunks(BLOCK_FRAMES))
        .enumerate()
    {
        left.clear();
        right.clear();
        left.extend(left_block.iter().copied().map(to_i16_rounded));
        right.extend(right_block.iter().copied().map(to_i16_rounded));

        let encoded = encoder
            .encode_block(&left, &right)
            .map_err(|e| Error::EncodingFailure(format!("{} block {index}: {e}", codec.name())))?;
        output.extend_from_slice(&encoded);

        #[allow(clippy::cast_precision_loss)]
        let fraction = (index + 1) as f32 / total_blocks as f32;
        if on_progress(fraction).is_break() {
            return Err(Error::RenderCancelled);
        }
    }

    let tail = encoder
        .flush()
        .map_err(|e| Error::EncodingFailure(format!("{} flush: {e}", codec.name())))?;
    output.extend_from_slice(&tail);

    tracing::debug!(
        "Encoded {} frames in {} blocks into {} bytes of {}",
        audio.frames(),
        total_blocks,
        output.len(),
        codec.name()
    );
    Ok(output)
}

#[cfg(feature = "mp3")]
pub use lame::LameCodec;

#[cfg(feature = "mp3")]
mod lame {
    use mp3lame_encoder::{Bitrate, Builder, DualPcm, Encoder, FlushNoGap, Quality};
    use tonegen_core::{Error, Result, SampleRate};

    use super::{BlockEncoder, CompressedCodec};

    /// MP3 via libmp3lame
    #[derive(Debug, Default, Clone, Copy)]
    pub struct LameCodec;

    struct LameStream {
        encoder: Encoder,
    }

    fn failure(what: &str, e: impl std::fmt::Display) -> Error {
        Error::EncodingFailure(format!("LAME {what}: {e}"))
    }

    fn bitrate(kbps: u32) -> Result<Bitrate> {
        match kbps {
            96 => Ok(Bitrate::Kbps96),
            128 => Ok(Bitrate::Kbps128),
            192 => Ok(Bitrate::Kbps192),
            320 => Ok(Bitrate::Kbps320),
            other => Err(Error::EncodingFailure(format!("unsupported bitrate {other} kbps"))),
        }
    }

    impl CompressedCodec for LameCodec {
        fn name(&self) -> &str {
            "MP3"
        }

        fn open(
            &self,
            sample_rate: SampleRate,
            channels: usize,
            bitrate_kbps: u32,
        ) -> Result<Box<dyn BlockEncoder>> {
            let mut builder = Builder::new().ok_or_else(|| {
                Error::EncoderUnavailable("failed to allocate LAME encoder".to_string())
            })?;
            let channels = u8::try_from(channels).map_err(|e| failure("channels", e))?;
            builder.set_num_channels(channels).map_err(|e| failure("channels", e))?;
            builder.set_sample_rate(sample_rate).map_err(|e| failure("sample rate", e))?;
            builder
                .set_brate(bitrate(bitrate_kbps)?)
                .map_err(|e| failure("bitrate", e))?;
            builder.set_quality(Quality::Good).map_err(|e| failure("quality", e))?;
            let encoder = builder.build().map_err(|e| failure("init", e))?;

            tracing::debug!("Opened LAME stream: {} Hz, {} kbps", sample_rate, bitrate_kbps);
            Ok(Box::new(LameStream { encoder }))
        }
    }

    impl BlockEncoder for LameStream {
        fn encode_block(&mut self, left: &[i16], right: &[i16]) -> Result<Vec<u8>> {
            let mut out = Vec::with_capacity(mp3lame_encoder::max_required_buffer_size(left.len()));
            self.encoder
                .encode_to_vec(DualPcm { left, right }, &mut out)
                .map_err(|e| failure("encode", e))?;
            Ok(out)
        }

        fn flush(&mut self) -> Result<Vec<u8>> {
            let mut out = Vec::with_capacity(7200);
            self.encoder
                .flush_to_vec::<FlushNoGap>(&mut out)
                .map_err(|e| failure("flush", e))?;
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Codec that records block sizes and emits one byte per block
    #[derive(Default)]
    struct FakeCodec {
        blocks: Arc<Mutex<Vec<(Vec<i16>, Vec<i16>)>>>,
        fail_at: Option<usize>,
    }

    struct FakeStream {
        blocks: Arc<Mutex<Vec<(Vec<i16>, Vec<i16>)>>>,
        fail_at: Option<usize>,
    }

    impl CompressedCodec for FakeCodec {
        fn name(&self) -> &str {
            "fake"
        }

        fn open(
            &self,
            _: SampleRate,
            channels: usize,
            bitrate_kbps: u32,
        ) -> Result<Box<dyn BlockEncoder>> {
            assert_eq!(channels, 2);
            assert_eq!(bitrate_kbps, 128);
            Ok(Box::new(FakeStream {
                blocks: Arc::clone(&self.blocks),
                fail_at: self.fail_at,
            }))
        }
    }

    impl BlockEncoder for FakeStream {
        fn encode_block(&mut self, left: &[i16], right: &[i16]) -> Result<Vec<u8>> {
            let mut blocks = self.blocks.lock().unwrap();
            if Some(blocks.len()) == self.fail_at {
                return Err(Error::EncodingFailure("boom".to_string()));
            }
            blocks.push((left.to_vec(), right.to_vec()));
            Ok(vec![0xAA])
        }

        fn flush(&mut self) -> Result<Vec<u8>> {
            Ok(vec![0xFF])
        }
    }

    fn audio(frames: usize, level: f32) -> RenderedAudio {
        RenderedAudio::new(44100, vec![level; frames], vec![-level; frames])
    }

    #[test]
    fn test_feeds_1152_sample_blocks_and_flushes() {
        let codec = FakeCodec::default();
        let bytes = encode_compressed(&codec, &audio(1152 * 2 + 100, 0.5), |_| {
            ControlFlow::Continue(())
        })
        .unwrap();

        assert_eq!(bytes, vec![0xAA, 0xAA, 0xAA, 0xFF]);
        let blocks = codec.blocks.lock().unwrap();
        let sizes: Vec<usize> = blocks.iter().map(|(l, _)| l.len()).collect();
        assert_eq!(sizes, vec![1152, 1152, 100]);
        // round(0.5 * 32767) = 16384
        assert_eq!(blocks[0].0[0], 16384);
        assert_eq!(blocks[0].1[0], -16384);
    }

    #[test]
    fn test_rounding_and_clamping() {
        assert_eq!(to_i16_rounded(1.0), 32767);
        assert_eq!(to_i16_rounded(3.0), 32767);
        assert_eq!(to_i16_rounded(-1.0), -32767);
        assert_eq!(to_i16_rounded(0.0), 0);
        assert_eq!(to_i16_rounded(0.25), 8192);
    }

    #[test]
    fn test_block_failure_discards_output() {
        let codec = FakeCodec {
            fail_at: Some(1),
            ..FakeCodec::default()
        };
        let result = encode_compressed(&codec, &audio(3000, 0.1), |_| ControlFlow::Continue(()));
        assert!(matches!(result, Err(Error::EncodingFailure(_))));
    }

    #[test]
    fn test_progress_reaches_one() {
        let codec = FakeCodec::default();
        let mut seen = Vec::new();
        encode_compressed(&codec, &audio(1152 * 4, 0.1), |f| {
            seen.push(f);
            ControlFlow::Continue(())
        })
        .unwrap();
        assert_eq!(seen, vec![0.25, 0.5, 0.75, 1.0]);
    }

    #[test]
    fn test_break_cancels() {
        let codec = FakeCodec::default();
        let result = encode_compressed(&codec, &audio(1152 * 4, 0.1), |_| ControlFlow::Break(()));
        assert!(matches!(result, Err(Error::RenderCancelled)));
        assert_eq!(codec.blocks.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_empty_audio_rejected() {
        let codec = FakeCodec::default();
        let result = encode_compressed(&codec, &audio(0, 0.0), |_| ControlFlow::Continue(()));
        assert!(matches!(result, Err(Error::EmptyAudio)));
    }

    #[cfg(feature = "mp3")]
    #[test]
    fn test_lame_produces_frames() {
        let bytes =
            encode_compressed(&LameCodec, &audio(44100, 0.3), |_| ControlFlow::Continue(()))
                .unwrap();
        assert!(!bytes.is_empty());
    }
}
