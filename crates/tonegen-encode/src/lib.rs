//! Audio file encoding for rendered tones.
//!
//! Two containers: bit-exact 16-bit PCM WAV, and a compressed stream produced
//! by a pluggable codec (LAME when built with the `mp3` feature).

pub mod compressed;
pub mod wav;

use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;

use tonegen_core::{Error, OutputFormat, RenderedAudio, Result};

pub use compressed::{BITRATE_KBPS, BLOCK_FRAMES, BlockEncoder, CompressedCodec};
#[cfg(feature = "mp3")]
pub use compressed::LameCodec;
pub use wav::encode_pcm;

/// Turns rendered audio into file bytes
#[derive(Clone)]
pub struct AudioFileEncoder {
    codec: Option<Arc<dyn CompressedCodec>>,
}

impl AudioFileEncoder {
    /// Encoder with every codec this build includes
    pub fn new() -> Self {
        #[cfg(feature = "mp3")]
        {
            Self::with_codec(Arc::new(LameCodec))
        }
        #[cfg(not(feature = "mp3"))]
        {
            Self::without_codec()
        }
    }

    /// PCM only; compressed requests fail with `EncoderUnavailable`
    pub fn without_codec() -> Self {
        Self { codec: None }
    }

    pub fn with_codec(codec: Arc<dyn CompressedCodec>) -> Self {
        Self { codec: Some(codec) }
    }

    /// Name of the installed compressed codec
    pub fn codec_name(&self) -> Option<&str> {
        self.codec.as_deref().map(|codec| codec.name())
    }

    /// Whether `format` can be produced
    pub fn supports(&self, format: OutputFormat) -> bool {
        match format {
            OutputFormat::Wav => true,
            OutputFormat::Mp3 => self.codec.is_some(),
        }
    }

    /// Fail with `EncoderUnavailable` unless `format` can be produced
    ///
    /// # Errors
    ///
    /// `EncoderUnavailable` for a compressed format with no codec installed
    pub fn ensure_supported(&self, format: OutputFormat) -> Result<()> {
        if self.supports(format) {
            Ok(())
        } else {
            Err(Error::EncoderUnavailable(format!(
                "no {format} encoder in this build (enable the `mp3` feature)"
            )))
        }
    }

    /// Encode as 16-bit PCM WAV
    ///
    /// # Errors
    ///
    /// See [`wav::encode_pcm`]
    pub fn encode_pcm(&self, audio: &RenderedAudio) -> Result<Vec<u8>> {
        wav::encode_pcm(audio)
    }

    /// Encode with the installed compressed codec
    ///
    /// # Errors
    ///
    /// `EncoderUnavailable` without a codec, otherwise see
    /// [`compressed::encode_compressed`]
    pub fn encode_compressed(
        &self,
        audio: &RenderedAudio,
        on_progress: impl FnMut(f32) -> ControlFlow<()>,
    ) -> Result<Vec<u8>> {
        let codec = self.codec.as_deref().ok_or_else(|| {
            Error::EncoderUnavailable("no compressed codec installed".to_string())
        })?;
        compressed::encode_compressed(codec, audio, on_progress)
    }

    /// Encode in `format`, reporting the fraction done where the format allows
    ///
    /// # Errors
    ///
    /// Whatever the chosen container reports
    pub fn encode(
        &self,
        audio: &RenderedAudio,
        format: OutputFormat,
        on_progress: impl FnMut(f32) -> ControlFlow<()>,
    ) -> Result<Vec<u8>> {
        match format {
            OutputFormat::Wav => self.encode_pcm(audio),
            OutputFormat::Mp3 => self.encode_compressed(audio, on_progress),
        }
    }
}

impl Default for AudioFileEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AudioFileEncoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioFileEncoder")
            .field("codec", &self.codec_name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_second() -> RenderedAudio {
        RenderedAudio::new(44100, vec![0.3; 44100], vec![0.3; 44100])
    }

    #[test]
    fn test_without_codec() {
        let encoder = AudioFileEncoder::without_codec();
        assert!(encoder.supports(OutputFormat::Wav));
        assert!(!encoder.supports(OutputFormat::Mp3));
        assert!(encoder.codec_name().is_none());
        assert!(matches!(
            encoder.ensure_supported(OutputFormat::Mp3),
            Err(Error::EncoderUnavailable(_))
        ));

        let result =
            encoder.encode(&one_second(), OutputFormat::Mp3, |_| ControlFlow::Continue(()));
        assert!(matches!(result, Err(Error::EncoderUnavailable(_))));
    }

    #[test]
    fn test_wav_dispatch() {
        let encoder = AudioFileEncoder::without_codec();
        let bytes = encoder
            .encode(&one_second(), OutputFormat::Wav, |_| ControlFlow::Continue(()))
            .unwrap();
        assert_eq!(bytes.len(), wav::HEADER_BYTES + 44100 * 4);
    }

    #[cfg(feature = "mp3")]
    #[test]
    fn test_default_has_mp3() {
        let encoder = AudioFileEncoder::new();
        assert_eq!(encoder.codec_name(), Some("MP3"));
        assert!(encoder.ensure_supported(OutputFormat::Mp3).is_ok());
    }
}
