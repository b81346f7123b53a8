//! Core types, traits, and constants shared across the tonegen crates.
//!
//! This crate provides the value types every other tonegen crate depends on:
//! the tone configuration snapshot, render requests and rendered audio, and
//! the common error type.

pub mod render;
pub mod tone;

pub use render::{OutputFormat, RenderRequest, RenderedAudio};
pub use tone::{BinauralSettings, FrequencyPreset, ToneConfiguration, Waveform};

/// Sample rate in Hz
pub type SampleRate = u32;

/// Number of audio frames (samples per channel)
pub type Frames = usize;

/// Audio sample type
pub type Sample = f32;

/// Number of audio channels
pub type ChannelCount = usize;

/// Every graph and every rendered file is stereo
pub const STEREO: ChannelCount = 2;

/// Common sample rates
pub mod sample_rates {
    use super::SampleRate;

    /// 44.1 kHz sample rate (CD quality, used for offline rendering)
    pub const SR_44100: SampleRate = 44100;
    /// 48 kHz sample rate (default for the live engine)
    pub const SR_48000: SampleRate = 48000;
}

/// Audio buffer block sizes
pub mod block_sizes {
    use super::Frames;

    /// 128 frames per block (render quantum for offline rendering)
    pub const BLOCK_128: Frames = 128;
    /// 256 frames per block (live engine default)
    pub const BLOCK_256: Frames = 256;
}

/// Common error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid frequency, volume, beat or duration
    #[error("Unsupported configuration: {0}")]
    UnsupportedConfiguration(String),

    /// The audio device or stream could not be created or resumed
    #[error("Audio engine unavailable: {0}")]
    AudioEngineUnavailable(String),

    /// Offline rendering failed
    #[error("Render failed: {0}")]
    RenderFailure(String),

    /// Offline rendering was cancelled before it completed
    #[error("Render cancelled")]
    RenderCancelled,

    /// No compressed-audio encoder is installed
    #[error("Encoder unavailable: {0}")]
    EncoderUnavailable(String),

    /// The compressed encoder rejected a block
    #[error("Encoding failed: {0}")]
    EncodingFailure(String),

    /// Nothing to encode
    #[error("Rendered audio is empty")]
    EmptyAudio,

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_rates() {
        assert_eq!(sample_rates::SR_44100, 44100);
        assert_eq!(sample_rates::SR_48000, 48000);
    }

    #[test]
    fn test_error_messages() {
        let err = Error::UnsupportedConfiguration("frequency 0 Hz".to_string());
        assert_eq!(err.to_string(), "Unsupported configuration: frequency 0 Hz");
        assert_eq!(Error::EmptyAudio.to_string(), "Rendered audio is empty");
    }
}
