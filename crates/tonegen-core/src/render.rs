//! Offline render requests and their output.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Frames, Sample, SampleRate, ToneConfiguration};

/// Prefix of every suggested export filename
pub const FILENAME_PREFIX: &str = "tonegen";

/// Longest render accepted (one hour).
///
/// At 44.1 kHz stereo 16-bit this is about 635 MB of PCM, well inside the
/// 4 GiB RIFF size field.
pub const MAX_RENDER_SECONDS: f64 = 3600.0;

/// Check a render duration in seconds: positive, finite and at most
/// [`MAX_RENDER_SECONDS`]
///
/// # Errors
///
/// `UnsupportedConfiguration` for anything else
pub fn validate_duration(seconds: f64) -> Result<(), Error> {
    if !seconds.is_finite() || seconds <= 0.0 {
        return Err(Error::UnsupportedConfiguration(format!(
            "render duration {seconds} s must be a positive number"
        )));
    }
    if seconds > MAX_RENDER_SECONDS {
        return Err(Error::UnsupportedConfiguration(format!(
            "render duration {seconds} s exceeds the {MAX_RENDER_SECONDS} s limit"
        )));
    }
    Ok(())
}

/// Container format of an exported file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// 16-bit PCM RIFF/WAVE
    #[default]
    Wav,
    /// 128 kbps MP3
    Mp3,
}

impl OutputFormat {
    /// File extension without the dot
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Wav => "wav",
            Self::Mp3 => "mp3",
        }
    }

    /// MIME type handed to whatever triggers the download
    pub const fn mime_type(self) -> &'static str {
        match self {
            Self::Wav => "audio/wav",
            Self::Mp3 => "audio/mpeg",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for OutputFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "wav" => Ok(Self::Wav),
            "mp3" => Ok(Self::Mp3),
            other => Err(Error::UnsupportedConfiguration(format!(
                "unknown output format '{other}'"
            ))),
        }
    }
}

/// Input to the offline renderer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderRequest {
    pub config: ToneConfiguration,
    pub duration_seconds: f64,
    pub output_format: OutputFormat,
}

impl RenderRequest {
    pub fn new(
        config: ToneConfiguration,
        duration_seconds: f64,
        output_format: OutputFormat,
    ) -> Self {
        Self {
            config,
            duration_seconds,
            output_format,
        }
    }

    /// Build a request from a duration in minutes
    pub fn from_minutes(
        config: ToneConfiguration,
        minutes: f64,
        output_format: OutputFormat,
    ) -> Self {
        Self::new(config, minutes * 60.0, output_format)
    }

    /// Validate the tone configuration and the duration.
    ///
    /// A NaN or missing frequency is rejected here rather than replaced by a
    /// default.
    pub fn validate(&self) -> Result<(), Error> {
        self.config.validate()?;
        validate_duration(self.duration_seconds)
    }

    /// Number of frames to render: `round(duration × sample_rate)`
    pub fn frame_count(&self, sample_rate: SampleRate) -> Frames {
        (self.duration_seconds * f64::from(sample_rate)).round() as Frames
    }

    /// Suggested download name: `tonegen_<freq>Hz_<minutes>min.<ext>`
    pub fn suggested_filename(&self) -> String {
        format!(
            "{FILENAME_PREFIX}_{}Hz_{}min.{}",
            self.config.base_frequency_hz,
            self.duration_seconds / 60.0,
            self.output_format.extension()
        )
    }
}

/// Planar stereo output of an offline render
///
/// Transient: produced by the renderer, consumed by the encoder.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedAudio {
    pub sample_rate: SampleRate,
    pub left: Vec<Sample>,
    pub right: Vec<Sample>,
}

impl RenderedAudio {
    pub fn new(sample_rate: SampleRate, left: Vec<Sample>, right: Vec<Sample>) -> Self {
        Self {
            sample_rate,
            left,
            right,
        }
    }

    /// Always stereo
    pub const fn channel_count(&self) -> usize {
        crate::STEREO
    }

    /// Samples per channel (the shorter channel wins if they disagree)
    pub fn frames(&self) -> Frames {
        self.left.len().min(self.right.len())
    }

    pub fn is_empty(&self) -> bool {
        self.frames() == 0
    }

    /// Largest absolute sample value across both channels
    pub fn peak(&self) -> Sample {
        self.left
            .iter()
            .chain(&self.right)
            .fold(0.0_f32, |max, &s| max.max(s.abs()))
    }

    /// Interleaved `L R L R ...` copy
    pub fn interleaved(&self) -> Vec<Sample> {
        self.left
            .iter()
            .zip(&self.right)
            .flat_map(|(&l, &r)| [l, r])
            .collect()
    }
}
