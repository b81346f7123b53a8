//! Tone configuration snapshot consumed by the graph builders.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;

/// Lowest accepted oscillator frequency (inclusive)
pub const MIN_FREQUENCY_HZ: f64 = 0.01;
/// Highest accepted oscillator frequency (inclusive)
pub const MAX_FREQUENCY_HZ: f64 = 20_000.0;

/// Schumann resonance, the generator's starting frequency
pub const DEFAULT_FREQUENCY_HZ: f64 = 7.83;
/// Starting volume
pub const DEFAULT_VOLUME: f32 = 0.3;
/// Starting binaural beat offset
pub const DEFAULT_BEAT_HZ: f64 = 4.0;

/// Oscillator waveform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Waveform {
    #[default]
    Sine,
    Square,
    Sawtooth,
    Triangle,
}

impl Waveform {
    /// All waveforms, in selector order
    pub const ALL: [Self; 4] = [Self::Sine, Self::Square, Self::Sawtooth, Self::Triangle];

    /// Lower-case name used on the command line and in settings files
    pub const fn name(self) -> &'static str {
        match self {
            Self::Sine => "sine",
            Self::Square => "square",
            Self::Sawtooth => "sawtooth",
            Self::Triangle => "triangle",
        }
    }
}

impl fmt::Display for Waveform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Waveform {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|w| w.name() == s)
            .ok_or_else(|| Error::UnsupportedConfiguration(format!("unknown waveform '{s}'")))
    }
}

/// Named base frequency offered by the preset selector
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrequencyPreset {
    pub name: &'static str,
    pub frequency_hz: f64,
}

const fn preset(name: &'static str, frequency_hz: f64) -> FrequencyPreset {
    FrequencyPreset { name, frequency_hz }
}

/// Preset frequencies, in selector order
pub const PRESETS: [FrequencyPreset; 9] = [
    preset("schumann", DEFAULT_FREQUENCY_HZ),
    preset("delta", 2.0),
    preset("theta", 6.0),
    preset("alpha", 10.0),
    preset("beta", 20.0),
    preset("gamma", 40.0),
    preset("om", 136.1),
    preset("verdi", 432.0),
    preset("solfeggio", 528.0),
];

impl FromStr for FrequencyPreset {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PRESETS
            .into_iter()
            .find(|p| p.name.eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::UnsupportedConfiguration(format!("unknown preset '{s}'")))
    }
}

/// Binaural beat settings
///
/// When enabled the right channel runs `beat_hz` above the left channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BinauralSettings {
    pub enabled: bool,
    pub beat_hz: f64,
}

impl Default for BinauralSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            beat_hz: DEFAULT_BEAT_HZ,
        }
    }
}

/// Immutable snapshot of everything needed to build a tone graph
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ToneConfiguration {
    pub base_frequency_hz: f64,
    pub waveform: Waveform,
    pub volume: f32,
    #[serde(default)]
    pub binaural: BinauralSettings,
}

impl Default for ToneConfiguration {
    fn default() -> Self {
        Self {
            base_frequency_hz: DEFAULT_FREQUENCY_HZ,
            waveform: Waveform::Sine,
            volume: DEFAULT_VOLUME,
            binaural: BinauralSettings::default(),
        }
    }
}

impl ToneConfiguration {
    /// Create a monaural configuration
    pub fn new(base_frequency_hz: f64, waveform: Waveform, volume: f32) -> Self {
        Self {
            base_frequency_hz,
            waveform,
            volume,
            binaural: BinauralSettings::default(),
        }
    }

    /// Enable binaural mode with the given beat offset
    pub fn with_binaural_beat(mut self, beat_hz: f64) -> Self {
        self.binaural = BinauralSettings {
            enabled: true,
            beat_hz,
        };
        self
    }

    /// Frequency of the left oscillator
    pub fn left_frequency_hz(&self) -> f64 {
        self.base_frequency_hz
    }

    /// Frequency of the right oscillator
    pub fn right_frequency_hz(&self) -> f64 {
        if self.binaural.enabled {
            self.base_frequency_hz + self.binaural.beat_hz
        } else {
            self.base_frequency_hz
        }
    }

    /// Check every field against its domain.
    ///
    /// Values are never clamped: anything out of range is rejected.
    pub fn validate(&self) -> Result<(), Error> {
        validate_frequency("base frequency", self.base_frequency_hz)?;

        if !self.volume.is_finite() || !(0.0..=1.0).contains(&self.volume) {
            return Err(Error::UnsupportedConfiguration(format!(
                "volume {} is outside [0, 1]",
                self.volume
            )));
        }

        let beat = self.binaural.beat_hz;
        if !beat.is_finite() || beat < 0.0 {
            return Err(Error::UnsupportedConfiguration(format!(
                "binaural beat {beat} Hz must be a non-negative number"
            )));
        }

        if self.binaural.enabled {
            validate_frequency("right channel frequency", self.right_frequency_hz())?;
        }

        Ok(())
    }
}

/// Accepts finite frequencies in [`MIN_FREQUENCY_HZ`], [`MAX_FREQUENCY_HZ`]
pub fn validate_frequency(what: &str, hz: f64) -> Result<(), Error> {
    if hz.is_finite() && (MIN_FREQUENCY_HZ..=MAX_FREQUENCY_HZ).contains(&hz) {
        Ok(())
    } else {
        Err(Error::UnsupportedConfiguration(format!(
            "{what} {hz} Hz is outside [{MIN_FREQUENCY_HZ}, {MAX_FREQUENCY_HZ}]"
        )))
    }
}
