//! Oscillator source - one continuous periodic tone.

use std::f64::consts::TAU;

use tonegen_core::{SampleRate, Waveform};
use tonegen_node::{AudioBuffer, AudioParam, Node, NodeError, NodeInfo};

/// Parameter id of the oscillator frequency (Hz)
pub const PARAM_FREQUENCY: u32 = 0;

/// Lifecycle of a source node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    /// Built but not yet started; outputs silence
    Scheduled,
    /// Generating
    Running,
    /// Stopped for good; outputs silence and cannot restart
    Finished,
}

/// Mono oscillator with a smoothed frequency parameter
///
/// The phase accumulates in `f64` and is kept in `[0, 1)`. Changing the
/// frequency (instantly or by ramp) never resets the phase, so there is no
/// discontinuity in the signal; changing the waveform switches the shape on
/// the next frame.
pub struct OscillatorNode {
    waveform: Waveform,
    frequency: AudioParam,
    phase: f64,
    sample_rate: f64,
    state: SourceState,
    info: NodeInfo,
}

impl OscillatorNode {
    pub fn new(waveform: Waveform, frequency_hz: f64) -> Self {
        Self {
            waveform,
            frequency: AudioParam::new(frequency_hz),
            phase: 0.0,
            sample_rate: f64::from(tonegen_core::sample_rates::SR_48000),
            state: SourceState::Scheduled,
            info: NodeInfo {
                name: "Oscillator".to_string(),
            },
        }
    }

    pub const fn waveform(&self) -> Waveform {
        self.waveform
    }

    pub const fn state(&self) -> SourceState {
        self.state
    }

    /// Waveform value at a phase in `[0, 1)`, each shape starting at zero
    /// and rising
    fn shape(waveform: Waveform, phase: f64) -> f64 {
        match waveform {
            Waveform::Sine => (TAU * phase).sin(),
            Waveform::Square => {
                if phase < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            Waveform::Sawtooth => {
                if phase < 0.5 {
                    2.0 * phase
                } else {
                    2.0 * phase - 2.0
                }
            }
            Waveform::Triangle => {
                if phase < 0.25 {
                    4.0 * phase
                } else if phase < 0.75 {
                    2.0 - 4.0 * phase
                } else {
                    4.0 * phase - 4.0
                }
            }
        }
    }

    fn check_id(id: u32) -> Result<(), NodeError> {
        if id == PARAM_FREQUENCY {
            Ok(())
        } else {
            Err(NodeError::InvalidParameter(format!(
                "Unknown parameter ID: {id}"
            )))
        }
    }

    fn check_frequency(hz: f64) -> Result<(), NodeError> {
        if hz.is_finite() && hz > 0.0 {
            Ok(())
        } else {
            Err(NodeError::InvalidParameter(format!(
                "Frequency must be positive, got {hz}"
            )))
        }
    }
}

impl Node for OscillatorNode {
    fn info(&self) -> &NodeInfo {
        &self.info
    }

    fn initialize(
        &mut self,
        sample_rate: SampleRate,
        _max_block_size: usize,
    ) -> Result<(), NodeError> {
        if sample_rate == 0 {
            return Err(NodeError::InitializationFailed(
                "Sample rate must be non-zero".to_string(),
            ));
        }
        self.sample_rate = f64::from(sample_rate);
        Ok(())
    }

    fn process(&mut self, audio: &mut AudioBuffer) -> Result<(), NodeError> {
        let Some(output) = audio.outputs.first_mut() else {
            return Err(NodeError::ProcessingFailed(
                "Oscillator requires one output".to_string(),
            ));
        };
        let frames = audio.frames.min(output.len());

        if self.state != SourceState::Running {
            output[..frames].fill(0.0);
            return Ok(());
        }

        for sample in &mut output[..frames] {
            *sample = Self::shape(self.waveform, self.phase) as f32;

            let frequency = self.frequency.next_value();
            self.phase += frequency / self.sample_rate;
            self.phase -= self.phase.floor();
        }

        Ok(())
    }

    fn set_parameter(&mut self, id: u32, value: f64) -> Result<(), NodeError> {
        Self::check_id(id)?;
        Self::check_frequency(value)?;
        self.frequency.set_value(value);
        Ok(())
    }

    fn ramp_parameter(&mut self, id: u32, target: f64, frames: u32) -> Result<(), NodeError> {
        Self::check_id(id)?;
        Self::check_frequency(target)?;
        self.frequency.linear_ramp_to(target, frames);
        Ok(())
    }

    fn cancel_scheduled(&mut self, id: u32) -> Result<(), NodeError> {
        Self::check_id(id)?;
        self.frequency.cancel_scheduled();
        Ok(())
    }

    fn get_parameter(&self, id: u32) -> Result<f64, NodeError> {
        Self::check_id(id)?;
        Ok(self.frequency.value())
    }

    fn input_channels(&self) -> usize {
        0
    }

    fn output_channels(&self) -> usize {
        1
    }

    fn start(&mut self) -> Result<(), NodeError> {
        match self.state {
            SourceState::Scheduled => {
                self.state = SourceState::Running;
                Ok(())
            }
            SourceState::Running | SourceState::Finished => Err(NodeError::InvalidState(
                "Oscillator can only be started once".to_string(),
            )),
        }
    }

    fn stop(&mut self) -> Result<(), NodeError> {
        match self.state {
            SourceState::Running => {
                self.state = SourceState::Finished;
                Ok(())
            }
            SourceState::Scheduled => Err(NodeError::InvalidState(
                "Oscillator was never started".to_string(),
            )),
            SourceState::Finished => Err(NodeError::InvalidState(
                "Oscillator already stopped".to_string(),
            )),
        }
    }

    fn set_waveform(&mut self, waveform: Waveform) -> Result<(), NodeError> {
        self.waveform = waveform;
        Ok(())
    }
}
