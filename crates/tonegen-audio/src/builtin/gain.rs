//! Gain stage - master volume with click-free ramps.

use tonegen_core::SampleRate;
use tonegen_node::{AudioBuffer, AudioParam, Node, NodeError, NodeInfo};

/// Parameter id of the gain value
pub const PARAM_GAIN: u32 = 0;

/// Stereo gain stage
///
/// Multiplies both channels by a per-frame gain value.
///
/// ## Parameter Range
///
/// Gain: 0.0 to 1.0 (linear)
/// - 0.0 = silence
/// - 1.0 = unity gain (0 dB)
///
/// Values outside the range are clamped at the node. Configuration-level
/// validation rejects them earlier, so clamping only guards direct use.
pub struct GainNode {
    gain: AudioParam,
    info: NodeInfo,
}

impl Default for GainNode {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl GainNode {
    pub fn new(gain: f32) -> Self {
        Self {
            gain: AudioParam::new(f64::from(gain.clamp(0.0, 1.0))),
            info: NodeInfo {
                name: "Gain".to_string(),
            },
        }
    }

    fn check_id(id: u32) -> Result<(), NodeError> {
        if id == PARAM_GAIN {
            Ok(())
        } else {
            Err(NodeError::InvalidParameter(format!(
                "Unknown parameter ID: {id}"
            )))
        }
    }
}

impl Node for GainNode {
    fn info(&self) -> &NodeInfo {
        &self.info
    }

    fn initialize(
        &mut self,
        _sample_rate: SampleRate,
        _max_block_size: usize,
    ) -> Result<(), NodeError> {
        Ok(())
    }

    fn process(&mut self, audio: &mut AudioBuffer) -> Result<(), NodeError> {
        // Ensure we have exactly 2 inputs and 2 outputs (stereo)
        if audio.inputs.len() != 2 || audio.outputs.len() != 2 {
            return Err(NodeError::ProcessingFailed(format!(
                "Gain stage requires 2 inputs and 2 outputs, got {} and {}",
                audio.inputs.len(),
                audio.outputs.len()
            )));
        }

        for ch in 0..2 {
            if audio.inputs[ch].len() < audio.frames || audio.outputs[ch].len() < audio.frames {
                return Err(NodeError::ProcessingFailed(format!(
                    "Channel {ch} buffers are shorter than {} frames",
                    audio.frames
                )));
            }
        }

        // The ramp advances once per frame, shared by both channels
        for i in 0..audio.frames {
            let gain = self.gain.next_value() as f32;
            audio.outputs[0][i] = audio.inputs[0][i] * gain;
            audio.outputs[1][i] = audio.inputs[1][i] * gain;
        }

        Ok(())
    }

    fn set_parameter(&mut self, id: u32, value: f64) -> Result<(), NodeError> {
        Self::check_id(id)?;
        self.gain.set_value(value.clamp(0.0, 1.0));
        Ok(())
    }

    fn ramp_parameter(&mut self, id: u32, target: f64, frames: u32) -> Result<(), NodeError> {
        Self::check_id(id)?;
        self.gain.linear_ramp_to(target.clamp(0.0, 1.0), frames);
        Ok(())
    }

    fn cancel_scheduled(&mut self, id: u32) -> Result<(), NodeError> {
        Self::check_id(id)?;
        self.gain.cancel_scheduled();
        Ok(())
    }

    fn get_parameter(&self, id: u32) -> Result<f64, NodeError> {
        Self::check_id(id)?;
        Ok(self.gain.value())
    }

    fn input_channels(&self) -> usize {
        2 // Stereo
    }

    fn output_channels(&self) -> usize {
        2 // Stereo
    }
}
