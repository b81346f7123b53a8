//! Channel merger - combines two mono inputs into one stereo signal.

use tonegen_core::{STEREO, SampleRate};
use tonegen_node::{AudioBuffer, Node, NodeError, NodeInfo};

/// Two-channel merger
///
/// ## Signal Flow
///
/// ```text
/// input 0 (mono) --> output 0 (left)
/// input 1 (mono) --> output 1 (right)
/// ```
///
/// Has no parameters. Which source lands on which input is decided by the
/// channel routing of the graph connections feeding it.
pub struct ChannelMergerNode {
    info: NodeInfo,
}

impl Default for ChannelMergerNode {
    fn default() -> Self {
        Self {
            info: NodeInfo {
                name: "ChannelMerger".to_string(),
            },
        }
    }
}

impl ChannelMergerNode {
    fn no_parameters(id: u32) -> NodeError {
        NodeError::InvalidParameter(format!("ChannelMerger has no parameter {id}"))
    }
}

impl Node for ChannelMergerNode {
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
        if audio.inputs.len() != STEREO || audio.outputs.len() != STEREO {
            return Err(NodeError::ProcessingFailed(format!(
                "ChannelMerger requires 2 inputs and 2 outputs, got {} and {}",
                audio.inputs.len(),
                audio.outputs.len()
            )));
        }

        for (input, output) in audio.inputs.iter().zip(audio.outputs.iter_mut()) {
            let frames = audio.frames.min(input.len()).min(output.len());
            output[..frames].copy_from_slice(&input[..frames]);
        }

        Ok(())
    }

    fn set_parameter(&mut self, id: u32, _value: f64) -> Result<(), NodeError> {
        Err(Self::no_parameters(id))
    }

    fn ramp_parameter(&mut self, id: u32, _target: f64, _frames: u32) -> Result<(), NodeError> {
        Err(Self::no_parameters(id))
    }

    fn cancel_scheduled(&mut self, id: u32) -> Result<(), NodeError> {
        Err(Self::no_parameters(id))
    }

    fn get_parameter(&self, id: u32) -> Result<f64, NodeError> {
        Err(Self::no_parameters(id))
    }

    fn input_channels(&self) -> usize {
        STEREO
    }

    fn output_channels(&self) -> usize {
        STEREO
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merges_inputs_to_matching_outputs() {
        let mut merger = ChannelMergerNode::default();
        let left_in = vec![0.25; 8];
        let right_in = vec![-0.75; 8];
        let mut left_out = vec![0.0; 8];
        let mut right_out = vec![0.0; 8];

        let inputs: Vec<&[f32]> = vec![&left_in, &right_in];
        let mut outputs: Vec<&mut [f32]> = vec![&mut left_out, &mut right_out];
        let mut audio = AudioBuffer {
            inputs: &inputs,
            outputs: &mut outputs,
            frames: 8,
        };
        merger.process(&mut audio).unwrap();

        assert_eq!(left_out, left_in);
        assert_eq!(right_out, right_in);
    }

    #[test]
    fn test_has_no_parameters() {
        let mut merger = ChannelMergerNode::default();
        assert!(merger.set_parameter(0, 1.0).is_err());
        assert!(merger.get_parameter(0).is_err());
    }
}
