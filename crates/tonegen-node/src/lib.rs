//! Node abstraction layer.
//!
//! This crate defines the `Node` trait that every stage of a tone graph
//! (oscillators, the channel merger, the gain stage) implements, so the
//! graph can route and drive them without knowing what they are.

pub mod param;

pub use param::AudioParam;

use tonegen_core::{ChannelCount, Frames, Sample, SampleRate, Waveform};

/// Audio buffer for processing
pub struct AudioBuffer<'a, 'b> {
    pub inputs: &'a [&'a [Sample]],
    pub outputs: &'a mut [&'b mut [Sample]],
    pub frames: Frames,
}

/// Node metadata
#[derive(Debug, Clone)]
pub struct NodeInfo {
    pub name: String,
}

/// Trait implemented by every graph stage
pub trait Node: Send {
    /// Get node information
    fn info(&self) -> &NodeInfo;

    /// Initialize the node with sample rate and max block size
    fn initialize(&mut self, sample_rate: SampleRate, max_block_size: Frames)
    -> Result<(), NodeError>;

    /// Process one block of audio
    fn process(&mut self, audio: &mut AudioBuffer) -> Result<(), NodeError>;

    /// Set a parameter instantly, cancelling any ramp in flight
    fn set_parameter(&mut self, id: u32, value: f64) -> Result<(), NodeError>;

    /// Ramp a parameter linearly from its current value to `target` over `frames`
    fn ramp_parameter(&mut self, id: u32, target: f64, frames: u32) -> Result<(), NodeError>;

    /// Drop any scheduled ramp, holding the parameter at its current value
    fn cancel_scheduled(&mut self, id: u32) -> Result<(), NodeError>;

    /// Get a parameter's current value
    fn get_parameter(&self, id: u32) -> Result<f64, NodeError>;

    /// Get number of input channels
    fn input_channels(&self) -> ChannelCount;

    /// Get number of output channels
    fn output_channels(&self) -> ChannelCount;

    /// Begin generating (sources only)
    fn start(&mut self) -> Result<(), NodeError> {
        Err(NodeError::Unsupported(format!(
            "{} cannot be started",
            self.info().name
        )))
    }

    /// Stop generating (sources only)
    fn stop(&mut self) -> Result<(), NodeError> {
        Err(NodeError::Unsupported(format!(
            "{} cannot be stopped",
            self.info().name
        )))
    }

    /// Switch waveform instantly (oscillators only)
    fn set_waveform(&mut self, _waveform: Waveform) -> Result<(), NodeError> {
        Err(NodeError::Unsupported(format!(
            "{} has no waveform",
            self.info().name
        )))
    }
}

/// Node-related errors
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("Node initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Node processing failed: {0}")]
    ProcessingFailed(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Invalid node state: {0}")]
    InvalidState(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Node {0} not found")]
    NotFound(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Silence {
        info: NodeInfo,
    }

    impl Node for Silence {
        fn info(&self) -> &NodeInfo {
            &self.info
        }

        fn initialize(&mut self, _: SampleRate, _: Frames) -> Result<(), NodeError> {
            Ok(())
        }

        fn process(&mut self, audio: &mut AudioBuffer) -> Result<(), NodeError> {
            for output in audio.outputs.iter_mut() {
                output[..audio.frames].fill(0.0);
            }
            Ok(())
        }

        fn set_parameter(&mut self, id: u32, _: f64) -> Result<(), NodeError> {
            Err(NodeError::InvalidParameter(format!("{id}")))
        }

        fn ramp_parameter(&mut self, id: u32, _: f64, _: u32) -> Result<(), NodeError> {
            Err(NodeError::InvalidParameter(format!("{id}")))
        }

        fn cancel_scheduled(&mut self, id: u32) -> Result<(), NodeError> {
            Err(NodeError::InvalidParameter(format!("{id}")))
        }

        fn get_parameter(&self, id: u32) -> Result<f64, NodeError> {
            Err(NodeError::InvalidParameter(format!("{id}")))
        }

        fn input_channels(&self) -> ChannelCount {
            0
        }

        fn output_channels(&self) -> ChannelCount {
            1
        }
    }

    #[test]
    fn test_default_source_operations_are_unsupported() {
        let mut node = Silence {
            info: NodeInfo {
                name: "Silence".to_string(),
            },
        };

        assert!(matches!(node.start(), Err(NodeError::Unsupported(_))));
        assert!(matches!(node.stop(), Err(NodeError::Unsupported(_))));
        assert!(matches!(
            node.set_waveform(Waveform::Square),
            Err(NodeError::Unsupported(_))
        ));
    }
}
