//! Builds the stereo dual-oscillator tone graph.
//!
//! ```text
//! left oscillator  --> merger input 0 \
//!                                      merger --> gain --> destination
//! right oscillator --> merger input 1 /
//! ```
//!
//! The same factory serves live playback and offline rendering, so what
//! plays is what gets exported.

use tonegen_core::{Error, Frames, Result, SampleRate, ToneConfiguration};
use tonegen_node::NodeError;

use crate::builtin::{ChannelMergerNode, GainNode, OscillatorNode};
use crate::graph::AudioGraph;

/// Node IDs of one tone graph
///
/// Plain IDs, not references: the graph itself may live on the audio thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphHandle {
    pub left: usize,
    pub right: usize,
    pub merger: usize,
    pub gain: usize,
}

impl GraphHandle {
    /// Both oscillators, left first
    pub const fn oscillators(&self) -> [usize; 2] {
        [self.left, self.right]
    }

    /// Every node in the graph
    pub const fn nodes(&self) -> [usize; 4] {
        [self.left, self.right, self.merger, self.gain]
    }
}

/// A freshly built graph whose oscillators have not been started
pub struct BuiltGraph {
    pub graph: AudioGraph,
    pub handle: GraphHandle,
}

/// Builds tone graphs for one sample rate and block size
#[derive(Debug, Clone, Copy)]
pub struct SignalGraphFactory {
    sample_rate: SampleRate,
    block_size: Frames,
}

impl SignalGraphFactory {
    pub const fn new(sample_rate: SampleRate, block_size: Frames) -> Self {
        Self {
            sample_rate,
            block_size,
        }
    }

    pub const fn sample_rate(&self) -> SampleRate {
        self.sample_rate
    }

    /// Build a graph for `config`.
    ///
    /// Every value is set instantaneously; starting the oscillators is up to
    /// the caller.
    pub fn build(&self, config: &ToneConfiguration) -> Result<BuiltGraph> {
        config.validate()?;
        self.assemble(config).map_err(|e| {
            Error::UnsupportedConfiguration(format!("failed to assemble tone graph: {e}"))
        })
    }

    fn assemble(&self, config: &ToneConfiguration) -> std::result::Result<BuiltGraph, NodeError> {
        let mut graph = AudioGraph::with_config(self.sample_rate, self.block_size);

        let gain = graph.add_node(Box::new(GainNode::new(config.volume)))?;
        let merger = graph.add_node(Box::new(ChannelMergerNode::default()))?;
        let left = graph.add_node(Box::new(OscillatorNode::new(
            config.waveform,
            config.left_frequency_hz(),
        )))?;
        let right = graph.add_node(Box::new(OscillatorNode::new(
            config.waveform,
            config.right_frequency_hz(),
        )))?;

        graph.connect_channel(left, 0, merger, 0)?;
        graph.connect_channel(right, 0, merger, 1)?;
        graph.connect(merger, gain)?;
        graph.connect_to_destination(gain)?;

        tracing::debug!(
            "Built tone graph: {} / {} Hz, {}, volume {}",
            config.left_frequency_hz(),
            config.right_frequency_hz(),
            config.waveform,
            config.volume
        );

        Ok(BuiltGraph {
            graph,
            handle: GraphHandle {
                left,
                right,
                merger,
                gain,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::gain::PARAM_GAIN;
    use crate::builtin::oscillator::PARAM_FREQUENCY;
    use tonegen_core::Waveform;

    fn factory() -> SignalGraphFactory {
        SignalGraphFactory::new(44100, 128)
    }

    #[test]
    fn test_builds_four_nodes_with_initial_values() {
        let config = ToneConfiguration::new(440.0, Waveform::Triangle, 0.4);
        let BuiltGraph { graph, handle } = factory().build(&config).unwrap();

        assert_eq!(graph.node_count(), 4);
        assert_eq!(graph.get_parameter(handle.left, PARAM_FREQUENCY).unwrap(), 440.0);
        assert_eq!(graph.get_parameter(handle.right, PARAM_FREQUENCY).unwrap(), 440.0);
        assert_eq!(
            graph.get_parameter(handle.gain, PARAM_GAIN).unwrap(),
            f64::from(0.4_f32)
        );
        assert!(graph.is_sink(handle.gain));
        assert!(!graph.is_sink(handle.merger));
    }

    #[test]
    fn test_binaural_right_channel_offset_is_exact() {
        for (base, beat) in [(200.0, 4.0), (7.83, 2.5), (100.1, 0.3), (15_000.0, 12.75)] {
            let config = ToneConfiguration::new(base, Waveform::Sine, 0.3).with_binaural_beat(beat);
            let BuiltGraph { graph, handle } = factory().build(&config).unwrap();

            let left = graph.get_parameter(handle.left, PARAM_FREQUENCY).unwrap();
            let right = graph.get_parameter(handle.right, PARAM_FREQUENCY).unwrap();
            assert_eq!(left, base);
            assert_eq!(right, left + beat);
        }
    }

    #[test]
    fn test_wiring() {
        let config = ToneConfiguration::default();
        let BuiltGraph { graph, handle } = factory().build(&config).unwrap();

        let mut wiring: Vec<_> = graph.connections().copied().collect();
        wiring.sort_by_key(|c| (c.from, c.to));
        assert_eq!(wiring.len(), 3);

        use crate::graph::Route;
        assert!(wiring.iter().any(|c| c.from == handle.left
            && c.to == handle.merger
            && c.route == Route::Channel { output: 0, input: 0 }));
        assert!(wiring.iter().any(|c| c.from == handle.right
            && c.to == handle.merger
            && c.route == Route::Channel { output: 0, input: 1 }));
        assert!(wiring
            .iter()
            .any(|c| c.from == handle.merger && c.to == handle.gain && c.route == Route::All));
    }

    #[test]
    fn test_oscillators_are_not_started() {
        let config = ToneConfiguration::default();
        let BuiltGraph { mut graph, .. } = factory().build(&config).unwrap();

        let mut left = vec![1.0_f32; 128];
        let mut right = vec![1.0_f32; 128];
        let mut outputs: Vec<&mut [f32]> = vec![&mut left, &mut right];
        graph.process(&mut outputs, 128);
        assert!(left.iter().chain(&right).all(|&s| s == 0.0));
    }

    #[test]
    fn test_rejects_invalid_configuration() {
        let bad = [
            ToneConfiguration::new(0.0, Waveform::Sine, 0.3),
            ToneConfiguration::new(f64::NAN, Waveform::Sine, 0.3),
            ToneConfiguration::new(20_000.001, Waveform::Sine, 0.3),
            ToneConfiguration::new(440.0, Waveform::Sine, 1.5),
        ];
        for config in bad {
            assert!(matches!(
                factory().build(&config),
                Err(Error::UnsupportedConfiguration(_))
            ));
        }
    }
}
