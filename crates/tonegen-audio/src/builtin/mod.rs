//! Built-in graph nodes.
//!
//! These are the only stages a tone graph is made of. They implement the
//! `Node` trait so the graph drives them through plain vtable dispatch.

pub mod gain;
pub mod merger;
pub mod oscillator;

pub use gain::GainNode;
pub use merger::ChannelMergerNode;
pub use oscillator::{OscillatorNode, SourceState};
