//! Tone graph, live playback and offline rendering.
//!
//! This crate provides the tone graph and the nodes it is made of, the
//! live session driving a cpal output, the offline render/export pipeline,
//! and the control-surface model the front ends talk to.

pub mod builtin;
pub mod control;
pub mod engine;
pub mod factory;
pub mod graph;
pub mod live;
pub mod offline;
pub mod runner;
pub mod settings;

pub use control::ToneController;
pub use engine::{AudioContext, CpalContext, HeadlessContext};
pub use factory::{BuiltGraph, GraphHandle, SignalGraphFactory};
pub use graph::AudioGraph;
pub use live::{LiveToneSession, PlaybackState, ToneUpdate};
pub use offline::{
    CancelToken, ExportTask, ExportedFile, OfflineRenderer, ProgressSink, RenderPhase,
    RenderProgress,
};
pub use settings::{SettingsError, ToneSettings};

use tonegen_core::{Frames, SampleRate, STEREO};

/// Audio configuration for the live engine
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Requested rate; the device's own rate wins if it differs
    pub sample_rate: SampleRate,
    pub block_size: Frames,
    pub output_channels: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            block_size: 256,
            output_channels: STEREO,
        }
    }
}
