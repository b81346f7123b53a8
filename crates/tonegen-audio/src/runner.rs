//! Audio-thread side of a live graph.
//!
//! `GraphRunner` owns the active graph on whatever thread renders audio
//! (the cpal callback, or the caller of `HeadlessContext::render`). It
//! applies queued commands at the start of every buffer and then renders.

use smallvec::SmallVec;
use tonegen_comms::{AudioChannels, AudioCommand, AudioEvent};
use tonegen_core::{Frames, Sample};
use tonegen_node::NodeError;

use crate::graph::AudioGraph;

/// Applies commands to and renders the active graph
pub struct GraphRunner {
    channels: AudioChannels<AudioGraph>,
    graph: Option<AudioGraph>,
    /// Planar scratch buffers, pre-allocated to the block size
    scratch: [Vec<Sample>; 2],
    block_size: Frames,
}

impl GraphRunner {
    pub fn new(channels: AudioChannels<AudioGraph>, block_size: Frames) -> Self {
        Self {
            channels,
            graph: None,
            scratch: [vec![0.0; block_size], vec![0.0; block_size]],
            block_size,
        }
    }

    /// Whether a graph is loaded
    pub fn has_graph(&self) -> bool {
        self.graph.is_some()
    }

    /// Apply every queued command (non-blocking)
    ///
    /// REAL-TIME SAFE: no logging. Rejections are reported as events and
    /// dropped if the event queue is full.
    pub fn apply_commands(&mut self) {
        while let Ok(cmd) = self.channels.command_rx.pop() {
            if self.apply(cmd).is_err() {
                let _ = self
                    .channels
                    .event_tx
                    .push(AudioEvent::CommandRejected(cmd));
            }
        }
    }

    fn apply(&mut self, cmd: AudioCommand) -> Result<(), NodeError> {
        match cmd {
            AudioCommand::LoadGraph => {
                if let Ok(graph) = self.channels.graph_rx.try_recv() {
                    if let Some(old) = self.graph.replace(graph) {
                        // Dropped on the control thread, not here
                        let _ = self.channels.retired_tx.send(old);
                    }
                    let _ = self.channels.event_tx.push(AudioEvent::GraphLoaded);
                }
                Ok(())
            }
            AudioCommand::UnloadGraph => {
                if let Some(old) = self.graph.take() {
                    let _ = self.channels.retired_tx.send(old);
                    let _ = self.channels.event_tx.push(AudioEvent::GraphUnloaded);
                }
                Ok(())
            }
            AudioCommand::StartNode(node) => self.graph_mut(node)?.start_node(node),
            AudioCommand::StopNode(node) => self.graph_mut(node)?.stop_node(node),
            AudioCommand::DisconnectNode(node) => {
                self.graph_mut(node)?.disconnect_node(node);
                Ok(())
            }
            AudioCommand::SetParameter { node, param, value } => {
                self.graph_mut(node)?.set_parameter(node, param, value)
            }
            AudioCommand::RampParameter {
                node,
                param,
                target,
                frames,
            } => self.graph_mut(node)?.ramp_parameter(node, param, target, frames),
            AudioCommand::CancelScheduled { node, param } => {
                self.graph_mut(node)?.cancel_scheduled(node, param)
            }
            AudioCommand::SetWaveform { node, waveform } => {
                self.graph_mut(node)?.set_waveform(node, waveform)
            }
        }
    }

    fn graph_mut(&mut self, node: usize) -> Result<&mut AudioGraph, NodeError> {
        self.graph.as_mut().ok_or(NodeError::NotFound(node))
    }

    /// Render into planar stereo buffers of equal length
    pub fn render_planar(&mut self, left: &mut [Sample], right: &mut [Sample]) {
        let frames = left.len().min(right.len());
        let mut offset = 0;
        while offset < frames {
            let chunk = (frames - offset).min(self.block_size);
            let done = self.render_block(chunk);
            left[offset..offset + done].copy_from_slice(&self.scratch[0][..done]);
            right[offset..offset + done].copy_from_slice(&self.scratch[1][..done]);
            offset += done;
        }
    }

    /// Render into an interleaved device buffer with `channels` channels
    ///
    /// Left and right go to the first two channels; any further channels
    /// are silent. A mono device gets the left channel.
    pub fn render_interleaved(&mut self, data: &mut [Sample], channels: usize) {
        if channels == 0 {
            return;
        }
        let total_frames = data.len() / channels;
        let mut peak_left = 0.0_f32;
        let mut peak_right = 0.0_f32;

        let mut frame_offset = 0;
        while frame_offset < total_frames {
            let chunk = (total_frames - frame_offset).min(self.block_size);
            let done = self.render_block(chunk);

            let start = frame_offset * channels;
            let end = (frame_offset + done) * channels;
            for (i, frame) in data[start..end].chunks_exact_mut(channels).enumerate() {
                let l = self.scratch[0][i];
                let r = self.scratch[1][i];
                peak_left = peak_left.max(l.abs());
                peak_right = peak_right.max(r.abs());

                frame.fill(0.0);
                frame[0] = l;
                if let Some(second) = frame.get_mut(1) {
                    *second = r;
                }
            }
            frame_offset += done;
        }

        // Leftover samples that do not form a whole frame
        data[total_frames * channels..].fill(0.0);

        if self.graph.is_some() {
            // Informational only: drop if the queue is full
            let _ = self.channels.event_tx.push(AudioEvent::PeakLevel {
                left: peak_left,
                right: peak_right,
            });
        }
    }

    /// Render up to one block into the scratch buffers, returning the frame count
    fn render_block(&mut self, frames: Frames) -> Frames {
        let frames = frames.min(self.block_size);
        let [left, right] = &mut self.scratch;

        match self.graph.as_mut() {
            Some(graph) => {
                // REAL-TIME SAFE: SmallVec keeps the two channel refs on the stack
                let done = {
                    let mut outputs: SmallVec<[&mut [Sample]; 2]> =
                        SmallVec::from_buf([&mut left[..frames], &mut right[..frames]]);
                    graph.process(&mut outputs, frames)
                };
                if done < frames {
                    left[done..frames].fill(0.0);
                    right[done..frames].fill(0.0);
                }
            }
            None => {
                left[..frames].fill(0.0);
                right[..frames].fill(0.0);
            }
        }
        frames
    }
}
