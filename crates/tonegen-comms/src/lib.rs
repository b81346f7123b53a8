//! Lockless communication primitives for audio-thread-safe communication.
//!
//! The control thread never touches a graph once it has been handed to the
//! audio thread. It only pushes small `Copy` commands onto a ring buffer,
//! which the audio callback applies at the start of its next block.
//! Whole graphs travel separately on a channel so that neither building nor
//! dropping one ever happens inside the callback.

pub use rtrb;

use crossbeam_channel::{Receiver, Sender};
use tonegen_core::{Sample, Waveform};

/// Commands that can be sent from the control thread to the audio thread
///
/// IMPORTANT: All variants must be real-time safe (no heap allocation/deallocation).
/// Graphs themselves go through the separate `graph_tx` channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AudioCommand {
    /// Swap in the graph waiting on the graph channel
    LoadGraph,
    /// Retire the active graph and output silence
    UnloadGraph,
    /// Start a source node
    StartNode(usize),
    /// Stop a source node
    StopNode(usize),
    /// Remove every connection into and out of a node
    DisconnectNode(usize),
    /// Set a parameter instantly
    SetParameter {
        node: usize,
        param: u32,
        value: f64,
    },
    /// Ramp a parameter linearly from its current value
    RampParameter {
        node: usize,
        param: u32,
        target: f64,
        frames: u32,
    },
    /// Drop scheduled ramps, holding the current value
    CancelScheduled { node: usize, param: u32 },
    /// Switch an oscillator's waveform
    SetWaveform { node: usize, waveform: Waveform },
}

/// Events sent from audio thread back to the control thread
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AudioEvent {
    /// A graph from the graph channel is now being processed
    GraphLoaded,
    /// The active graph was retired
    GraphUnloaded,
    /// A command targeted a node that does not exist or rejected it
    CommandRejected(AudioCommand),
    /// Peak level update for the last processed buffer
    PeakLevel { left: Sample, right: Sample },
}

/// Create the channel bundle for one audio thread.
///
/// `G` is the graph type; it is generic so this crate does not depend on the
/// graph implementation.
pub fn create_channels<G: Send>(capacity: usize) -> (ControlChannels<G>, AudioChannels<G>) {
    let (cmd_tx, cmd_rx) = rtrb::RingBuffer::new(capacity);
    let (evt_tx, evt_rx) = rtrb::RingBuffer::new(capacity);
    let (graph_tx, graph_rx) = crossbeam_channel::unbounded();
    let (retired_tx, retired_rx) = crossbeam_channel::unbounded();

    let control = ControlChannels {
        command_tx: cmd_tx,
        event_rx: evt_rx,
        graph_tx,
        retired_rx,
    };

    let audio = AudioChannels {
        command_rx: cmd_rx,
        event_tx: evt_tx,
        graph_rx,
        retired_tx,
    };

    (control, audio)
}

/// Channels for the control thread (sends commands, receives events)
pub struct ControlChannels<G> {
    /// Command sender (control -> audio)
    pub command_tx: rtrb::Producer<AudioCommand>,
    /// Event receiver (audio -> control)
    pub event_rx: rtrb::Consumer<AudioEvent>,
    /// Graph sender (control -> audio), paired with `AudioCommand::LoadGraph`
    pub graph_tx: Sender<G>,
    /// Graphs the audio thread is done with, to be dropped here
    pub retired_rx: Receiver<G>,
}

impl<G> ControlChannels<G> {
    /// Drop every graph the audio thread has handed back
    pub fn collect_retired(&self) -> usize {
        self.retired_rx.try_iter().count()
    }

    /// Drain pending events
    pub fn drain_events(&mut self) -> Vec<AudioEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.event_rx.pop() {
            events.push(event);
        }
        events
    }
}

/// Channels for the audio thread (receives commands, sends events)
pub struct AudioChannels<G> {
    /// Command receiver (control -> audio)
    pub command_rx: rtrb::Consumer<AudioCommand>,
    /// Event sender (audio -> control)
    pub event_tx: rtrb::Producer<AudioEvent>,
    /// Graph receiver - `try_recv` is non-blocking
    pub graph_rx: Receiver<G>,
    /// Retired graph sender - unbounded, never blocks
    pub retired_tx: Sender<G>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_creation() {
        let (mut control, mut audio) = create_channels::<Vec<f32>>(16);
        assert!(control.command_tx.push(AudioCommand::StartNode(3)).is_ok());
        assert_eq!(audio.command_rx.pop().ok(), Some(AudioCommand::StartNode(3)));
    }

    #[test]
    fn test_graph_round_trip() {
        let (control, audio) = create_channels::<Vec<f32>>(16);
        control.graph_tx.send(vec![1.0]).unwrap();

        let graph = audio.graph_rx.try_recv().unwrap();
        audio.retired_tx.send(graph).unwrap();

        assert_eq!(control.collect_retired(), 1);
        assert_eq!(control.collect_retired(), 0);
    }

    #[test]
    fn test_drain_events() {
        let (mut control, mut audio) = create_channels::<()>(4);
        audio.event_tx.push(AudioEvent::GraphLoaded).unwrap();
        audio.event_tx.push(AudioEvent::GraphUnloaded).unwrap();

        assert_eq!(
            control.drain_events(),
            vec![AudioEvent::GraphLoaded, AudioEvent::GraphUnloaded]
        );
        assert!(control.drain_events().is_empty());
    }
}
