//! Audio contexts - where live graphs actually run.
//!
//! `AudioContext` is the seam between `LiveToneSession` and the audio
//! device. `CpalContext` drives the default output device through cpal;
//! `HeadlessContext` renders on demand on the caller's thread, which is what
//! tests and device-less environments use.

use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::Context;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender};
use tonegen_comms::{AudioCommand, AudioEvent, ControlChannels, create_channels};
use tonegen_core::{Error, Frames, RenderedAudio, Result, SampleRate};

use crate::AudioConfig;
use crate::graph::AudioGraph;
use crate::runner::GraphRunner;

/// Ring buffer capacity for commands and events
const QUEUE_CAPACITY: usize = 256;

/// How long `resume` waits for the device to open
const OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// A running (or resumable) audio output
pub trait AudioContext: Send + 'static {
    /// Make sure the output is running.
    ///
    /// Idempotent. Fails with `AudioEngineUnavailable` when no output can be
    /// opened.
    fn resume(&mut self) -> Result<()>;

    /// Sample rate graphs must be built for (valid after `resume`)
    fn sample_rate(&self) -> SampleRate;

    /// Largest block the output will ask a graph to render
    fn block_size(&self) -> Frames;

    /// Hand a graph to the audio thread, replacing any active one
    fn load_graph(&mut self, graph: AudioGraph) -> Result<()>;

    /// Queue a command for the audio thread
    fn send(&mut self, command: AudioCommand) -> Result<()>;

    /// Events the audio thread has reported since the last call
    fn poll_events(&mut self) -> Vec<AudioEvent>;

    /// Shut the output down. `resume` may reopen it.
    fn close(&mut self);
}

fn push_command(control: &mut ControlChannels<AudioGraph>, command: AudioCommand) -> Result<()> {
    control
        .command_tx
        .push(command)
        .map_err(|_| Error::AudioEngineUnavailable("audio command queue is full".to_string()))
}

fn hand_over(control: &mut ControlChannels<AudioGraph>, graph: AudioGraph) -> Result<()> {
    control.collect_retired();
    control
        .graph_tx
        .send(graph)
        .map_err(|_| Error::AudioEngineUnavailable("audio thread has gone away".to_string()))?;
    push_command(control, AudioCommand::LoadGraph)
}

/// The engine thread owning the cpal stream
///
/// `cpal::Stream` is not `Send`, so it never leaves the thread that built it.
struct EngineThread {
    control: ControlChannels<AudioGraph>,
    sample_rate: SampleRate,
    shutdown_tx: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl EngineThread {
    fn spawn(config: &AudioConfig) -> Result<Self> {
        let (control, audio) = create_channels(QUEUE_CAPACITY);
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);
        let config = config.clone();

        let thread = std::thread::Builder::new()
            .name("tonegen-audio".to_string())
            .spawn(move || {
                let runner = GraphRunner::new(audio, config.block_size);
                match open_stream(&config, runner) {
                    Ok((stream, sample_rate)) => {
                        let _ = ready_tx.send(Ok(sample_rate));
                        run_until_shutdown(&stream, &shutdown_rx);
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(format!("{e:#}")));
                    }
                }
            })
            .map_err(|e| {
                Error::AudioEngineUnavailable(format!("failed to spawn audio thread: {e}"))
            })?;

        let opened: std::result::Result<SampleRate, String> = ready_rx
            .recv_timeout(OPEN_TIMEOUT)
            .unwrap_or_else(|_| Err("timed out opening the output device".to_string()));

        match opened {
            Ok(sample_rate) => Ok(Self {
                control,
                sample_rate,
                shutdown_tx,
                thread: Some(thread),
            }),
            Err(message) => {
                drop(shutdown_tx);
                let _ = thread.join();
                Err(Error::AudioEngineUnavailable(message))
            }
        }
    }

    fn shutdown(&mut self) {
        let _ = self.shutdown_tx.send(());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("Audio thread panicked");
            }
        }
        self.control.collect_retired();
    }
}

fn run_until_shutdown(stream: &cpal::Stream, shutdown_rx: &Receiver<()>) {
    // Returns on an explicit shutdown or when the context is dropped
    let _ = shutdown_rx.recv();
    if let Err(e) = stream.pause() {
        tracing::warn!("Failed to pause audio stream: {}", e);
    }
    tracing::info!("Audio stream stopped");
}

fn open_stream(
    config: &AudioConfig,
    mut runner: GraphRunner,
) -> anyhow::Result<(cpal::Stream, SampleRate)> {
    let host = cpal::default_host();
    tracing::debug!("Using audio host: {}", host.id().name());

    let device = host
        .default_output_device()
        .context("No output device available")?;
    tracing::info!("Using output device: {}", device.name()?);

    let supported = device
        .default_output_config()
        .context("Output device has no default configuration")?;
    let sample_rate = supported.sample_rate().0;
    if sample_rate != config.sample_rate {
        tracing::info!(
            "Device runs at {} Hz instead of the requested {} Hz",
            sample_rate,
            config.sample_rate
        );
    }

    let stream_config = cpal::StreamConfig {
        channels: u16::try_from(config.output_channels).context("Too many output channels")?,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };
    tracing::debug!("Stream config: {:?}", stream_config);

    let channels = config.output_channels;
    let stream = device.build_output_stream(
        &stream_config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            // REAL-TIME SAFE: no tracing, no allocation
            runner.apply_commands();
            runner.render_interleaved(data, channels);
        },
        move |err| {
            tracing::error!("Audio stream error: {}", err);
        },
        None,
    )?;

    stream.play()?;
    tracing::info!("Audio stream started");

    Ok((stream, sample_rate))
}

/// Live output on the default cpal device
pub struct CpalContext {
    config: AudioConfig,
    engine: Option<EngineThread>,
}

impl CpalContext {
    pub fn new(config: AudioConfig) -> Self {
        Self {
            config,
            engine: None,
        }
    }

    fn engine(&mut self) -> Result<&mut EngineThread> {
        self.engine
            .as_mut()
            .ok_or_else(|| {
                Error::AudioEngineUnavailable("audio context is not running".to_string())
            })
    }
}

impl AudioContext for CpalContext {
    fn resume(&mut self) -> Result<()> {
        if self.engine.is_none() {
            tracing::info!("Audio engine starting with config: {:?}", self.config);
            self.engine = Some(EngineThread::spawn(&self.config)?);
        }
        Ok(())
    }

    fn sample_rate(&self) -> SampleRate {
        self.engine
            .as_ref()
            .map_or(self.config.sample_rate, |engine| engine.sample_rate)
    }

    fn block_size(&self) -> Frames {
        self.config.block_size
    }

    fn load_graph(&mut self, graph: AudioGraph) -> Result<()> {
        hand_over(&mut self.engine()?.control, graph)
    }

    fn send(&mut self, command: AudioCommand) -> Result<()> {
        push_command(&mut self.engine()?.control, command)
    }

    fn poll_events(&mut self) -> Vec<AudioEvent> {
        self.engine
            .as_mut()
            .map(|engine| {
                engine.control.collect_retired();
                engine.control.drain_events()
            })
            .unwrap_or_default()
    }

    fn close(&mut self) {
        if let Some(mut engine) = self.engine.take() {
            tracing::info!("Audio engine stopping");
            engine.shutdown();
        }
    }
}

impl Drop for CpalContext {
    fn drop(&mut self) {
        self.close();
    }
}

/// Context that renders only when asked to
///
/// Holds both ends of the channel bundle. Commands queue up exactly as they
/// would for a device and are applied at the start of the next `render`.
pub struct HeadlessContext {
    sample_rate: SampleRate,
    block_size: Frames,
    control: ControlChannels<AudioGraph>,
    runner: GraphRunner,
    running: bool,
}

impl HeadlessContext {
    pub fn new(sample_rate: SampleRate, block_size: Frames) -> Self {
        let (control, audio) = create_channels(QUEUE_CAPACITY);
        Self {
            sample_rate,
            block_size,
            control,
            runner: GraphRunner::new(audio, block_size),
            running: false,
        }
    }

    /// Apply queued commands and render `frames` frames of stereo output
    pub fn render(&mut self, frames: Frames) -> RenderedAudio {
        let mut left = vec![0.0; frames];
        let mut right = vec![0.0; frames];
        self.runner.apply_commands();
        self.runner.render_planar(&mut left, &mut right);
        self.control.collect_retired();
        RenderedAudio::new(self.sample_rate, left, right)
    }

    /// Whether the render side currently holds a graph
    ///
    /// Reflects commands applied by the last `render`.
    pub fn has_graph(&self) -> bool {
        self.runner.has_graph()
    }

    pub const fn is_running(&self) -> bool {
        self.running
    }
}

impl AudioContext for HeadlessContext {
    fn resume(&mut self) -> Result<()> {
        self.running = true;
        Ok(())
    }

    fn sample_rate(&self) -> SampleRate {
        self.sample_rate
    }

    fn block_size(&self) -> Frames {
        self.block_size
    }

    fn load_graph(&mut self, graph: AudioGraph) -> Result<()> {
        hand_over(&mut self.control, graph)
    }

    fn send(&mut self, command: AudioCommand) -> Result<()> {
        push_command(&mut self.control, command)
    }

    fn poll_events(&mut self) -> Vec<AudioEvent> {
        self.control.drain_events()
    }

    fn close(&mut self) {
        self.running = false;
    }
}
