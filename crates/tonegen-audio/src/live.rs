//! Live tone playback.
//!
//! `LiveToneSession` owns the one real-time graph: it builds it through the
//! factory on `start`, pushes parameter changes to it while playing, and
//! tears it down on `stop`. A single optional auto-stop timer stops playback
//! after a configured duration.
//!
//! All public operations take the session lock, because the timer fires on
//! its own thread and calls `stop` just like the user would.

use std::sync::{Arc, Weak};
use std::time::Duration;

use crossbeam_channel::{RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tonegen_comms::{AudioCommand, AudioEvent};
use tonegen_core::{Error, Result, Sample, SampleRate, ToneConfiguration, Waveform};

use crate::builtin::gain::PARAM_GAIN;
use crate::builtin::oscillator::PARAM_FREQUENCY;
use crate::engine::AudioContext;
use crate::factory::{BuiltGraph, GraphHandle, SignalGraphFactory};

/// Length of every live parameter transition
pub const RAMP_SECONDS: f64 = 0.1;

/// Ramp length in frames at `sample_rate`
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn ramp_frames(sample_rate: SampleRate) -> u32 {
    (RAMP_SECONDS * f64::from(sample_rate)).round() as u32
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Playing,
}

/// Partial change to the live configuration
///
/// `None` fields keep their current value.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ToneUpdate {
    pub frequency_hz: Option<f64>,
    pub waveform: Option<Waveform>,
    pub volume: Option<f32>,
    pub binaural_enabled: Option<bool>,
    pub beat_hz: Option<f64>,
}

impl ToneUpdate {
    pub fn frequency(hz: f64) -> Self {
        Self {
            frequency_hz: Some(hz),
            ..Self::default()
        }
    }

    pub fn waveform(waveform: Waveform) -> Self {
        Self {
            waveform: Some(waveform),
            ..Self::default()
        }
    }

    pub fn volume(volume: f32) -> Self {
        Self {
            volume: Some(volume),
            ..Self::default()
        }
    }

    pub fn binaural(enabled: bool) -> Self {
        Self {
            binaural_enabled: Some(enabled),
            ..Self::default()
        }
    }

    pub fn beat(beat_hz: f64) -> Self {
        Self {
            beat_hz: Some(beat_hz),
            ..Self::default()
        }
    }

    /// `config` with this update merged in
    pub fn apply_to(&self, config: &ToneConfiguration) -> ToneConfiguration {
        let mut next = *config;
        if let Some(hz) = self.frequency_hz {
            next.base_frequency_hz = hz;
        }
        if let Some(waveform) = self.waveform {
            next.waveform = waveform;
        }
        if let Some(volume) = self.volume {
            next.volume = volume;
        }
        if let Some(enabled) = self.binaural_enabled {
            next.binaural.enabled = enabled;
        }
        if let Some(beat) = self.beat_hz {
            next.binaural.beat_hz = beat;
        }
        next
    }
}

/// One-shot auto-stop timer
///
/// Dropping it cancels the timer: the timer thread is waiting on the other
/// end of `_cancel` and wakes up disconnected.
struct AutoStopTimer {
    generation: u64,
    _cancel: Sender<()>,
}

/// The graph currently playing
struct Active {
    handle: GraphHandle,
    config: ToneConfiguration,
}

struct Inner<C> {
    context: C,
    active: Option<Active>,
    auto_stop: Option<Duration>,
    timer: Option<AutoStopTimer>,
    timer_generation: u64,
}

type Shared<C> = Arc<Mutex<Inner<C>>>;

impl<C: AudioContext> Inner<C> {
    fn start(&mut self, config: &ToneConfiguration, weak: &Weak<Mutex<Self>>) -> Result<()> {
        // Fail fast: an invalid request leaves a playing session alone
        config.validate()?;

        if self.active.is_some() {
            self.stop();
        }

        self.context.resume()?;

        let factory =
            SignalGraphFactory::new(self.context.sample_rate(), self.context.block_size());
        let BuiltGraph { graph, handle } = factory.build(config)?;

        if let Err(e) = self.launch(graph, handle) {
            let _ = self.context.send(AudioCommand::UnloadGraph);
            return Err(e);
        }

        self.active = Some(Active {
            handle,
            config: *config,
        });

        if let Some(duration) = self.auto_stop {
            if let Err(e) = self.arm_timer(duration, weak) {
                self.stop();
                return Err(e);
            }
        }

        tracing::info!(
            "Playing {} Hz {} (right {} Hz) at volume {}",
            config.left_frequency_hz(),
            config.waveform,
            config.right_frequency_hz(),
            config.volume
        );
        Ok(())
    }

    fn launch(&mut self, graph: crate::AudioGraph, handle: GraphHandle) -> Result<()> {
        self.context.load_graph(graph)?;
        for node in handle.oscillators() {
            self.context.send(AudioCommand::StartNode(node))?;
        }
        Ok(())
    }

    fn stop(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        self.cancel_timer();

        for node in active.handle.oscillators() {
            if let Err(e) = self.context.send(AudioCommand::StopNode(node)) {
                tracing::debug!("Ignoring failure stopping node {}: {}", node, e);
            }
        }
        for node in active.handle.nodes() {
            if let Err(e) = self.context.send(AudioCommand::DisconnectNode(node)) {
                tracing::debug!("Ignoring failure disconnecting node {}: {}", node, e);
            }
        }
        if let Err(e) = self.context.send(AudioCommand::UnloadGraph) {
            tracing::debug!("Ignoring failure unloading graph: {}", e);
        }

        tracing::info!("Playback stopped");
    }

    fn update_live(&mut self, update: &ToneUpdate, weak: &Weak<Mutex<Self>>) -> Result<()> {
        let Some(active) = self.active.as_ref() else {
            return Ok(());
        };
        let current = active.config;
        let handle = active.handle;

        let next = update.apply_to(&current);
        next.validate()?;

        if next.binaural.enabled != current.binaural.enabled {
            tracing::debug!("Binaural mode changed, restarting playback");
            return self.start(&next, weak);
        }

        // Each group is committed once all of its commands are queued, so a
        // failed send leaves the recorded config matching the audio thread
        let mut committed = current;
        let result = self.send_changes(handle, &next, &mut committed);
        if let Some(active) = self.active.as_mut() {
            active.config = committed;
        }
        result
    }

    fn send_changes(
        &mut self,
        handle: GraphHandle,
        next: &ToneConfiguration,
        committed: &mut ToneConfiguration,
    ) -> Result<()> {
        let frames = ramp_frames(self.context.sample_rate());

        let targets = [
            (handle.left, committed.left_frequency_hz(), next.left_frequency_hz()),
            (handle.right, committed.right_frequency_hz(), next.right_frequency_hz()),
        ];
        for (node, from, to) in targets {
            if from.to_bits() != to.to_bits() {
                self.context.send(AudioCommand::RampParameter {
                    node,
                    param: PARAM_FREQUENCY,
                    target: to,
                    frames,
                })?;
            }
        }
        committed.base_frequency_hz = next.base_frequency_hz;
        committed.binaural.beat_hz = next.binaural.beat_hz;

        if next.waveform != committed.waveform {
            for node in handle.oscillators() {
                self.context.send(AudioCommand::SetWaveform {
                    node,
                    waveform: next.waveform,
                })?;
            }
            committed.waveform = next.waveform;
        }

        if next.volume.to_bits() != committed.volume.to_bits() {
            self.context.send(AudioCommand::CancelScheduled {
                node: handle.gain,
                param: PARAM_GAIN,
            })?;
            self.context.send(AudioCommand::RampParameter {
                node: handle.gain,
                param: PARAM_GAIN,
                target: f64::from(next.volume),
                frames,
            })?;
            committed.volume = next.volume;
        }
        Ok(())
    }

    fn set_auto_stop(
        &mut self,
        duration: Option<Duration>,
        weak: &Weak<Mutex<Self>>,
    ) -> Result<()> {
        self.auto_stop = duration.filter(|d| !d.is_zero());
        self.cancel_timer();

        if self.active.is_some() {
            if let Some(duration) = self.auto_stop {
                self.arm_timer(duration, weak)?;
            }
        }
        Ok(())
    }

    fn arm_timer(&mut self, duration: Duration, weak: &Weak<Mutex<Self>>) -> Result<()> {
        self.cancel_timer();
        self.timer_generation += 1;
        let generation = self.timer_generation;

        let (cancel_tx, cancel_rx) = crossbeam_channel::bounded::<()>(1);
        let weak = weak.clone();
        std::thread::Builder::new()
            .name("tonegen-auto-stop".to_string())
            .spawn(move || {
                if cancel_rx.recv_timeout(duration) != Err(RecvTimeoutError::Timeout) {
                    return;
                }
                let Some(shared) = weak.upgrade() else {
                    return;
                };
                let mut inner = shared.lock();
                // A timer replaced after it woke up must not stop the new one's playback
                if inner.timer.as_ref().is_some_and(|t| t.generation == generation) {
                    inner.timer = None;
                    tracing::info!("Auto-stop timer elapsed after {:?}", duration);
                    inner.stop();
                }
            })?;

        self.timer = Some(AutoStopTimer {
            generation,
            _cancel: cancel_tx,
        });
        tracing::debug!("Auto-stop timer armed for {:?}", duration);
        Ok(())
    }

    fn cancel_timer(&mut self) {
        if self.timer.take().is_some() {
            tracing::debug!("Auto-stop timer cancelled");
        }
    }
}

/// The live playback session
///
/// Created once, in `Idle`. Dropping it stops playback and closes the audio
/// context.
pub struct LiveToneSession<C: AudioContext> {
    inner: Shared<C>,
}

impl<C: AudioContext> LiveToneSession<C> {
    pub fn new(context: C) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                context,
                active: None,
                auto_stop: None,
                timer: None,
                timer_generation: 0,
            })),
        }
    }

    /// Start playing `config`, replacing whatever is playing.
    ///
    /// # Errors
    ///
    /// `UnsupportedConfiguration` for an invalid configuration (the current
    /// playback is left untouched), `AudioEngineUnavailable` when the output
    /// cannot be opened (the session stays idle).
    pub fn start(&self, config: &ToneConfiguration) -> Result<()> {
        let weak = Arc::downgrade(&self.inner);
        self.inner.lock().start(config, &weak)
    }

    /// Stop playing. A no-op while idle.
    pub fn stop(&self) {
        self.inner.lock().stop();
    }

    /// Apply a partial change to the playing tone.
    ///
    /// A no-op while idle. Frequency and volume changes ramp over
    /// [`RAMP_SECONDS`]; waveform changes are instant; toggling binaural mode
    /// restarts playback.
    ///
    /// # Errors
    ///
    /// `UnsupportedConfiguration` if the merged configuration is invalid.
    pub fn update_live(&self, update: &ToneUpdate) -> Result<()> {
        let weak = Arc::downgrade(&self.inner);
        self.inner.lock().update_live(update, &weak)
    }

    /// Set or clear the auto-stop duration.
    ///
    /// While playing, a positive duration (re)arms the timer from now. While
    /// idle it is only stored and armed by the next `start`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the timer thread cannot be spawned
    pub fn set_auto_stop(&self, duration: Option<Duration>) -> Result<()> {
        let weak = Arc::downgrade(&self.inner);
        self.inner.lock().set_auto_stop(duration, &weak)
    }

    /// Minutes variant of [`set_auto_stop`](Self::set_auto_stop); 0 disarms.
    ///
    /// # Errors
    ///
    /// `UnsupportedConfiguration` for negative or non-finite minutes
    pub fn set_auto_stop_minutes(&self, minutes: f64) -> Result<()> {
        if !minutes.is_finite() || minutes < 0.0 {
            return Err(Error::UnsupportedConfiguration(format!(
                "auto-stop minutes {minutes} must be zero or positive"
            )));
        }
        let duration = if minutes > 0.0 {
            let duration = Duration::try_from_secs_f64(minutes * 60.0).map_err(|e| {
                Error::UnsupportedConfiguration(format!("auto-stop minutes {minutes}: {e}"))
            })?;
            Some(duration)
        } else {
            None
        };
        self.set_auto_stop(duration)
    }

    pub fn state(&self) -> PlaybackState {
        if self.inner.lock().active.is_some() {
            PlaybackState::Playing
        } else {
            PlaybackState::Idle
        }
    }

    pub fn is_playing(&self) -> bool {
        self.state() == PlaybackState::Playing
    }

    /// Configuration currently playing, if any
    pub fn config(&self) -> Option<ToneConfiguration> {
        self.inner.lock().active.as_ref().map(|a| a.config)
    }

    pub fn auto_stop(&self) -> Option<Duration> {
        self.inner.lock().auto_stop
    }

    pub fn has_armed_timer(&self) -> bool {
        self.inner.lock().timer.is_some()
    }

    /// Whether the session holds a graph handle
    pub fn has_graph(&self) -> bool {
        self.inner.lock().active.is_some()
    }

    /// Latest peak level reported by the audio thread, if any
    ///
    /// Drains the event queue; rejected commands are logged.
    pub fn peak_level(&self) -> Option<(Sample, Sample)> {
        let events = self.inner.lock().context.poll_events();
        let mut peak = None;
        for event in events {
            match event {
                AudioEvent::PeakLevel { left, right } => peak = Some((left, right)),
                AudioEvent::CommandRejected(cmd) => {
                    tracing::warn!("Audio thread rejected {:?}", cmd);
                }
                AudioEvent::GraphLoaded | AudioEvent::GraphUnloaded => {}
            }
        }
        peak
    }

    /// Run `f` with exclusive access to the audio context
    pub fn with_context<R>(&self, f: impl FnOnce(&mut C) -> R) -> R {
        f(&mut self.inner.lock().context)
    }
}

impl<C: AudioContext> Drop for LiveToneSession<C> {
    fn drop(&mut self) {
        let mut inner = self.inner.lock();
        inner.stop();
        inner.context.close();
    }
}
