//! Offline rendering and export.
//!
//! Renders the same graph the live session plays, as fast as possible, into
//! a planar stereo buffer, then hands it to the encoder. Exports run on a
//! worker thread and can be cancelled between render quanta and between
//! encoder blocks.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};
use tonegen_core::{
    Error, Frames, OutputFormat, RenderRequest, RenderedAudio, Result, Sample, SampleRate,
    block_sizes, sample_rates,
};
use tonegen_encode::AudioFileEncoder;
use tonegen_node::NodeError;

use crate::factory::{BuiltGraph, SignalGraphFactory};

/// Rendering progress is reported this many times between 20% and 70%
const RENDER_STEPS: usize = 10;

/// Encoding progress is reported this many times between 75% and 99%
const ENCODE_STEPS: usize = 8;

/// Shared cancellation flag
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Milestones of an export
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderPhase {
    GraphInitialized,
    RenderingStarted,
    Rendering,
    RenderingFinished,
    EncodingStarted,
    Encoding,
    Complete,
}

impl RenderPhase {
    pub const fn label(self) -> &'static str {
        match self {
            Self::GraphInitialized => "Audio graph initialized",
            Self::RenderingStarted => "Rendering audio...",
            Self::Rendering => "Rendering audio",
            Self::RenderingFinished => "Rendering complete",
            Self::EncodingStarted => "Encoding file...",
            Self::Encoding => "Encoding file",
            Self::Complete => "Export complete",
        }
    }
}

/// One progress report
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderProgress {
    pub phase: RenderPhase,
    /// 0 to 100
    pub percent: f32,
}

impl RenderProgress {
    pub const fn new(phase: RenderPhase, percent: f32) -> Self {
        Self { phase, percent }
    }
}

/// Receives progress reports
pub trait ProgressSink: Send {
    fn report(&self, progress: RenderProgress);
}

impl<F: Fn(RenderProgress) + Send> ProgressSink for F {
    fn report(&self, progress: RenderProgress) {
        self(progress);
    }
}

impl ProgressSink for Sender<RenderProgress> {
    fn report(&self, progress: RenderProgress) {
        // Nobody listening is fine
        let _ = self.send(progress);
    }
}

/// A finished export
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedFile {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub format: OutputFormat,
}

/// Renders tone graphs without a device
#[derive(Debug, Clone, Copy)]
pub struct OfflineRenderer {
    sample_rate: SampleRate,
    quantum: Frames,
}

impl Default for OfflineRenderer {
    fn default() -> Self {
        Self {
            sample_rate: sample_rates::SR_44100,
            quantum: block_sizes::BLOCK_128,
        }
    }
}

impl OfflineRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub const fn sample_rate(&self) -> SampleRate {
        self.sample_rate
    }

    /// Render `request` into a planar stereo buffer.
    ///
    /// # Errors
    ///
    /// `UnsupportedConfiguration` for an invalid request, `RenderFailure` when
    /// a graph node fails, `RenderCancelled` when `cancel` fires.
    pub fn render(
        &self,
        request: &RenderRequest,
        sink: &dyn ProgressSink,
        cancel: &CancelToken,
    ) -> Result<RenderedAudio> {
        request.validate()?;
        let frames = request.frame_count(self.sample_rate);

        let BuiltGraph { mut graph, handle } =
            SignalGraphFactory::new(self.sample_rate, self.quantum).build(&request.config)?;
        for node in handle.oscillators() {
            graph.start_node(node).map_err(render_failure)?;
        }
        sink.report(RenderProgress::new(RenderPhase::GraphInitialized, 10.0));

        tracing::info!(
            "Rendering {} frames ({} s) at {} Hz",
            frames,
            request.duration_seconds,
            self.sample_rate
        );

        let mut left = vec![0.0; frames];
        let mut right = vec![0.0; frames];
        sink.report(RenderProgress::new(RenderPhase::RenderingStarted, 20.0));

        let mut offset = 0;
        let mut step = 1;
        while offset < frames {
            if cancel.is_cancelled() {
                drop(graph);
                tracing::info!("Render cancelled after {} of {} frames", offset, frames);
                return Err(Error::RenderCancelled);
            }

            let chunk = (frames - offset).min(self.quantum);
            let done = {
                let mut outputs: [&mut [Sample]; 2] = [
                    &mut left[offset..offset + chunk],
                    &mut right[offset..offset + chunk],
                ];
                graph.process(&mut outputs, chunk)
            };
            if let Some(node) = graph.take_failure() {
                return Err(Error::RenderFailure(format!("node {node} failed to process")));
            }
            if done != chunk {
                return Err(Error::RenderFailure(format!(
                    "graph rendered {done} of {chunk} frames"
                )));
            }
            offset += chunk;

            while step <= RENDER_STEPS && offset * RENDER_STEPS >= frames * step {
                #[allow(clippy::cast_precision_loss)]
                let percent = 20.0 + 50.0 * step as f32 / RENDER_STEPS as f32;
                sink.report(RenderProgress::new(RenderPhase::Rendering, percent));
                step += 1;
            }
        }

        for node in handle.oscillators() {
            graph.stop_node(node).map_err(render_failure)?;
        }
        sink.report(RenderProgress::new(RenderPhase::RenderingFinished, 70.0));

        Ok(RenderedAudio::new(self.sample_rate, left, right))
    }

    /// Render and encode on the calling thread.
    ///
    /// `Complete` is only reported once there are bytes to hand out.
    ///
    /// # Errors
    ///
    /// Anything `render` or the encoder reports; `EncoderUnavailable` is
    /// reported before any rendering happens.
    #[allow(clippy::cast_precision_loss)]
    pub fn export(
        &self,
        request: &RenderRequest,
        encoder: &AudioFileEncoder,
        sink: &dyn ProgressSink,
        cancel: &CancelToken,
    ) -> Result<ExportedFile> {
        request.validate()?;
        encoder.ensure_supported(request.output_format)?;

        let audio = self.render(request, sink, cancel)?;
        if cancel.is_cancelled() {
            return Err(Error::RenderCancelled);
        }

        sink.report(RenderProgress::new(RenderPhase::EncodingStarted, 75.0));
        let mut step = 1;
        let bytes = encoder.encode(&audio, request.output_format, |fraction| {
            if cancel.is_cancelled() {
                return ControlFlow::Break(());
            }
            while step <= ENCODE_STEPS && fraction >= step as f32 / ENCODE_STEPS as f32 {
                let percent = 75.0 + 24.0 * step as f32 / ENCODE_STEPS as f32;
                sink.report(RenderProgress::new(RenderPhase::Encoding, percent));
                step += 1;
            }
            ControlFlow::Continue(())
        })?;
        drop(audio);

        if bytes.is_empty() {
            return Err(Error::EncodingFailure("encoder produced no output".to_string()));
        }

        let file = ExportedFile {
            bytes,
            filename: request.suggested_filename(),
            format: request.output_format,
        };
        sink.report(RenderProgress::new(RenderPhase::Complete, 100.0));
        tracing::info!("Exported {} ({} bytes)", file.filename, file.bytes.len());
        Ok(file)
    }

    /// Run [`export`](Self::export) on a worker thread.
    ///
    /// # Errors
    ///
    /// Validation and encoder availability are checked here, before the
    /// worker starts.
    pub fn spawn_export(
        &self,
        request: RenderRequest,
        encoder: AudioFileEncoder,
        sink: impl ProgressSink + 'static,
    ) -> Result<ExportTask> {
        request.validate()?;
        encoder.ensure_supported(request.output_format)?;

        let renderer = *self;
        let cancel = CancelToken::new();
        let worker_cancel = cancel.clone();
        let (result_tx, result_rx) = crossbeam_channel::bounded(1);

        let thread = std::thread::Builder::new()
            .name("tonegen-export".to_string())
            .spawn(move || {
                let result = renderer.export(&request, &encoder, &sink, &worker_cancel);
                if let Err(e) = &result {
                    tracing::warn!("Export failed: {}", e);
                }
                let _ = result_tx.send(result);
            })?;

        Ok(ExportTask {
            cancel,
            result_rx,
            result: None,
            thread: Some(thread),
        })
    }
}

fn render_failure(e: NodeError) -> Error {
    Error::RenderFailure(e.to_string())
}

/// A running export
///
/// Dropping the task without waiting cancels it.
pub struct ExportTask {
    cancel: CancelToken,
    result_rx: Receiver<Result<ExportedFile>>,
    result: Option<Result<ExportedFile>>,
    thread: Option<JoinHandle<()>>,
}

impl ExportTask {
    /// Ask the worker to stop at the next quantum or encoder block
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token that cancels this export, for handing to another owner
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn is_finished(&mut self) -> bool {
        self.poll();
        self.result.is_some()
    }

    /// The result, if the worker is done. Returns it only once.
    pub fn try_result(&mut self) -> Option<Result<ExportedFile>> {
        self.poll();
        self.result.take()
    }

    /// Block until the worker is done
    ///
    /// # Errors
    ///
    /// Whatever the export reported, or `RenderFailure` if the worker died
    pub fn wait(mut self) -> Result<ExportedFile> {
        let result = match self.result.take() {
            Some(result) => result,
            None => self.result_rx.recv().unwrap_or_else(|_| {
                Err(Error::RenderFailure("export worker exited without a result".to_string()))
            }),
        };
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        result
    }

    fn poll(&mut self) {
        if self.result.is_none() {
            if let Ok(result) = self.result_rx.try_recv() {
                self.result = Some(result);
            }
        }
    }
}

impl Drop for ExportTask {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::HeadlessContext;
    use crate::live::LiveToneSession;
    use std::sync::Mutex;
    use tonegen_core::{ToneConfiguration, Waveform};

    fn ignore(_: RenderProgress) {}

    fn collect() -> (Sender<RenderProgress>, Receiver<RenderProgress>) {
        crossbeam_channel::unbounded()
    }

    fn request(config: ToneConfiguration, seconds: f64, format: OutputFormat) -> RenderRequest {
        RenderRequest::new(config, seconds, format)
    }

    #[test]
    fn test_default_tone_one_second() {
        let renderer = OfflineRenderer::new();
        let audio = renderer
            .render(
                &request(ToneConfiguration::default(), 1.0, OutputFormat::Wav),
                &ignore,
                &CancelToken::new(),
            )
            .unwrap();

        assert_eq!(audio.sample_rate, 44100);
        assert_eq!(audio.frames(), 44100);
        assert_eq!(audio.left, audio.right);
        assert!((audio.peak() - 0.3).abs() < 1e-3, "peak {}", audio.peak());

        // Pure sine at 7.83 Hz scaled only by the 0.3 gain
        for (i, &sample) in audio.left.iter().enumerate() {
            let t = i as f64 / 44100.0;
            let expected = 0.3 * (std::f64::consts::TAU * 7.83 * t).sin();
            assert!(
                (f64::from(sample) - expected).abs() < 1e-5,
                "sample {i}: {sample} != {expected}"
            );
        }
    }

    #[test]
    fn test_overlong_render_is_rejected_up_front() {
        let renderer = OfflineRenderer::new();
        let overlong = request(ToneConfiguration::default(), 1e15, OutputFormat::Wav);
        assert!(matches!(
            renderer.render(&overlong, &ignore, &CancelToken::new()),
            Err(Error::UnsupportedConfiguration(_))
        ));

        let (tx, rx) = collect();
        let result = renderer.spawn_export(overlong, AudioFileEncoder::without_codec(), tx);
        assert!(matches!(result, Err(Error::UnsupportedConfiguration(_))));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_cancel_through_shared_token() {
        let task = OfflineRenderer::new()
            .spawn_export(
                request(ToneConfiguration::default(), 600.0, OutputFormat::Wav),
                AudioFileEncoder::without_codec(),
                ignore,
            )
            .unwrap();
        let token = task.cancel_token();
        token.cancel();
        assert!(matches!(task.wait(), Err(Error::RenderCancelled)));
    }

    #[test]
    fn test_frame_count_rounds() {
        let renderer = OfflineRenderer::new();
        let audio = renderer
            .render(
                &request(ToneConfiguration::default(), 0.123_456, OutputFormat::Wav),
                &ignore,
                &CancelToken::new(),
            )
            .unwrap();
        assert_eq!(audio.frames(), 5444);
    }

    #[test]
    fn test_channels_identical_without_binaural() {
        for waveform in Waveform::ALL {
            let config = ToneConfiguration::new(523.25, waveform, 0.7);
            let audio = OfflineRenderer::new()
                .render(&request(config, 0.05, OutputFormat::Wav), &ignore, &CancelToken::new())
                .unwrap();
            assert_eq!(audio.left, audio.right, "{waveform} channels differ");
        }
    }

    #[test]
    fn test_binaural_channels_differ() {
        let config = ToneConfiguration::new(200.0, Waveform::Sine, 0.5).with_binaural_beat(10.0);
        let audio = OfflineRenderer::new()
            .render(&request(config, 0.05, OutputFormat::Wav), &ignore, &CancelToken::new())
            .unwrap();
        assert_eq!(audio.left[0], audio.right[0]);
        assert_ne!(audio.left, audio.right);
    }

    #[test]
    fn test_matches_live_playback() {
        let config = ToneConfiguration::new(440.0, Waveform::Triangle, 0.5).with_binaural_beat(7.0);

        let session = LiveToneSession::new(HeadlessContext::new(44100, 128));
        session.start(&config).unwrap();
        let live = session.with_context(|ctx| ctx.render(4410));

        let offline = OfflineRenderer::new()
            .render(&request(config, 0.1, OutputFormat::Wav), &ignore, &CancelToken::new())
            .unwrap();

        assert_eq!(live.left, offline.left);
        assert_eq!(live.right, offline.right);
    }

    #[test]
    fn test_invalid_requests() {
        let renderer = OfflineRenderer::new();
        let cancel = CancelToken::new();
        let bad = [
            request(ToneConfiguration::new(f64::NAN, Waveform::Sine, 0.3), 1.0, OutputFormat::Wav),
            request(ToneConfiguration::default(), 0.0, OutputFormat::Wav),
            request(ToneConfiguration::default(), f64::INFINITY, OutputFormat::Wav),
        ];
        for req in bad {
            assert!(matches!(
                renderer.render(&req, &ignore, &cancel),
                Err(Error::UnsupportedConfiguration(_))
            ));
        }
    }

    #[test]
    fn test_cancelled_before_start() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = OfflineRenderer::new().render(
            &request(ToneConfiguration::default(), 1.0, OutputFormat::Wav),
            &ignore,
            &cancel,
        );
        assert!(matches!(result, Err(Error::RenderCancelled)));
    }

    #[test]
    fn test_wav_export_progress_sequence() {
        let (tx, rx) = collect();
        let file = OfflineRenderer::new()
            .export(
                &request(ToneConfiguration::default(), 3.0, OutputFormat::Wav),
                &AudioFileEncoder::without_codec(),
                &tx,
                &CancelToken::new(),
            )
            .unwrap();

        assert_eq!(file.filename, "tonegen_7.83Hz_0.05min.wav");
        assert_eq!(file.format, OutputFormat::Wav);
        assert_eq!(file.bytes.len(), 44 + 3 * 44100 * 4);

        let reader = hound::WavReader::new(std::io::Cursor::new(&file.bytes)).unwrap();
        assert_eq!(reader.spec().sample_rate, 44100);
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.spec().bits_per_sample, 16);
        assert_eq!(reader.len(), 3 * 44100 * 2);

        let reports: Vec<RenderProgress> = rx.try_iter().collect();
        let phases: Vec<RenderPhase> = reports.iter().map(|p| p.phase).collect();
        assert_eq!(phases.first(), Some(&RenderPhase::GraphInitialized));
        assert_eq!(phases.last(), Some(&RenderPhase::Complete));
        assert_eq!(
            phases.iter().filter(|p| **p == RenderPhase::Rendering).count(),
            RENDER_STEPS
        );
        for expected in [
            RenderPhase::RenderingStarted,
            RenderPhase::RenderingFinished,
            RenderPhase::EncodingStarted,
        ] {
            assert!(phases.contains(&expected));
        }
        assert!(reports.windows(2).all(|w| w[0].percent <= w[1].percent));
        assert_eq!(reports.last().unwrap().percent, 100.0);
    }

    #[test]
    fn test_mp3_without_encoder_fails_before_rendering() {
        let (tx, rx) = collect();
        let result = OfflineRenderer::new().spawn_export(
            request(ToneConfiguration::default(), 0.1, OutputFormat::Mp3),
            AudioFileEncoder::without_codec(),
            tx,
        );

        assert!(matches!(result, Err(Error::EncoderUnavailable(_))));
        let reports: Vec<RenderProgress> = rx.try_iter().collect();
        assert!(reports.iter().all(|p| p.phase != RenderPhase::Complete));
        assert!(reports.is_empty());
    }

    #[test]
    fn test_spawned_export_completes() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        let task = OfflineRenderer::new()
            .spawn_export(
                request(ToneConfiguration::default(), 0.5, OutputFormat::Wav),
                AudioFileEncoder::without_codec(),
                move |p: RenderProgress| sink_seen.lock().unwrap().push(p.phase),
            )
            .unwrap();

        let file = task.wait().unwrap();
        assert_eq!(file.bytes.len(), 44 + 22050 * 4);
        assert_eq!(seen.lock().unwrap().last(), Some(&RenderPhase::Complete));
    }

    #[test]
    fn test_spawned_export_can_be_cancelled() {
        let (tx, rx) = collect();
        let task = OfflineRenderer::new()
            .spawn_export(
                request(ToneConfiguration::default(), 60.0, OutputFormat::Wav),
                AudioFileEncoder::without_codec(),
                tx,
            )
            .unwrap();
        task.cancel();

        assert!(matches!(task.wait(), Err(Error::RenderCancelled)));
        assert!(rx.try_iter().all(|p| p.phase != RenderPhase::Complete));
    }

    #[test]
    fn test_try_result_polls() {
        let mut task = OfflineRenderer::new()
            .spawn_export(
                request(ToneConfiguration::default(), 0.01, OutputFormat::Wav),
                AudioFileEncoder::without_codec(),
                ignore,
            )
            .unwrap();

        let mut result = None;
        for _ in 0..500 {
            if let Some(r) = task.try_result() {
                result = Some(r);
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        assert!(result.unwrap().is_ok());
        assert!(task.try_result().is_none());
    }

    #[test]
    fn test_phase_labels() {
        assert_eq!(RenderPhase::Complete.label(), "Export complete");
        assert!(!RenderPhase::Rendering.label().is_empty());
    }
}
