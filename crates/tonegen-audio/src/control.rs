//! Control-surface model.
//!
//! `ToneController` holds what the user has dialled in and routes every
//! change: straight into the configuration while stopped, and additionally
//! into the live session while playing. Front ends only translate their
//! input events into calls on it.

use tonegen_core::render::validate_duration;
use tonegen_core::{
    Error, FrequencyPreset, OutputFormat, RenderRequest, Result, Sample, ToneConfiguration,
    Waveform,
};
use tonegen_encode::AudioFileEncoder;

use crate::engine::AudioContext;
use crate::live::{LiveToneSession, PlaybackState, ToneUpdate};
use crate::offline::{ExportTask, OfflineRenderer, ProgressSink};
use crate::settings::ToneSettings;

/// Default length of an exported file
pub const DEFAULT_RENDER_MINUTES: f64 = 1.0;

pub struct ToneController<C: AudioContext> {
    session: LiveToneSession<C>,
    config: ToneConfiguration,
    auto_stop_minutes: f64,
    render_minutes: f64,
    render_format: OutputFormat,
    renderer: OfflineRenderer,
    encoder: AudioFileEncoder,
}

impl<C: AudioContext> ToneController<C> {
    pub fn new(context: C) -> Self {
        Self {
            session: LiveToneSession::new(context),
            config: ToneConfiguration::default(),
            auto_stop_minutes: 0.0,
            render_minutes: DEFAULT_RENDER_MINUTES,
            render_format: OutputFormat::default(),
            renderer: OfflineRenderer::new(),
            encoder: AudioFileEncoder::new(),
        }
    }

    /// Replace the encoder used for exports
    #[must_use]
    pub fn with_encoder(mut self, encoder: AudioFileEncoder) -> Self {
        self.encoder = encoder;
        self
    }

    pub const fn config(&self) -> &ToneConfiguration {
        &self.config
    }

    pub const fn session(&self) -> &LiveToneSession<C> {
        &self.session
    }

    pub const fn encoder(&self) -> &AudioFileEncoder {
        &self.encoder
    }

    pub fn state(&self) -> PlaybackState {
        self.session.state()
    }

    pub fn is_playing(&self) -> bool {
        self.session.is_playing()
    }

    /// Start playing the current configuration
    ///
    /// # Errors
    ///
    /// See [`LiveToneSession::start`]
    pub fn play(&mut self) -> Result<()> {
        self.session.start(&self.config)
    }

    pub fn stop(&mut self) {
        self.session.stop();
    }

    /// Play when stopped, stop when playing
    ///
    /// # Errors
    ///
    /// See [`LiveToneSession::start`]
    pub fn toggle(&mut self) -> Result<PlaybackState> {
        if self.is_playing() {
            self.stop();
        } else {
            self.play()?;
        }
        Ok(self.state())
    }

    /// # Errors
    ///
    /// `UnsupportedConfiguration` outside the frequency domain
    pub fn set_frequency(&mut self, hz: f64) -> Result<()> {
        self.apply(&ToneUpdate::frequency(hz))
    }

    /// Switch the base frequency to a named preset
    ///
    /// # Errors
    ///
    /// `UnsupportedConfiguration` for an unknown name
    pub fn select_preset(&mut self, name: &str) -> Result<FrequencyPreset> {
        let preset: FrequencyPreset = name.parse()?;
        self.set_frequency(preset.frequency_hz)?;
        Ok(preset)
    }

    /// # Errors
    ///
    /// Only if the live session rejects the change
    pub fn set_waveform(&mut self, waveform: Waveform) -> Result<()> {
        self.apply(&ToneUpdate::waveform(waveform))
    }

    /// # Errors
    ///
    /// `UnsupportedConfiguration` outside [0, 1]
    pub fn set_volume(&mut self, volume: f32) -> Result<()> {
        self.apply(&ToneUpdate::volume(volume))
    }

    /// Switch binaural mode; restarts playback if playing
    ///
    /// # Errors
    ///
    /// `UnsupportedConfiguration` if base + beat leaves the frequency domain
    pub fn set_binaural(&mut self, enabled: bool) -> Result<()> {
        self.apply(&ToneUpdate::binaural(enabled))
    }

    /// Set the beat offset; only audible while binaural mode is on
    ///
    /// # Errors
    ///
    /// `UnsupportedConfiguration` for a negative beat or one that pushes
    /// the right channel out of range
    pub fn set_beat(&mut self, beat_hz: f64) -> Result<()> {
        self.apply(&ToneUpdate::beat(beat_hz))
    }

    fn apply(&mut self, update: &ToneUpdate) -> Result<()> {
        let next = update.apply_to(&self.config);
        next.validate()?;
        if self.is_playing() {
            self.session.update_live(update)?;
        }
        self.config = next;
        Ok(())
    }

    pub const fn auto_stop_minutes(&self) -> f64 {
        self.auto_stop_minutes
    }

    /// Set the auto-stop timer; 0 disables it. Rearms while playing.
    ///
    /// # Errors
    ///
    /// `UnsupportedConfiguration` for negative or non-finite minutes
    pub fn set_auto_stop_minutes(&mut self, minutes: f64) -> Result<()> {
        self.session.set_auto_stop_minutes(minutes)?;
        self.auto_stop_minutes = minutes;
        Ok(())
    }

    pub const fn render_minutes(&self) -> f64 {
        self.render_minutes
    }

    /// # Errors
    ///
    /// `UnsupportedConfiguration` unless positive, finite and within
    /// [`MAX_RENDER_SECONDS`](tonegen_core::render::MAX_RENDER_SECONDS)
    pub fn set_render_minutes(&mut self, minutes: f64) -> Result<()> {
        validate_duration(minutes * 60.0)?;
        self.render_minutes = minutes;
        Ok(())
    }

    pub const fn render_format(&self) -> OutputFormat {
        self.render_format
    }

    pub fn set_render_format(&mut self, format: OutputFormat) {
        self.render_format = format;
    }

    /// Request for exporting the current configuration
    pub fn render_request(&self) -> RenderRequest {
        RenderRequest::from_minutes(self.config, self.render_minutes, self.render_format)
    }

    /// Name the current export would get
    pub fn export_filename(&self) -> String {
        self.render_request().suggested_filename()
    }

    /// Start exporting the current configuration in the background
    ///
    /// # Errors
    ///
    /// `UnsupportedConfiguration` or `EncoderUnavailable`, before anything
    /// is rendered
    pub fn start_export(&self, sink: impl ProgressSink + 'static) -> Result<ExportTask> {
        self.renderer
            .spawn_export(self.render_request(), self.encoder.clone(), sink)
    }

    /// `"Playing: 7.83 Hz"` (plus the beat when binaural) or `"Ready"`
    pub fn status_text(&self) -> String {
        if !self.is_playing() {
            return "Ready".to_string();
        }
        let mut text = format!("Playing: {:.2} Hz", self.config.base_frequency_hz);
        if self.config.binaural.enabled {
            text.push_str(&format!(" + {} Hz Beat", self.config.binaural.beat_hz));
        }
        text
    }

    /// Frequency with two decimals
    pub fn frequency_display(&self) -> String {
        format!("{:.2}", self.config.base_frequency_hz)
    }

    /// Latest output peak while playing
    pub fn peak_level(&self) -> Option<(Sample, Sample)> {
        self.session.peak_level()
    }

    /// Snapshot of the control state
    pub fn settings(&self) -> ToneSettings {
        ToneSettings::new(
            self.config,
            self.auto_stop_minutes,
            self.render_minutes,
            self.render_format,
        )
    }

    /// Adopt saved settings, routing each value like a user change
    ///
    /// # Errors
    ///
    /// `UnsupportedConfiguration` for any invalid value; nothing is applied
    /// in that case
    pub fn apply_settings(&mut self, settings: &ToneSettings) -> Result<()> {
        settings
            .validate()
            .map_err(|e| Error::UnsupportedConfiguration(e.to_string()))?;

        let tone = settings.tone;
        self.apply(&ToneUpdate {
            frequency_hz: Some(tone.base_frequency_hz),
            waveform: Some(tone.waveform),
            volume: Some(tone.volume),
            binaural_enabled: Some(tone.binaural.enabled),
            beat_hz: Some(tone.binaural.beat_hz),
        })?;
        self.set_auto_stop_minutes(settings.auto_stop_minutes)?;
        self.set_render_minutes(settings.render_minutes)?;
        self.set_render_format(settings.render_format);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::HeadlessContext;
    use tonegen_core::render::MAX_RENDER_SECONDS;

    fn controller() -> ToneController<HeadlessContext> {
        ToneController::new(HeadlessContext::new(1000, 64))
            .with_encoder(AudioFileEncoder::without_codec())
    }

    #[test]
    fn test_status_text() {
        let mut ctl = controller();
        assert_eq!(ctl.status_text(), "Ready");

        ctl.play().unwrap();
        assert_eq!(ctl.status_text(), "Playing: 7.83 Hz");

        ctl.set_frequency(432.0).unwrap();
        ctl.set_binaural(true).unwrap();
        assert_eq!(ctl.status_text(), "Playing: 432.00 Hz + 4 Hz Beat");

        ctl.set_beat(2.5).unwrap();
        assert_eq!(ctl.status_text(), "Playing: 432.00 Hz + 2.5 Hz Beat");

        ctl.stop();
        assert_eq!(ctl.status_text(), "Ready");
    }

    #[test]
    fn test_frequency_display() {
        let mut ctl = controller();
        assert_eq!(ctl.frequency_display(), "7.83");
        ctl.set_frequency(0.01).unwrap();
        assert_eq!(ctl.frequency_display(), "0.01");
        ctl.set_frequency(1234.5678).unwrap();
        assert_eq!(ctl.frequency_display(), "1234.57");
    }

    #[test]
    fn test_select_preset() {
        let mut ctl = controller();
        ctl.play().unwrap();

        let preset = ctl.select_preset("verdi").unwrap();
        assert_eq!(preset.frequency_hz, 432.0);
        assert_eq!(ctl.config().base_frequency_hz, 432.0);
        assert_eq!(ctl.session().config().unwrap().base_frequency_hz, 432.0);

        assert!(ctl.select_preset("nope").is_err());
        assert_eq!(ctl.config().base_frequency_hz, 432.0);
    }

    #[test]
    fn test_toggle() {
        let mut ctl = controller();
        assert_eq!(ctl.toggle().unwrap(), PlaybackState::Playing);
        assert_eq!(ctl.toggle().unwrap(), PlaybackState::Idle);
        assert_eq!(ctl.toggle().unwrap(), PlaybackState::Playing);
    }

    #[test]
    fn test_changes_while_stopped_only_touch_config() {
        let mut ctl = controller();
        ctl.set_frequency(100.0).unwrap();
        ctl.set_waveform(Waveform::Sawtooth).unwrap();
        ctl.set_volume(0.9).unwrap();

        assert!(!ctl.is_playing());
        assert_eq!(ctl.config().base_frequency_hz, 100.0);
        assert_eq!(ctl.config().waveform, Waveform::Sawtooth);
        assert_eq!(ctl.config().volume, 0.9);

        ctl.play().unwrap();
        assert_eq!(ctl.session().config(), Some(*ctl.config()));
    }

    #[test]
    fn test_changes_while_playing_reach_session() {
        let mut ctl = controller();
        ctl.play().unwrap();
        ctl.set_frequency(300.0).unwrap();
        ctl.set_binaural(true).unwrap();
        ctl.set_beat(8.0).unwrap();

        let live = ctl.session().config().unwrap();
        assert_eq!(live, *ctl.config());
        assert_eq!(live.right_frequency_hz(), 308.0);
    }

    #[test]
    fn test_invalid_change_is_not_committed() {
        let mut ctl = controller();
        assert!(ctl.set_frequency(0.001).is_err());
        assert!(ctl.set_volume(-0.1).is_err());
        assert_eq!(*ctl.config(), ToneConfiguration::default());

        ctl.set_frequency(19_999.0).unwrap();
        ctl.set_beat(5.0).unwrap();
        assert!(ctl.set_binaural(true).is_err());
        assert!(!ctl.config().binaural.enabled);
    }

    #[test]
    fn test_auto_stop_minutes() {
        let mut ctl = controller();
        ctl.set_auto_stop_minutes(15.0).unwrap();
        assert_eq!(ctl.auto_stop_minutes(), 15.0);
        ctl.play().unwrap();
        assert!(ctl.session().has_armed_timer());

        assert!(ctl.set_auto_stop_minutes(f64::NAN).is_err());
        assert!(ctl.set_auto_stop_minutes(1e300).is_err());
        assert_eq!(ctl.auto_stop_minutes(), 15.0);
    }

    #[test]
    fn test_render_request_and_filename() {
        let mut ctl = controller();
        ctl.set_render_minutes(2.0).unwrap();
        ctl.set_render_format(OutputFormat::Mp3);

        let request = ctl.render_request();
        assert_eq!(request.duration_seconds, 120.0);
        assert_eq!(request.output_format, OutputFormat::Mp3);
        assert_eq!(ctl.export_filename(), "tonegen_7.83Hz_2min.mp3");

        assert!(ctl.set_render_minutes(0.0).is_err());
        assert_eq!(ctl.render_minutes(), 2.0);
    }

    #[test]
    fn test_render_minutes_upper_bound() {
        let mut ctl = controller();
        let limit = MAX_RENDER_SECONDS / 60.0;
        ctl.set_render_minutes(limit).unwrap();
        assert_eq!(ctl.render_minutes(), limit);

        for minutes in [limit + 0.5, 1e15, f64::MAX] {
            assert!(matches!(
                ctl.set_render_minutes(minutes),
                Err(Error::UnsupportedConfiguration(_))
            ));
        }
        assert_eq!(ctl.render_minutes(), limit);
        assert!(ctl.render_request().validate().is_ok());
    }

    #[test]
    fn test_export_without_codec() {
        let mut ctl = controller();
        ctl.set_render_format(OutputFormat::Mp3);
        assert!(matches!(
            ctl.start_export(|_: crate::RenderProgress| {}),
            Err(Error::EncoderUnavailable(_))
        ));

        ctl.set_render_format(OutputFormat::Wav);
        ctl.set_render_minutes(0.05).unwrap();
        let file = ctl.start_export(|_: crate::RenderProgress| {}).unwrap().wait().unwrap();
        assert_eq!(file.filename, "tonegen_7.83Hz_0.05min.wav");
        assert_eq!(file.bytes.len(), 44 + 3 * 44100 * 4);
    }

    #[test]
    fn test_settings_round_trip_through_controller() {
        let mut ctl = controller();
        ctl.set_frequency(40.0).unwrap();
        ctl.set_binaural(true).unwrap();
        ctl.set_render_minutes(3.0).unwrap();
        let saved = ctl.settings();

        let mut other = controller();
        other.apply_settings(&saved).unwrap();
        assert_eq!(other.settings(), saved);
    }
}
