use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::audio::effects::{ChainTargets, DeckSignalChain};
use crate::audio::errors::{AudioEffectsError, PlaybackError};
use crate::audio::types::{AudioBuffer, DeckId, Track};

/// The engine's view of a deck's clock and audio path.
pub trait DeckTransport: Send {
    fn load(&mut self, track: &Arc<Track>) -> Result<(), PlaybackError>;
    fn unload(&mut self);
    fn start(&mut self) -> Result<(), PlaybackError>;
    fn pause(&mut self);
    fn seek(&mut self, seconds: f64);
    /// Playhead in track seconds.
    fn position(&self) -> f64;
    /// False once paused or when the end of the track was reached.
    fn is_running(&self) -> bool;
    fn set_rate(&mut self, rate: f64);
    fn set_chain_targets(&mut self, targets: ChainTargets);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputFormat {
    pub sample_rate: u32,
    pub channels: usize,
}

impl Default for OutputFormat {
    fn default() -> Self {
        OutputFormat {
            sample_rate: 44_100,
            channels: 2,
        }
    }
}

/// Renders one deck: variable-rate read with linear interpolation, then the
/// deck's signal chain.
pub struct DeckVoice {
    deck: DeckId,
    buffer: Option<Arc<AudioBuffer>>,
    position_frames: f64,
    rate: f64,
    playing: bool,
    chain: DeckSignalChain,
    format: OutputFormat,
    scratch: Vec<f32>,
}

impl DeckVoice {
    pub fn new(
        deck: DeckId,
        format: OutputFormat,
        time_constant_seconds: f32,
        initial: ChainTargets,
    ) -> Result<Self, AudioEffectsError> {
        let channels = format.channels.max(1);
        Ok(DeckVoice {
            deck,
            buffer: None,
            position_frames: 0.0,
            rate: 1.0,
            playing: false,
            chain: DeckSignalChain::new(format.sample_rate, channels, time_constant_seconds, initial)?,
            format: OutputFormat {
                sample_rate: format.sample_rate,
                channels,
            },
            scratch: vec![0.0; channels],
        })
    }

    pub fn deck(&self) -> DeckId {
        self.deck
    }

    pub fn set_buffer(&mut self, buffer: Option<Arc<AudioBuffer>>) {
        self.buffer = buffer;
        self.position_frames = 0.0;
        self.playing = false;
    }

    pub fn is_loaded(&self) -> bool {
        self.buffer.is_some()
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn set_playing(&mut self, playing: bool) {
        self.playing = playing && self.buffer.is_some();
    }

    pub fn position_seconds(&self) -> f64 {
        match &self.buffer {
            Some(buffer) => self.position_frames / buffer.sample_rate() as f64,
            None => 0.0,
        }
    }

    pub fn seek_seconds(&mut self, seconds: f64) {
        if let Some(buffer) = &self.buffer {
            let frames = buffer.frames() as f64;
            self.position_frames = (seconds.max(0.0) * buffer.sample_rate() as f64).min(frames);
        }
    }

    pub fn at_end(&self) -> bool {
        self.buffer
            .as_ref()
            .is_some_and(|b| self.position_frames >= b.frames() as f64)
    }

    pub fn set_rate(&mut self, rate: f64) {
        if rate.is_finite() && rate > 0.0 {
            self.rate = rate;
        }
    }

    pub fn set_chain_targets(&mut self, targets: ChainTargets) {
        self.chain.set_targets(targets);
    }

    /// Mixes this deck into `out` (interleaved, `format.channels` wide).
    pub fn render_add(&mut self, out: &mut [f32]) {
        if !self.playing {
            return;
        }
        let Some(buffer) = self.buffer.as_ref() else {
            return;
        };
        let total_frames = buffer.frames() as f64;
        let source_channels = buffer.channel_count();
        let step = self.rate * buffer.sample_rate() as f64 / self.format.sample_rate as f64;

        for frame_out in out.chunks_exact_mut(self.format.channels) {
            if self.position_frames >= total_frames {
                self.position_frames = total_frames;
                self.playing = false;
                log::trace!("[Voice {}] Reached end of track", self.deck);
                break;
            }
            let index = self.position_frames as usize;
            let frac = (self.position_frames - index as f64) as f32;
            for (c, slot) in self.scratch.iter_mut().enumerate() {
                let source = &buffer.channels()[c % source_channels];
                let a = source[index];
                let b = source.get(index + 1).copied().unwrap_or(a);
                *slot = a + (b - a) * frac;
            }
            self.chain.process_frame(&mut self.scratch);
            for (o, s) in frame_out.iter_mut().zip(self.scratch.iter()) {
                *o += *s;
            }
            self.position_frames += step;
        }
    }
}

/// [`DeckTransport`] over a voice shared with the audio callback.
pub struct VoiceTransport {
    voice: Arc<Mutex<DeckVoice>>,
}

impl VoiceTransport {
    pub fn new(voice: Arc<Mutex<DeckVoice>>) -> Self {
        VoiceTransport { voice }
    }

    fn lock(&self) -> Result<MutexGuard<'_, DeckVoice>, PlaybackError> {
        self.voice
            .lock()
            .map_err(|_| PlaybackError::LockPoisoned { what: "deck voice" })
    }

    /// For reads and writes that cannot fail; a poisoned voice is still usable.
    fn lock_lenient(&self) -> MutexGuard<'_, DeckVoice> {
        self.voice.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DeckTransport for VoiceTransport {
    fn load(&mut self, track: &Arc<Track>) -> Result<(), PlaybackError> {
        self.lock()?.set_buffer(Some(Arc::clone(track.buffer())));
        Ok(())
    }

    fn unload(&mut self) {
        self.lock_lenient().set_buffer(None);
    }

    fn start(&mut self) -> Result<(), PlaybackError> {
        let mut voice = self.lock()?;
        if !voice.is_loaded() {
            return Err(PlaybackError::StartRejected {
                deck_id: voice.deck(),
                reason: "no audio buffer attached".to_string(),
            });
        }
        if voice.at_end() {
            voice.seek_seconds(0.0);
        }
        voice.set_playing(true);
        Ok(())
    }

    fn pause(&mut self) {
        self.lock_lenient().set_playing(false);
    }

    fn seek(&mut self, seconds: f64) {
        self.lock_lenient().seek_seconds(seconds);
    }

    fn position(&self) -> f64 {
        self.lock_lenient().position_seconds()
    }

    fn is_running(&self) -> bool {
        self.lock_lenient().is_playing()
    }

    fn set_rate(&mut self, rate: f64) {
        self.lock_lenient().set_rate(rate);
    }

    fn set_chain_targets(&mut self, targets: ChainTargets) {
        self.lock_lenient().set_chain_targets(targets);
    }
}

/// Sums every deck voice into the output buffer.
#[derive(Clone)]
pub struct MasterBus {
    voices: Vec<Arc<Mutex<DeckVoice>>>,
}

impl MasterBus {
    pub fn new(voices: Vec<Arc<Mutex<DeckVoice>>>) -> Self {
        MasterBus { voices }
    }

    pub fn render(&self, out: &mut [f32]) {
        out.fill(0.0);
        for voice in &self.voices {
            // A poisoned voice stays silent rather than taking the stream down.
            if let Ok(mut voice) = voice.lock() {
                voice.render_add(out);
            }
        }
        for sample in out.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }
    }
}
