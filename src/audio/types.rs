use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::audio::config;
use crate::audio::errors::AudioDecodingError;

// --- Deck Identity ---

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DeckId {
    A,
    B,
}

impl DeckId {
    pub const ALL: [DeckId; 2] = [DeckId::A, DeckId::B];

    /// The deck on the opposite side of the mixer.
    pub fn other(self) -> DeckId {
        match self {
            DeckId::A => DeckId::B,
            DeckId::B => DeckId::A,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeckId::A => "A",
            DeckId::B => "B",
        }
    }
}

impl fmt::Display for DeckId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- Decoded Audio ---

/// Planar decoded PCM. Every channel holds the same number of frames.
#[derive(Clone, PartialEq)]
pub struct AudioBuffer {
    channels: Vec<Vec<f32>>,
    sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(channels: Vec<Vec<f32>>, sample_rate: u32) -> Result<Self, AudioDecodingError> {
        if sample_rate == 0 {
            return Err(AudioDecodingError::InvalidBuffer {
                reason: "sample rate is zero".to_string(),
            });
        }
        let frames = match channels.first() {
            Some(first) if !first.is_empty() => first.len(),
            _ => {
                return Err(AudioDecodingError::InvalidBuffer {
                    reason: "buffer has no samples".to_string(),
                });
            }
        };
        if channels.iter().any(|c| c.len() != frames) {
            return Err(AudioDecodingError::InvalidBuffer {
                reason: "channels differ in length".to_string(),
            });
        }
        Ok(AudioBuffer {
            channels,
            sample_rate,
        })
    }

    pub fn from_mono(samples: Vec<f32>, sample_rate: u32) -> Result<Self, AudioDecodingError> {
        Self::new(vec![samples], sample_rate)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn duration_seconds(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    pub fn channels(&self) -> &[Vec<f32>] {
        &self.channels
    }

    /// Averages all channels into one, the same down-mix a single-channel
    /// offline render applies.
    pub fn mono_mixdown(&self) -> Vec<f32> {
        if self.channels.len() == 1 {
            return self.channels[0].clone();
        }
        let scale = 1.0 / self.channels.len() as f32;
        (0..self.frames())
            .into_par_iter()
            .map(|i| self.channels.iter().map(|c| c[i]).sum::<f32>() * scale)
            .collect()
    }
}

impl fmt::Debug for AudioBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioBuffer")
            .field("channels", &self.channels.len())
            .field("frames", &self.frames())
            .field("sample_rate", &self.sample_rate)
            .finish()
    }
}

// --- Tracks ---

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrackId(String);

impl TrackId {
    pub fn local(file_name: &str, byte_size: u64) -> Self {
        TrackId(format!("local-{}-{}", file_name, byte_size))
    }

    pub fn cloud(path: &str) -> Self {
        TrackId(format!("cloud-{}", path))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Informational tags. Nothing here affects playback.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrackMetadata {
    pub title: String,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub year: Option<String>,
    pub genre: Option<String>,
    pub initial_key: Option<String>,
    pub cover_art: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackAnalysis {
    pub bpm: f64,
    pub beat_grid: Arc<[f64]>,
}

pub struct Track {
    id: TrackId,
    metadata: TrackMetadata,
    buffer: Arc<AudioBuffer>,
    analysis: OnceLock<TrackAnalysis>,
}

impl Track {
    pub fn new(id: TrackId, metadata: TrackMetadata, buffer: Arc<AudioBuffer>) -> Self {
        Track {
            id,
            metadata,
            buffer,
            analysis: OnceLock::new(),
        }
    }

    pub fn id(&self) -> &TrackId {
        &self.id
    }

    pub fn metadata(&self) -> &TrackMetadata {
        &self.metadata
    }

    pub fn buffer(&self) -> &Arc<AudioBuffer> {
        &self.buffer
    }

    pub fn duration_seconds(&self) -> f64 {
        self.buffer.duration_seconds()
    }

    pub fn analysis(&self) -> Option<&TrackAnalysis> {
        self.analysis.get()
    }

    /// Stores the analysis result. The first successful analysis wins; later
    /// calls leave the cached grid untouched and return `false`.
    pub fn set_analysis(&self, analysis: TrackAnalysis) -> bool {
        self.analysis.set(analysis).is_ok()
    }

    pub fn bpm(&self) -> Option<f64> {
        self.analysis().map(|a| a.bpm).filter(|bpm| *bpm > 0.0)
    }

    pub fn beat_grid(&self) -> Option<&[f64]> {
        self.analysis()
            .map(|a| &a.beat_grid[..])
            .filter(|grid| !grid.is_empty())
    }

    pub fn display_name(&self) -> String {
        match &self.metadata.artist {
            Some(artist) => format!("{} - {}", artist, self.metadata.title),
            None => self.metadata.title.clone(),
        }
    }
}

impl PartialEq for Track {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl fmt::Debug for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Track")
            .field("id", &self.id)
            .field("title", &self.metadata.title)
            .field("duration", &self.duration_seconds())
            .field("bpm", &self.bpm())
            .field("beats", &self.beat_grid().map_or(0, <[f64]>::len))
            .finish()
    }
}

// --- Hot Cues ---

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum HotCueColor {
    Red,
    Orange,
    Yellow,
    Green,
    Cyan,
    Blue,
    Violet,
    Pink,
}

impl HotCueColor {
    pub const SLOT_ORDER: [HotCueColor; config::HOT_CUE_SLOTS] = [
        HotCueColor::Red,
        HotCueColor::Orange,
        HotCueColor::Yellow,
        HotCueColor::Green,
        HotCueColor::Cyan,
        HotCueColor::Blue,
        HotCueColor::Violet,
        HotCueColor::Pink,
    ];

    pub fn hex(self) -> &'static str {
        match self {
            HotCueColor::Red => "#ef4444",
            HotCueColor::Orange => "#f97316",
            HotCueColor::Yellow => "#eab308",
            HotCueColor::Green => "#22c55e",
            HotCueColor::Cyan => "#06b6d4",
            HotCueColor::Blue => "#3b82f6",
            HotCueColor::Violet => "#8b5cf6",
            HotCueColor::Pink => "#ec4899",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HotCue {
    pub position: Option<f64>,
    pub color: HotCueColor,
}

pub type HotCueBank = [HotCue; config::HOT_CUE_SLOTS];

pub fn empty_hot_cues() -> HotCueBank {
    HotCueColor::SLOT_ORDER.map(|color| HotCue {
        position: None,
        color,
    })
}

// --- Loops ---

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoopBounds {
    /// Grid index the loop starts on.
    pub start_index: usize,
    pub start: f64,
    pub end: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoopState {
    pub is_active: bool,
    pub length_beats: f64,
    pub bounds: Option<LoopBounds>,
}

impl Default for LoopState {
    fn default() -> Self {
        LoopState {
            is_active: false,
            length_beats: config::DEFAULT_LOOP_LENGTH_BEATS,
            bounds: None,
        }
    }
}

// --- Mixer Channel ---

/// The persisted part of a deck: its channel strip controls, each 0-100.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MixerState {
    pub volume: f64,
    pub low: f64,
    pub mid: f64,
    pub high: f64,
    pub filter: f64,
}

impl Default for MixerState {
    fn default() -> Self {
        MixerState {
            volume: config::INITIAL_VOLUME,
            low: config::CONTROL_CENTER,
            mid: config::CONTROL_CENTER,
            high: config::CONTROL_CENTER,
            filter: config::CONTROL_CENTER,
        }
    }
}

// --- Deck State ---

#[derive(Debug, Clone, PartialEq)]
pub struct DeckState {
    pub id: DeckId,
    pub track: Option<Arc<Track>>,
    pub is_playing: bool,
    /// Display projection of the playhead, 0-100.
    pub progress: f64,
    pub cue_point: f64,
    pub playback_rate: f64,
    pub synced_to: Option<DeckId>,
    pub hot_cues: HotCueBank,
    pub loop_state: LoopState,
    pub volume: f64,
    pub low: f64,
    pub mid: f64,
    pub high: f64,
    pub filter: f64,
}

impl DeckState {
    pub fn new(id: DeckId) -> Self {
        let mixer = MixerState::default();
        DeckState {
            id,
            track: None,
            is_playing: false,
            progress: 0.0,
            cue_point: 0.0,
            playback_rate: 1.0,
            synced_to: None,
            hot_cues: empty_hot_cues(),
            loop_state: LoopState::default(),
            volume: mixer.volume,
            low: mixer.low,
            mid: mixer.mid,
            high: mixer.high,
            filter: mixer.filter,
        }
    }

    pub fn mixer_state(&self) -> MixerState {
        MixerState {
            volume: self.volume,
            low: self.low,
            mid: self.mid,
            high: self.high,
            filter: self.filter,
        }
    }

    pub fn bpm(&self) -> Option<f64> {
        self.track.as_ref().and_then(|t| t.bpm())
    }

    /// Tempo currently heard from this deck.
    pub fn effective_bpm(&self) -> Option<f64> {
        self.bpm().map(|bpm| bpm * self.playback_rate)
    }

    pub fn beat_grid(&self) -> Option<&[f64]> {
        self.track.as_ref().and_then(|t| t.beat_grid())
    }

    pub fn duration_seconds(&self) -> Option<f64> {
        self.track.as_ref().map(|t| t.duration_seconds())
    }
}

/// Serializable projection of a deck for front-end events.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeckView {
    pub deck_id: DeckId,
    pub track_id: Option<TrackId>,
    pub track_name: Option<String>,
    pub bpm: Option<f64>,
    pub effective_bpm: Option<f64>,
    pub is_playing: bool,
    pub progress: f64,
    pub cue_point: f64,
    pub playback_rate: f64,
    pub synced_to: Option<DeckId>,
    pub hot_cues: HotCueBank,
    pub loop_state: LoopState,
    pub mixer: MixerState,
    /// Loop and sync controls are disabled when the track has no grid.
    pub can_loop: bool,
    pub can_sync: bool,
}

impl From<&DeckState> for DeckView {
    fn from(state: &DeckState) -> Self {
        let analyzed = state.bpm().is_some() && state.beat_grid().is_some();
        DeckView {
            deck_id: state.id,
            track_id: state.track.as_ref().map(|t| t.id().clone()),
            track_name: state.track.as_ref().map(|t| t.display_name()),
            bpm: state.bpm(),
            effective_bpm: state.effective_bpm(),
            is_playing: state.is_playing,
            progress: state.progress,
            cue_point: state.cue_point,
            playback_rate: state.playback_rate,
            synced_to: state.synced_to,
            hot_cues: state.hot_cues,
            loop_state: state.loop_state,
            mixer: state.mixer_state(),
            can_loop: analyzed,
            can_sync: analyzed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_rejects_ragged_channels() {
        let result = AudioBuffer::new(vec![vec![0.0; 4], vec![0.0; 3]], 44_100);
        assert!(matches!(result, Err(AudioDecodingError::InvalidBuffer { .. })));
    }

    #[test]
    fn mono_mixdown_averages_channels() {
        let buffer = AudioBuffer::new(vec![vec![1.0, 0.5], vec![0.0, -0.5]], 8_000).unwrap();
        assert_eq!(buffer.mono_mixdown(), vec![0.5, 0.0]);
        assert_eq!(buffer.frames(), 2);
    }

    #[test]
    fn track_analysis_is_cached_once() {
        let buffer = Arc::new(AudioBuffer::from_mono(vec![0.0; 100], 100).unwrap());
        let track = Track::new(TrackId::local("a.wav", 100), TrackMetadata::default(), buffer);
        assert!(track.bpm().is_none());
        assert!(track.set_analysis(TrackAnalysis {
            bpm: 120.0,
            beat_grid: Arc::from(vec![0.0, 0.5]),
        }));
        assert!(!track.set_analysis(TrackAnalysis {
            bpm: 90.0,
            beat_grid: Arc::from(vec![0.0]),
        }));
        assert_eq!(track.bpm(), Some(120.0));
        assert_eq!(track.beat_grid(), Some(&[0.0, 0.5][..]));
    }

    #[test]
    fn track_ids_follow_source() {
        assert_eq!(TrackId::local("song.mp3", 1234).as_str(), "local-song.mp3-1234");
        assert_eq!(TrackId::cloud("/music/x.flac").as_str(), "cloud-/music/x.flac");
    }

    #[test]
    fn fresh_hot_cue_bank_is_empty_and_colored_by_slot() {
        let bank = empty_hot_cues();
        assert!(bank.iter().all(|c| c.position.is_none()));
        assert_eq!(bank[3].color.hex(), "#22c55e");
    }
}
