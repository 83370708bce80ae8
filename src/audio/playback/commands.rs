use std::sync::Arc;
use tokio::sync::oneshot;

use super::time::TimerEvent;
use crate::audio::errors::MappingError;
use crate::audio::types::{DeckId, DeckView, Track};
use crate::midi::{MidiActionKind, MidiMessage};
use crate::settings::MixerSnapshot;

/// Per-deck mixer control addressed by [`EngineCommand::SetControl`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MixerControl {
    Volume,
    Low,
    Mid,
    High,
    Filter,
}

/// Where a track to load comes from.
#[derive(Debug)]
pub enum TrackSource {
    File(String),
    Bytes { name: String, bytes: Vec<u8> },
    /// Already decoded, e.g. from a [`crate::audio::library::TrackLibrary`].
    Decoded(Arc<Track>),
}

// --- Engine Thread Commands ---
#[derive(Debug)]
pub enum EngineCommand {
    LoadTrack {
        deck: DeckId,
        source: TrackSource,
    },
    Eject(DeckId),
    TogglePlay(DeckId),
    /// The cue button: store while playing, return to cue while paused.
    Cue(DeckId),
    JumpToCue(DeckId),
    Seek {
        deck: DeckId,
        position_seconds: f64,
    },
    SetHotCue {
        deck: DeckId,
        index: usize,
    },
    JumpToHotCue {
        deck: DeckId,
        index: usize,
    },
    DeleteHotCue {
        deck: DeckId,
        index: usize,
    },
    SetLoop {
        deck: DeckId,
        length_beats: f64,
    },
    ToggleLoop(DeckId),
    ExitLoop(DeckId),
    HalveLoop(DeckId),
    DoubleLoop(DeckId),
    SetControl {
        deck: DeckId,
        control: MixerControl,
        value: f64,
    },
    SetPlaybackRate {
        deck: DeckId,
        rate: f64,
    },
    ToggleSync(DeckId),
    SetCrossfader(f64),
    RestoreMixer(MixerSnapshot),
    Midi(MidiMessage),
    LoadMapping {
        json: String,
        name: String,
        reply: oneshot::Sender<Result<String, MappingError>>,
    },
    /// Binds the control that sent `message` to an action (MIDI learn).
    LearnMidi {
        message: MidiMessage,
        action: MidiActionKind,
        deck: Option<DeckId>,
    },
    ExportMapping(oneshot::Sender<Result<String, MappingError>>),
    GetMixer(oneshot::Sender<MixerSnapshot>),
    GetDeck {
        deck: DeckId,
        reply: oneshot::Sender<DeckView>,
    },
    Timer(TimerEvent),
    /// Decode stage of a load finished; `token` identifies the load request.
    TrackDecoded {
        deck: DeckId,
        token: u64,
        result: Result<Arc<Track>, String>,
    },
    AnalysisFinished {
        deck: DeckId,
        token: u64,
        track: Arc<Track>,
        result: Result<(), String>,
    },
    Shutdown(oneshot::Sender<()>),
}
