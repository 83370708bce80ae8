use std::sync::Arc;

use crate::audio::config::{
    CONTROL_CENTER, CONTROL_MAX, CONTROL_MIN, HOT_CUE_SLOTS, MAX_LOOP_LENGTH_BEATS,
    MIN_LOOP_LENGTH_BEATS,
};
use crate::audio::looping;
use crate::audio::types::{
    DeckId, DeckState, HotCue, HotCueColor, LoopState, MixerState, Track, empty_hot_cues,
};

/// Everything that can happen to a single deck's state.
#[derive(Debug, Clone, PartialEq)]
pub enum DeckAction {
    TogglePlay,
    /// The transport refused to start; undo the optimistic play.
    PlaybackFailed,
    LoadTrack(Arc<Track>),
    EjectTrack,
    SetCue(f64),
    JumpToCue,
    SyncBpm { target_bpm: f64 },
    ToggleSync { target: DeckId },
    BreakSync,
    SetPlaybackRate(f64),
    SetVolume(f64),
    SetLow(f64),
    SetMid(f64),
    SetHigh(f64),
    SetFilter(f64),
    SetMixerState(MixerState),
    SetProgress(f64),
    SetHotCue { index: usize, position: f64 },
    JumpToHotCue { index: usize },
    DeleteHotCue { index: usize },
    /// Choose a loop length and engage it at playhead `at` when the track has a grid.
    SetLoop { length: f64, at: f64 },
    ToggleLoop { at: f64 },
    ExitLoop,
    HalveLoop,
    DoubleLoop,
}

fn clamp_control(value: f64) -> f64 {
    if value.is_nan() {
        CONTROL_CENTER
    } else {
        value.clamp(CONTROL_MIN, CONTROL_MAX)
    }
}

fn hot_cue_slot(index: usize, position: Option<f64>) -> HotCue {
    HotCue {
        position,
        color: HotCueColor::SLOT_ORDER[index],
    }
}

/// Loop bounds at `at`, provided the deck has what looping needs.
fn engaged_loop(state: &DeckState, length_beats: f64, at: f64) -> Option<LoopState> {
    state.bpm()?;
    let grid = state.beat_grid()?;
    let bounds = looping::loop_bounds(grid, at, length_beats)?;
    Some(LoopState {
        is_active: true,
        length_beats,
        bounds: Some(bounds),
    })
}

fn resized_loop(state: &DeckState, length_beats: f64) -> LoopState {
    let loop_state = state.loop_state;
    match (loop_state.is_active, loop_state.bounds, state.beat_grid()) {
        (true, Some(bounds), Some(grid)) => LoopState {
            is_active: true,
            length_beats,
            bounds: Some(looping::bounds_from_index(grid, bounds.start_index, length_beats)),
        },
        _ => LoopState {
            length_beats,
            ..loop_state
        },
    }
}

/// Pure transition function for a deck. Total: actions that make no sense in
/// the current state return an unchanged copy.
pub fn deck_reducer(state: &DeckState, action: &DeckAction) -> DeckState {
    let mut next = state.clone();
    match action {
        DeckAction::TogglePlay => {
            if state.track.is_some() {
                next.is_playing = !state.is_playing;
            }
        }
        DeckAction::PlaybackFailed => next.is_playing = false,
        DeckAction::LoadTrack(track) => {
            next.track = Some(Arc::clone(track));
            next.is_playing = false;
            next.progress = 0.0;
            next.cue_point = 0.0;
            next.filter = CONTROL_CENTER;
            next.playback_rate = 1.0;
            next.synced_to = None;
            next.hot_cues = empty_hot_cues();
            next.loop_state = LoopState::default();
        }
        DeckAction::EjectTrack => {
            next.track = None;
            next.is_playing = false;
            next.progress = 0.0;
            next.cue_point = 0.0;
            next.playback_rate = 1.0;
            next.synced_to = None;
            next.hot_cues = empty_hot_cues();
            next.loop_state = LoopState::default();
        }
        DeckAction::SetCue(position) => next.cue_point = position.max(0.0),
        DeckAction::JumpToCue => next.is_playing = false,
        DeckAction::SyncBpm { target_bpm } => {
            if let Some(bpm) = state.bpm() {
                if target_bpm.is_finite() && *target_bpm > 0.0 {
                    next.playback_rate = target_bpm / bpm;
                }
            }
        }
        DeckAction::ToggleSync { target } => {
            next.synced_to = if state.synced_to == Some(*target) {
                None
            } else {
                Some(*target)
            };
        }
        DeckAction::BreakSync => next.synced_to = None,
        DeckAction::SetPlaybackRate(rate) => {
            if rate.is_finite() && *rate > 0.0 {
                next.playback_rate = *rate;
                next.synced_to = None;
            }
        }
        DeckAction::SetVolume(v) => next.volume = clamp_control(*v),
        DeckAction::SetLow(v) => next.low = clamp_control(*v),
        DeckAction::SetMid(v) => next.mid = clamp_control(*v),
        DeckAction::SetHigh(v) => next.high = clamp_control(*v),
        DeckAction::SetFilter(v) => next.filter = clamp_control(*v),
        DeckAction::SetMixerState(mixer) => {
            next.volume = clamp_control(mixer.volume);
            next.low = clamp_control(mixer.low);
            next.mid = clamp_control(mixer.mid);
            next.high = clamp_control(mixer.high);
            next.filter = clamp_control(mixer.filter);
        }
        DeckAction::SetProgress(p) => next.progress = p.clamp(0.0, 100.0),
        DeckAction::SetHotCue { index, position } => {
            if *index < HOT_CUE_SLOTS {
                next.hot_cues[*index] = hot_cue_slot(*index, Some(position.max(0.0)));
            }
        }
        // Seeking and starting playback are done by the engine around this action.
        DeckAction::JumpToHotCue { .. } => {}
        DeckAction::DeleteHotCue { index } => {
            if *index < HOT_CUE_SLOTS {
                next.hot_cues[*index] = hot_cue_slot(*index, None);
            }
        }
        DeckAction::SetLoop { length, at } => {
            let length = length.clamp(MIN_LOOP_LENGTH_BEATS, MAX_LOOP_LENGTH_BEATS);
            next.loop_state = engaged_loop(state, length, *at).unwrap_or(LoopState {
                is_active: false,
                length_beats: length,
                bounds: None,
            });
        }
        DeckAction::ToggleLoop { at } => {
            if state.loop_state.is_active {
                next.loop_state.is_active = false;
                next.loop_state.bounds = None;
            } else if let Some(engaged) = engaged_loop(state, state.loop_state.length_beats, *at) {
                next.loop_state = engaged;
            }
        }
        DeckAction::ExitLoop => {
            next.loop_state.is_active = false;
            next.loop_state.bounds = None;
        }
        DeckAction::HalveLoop => {
            next.loop_state = resized_loop(state, looping::halve_length(state.loop_state.length_beats));
        }
        DeckAction::DoubleLoop => {
            next.loop_state =
                resized_loop(state, looping::double_length(state.loop_state.length_beats));
        }
    }
    next
}
