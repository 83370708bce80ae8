use crate::audio::config::{LOOP_LENGTH_PRESETS, MAX_LOOP_LENGTH_BEATS, MIN_LOOP_LENGTH_BEATS};
use crate::audio::types::LoopBounds;

/// Labels shown next to [`LOOP_LENGTH_PRESETS`].
pub const LOOP_LENGTH_LABELS: [&str; 8] = ["1/8", "1/4", "1/2", "1", "2", "4", "8", "16"];

pub fn preset_label(length_beats: f64) -> Option<&'static str> {
    LOOP_LENGTH_PRESETS
        .iter()
        .position(|&preset| preset == length_beats)
        .map(|i| LOOP_LENGTH_LABELS[i])
}

pub fn halve_length(length_beats: f64) -> f64 {
    (length_beats / 2.0).max(MIN_LOOP_LENGTH_BEATS)
}

pub fn double_length(length_beats: f64) -> f64 {
    (length_beats * 2.0).min(MAX_LOOP_LENGTH_BEATS)
}

/// Index of the first beat at or after `time`.
pub fn next_beat_index(grid: &[f64], time: f64) -> Option<usize> {
    grid.iter().position(|&beat| beat >= time)
}

/// Snaps a loop of `length_beats` to `grid` around `current_time`.
///
/// The loop starts on the beat before the next beat (so the beat the playhead
/// is currently in). Returns `None` only for an empty grid.
pub fn loop_bounds(grid: &[f64], current_time: f64, length_beats: f64) -> Option<LoopBounds> {
    let last = grid.len().checked_sub(1)?;
    let start_index = match next_beat_index(grid, current_time) {
        Some(next) => next.saturating_sub(1),
        None => last,
    };
    Some(bounds_from_index(grid, start_index, length_beats))
}

/// Bounds for a loop anchored on `grid[start_index]`. Used when the length
/// changes while a loop is running so the start stays put.
pub fn bounds_from_index(grid: &[f64], start_index: usize, length_beats: f64) -> LoopBounds {
    let last = grid.len().saturating_sub(1);
    let start_index = start_index.min(last);
    let start = grid.get(start_index).copied().unwrap_or(0.0);

    let end = if length_beats.fract() == 0.0 {
        let end_index = (start_index + length_beats as usize).min(last);
        grid.get(end_index).copied().unwrap_or(start)
    } else {
        start + length_beats * local_beat_interval(grid, start_index).unwrap_or(1.0)
    };

    let end = if end > start {
        end
    } else {
        start + length_beats
    };
    LoopBounds {
        start_index,
        start,
        end,
    }
}

fn local_beat_interval(grid: &[f64], index: usize) -> Option<f64> {
    let forward = grid
        .get(index + 1)
        .zip(grid.get(index))
        .map(|(next, here)| next - here);
    let backward = index
        .checked_sub(1)
        .and_then(|prev| grid.get(index).zip(grid.get(prev)))
        .map(|(here, prev)| here - prev);
    forward.or(backward).filter(|interval| *interval > 0.0)
}
