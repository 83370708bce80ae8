use crate::audio::config;
use crate::audio::types::AudioBuffer;
use biquad::{Biquad as _, Coefficients, DirectForm1, ToHertz, Type};

/// Builds an onset-aligned beat grid (seconds) for `buffer` at `bpm`.
///
/// Never fails: when onsets are too sparse, the low-pass cannot be designed,
/// or the detected interval is degenerate, a uniform grid starting at 0 is
/// returned instead. The result is non-empty, non-decreasing and every
/// timestamp is within the track.
pub fn build_beat_grid(buffer: &AudioBuffer, bpm: f64) -> Vec<f64> {
    let duration = buffer.duration_seconds();
    let bpm = sanitize_bpm(bpm);
    let beat_interval = 60.0 / bpm;

    let mono = buffer.mono_mixdown();
    let Some(filtered) = low_pass(&mono, buffer.sample_rate()) else {
        log::warn!("Beat Grid: Low-pass design failed, using uniform grid");
        return uniform_grid(duration, beat_interval);
    };

    let beat_interval_samples = (beat_interval * buffer.sample_rate() as f64).floor() as usize;
    let onsets = detect_onsets(&filtered, beat_interval_samples / 4);
    if onsets.len() < config::MIN_ONSETS_FOR_GRID {
        log::debug!(
            "Beat Grid: Only {} onsets found, using uniform grid at {:.2} BPM",
            onsets.len(),
            bpm
        );
        return uniform_grid(duration, beat_interval);
    }

    let sample_rate = buffer.sample_rate() as f64;
    let interval = match modal_interval(&onsets, sample_rate) {
        Some(interval) if interval > 0.0 => interval,
        _ => {
            log::warn!("Beat Grid: Degenerate onset interval, using uniform grid");
            return uniform_grid(duration, beat_interval);
        }
    };

    let first_beat = onsets[0] as f64 / sample_rate;
    let mut grid = vec![first_beat];
    let mut k = 1.0;
    loop {
        let next = first_beat + k * interval;
        if next >= duration {
            break;
        }
        grid.push(next);
        k += 1.0;
    }
    log::info!(
        "Beat Grid: {} beats from {} onsets, first beat {:.3}s, interval {:.2}s",
        grid.len(),
        onsets.len(),
        first_beat,
        interval
    );
    grid
}

fn sanitize_bpm(bpm: f64) -> f64 {
    if bpm.is_finite() && bpm > 0.0 {
        bpm
    } else {
        log::warn!("Beat Grid: Invalid BPM {}, clamping into estimator range", bpm);
        if bpm.is_nan() || bpm <= 0.0 {
            config::BPM_MIN as f64
        } else {
            config::BPM_MAX as f64
        }
    }
}

/// `k * interval` for `k = 0..=floor(duration / interval)`.
pub fn uniform_grid(duration: f64, interval: f64) -> Vec<f64> {
    if !(interval > 0.0) || !(duration > 0.0) {
        return vec![0.0];
    }
    let beats = (duration / interval).floor() as usize;
    (0..=beats)
        .map(|k| (k as f64 * interval).min(duration))
        .collect()
}

fn low_pass(samples: &[f32], sample_rate: u32) -> Option<Vec<f32>> {
    let coefficients = Coefficients::<f32>::from_params(
        Type::LowPass,
        (sample_rate as f32).hz(),
        config::GRID_LOWPASS_HZ.hz(),
        config::GRID_LOWPASS_Q,
    )
    .ok()?;
    let mut filter = DirectForm1::<f32>::new(coefficients);
    Some(samples.iter().map(|&s| filter.run(s)).collect())
}

/// Sample indices that cross the onset threshold on a rising edge, with
/// `skip` samples ignored after each hit.
fn detect_onsets(samples: &[f32], skip: usize) -> Vec<usize> {
    let mut onsets = Vec::new();
    let mut i = 0;
    while i < samples.len() {
        let previous = if i == 0 { 0.0 } else { samples[i - 1] };
        let current = samples[i];
        if current > config::ONSET_THRESHOLD && current > previous {
            onsets.push(i);
            i += skip;
        }
        i += 1;
    }
    onsets
}

/// Most common inter-onset interval in seconds, rounded to centiseconds.
/// Ties go to the interval that appeared first.
fn modal_interval(onsets: &[usize], sample_rate: f64) -> Option<f64> {
    // (centiseconds, count) in first-seen order
    let mut histogram: Vec<(i64, usize)> = Vec::new();
    for pair in onsets.windows(2) {
        let seconds = (pair[1] - pair[0]) as f64 / sample_rate;
        let key = (seconds * 100.0).round() as i64;
        match histogram.iter_mut().find(|(k, _)| *k == key) {
            Some((_, count)) => *count += 1,
            None => histogram.push((key, 1)),
        }
    }

    let mut best: Option<(i64, usize)> = None;
    for &(key, count) in &histogram {
        if best.is_none_or(|(_, best_count)| count > best_count) {
            best = Some((key, count));
        }
    }
    best.map(|(key, _)| key as f64 / 100.0)
}
