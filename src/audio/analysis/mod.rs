pub mod beat_grid;
pub mod bpm_analyzer;

use std::sync::Arc;

use crate::audio::errors::{AnalysisError, BpmError};
use crate::audio::types::{AudioBuffer, Track, TrackAnalysis};

pub use beat_grid::build_beat_grid;
pub use bpm_analyzer::SpectralFluxEstimator;

/// Anything that can put a number on a track's tempo.
pub trait TempoEstimator: Send + Sync {
    fn estimate(&self, buffer: &AudioBuffer) -> Result<f64, BpmError>;
}

/// Runs tempo estimation and grid building for `track` unless it is already
/// analyzed. A failure leaves the track without analysis so it can be retried.
pub fn analyze_track(
    track: &Track,
    estimator: &dyn TempoEstimator,
) -> Result<TrackAnalysis, AnalysisError> {
    if let Some(existing) = track.analysis() {
        log::debug!("Analysis: Reusing cached analysis for '{}'", track.id());
        return Ok(existing.clone());
    }

    let bpm = estimator
        .estimate(track.buffer())
        .map_err(|source| AnalysisError::Bpm {
            track_id: track.id().to_string(),
            source,
        })?;
    let grid = build_beat_grid(track.buffer(), bpm);
    let analysis = TrackAnalysis {
        bpm,
        beat_grid: Arc::from(grid),
    };
    if !track.set_analysis(analysis.clone()) {
        // Lost a race with another analysis of the same track; keep the first.
        return Ok(track.analysis().cloned().unwrap_or(analysis));
    }
    log::info!(
        "Analysis: '{}' analyzed at {:.2} BPM ({} beats)",
        track.id(),
        bpm,
        analysis.beat_grid.len()
    );
    Ok(analysis)
}

/// Off-thread variant for the engine runtime.
pub async fn analyze_track_blocking(
    track: Arc<Track>,
    estimator: Arc<dyn TempoEstimator>,
) -> Result<TrackAnalysis, AnalysisError> {
    let track_id = track.id().to_string();
    tokio::task::spawn_blocking(move || analyze_track(&track, estimator.as_ref()))
        .await
        .map_err(|e| AnalysisError::TaskFailed {
            track_id,
            reason: e.to_string(),
        })?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::playback::testing::FixedTempo;
    use crate::audio::types::{TrackId, TrackMetadata};

    fn track() -> Track {
        let buffer = AudioBuffer::from_mono(vec![0.0; 8_000 * 4], 8_000).unwrap();
        Track::new(
            TrackId::local("t.wav", 1),
            TrackMetadata::default(),
            Arc::new(buffer),
        )
    }

    #[test]
    fn analysis_runs_once_and_is_cached() {
        let estimator = FixedTempo::new(Some(120.0));
        let track = track();
        let first = analyze_track(&track, &estimator).unwrap();
        let second = analyze_track(&track, &estimator).unwrap();
        assert_eq!(first, second);
        assert_eq!(estimator.calls(), 1);
        assert_eq!(track.bpm(), Some(120.0));
        assert_eq!(track.beat_grid().map(<[f64]>::len), Some(9));
    }

    #[test]
    fn failed_estimate_leaves_track_unanalyzed() {
        let estimator = FixedTempo::new(None);
        let track = track();
        assert!(matches!(
            analyze_track(&track, &estimator),
            Err(AnalysisError::Bpm { .. })
        ));
        assert!(track.analysis().is_none());
        assert_eq!(estimator.calls(), 1);
    }

    #[tokio::test]
    async fn blocking_variant_analyzes_off_thread() {
        let estimator: Arc<dyn TempoEstimator> = Arc::new(FixedTempo::new(Some(60.0)));
        let track = Arc::new(track());
        let analysis = analyze_track_blocking(track.clone(), estimator).await.unwrap();
        assert_eq!(analysis.bpm, 60.0);
        assert!(track.analysis().is_some());
    }
}
