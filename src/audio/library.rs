use rayon::prelude::*;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use super::analysis::{self, TempoEstimator};
use super::decoding;
use super::errors::{AnalysisError, AudioDecodingError};
use super::types::{Track, TrackId, TrackMetadata};

/// Identity of a local file without decoding it: file name plus byte size.
pub fn local_track_id(path: &Path) -> Result<TrackId, AudioDecodingError> {
    let metadata = std::fs::metadata(path).map_err(|e| AudioDecodingError::FileOpenError {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(TrackId::local(&file_name(path), metadata.len()))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn title_from(name: &str) -> String {
    Path::new(name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string())
}

pub fn decode_track_file(path: &Path) -> Result<Track, AudioDecodingError> {
    let id = local_track_id(path)?;
    let buffer = decoding::decode_file(&path.to_string_lossy())?;
    let metadata = TrackMetadata {
        title: title_from(&file_name(path)),
        ..TrackMetadata::default()
    };
    Ok(Track::new(id, metadata, Arc::new(buffer)))
}

pub fn decode_track_bytes(name: &str, bytes: Vec<u8>) -> Result<Track, AudioDecodingError> {
    let id = TrackId::local(name, bytes.len() as u64);
    let buffer = decoding::decode_bytes(bytes, name)?;
    let metadata = TrackMetadata {
        title: title_from(name),
        ..TrackMetadata::default()
    };
    Ok(Track::new(id, metadata, Arc::new(buffer)))
}

/// Decoded tracks shared between decks, keyed by [`TrackId`]. Loading the same
/// track twice hands out the same buffer and analysis.
#[derive(Default)]
pub struct TrackLibrary {
    tracks: HashMap<TrackId, Arc<Track>>,
}

impl TrackLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn get(&self, id: &TrackId) -> Option<Arc<Track>> {
        self.tracks.get(id).cloned()
    }

    pub fn tracks(&self) -> impl Iterator<Item = &Arc<Track>> {
        self.tracks.values()
    }

    /// Tracks still waiting for a tempo and beat grid.
    pub fn pending(&self) -> Vec<Arc<Track>> {
        self.tracks
            .values()
            .filter(|t| t.analysis().is_none())
            .cloned()
            .collect()
    }

    /// Returns the library's copy, which is `track` itself unless the id was
    /// already known.
    pub fn insert_shared(&mut self, track: Arc<Track>) -> Arc<Track> {
        let entry = self
            .tracks
            .entry(track.id().clone())
            .or_insert_with(|| {
                log::debug!("Library: Added '{}'", track.id());
                Arc::clone(&track)
            });
        Arc::clone(entry)
    }

    pub fn add_file(&mut self, path: &Path) -> Result<Arc<Track>, AudioDecodingError> {
        let id = local_track_id(path)?;
        if let Some(track) = self.get(&id) {
            return Ok(track);
        }
        let track = decode_track_file(path)?;
        Ok(self.insert_shared(Arc::new(track)))
    }

    pub fn add_bytes(&mut self, name: &str, bytes: Vec<u8>) -> Result<Arc<Track>, AudioDecodingError> {
        let id = TrackId::local(name, bytes.len() as u64);
        if let Some(track) = self.get(&id) {
            return Ok(track);
        }
        let track = decode_track_bytes(name, bytes)?;
        Ok(self.insert_shared(Arc::new(track)))
    }

    /// Analyzes every pending track in parallel. One failing track does not
    /// stop the others; failures come back with their ids.
    pub fn analyze_pending(&self, estimator: &dyn TempoEstimator) -> Vec<(TrackId, AnalysisError)> {
        let pending = self.pending();
        log::info!("Library: Analyzing {} pending tracks", pending.len());

        let failures: Vec<(TrackId, AnalysisError)> = pending
            .par_iter()
            .filter_map(|track| match analysis::analyze_track(track, estimator) {
                Ok(_) => None,
                Err(e) => {
                    log::error!("Library: Analysis failed for '{}': {}", track.id(), e);
                    Some((track.id().clone(), e))
                }
            })
            .collect();

        log::info!(
            "Library: Finished analysis ({} failed)",
            failures.len()
        );
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::errors::BpmError;
    use crate::audio::playback::testing::{FixedTempo, bare_track};
    use crate::audio::types::AudioBuffer;

    struct PickyTempo;

    impl TempoEstimator for PickyTempo {
        fn estimate(&self, buffer: &AudioBuffer) -> Result<f64, BpmError> {
            if buffer.duration_seconds() > 5.0 {
                Ok(124.0)
            } else {
                Err(BpmError::NoAutocorrelationPeak)
            }
        }
    }

    #[test]
    fn repeated_inserts_share_one_track() {
        let mut library = TrackLibrary::new();
        let first = library.insert_shared(bare_track("loop.wav", 2.0));
        let second = library.insert_shared(bare_track("loop.wav", 2.0));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(library.len(), 1);
    }

    #[test]
    fn analyze_pending_isolates_failures() {
        let mut library = TrackLibrary::new();
        library.insert_shared(bare_track("long.wav", 8.0));
        library.insert_shared(bare_track("short.wav", 2.0));
        assert_eq!(library.pending().len(), 2);

        let failures = library.analyze_pending(&PickyTempo);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, TrackId::local("short.wav", 2000));
        assert_eq!(library.pending().len(), 1);

        let long = library.get(&TrackId::local("long.wav", 8000)).unwrap();
        assert_eq!(long.bpm(), Some(124.0));
    }

    #[test]
    fn analyzed_tracks_are_not_pending() {
        let mut library = TrackLibrary::new();
        library.insert_shared(bare_track("a.wav", 3.0));
        assert!(library.analyze_pending(&FixedTempo::new(Some(128.0))).is_empty());
        assert!(library.pending().is_empty());
    }

    #[test]
    fn undecodable_bytes_are_rejected() {
        let mut library = TrackLibrary::new();
        assert!(library.add_bytes("junk.mp3", vec![0u8; 32]).is_err());
        assert!(library.is_empty());
    }

    #[test]
    fn missing_file_has_no_id() {
        let result = local_track_id(Path::new("/definitely/not/here.wav"));
        assert!(matches!(result, Err(AudioDecodingError::FileOpenError { .. })));
    }

    #[test]
    fn titles_drop_the_extension() {
        assert_eq!(title_from("Deep Cut.flac"), "Deep Cut");
        assert_eq!(title_from("noext"), "noext");
    }
}
