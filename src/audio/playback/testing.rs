//! Test doubles for the engine: a hand-cranked deck clock, a timer host that
//! only records, and ready-made tracks.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use super::time::{Schedule, TimerEvent, TimerHandle, TimerHost, TimerKind};
use super::voice::DeckTransport;
use crate::audio::analysis::TempoEstimator;
use crate::audio::analysis::beat_grid::uniform_grid;
use crate::audio::effects::ChainTargets;
use crate::audio::errors::{BpmError, PlaybackError};
use crate::audio::types::{AudioBuffer, DeckId, Track, TrackAnalysis, TrackId, TrackMetadata};

const TEST_SAMPLE_RATE: u32 = 1000;

pub(crate) fn bare_track(name: &str, duration_seconds: f64) -> Arc<Track> {
    let frames = (duration_seconds * TEST_SAMPLE_RATE as f64) as usize;
    let buffer = AudioBuffer::from_mono(vec![0.0; frames.max(1)], TEST_SAMPLE_RATE)
        .expect("test buffer");
    Arc::new(Track::new(
        TrackId::local(name, frames as u64),
        TrackMetadata {
            title: name.to_string(),
            ..TrackMetadata::default()
        },
        Arc::new(buffer),
    ))
}

/// A track already analyzed at `bpm` with a grid starting at 0.
pub(crate) fn analyzed_track(bpm: f64, duration_seconds: f64) -> Arc<Track> {
    let track = bare_track(&format!("{}bpm.wav", bpm), duration_seconds);
    track.set_analysis(TrackAnalysis {
        bpm,
        beat_grid: Arc::from(uniform_grid(duration_seconds, 60.0 / bpm)),
    });
    track
}

/// Estimator that answers with a fixed tempo, or fails when `None`, and
/// counts how often it was asked.
pub(crate) struct FixedTempo {
    bpm: Option<f64>,
    calls: AtomicUsize,
}

impl FixedTempo {
    pub(crate) fn new(bpm: Option<f64>) -> Self {
        FixedTempo {
            bpm,
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TempoEstimator for FixedTempo {
    fn estimate(&self, _buffer: &AudioBuffer) -> Result<f64, BpmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.bpm.ok_or(BpmError::NoAutocorrelationPeak)
    }
}

#[derive(Debug)]
pub(crate) struct ManualClock {
    pub(crate) duration: Option<f64>,
    pub(crate) position: f64,
    pub(crate) running: bool,
    pub(crate) rate: f64,
    pub(crate) targets: Option<ChainTargets>,
    pub(crate) fail_start: bool,
}

impl Default for ManualClock {
    fn default() -> Self {
        ManualClock {
            duration: None,
            position: 0.0,
            running: false,
            rate: 1.0,
            targets: None,
            fail_start: false,
        }
    }
}

/// Deck clock that only moves when the test calls [`ManualTransport::advance`].
#[derive(Clone, Default)]
pub(crate) struct ManualTransport {
    clock: Arc<Mutex<ManualClock>>,
}

impl ManualTransport {
    pub(crate) fn clock(&self) -> MutexGuard<'_, ManualClock> {
        self.clock.lock().expect("manual clock")
    }

    pub(crate) fn advance(&self, seconds: f64) {
        let mut clock = self.clock();
        if !clock.running {
            return;
        }
        clock.position += seconds * clock.rate;
        if let Some(duration) = clock.duration {
            if clock.position >= duration {
                clock.position = duration;
                clock.running = false;
            }
        }
    }
}

impl DeckTransport for ManualTransport {
    fn load(&mut self, track: &Arc<Track>) -> Result<(), PlaybackError> {
        let mut clock = self.clock();
        clock.duration = Some(track.duration_seconds());
        clock.position = 0.0;
        clock.running = false;
        Ok(())
    }

    fn unload(&mut self) {
        let mut clock = self.clock();
        clock.duration = None;
        clock.position = 0.0;
        clock.running = false;
    }

    fn start(&mut self) -> Result<(), PlaybackError> {
        let mut clock = self.clock();
        if clock.fail_start {
            return Err(PlaybackError::StartRejected {
                deck_id: DeckId::A,
                reason: "refused by test".to_string(),
            });
        }
        clock.running = true;
        Ok(())
    }

    fn pause(&mut self) {
        self.clock().running = false;
    }

    fn seek(&mut self, seconds: f64) {
        let mut clock = self.clock();
        let limit = clock.duration.unwrap_or(0.0);
        clock.position = seconds.clamp(0.0, limit);
    }

    fn position(&self) -> f64 {
        self.clock().position
    }

    fn is_running(&self) -> bool {
        self.clock().running
    }

    fn set_rate(&mut self, rate: f64) {
        self.clock().rate = rate;
    }

    fn set_chain_targets(&mut self, targets: ChainTargets) {
        self.clock().targets = Some(targets);
    }
}

/// Timer host that never fires on its own; tests deliver the events.
#[derive(Clone, Default)]
pub(crate) struct RecordingTimers {
    scheduled: Arc<Mutex<Vec<(Schedule, TimerEvent)>>>,
}

impl RecordingTimers {
    pub(crate) fn scheduled(&self) -> Vec<(Schedule, TimerEvent)> {
        self.scheduled.lock().expect("timer log").clone()
    }

    pub(crate) fn last(&self, deck: DeckId, kind: TimerKind) -> Option<(Schedule, TimerEvent)> {
        self.scheduled()
            .into_iter()
            .rev()
            .find(|(_, event)| event.deck == deck && event.kind == kind)
    }
}

impl TimerHost for RecordingTimers {
    fn schedule(&mut self, schedule: Schedule, event: TimerEvent) -> TimerHandle {
        self.scheduled
            .lock()
            .expect("timer log")
            .push((schedule, event));
        TimerHandle::detached()
    }
}
