use std::collections::BTreeMap;

use super::state::DeckSnapshot;
use crate::audio::config::SyncTuning;
use crate::audio::errors::SyncError;
use crate::audio::looping;
use crate::audio::types::DeckId;

/// Directed "follows" relations, slave → master. A deck follows at most one
/// master and the graph never contains a cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncGraph {
    edges: BTreeMap<DeckId, DeckId>,
}

impl SyncGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn master_of(&self, slave: DeckId) -> Option<DeckId> {
        self.edges.get(&slave).copied()
    }

    pub fn slaves_of(&self, master: DeckId) -> impl Iterator<Item = DeckId> + '_ {
        self.edges
            .iter()
            .filter(move |(_, m)| **m == master)
            .map(|(s, _)| *s)
    }

    /// All edges as (slave, master), in deck order.
    pub fn edges(&self) -> Vec<(DeckId, DeckId)> {
        self.edges.iter().map(|(s, m)| (*s, *m)).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Fails when following `master` would make `slave` (indirectly) follow itself.
    pub fn check_link(&self, slave: DeckId, master: DeckId) -> Result<(), SyncError> {
        let mut cursor = Some(master);
        let mut hops = 0;
        while let Some(deck) = cursor {
            if deck == slave {
                return Err(SyncError::CyclicRelation { slave, master });
            }
            hops += 1;
            if hops > DeckId::ALL.len() {
                break;
            }
            cursor = self.master_of(deck);
        }
        Ok(())
    }

    /// Records `slave → master`, replacing any previous master of `slave`.
    pub fn link(&mut self, slave: DeckId, master: DeckId) -> Result<(), SyncError> {
        self.check_link(slave, master)?;
        if let Some(previous) = self.edges.insert(slave, master) {
            if previous != master {
                log::debug!("Sync: Deck '{}' switched master '{}' -> '{}'", slave, previous, master);
            }
        }
        Ok(())
    }

    pub fn unlink(&mut self, slave: DeckId) -> Option<DeckId> {
        self.edges.remove(&slave)
    }

    /// Removes every edge touching `deck` and returns the slaves that lost
    /// their master (not counting `deck` itself).
    pub fn unlink_all(&mut self, deck: DeckId) -> Vec<DeckId> {
        self.edges.remove(&deck);
        let orphaned: Vec<DeckId> = self.slaves_of(deck).collect();
        for slave in &orphaned {
            self.edges.remove(slave);
        }
        orphaned
    }
}

/// Rate that makes the slave's effective tempo equal the master's.
pub fn steady_state_rate(master: &DeckSnapshot, slave: &DeckSnapshot) -> Option<f64> {
    let target = master.effective_bpm()?;
    let slave_bpm = slave.bpm()?;
    Some(target / slave_bpm)
}

/// Whether the slave is far enough off the master's tempo to be rewritten.
pub fn needs_rate_update(target_bpm: f64, slave: &DeckSnapshot, tuning: &SyncTuning) -> bool {
    match slave.effective_bpm() {
        Some(current) => (target_bpm - current).abs() > tuning.bpm_epsilon,
        None => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseCorrection {
    /// Next master beat minus next slave beat, in seconds.
    pub diff_seconds: f64,
    /// Added to the slave's rate for the correction window.
    pub rate_offset: f64,
}

/// One-shot beat alignment: nudge the slave so its next beat lands on the
/// master's. `None` when the master is stopped, either deck lacks a grid or
/// bpm, or the error is within the deadband.
pub fn phase_correction(
    master: &DeckSnapshot,
    slave: &DeckSnapshot,
    tuning: &SyncTuning,
) -> Option<PhaseCorrection> {
    if !master.is_playing {
        return None;
    }
    master.bpm()?;
    slave.bpm()?;
    let master_grid = master.grid()?;
    let slave_grid = slave.grid()?;

    let next_master = master_grid[looping::next_beat_index(master_grid, master.position)?];
    let next_slave = slave_grid[looping::next_beat_index(slave_grid, slave.position)?];
    let diff_seconds = next_master - next_slave;
    if diff_seconds.abs() <= tuning.deadband_seconds {
        return None;
    }
    Some(PhaseCorrection {
        diff_seconds,
        rate_offset: diff_seconds / tuning.correction_window_seconds,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::playback::testing::analyzed_track;
    use approx::assert_relative_eq;

    fn snapshot(deck: DeckId, bpm: f64, rate: f64, position: f64, playing: bool) -> DeckSnapshot {
        DeckSnapshot {
            deck,
            is_playing: playing,
            position,
            playback_rate: rate,
            track: Some(analyzed_track(bpm, 30.0)),
        }
    }

    #[test]
    fn rejects_cycles_and_self_links() {
        let mut graph = SyncGraph::new();
        graph.link(DeckId::B, DeckId::A).unwrap();
        assert_eq!(
            graph.link(DeckId::A, DeckId::B),
            Err(SyncError::CyclicRelation {
                slave: DeckId::A,
                master: DeckId::B
            })
        );
        assert!(graph.check_link(DeckId::A, DeckId::A).is_err());
        assert_eq!(graph.edges(), vec![(DeckId::B, DeckId::A)]);
    }

    #[test]
    fn unlink_all_clears_both_directions() {
        let mut graph = SyncGraph::new();
        graph.link(DeckId::B, DeckId::A).unwrap();
        assert_eq!(graph.unlink_all(DeckId::A), vec![DeckId::B]);
        assert!(graph.is_empty());

        graph.link(DeckId::A, DeckId::B).unwrap();
        assert!(graph.unlink_all(DeckId::A).is_empty());
        assert!(graph.is_empty());
    }

    #[test]
    fn steady_state_matches_effective_tempo() {
        let master = snapshot(DeckId::A, 128.0, 1.0, 0.0, true);
        let slave = snapshot(DeckId::B, 120.0, 1.0, 0.0, false);
        assert_relative_eq!(steady_state_rate(&master, &slave).unwrap(), 1.0667, epsilon = 1e-4);

        let faster = snapshot(DeckId::A, 128.0, 1.05, 0.0, true);
        assert_relative_eq!(steady_state_rate(&faster, &slave).unwrap(), 1.12, epsilon = 1e-9);
    }

    #[test]
    fn rate_update_respects_epsilon() {
        let tuning = SyncTuning::default();
        let slave = snapshot(DeckId::B, 120.0, 1.0, 0.0, false);
        assert!(!needs_rate_update(120.005, &slave, &tuning));
        assert!(needs_rate_update(120.5, &slave, &tuning));
    }

    #[test]
    fn phase_correction_within_deadband_is_skipped() {
        let tuning = SyncTuning::default();
        // 120 bpm grid: beats every 0.5 s
        let master = snapshot(DeckId::A, 120.0, 1.0, 0.99, true);
        let slave = snapshot(DeckId::B, 120.0, 1.0, 0.995, false);
        assert!(phase_correction(&master, &slave, &tuning).is_none());
    }

    #[test]
    fn phase_correction_nudges_towards_master_beat() {
        let tuning = SyncTuning::default();
        let master = snapshot(DeckId::A, 120.0, 1.0, 0.9, true); // next beat 1.0
        let slave = snapshot(DeckId::B, 120.0, 1.0, 0.2, false); // next beat 0.5
        let correction = phase_correction(&master, &slave, &tuning).unwrap();
        assert_relative_eq!(correction.diff_seconds, 0.5);
        assert_relative_eq!(correction.rate_offset, 1.0);
    }

    #[test]
    fn no_phase_correction_when_master_is_stopped() {
        let tuning = SyncTuning::default();
        let master = snapshot(DeckId::A, 120.0, 1.0, 0.9, false);
        let slave = snapshot(DeckId::B, 120.0, 1.0, 0.2, false);
        assert!(phase_correction(&master, &slave, &tuning).is_none());
    }
}
