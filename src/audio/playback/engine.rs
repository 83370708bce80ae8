use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use super::commands::{EngineCommand, MixerControl, TrackSource};
use super::events::{EngineEvent, EventSink, LoadPhase, MappingEventPayload};
use super::state::{ActiveCorrection, DeckSlot, DeckStatus};
use super::sync::{self, SyncGraph};
use super::time::{Schedule, TimerEvent, TimerHost, TimerKind, TimerRegistry};
use super::voice::DeckTransport;
use crate::audio::analysis::{self, TempoEstimator};
use crate::audio::config::{CONTROL_CENTER, CONTROL_MAX, CONTROL_MIN, EngineConfig, MIN_CLOCK_RATE};
use crate::audio::effects::ChainTargets;
use crate::audio::errors::{AudioDecodingError, MappingError, PlaybackError, SyncError};
use crate::audio::library::{self, TrackLibrary};
use crate::audio::reducer::{DeckAction, deck_reducer};
use crate::audio::types::{DeckId, DeckState, DeckView, Track, TrackId};
use crate::midi::{MappingFile, MappingStore, MidiActionKind, MidiMessage};
use crate::settings::{MixerSnapshot, SettingsPayload};

const SAVED_MAPPING_NAME: &str = "Saved mapping";

/// Collaborators injected into the engine.
pub struct EngineParts {
    pub transport_a: Box<dyn DeckTransport>,
    pub transport_b: Box<dyn DeckTransport>,
    pub timers: Box<dyn TimerHost>,
    pub estimator: Arc<dyn TempoEstimator>,
    pub events: EventSink,
}

fn idx(deck: DeckId) -> usize {
    match deck {
        DeckId::A => 0,
        DeckId::B => 1,
    }
}

fn same_track(a: &Option<Arc<Track>>, b: &Option<Arc<Track>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

/// Owns both decks, the sync graph and every timer. All mutation goes
/// through [`DeckEngine::dispatch`], which runs the reducer and then brings
/// transports, timers and sync edges in line with the new state.
pub struct DeckEngine {
    config: EngineConfig,
    decks: [DeckSlot; 2],
    sync: SyncGraph,
    timers: TimerRegistry,
    timer_host: Box<dyn TimerHost>,
    crossfader: f64,
    mapping: MappingStore,
    library: TrackLibrary,
    estimator: Arc<dyn TempoEstimator>,
    events: EventSink,
    commands: Option<mpsc::Sender<EngineCommand>>,
}

impl DeckEngine {
    pub fn new(config: EngineConfig, parts: EngineParts) -> Self {
        let deck_state = |id| DeckState {
            volume: config.initial_volume,
            ..DeckState::new(id)
        };
        let mut engine = DeckEngine {
            decks: [
                DeckSlot::new(deck_state(DeckId::A), parts.transport_a),
                DeckSlot::new(deck_state(DeckId::B), parts.transport_b),
            ],
            config,
            sync: SyncGraph::new(),
            timers: TimerRegistry::new(),
            timer_host: parts.timers,
            crossfader: CONTROL_CENTER,
            mapping: MappingStore::default(),
            library: TrackLibrary::new(),
            estimator: parts.estimator,
            events: parts.events,
            commands: None,
        };
        for deck in DeckId::ALL {
            engine.push_chain_targets(deck);
        }
        engine
    }

    /// Lets background work (decode, analysis) post its results back. Without
    /// it that work runs inline on the calling thread.
    pub fn set_command_sender(&mut self, sender: mpsc::Sender<EngineCommand>) {
        self.commands = Some(sender);
    }

    // --- Accessors ---

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self, deck: DeckId) -> &DeckState {
        &self.decks[idx(deck)].state
    }

    pub fn view(&self, deck: DeckId) -> DeckView {
        DeckView::from(self.state(deck))
    }

    pub fn status(&self, deck: DeckId) -> DeckStatus {
        self.decks[idx(deck)].status
    }

    pub fn position(&self, deck: DeckId) -> f64 {
        self.decks[idx(deck)].transport.position()
    }

    pub fn is_correcting(&self, deck: DeckId) -> bool {
        self.decks[idx(deck)].correction.is_some()
    }

    pub fn sync_graph(&self) -> &SyncGraph {
        &self.sync
    }

    pub fn crossfader(&self) -> f64 {
        self.crossfader
    }

    pub fn mapping(&self) -> &MappingStore {
        &self.mapping
    }

    pub fn library(&self) -> &TrackLibrary {
        &self.library
    }

    pub fn library_mut(&mut self) -> &mut TrackLibrary {
        &mut self.library
    }

    // --- Command Dispatch ---

    /// Handles one command. Returns `false` once the engine should stop.
    pub fn handle_command(&mut self, command: EngineCommand) -> bool {
        match command {
            EngineCommand::LoadTrack { deck, source } => self.load(deck, source),
            EngineCommand::Eject(deck) => self.eject(deck),
            EngineCommand::TogglePlay(deck) => {
                if let Err(e) = self.toggle_play(deck) {
                    log::warn!("Engine: TogglePlay on deck '{}' ignored: {}", deck, e);
                }
            }
            EngineCommand::Cue(deck) => self.cue(deck),
            EngineCommand::JumpToCue(deck) => self.jump_to_cue(deck),
            EngineCommand::Seek {
                deck,
                position_seconds,
            } => self.seek(deck, position_seconds),
            EngineCommand::SetHotCue { deck, index } => self.set_hot_cue(deck, index),
            EngineCommand::JumpToHotCue { deck, index } => self.jump_to_hot_cue(deck, index),
            EngineCommand::DeleteHotCue { deck, index } => {
                self.dispatch(deck, DeckAction::DeleteHotCue { index })
            }
            EngineCommand::SetLoop { deck, length_beats } => self.set_loop(deck, length_beats),
            EngineCommand::ToggleLoop(deck) => self.toggle_loop(deck),
            EngineCommand::ExitLoop(deck) => self.dispatch(deck, DeckAction::ExitLoop),
            EngineCommand::HalveLoop(deck) => self.dispatch(deck, DeckAction::HalveLoop),
            EngineCommand::DoubleLoop(deck) => self.dispatch(deck, DeckAction::DoubleLoop),
            EngineCommand::SetControl {
                deck,
                control,
                value,
            } => self.set_control(deck, control, value),
            EngineCommand::SetPlaybackRate { deck, rate } => {
                self.dispatch(deck, DeckAction::SetPlaybackRate(rate))
            }
            EngineCommand::ToggleSync(deck) => {
                if let Err(e) = self.request_sync(deck) {
                    log::debug!("Engine: Sync request for deck '{}' refused: {}", deck, e);
                }
            }
            EngineCommand::SetCrossfader(value) => self.set_crossfader(value),
            EngineCommand::RestoreMixer(snapshot) => self.restore_mixer(&snapshot),
            EngineCommand::Midi(message) => self.apply_midi(&message),
            EngineCommand::LoadMapping { json, name, reply } => {
                let result = self.load_mapping(&json, &name);
                if reply.send(result).is_err() {
                    log::warn!("Engine: LoadMapping caller went away before the reply");
                }
            }
            EngineCommand::LearnMidi {
                message,
                action,
                deck,
            } => self.learn_midi(&message, action, deck),
            EngineCommand::ExportMapping(reply) => {
                if reply.send(self.mapping.export_json()).is_err() {
                    log::warn!("Engine: ExportMapping caller went away before the reply");
                }
            }
            EngineCommand::GetMixer(reply) => {
                if reply.send(self.mixer_snapshot()).is_err() {
                    log::warn!("Engine: GetMixer caller went away before the reply");
                }
            }
            EngineCommand::GetDeck { deck, reply } => {
                if reply.send(self.view(deck)).is_err() {
                    log::warn!("Engine: GetDeck caller went away before the reply");
                }
            }
            EngineCommand::Timer(event) => self.handle_timer(event),
            EngineCommand::TrackDecoded {
                deck,
                token,
                result,
            } => self.on_track_decoded(deck, token, result),
            EngineCommand::AnalysisFinished {
                deck,
                token,
                track,
                result,
            } => self.finish_load(deck, token, track, result),
            EngineCommand::Shutdown(done) => {
                log::info!("Engine: Shutdown received. Stopping decks.");
                self.shutdown();
                if done.send(()).is_err() {
                    log::error!("Engine: Failed to send shutdown completion signal.");
                }
                return false;
            }
        }
        true
    }

    /// Runs the reducer for `deck` and reconciles everything that mirrors the
    /// deck state.
    pub fn dispatch(&mut self, deck: DeckId, action: DeckAction) {
        let previous = self.decks[idx(deck)].state.clone();
        self.decks[idx(deck)].state = deck_reducer(&previous, &action);
        log::trace!("Engine: Deck '{}' <- {:?}", deck, action);
        self.reconcile(deck, &previous, &action);
    }

    fn reconcile(&mut self, deck: DeckId, previous: &DeckState, action: &DeckAction) {
        let current = self.decks[idx(deck)].state.clone();
        let track_changed = !same_track(&previous.track, &current.track);
        let rate_changed = previous.playback_rate != current.playback_rate;
        let relation_changed = previous.synced_to != current.synced_to;

        if track_changed {
            self.timers.cancel_deck(deck);
            let slot = &mut self.decks[idx(deck)];
            slot.correction = None;
            match &current.track {
                Some(track) => {
                    if let Err(e) = slot.transport.load(track) {
                        log::error!(
                            "Engine: Deck '{}' transport rejected '{}': {}",
                            deck,
                            track.id(),
                            e
                        );
                        self.events.emit_error(Some(deck), &e.to_string());
                    }
                }
                None => slot.transport.unload(),
            }
        }

        if matches!(action, DeckAction::EjectTrack) {
            for orphan in self.sync.unlink_all(deck) {
                log::info!("Sync: Deck '{}' lost master '{}' to an eject", orphan, deck);
                self.dispatch(orphan, DeckAction::BreakSync);
            }
        }
        if relation_changed {
            self.mirror_relation(deck, current.synced_to);
        }

        if previous.is_playing != current.is_playing {
            let slot = &mut self.decks[idx(deck)];
            if current.is_playing {
                if let Err(e) = slot.transport.start() {
                    log::error!("Engine: Deck '{}' failed to start: {}", deck, e);
                    self.events.emit_error(Some(deck), &e.to_string());
                    self.dispatch(deck, DeckAction::PlaybackFailed);
                    return;
                }
                log::info!("Engine: Deck '{}' playing", deck);
            } else {
                slot.transport.pause();
                log::info!("Engine: Deck '{}' paused", deck);
            }
        }

        if track_changed || rate_changed {
            self.apply_clock_rate(deck);
        }
        if track_changed || previous.mixer_state() != current.mixer_state() {
            self.push_chain_targets(deck);
        }
        if track_changed || previous.loop_state != current.loop_state {
            self.reconcile_loop_timer(deck);
        }
        if track_changed || rate_changed || relation_changed {
            self.maintain_sync();
        }

        let state = &self.decks[idx(deck)].state;
        if !matches!(action, DeckAction::SetProgress(_)) && state != previous {
            self.events.emit_deck_update(DeckView::from(state));
        }
    }

    fn apply_clock_rate(&mut self, deck: DeckId) {
        let slot = &mut self.decks[idx(deck)];
        let rate = slot.clock_rate().max(MIN_CLOCK_RATE);
        slot.transport.set_rate(rate);
    }

    fn push_chain_targets(&mut self, deck: DeckId) {
        let slot = &mut self.decks[idx(deck)];
        let targets = ChainTargets::from_mixer(deck, &slot.state.mixer_state(), self.crossfader);
        slot.transport.set_chain_targets(targets);
    }

    fn reconcile_loop_timer(&mut self, deck: DeckId) {
        let loop_state = self.decks[idx(deck)].state.loop_state;
        match loop_state.bounds {
            Some(bounds) if loop_state.is_active => {
                let period = Duration::from_millis(self.config.loop_poll_interval_ms);
                self.timers.start(
                    self.timer_host.as_mut(),
                    deck,
                    TimerKind::LoopCheck,
                    Schedule::Every(period),
                );
                log::info!(
                    "Engine: Deck '{}' looping {:.3}s-{:.3}s ({} beats)",
                    deck,
                    bounds.start,
                    bounds.end,
                    loop_state.length_beats
                );
            }
            _ => {
                self.timers.cancel(deck, TimerKind::LoopCheck);
            }
        }
    }

    // --- Transport ---

    pub fn toggle_play(&mut self, deck: DeckId) -> Result<(), PlaybackError> {
        let slot = &self.decks[idx(deck)];
        if slot.status == DeckStatus::Loading {
            let err = PlaybackError::DeckBusy { deck_id: deck };
            self.events.emit_error(Some(deck), &err.to_string());
            return Err(err);
        }
        if slot.state.track.is_none() {
            return Err(PlaybackError::TrackNotLoaded { deck_id: deck });
        }
        let wants_play = !slot.state.is_playing;
        self.dispatch(deck, DeckAction::TogglePlay);
        if wants_play && !self.state(deck).is_playing {
            return Err(PlaybackError::StartRejected {
                deck_id: deck,
                reason: "transport refused to start".to_string(),
            });
        }
        Ok(())
    }

    pub fn seek(&mut self, deck: DeckId, position_seconds: f64) {
        if !position_seconds.is_finite() {
            return;
        }
        let slot = &mut self.decks[idx(deck)];
        let Some(duration) = slot.state.duration_seconds() else {
            return;
        };
        let target = position_seconds.clamp(0.0, duration);
        slot.transport.seek(target);
        self.dispatch(deck, DeckAction::SetProgress(target / duration * 100.0));
    }

    /// The cue button: while playing, remember the playhead; while paused,
    /// return to the cue point.
    pub fn cue(&mut self, deck: DeckId) {
        let slot = &self.decks[idx(deck)];
        if slot.state.track.is_none() {
            return;
        }
        if slot.state.is_playing {
            let position = slot.transport.position();
            log::debug!("Engine: Deck '{}' cue set at {:.3}s", deck, position);
            self.dispatch(deck, DeckAction::SetCue(position));
        } else {
            self.jump_to_cue(deck);
        }
    }

    pub fn jump_to_cue(&mut self, deck: DeckId) {
        let cue_point = self.state(deck).cue_point;
        self.seek(deck, cue_point);
        self.dispatch(deck, DeckAction::JumpToCue);
    }

    pub fn set_hot_cue(&mut self, deck: DeckId, index: usize) {
        let slot = &self.decks[idx(deck)];
        if slot.state.track.is_none() {
            return;
        }
        let position = slot.transport.position();
        self.dispatch(deck, DeckAction::SetHotCue { index, position });
    }

    /// Seeks to a stored hot cue and starts the deck if it was paused.
    pub fn jump_to_hot_cue(&mut self, deck: DeckId, index: usize) {
        let Some(position) = self
            .state(deck)
            .hot_cues
            .get(index)
            .and_then(|cue| cue.position)
        else {
            log::debug!("Engine: Deck '{}' hot cue {} is empty", deck, index);
            return;
        };
        self.seek(deck, position);
        self.dispatch(deck, DeckAction::JumpToHotCue { index });
        if !self.state(deck).is_playing {
            if let Err(e) = self.toggle_play(deck) {
                log::warn!("Engine: Hot cue jump on deck '{}' could not start: {}", deck, e);
            }
        }
    }

    pub fn set_loop(&mut self, deck: DeckId, length_beats: f64) {
        let at = self.position(deck);
        self.dispatch(deck, DeckAction::SetLoop {
            length: length_beats,
            at,
        });
    }

    pub fn toggle_loop(&mut self, deck: DeckId) {
        let at = self.position(deck);
        self.dispatch(deck, DeckAction::ToggleLoop { at });
    }

    // --- Mixer ---

    pub fn set_control(&mut self, deck: DeckId, control: MixerControl, value: f64) {
        let action = match control {
            MixerControl::Volume => DeckAction::SetVolume(value),
            MixerControl::Low => DeckAction::SetLow(value),
            MixerControl::Mid => DeckAction::SetMid(value),
            MixerControl::High => DeckAction::SetHigh(value),
            MixerControl::Filter => DeckAction::SetFilter(value),
        };
        self.dispatch(deck, action);
    }

    pub fn set_crossfader(&mut self, value: f64) {
        self.crossfader = if value.is_nan() {
            CONTROL_CENTER
        } else {
            value.clamp(CONTROL_MIN, CONTROL_MAX)
        };
        for deck in DeckId::ALL {
            self.push_chain_targets(deck);
        }
    }

    pub fn mixer_snapshot(&self) -> MixerSnapshot {
        MixerSnapshot {
            deck_a: self.state(DeckId::A).mixer_state(),
            deck_b: self.state(DeckId::B).mixer_state(),
            crossfader: self.crossfader,
        }
    }

    pub fn restore_mixer(&mut self, snapshot: &MixerSnapshot) {
        for deck in DeckId::ALL {
            self.dispatch(deck, DeckAction::SetMixerState(*snapshot.deck(deck)));
        }
        self.set_crossfader(snapshot.crossfader);
        log::info!("Engine: Mixer settings restored");
    }

    /// What a [`crate::settings::SettingsStore`] should persist for this session.
    pub fn settings_payload(&self) -> SettingsPayload {
        SettingsPayload {
            mixer_settings: self.mixer_snapshot(),
            midi_mapping: Some(self.mapping.active().mapping.clone()),
        }
    }

    pub fn apply_settings(&mut self, payload: &SettingsPayload) {
        self.restore_mixer(&payload.mixer_settings);
        if let Some(mapping) = &payload.midi_mapping {
            self.mapping.set_active(MappingFile {
                name: SAVED_MAPPING_NAME.to_string(),
                mapping: mapping.clone(),
            });
            log::info!("MIDI: Restored saved mapping ({} entries)", mapping.len());
        }
    }

    // --- Sync ---

    /// Makes `slave` follow the other deck, or releases it if it already does.
    pub fn request_sync(&mut self, slave: DeckId) -> Result<(), SyncError> {
        let master = slave.other();
        if self.sync.master_of(slave) == Some(master) {
            log::info!("Sync: Deck '{}' released from '{}'", slave, master);
            self.dispatch(slave, DeckAction::ToggleSync { target: master });
            return Ok(());
        }
        if let Err(e) = self.sync.check_link(slave, master) {
            log::warn!("Sync: {}", e);
            self.events.emit_error(Some(slave), &e.to_string());
            return Err(e);
        }

        // Both decks are read together before anything is written.
        let master_snapshot = self.decks[idx(master)].snapshot();
        let slave_snapshot = self.decks[idx(slave)].snapshot();

        self.clear_correction(slave);
        self.dispatch(slave, DeckAction::ToggleSync { target: master });

        match sync::phase_correction(&master_snapshot, &slave_snapshot, &self.config.sync) {
            Some(correction) => {
                log::info!(
                    "Sync: Deck '{}' is {:+.3}s off '{}', correcting by {:+.3} for {:.2}s",
                    slave,
                    correction.diff_seconds,
                    master,
                    correction.rate_offset,
                    self.config.sync.correction_window_seconds
                );
                self.decks[idx(slave)].correction = Some(ActiveCorrection {
                    rate_offset: correction.rate_offset,
                });
                self.apply_clock_rate(slave);
                let window = Duration::from_secs_f64(self.config.sync.correction_window_seconds);
                self.timers.start(
                    self.timer_host.as_mut(),
                    slave,
                    TimerKind::PhaseCorrection,
                    Schedule::Once(window),
                );
                self.emit_sync_status(slave);
            }
            None => log::debug!("Sync: No phase correction for deck '{}'", slave),
        }
        Ok(())
    }

    /// Rewrites each slave's rate when it drifts off its master's tempo.
    pub fn maintain_sync(&mut self) {
        for (slave, master) in self.sync.edges() {
            let master_snapshot = self.decks[idx(master)].snapshot();
            let slave_snapshot = self.decks[idx(slave)].snapshot();
            let Some(target_bpm) = master_snapshot.effective_bpm() else {
                continue;
            };
            if sync::needs_rate_update(target_bpm, &slave_snapshot, &self.config.sync) {
                log::debug!(
                    "Sync: Deck '{}' following '{}' at {:.3} BPM",
                    slave,
                    master,
                    target_bpm
                );
                self.dispatch(slave, DeckAction::SyncBpm { target_bpm });
            }
        }
    }

    fn mirror_relation(&mut self, deck: DeckId, wanted: Option<DeckId>) {
        match wanted {
            None => {
                if let Some(master) = self.sync.unlink(deck) {
                    log::info!("Sync: Deck '{}' no longer follows '{}'", deck, master);
                }
                self.clear_correction(deck);
            }
            Some(master) => match self.sync.link(deck, master) {
                Ok(()) => log::info!("Sync: Deck '{}' now follows '{}'", deck, master),
                Err(e) => {
                    log::warn!("Sync: {}", e);
                    self.events.emit_error(Some(deck), &e.to_string());
                    self.decks[idx(deck)].state.synced_to = self.sync.master_of(deck);
                }
            },
        }
        self.emit_sync_status(deck);
    }

    fn clear_correction(&mut self, deck: DeckId) {
        self.timers.cancel(deck, TimerKind::PhaseCorrection);
        if self.decks[idx(deck)].correction.take().is_some() {
            self.apply_clock_rate(deck);
        }
    }

    fn emit_sync_status(&self, deck: DeckId) {
        let slot = &self.decks[idx(deck)];
        self.events
            .emit_sync_status(deck, slot.state.synced_to, slot.correction.is_some());
    }

    // --- Timers ---

    pub fn handle_timer(&mut self, event: TimerEvent) {
        if !self.timers.is_current(&event) {
            log::trace!("Engine: Dropping stale {:?}", event);
            return;
        }
        match event.kind {
            TimerKind::LoopCheck => self.check_loop(event.deck),
            TimerKind::PhaseCorrection => {
                self.timers.complete(&event);
                self.end_phase_correction(event.deck);
            }
        }
    }

    fn check_loop(&mut self, deck: DeckId) {
        let slot = &mut self.decks[idx(deck)];
        let loop_state = slot.state.loop_state;
        let Some(bounds) = loop_state.bounds.filter(|_| loop_state.is_active) else {
            return;
        };
        if slot.transport.position() >= bounds.end {
            slot.transport.seek(bounds.start);
            log::trace!("Engine: Deck '{}' loop wrapped to {:.3}s", deck, bounds.start);
        }
    }

    fn end_phase_correction(&mut self, deck: DeckId) {
        if self.decks[idx(deck)].correction.take().is_some() {
            self.apply_clock_rate(deck);
            log::debug!("Sync: Deck '{}' phase correction finished", deck);
            self.emit_sync_status(deck);
        }
    }

    /// Progress projection and end-of-track detection.
    pub fn tick(&mut self) {
        for deck in DeckId::ALL {
            let slot = &self.decks[idx(deck)];
            let Some(duration) = slot.state.duration_seconds() else {
                continue;
            };
            let ended = slot.state.is_playing && !slot.transport.is_running();
            let position = slot.transport.position();
            let progress = (position / duration * 100.0).clamp(0.0, 100.0);
            let moved = progress != slot.state.progress;
            let playing = slot.state.is_playing;

            if ended {
                log::info!("Engine: Deck '{}' reached the end of its track", deck);
                self.dispatch(deck, DeckAction::TogglePlay);
            }
            if moved {
                self.dispatch(deck, DeckAction::SetProgress(progress));
            }
            if moved || playing {
                self.events.emit_tick(deck, position, progress);
            }
        }
    }

    // --- Loading ---

    pub fn load(&mut self, deck: DeckId, source: TrackSource) {
        let token = self.begin_load(deck);
        match source {
            TrackSource::Decoded(track) => {
                let track = self.library.insert_shared(track);
                self.prepare_track(deck, token, track);
            }
            TrackSource::File(path) => {
                let id = match library::local_track_id(Path::new(&path)) {
                    Ok(id) => id,
                    Err(e) => return self.fail_load(deck, token, e.to_string()),
                };
                if let Some(track) = self.library.get(&id) {
                    return self.prepare_track(deck, token, track);
                }
                self.spawn_decode(deck, token, move || {
                    library::decode_track_file(Path::new(&path))
                });
            }
            TrackSource::Bytes { name, bytes } => {
                let id = TrackId::local(&name, bytes.len() as u64);
                if let Some(track) = self.library.get(&id) {
                    return self.prepare_track(deck, token, track);
                }
                self.spawn_decode(deck, token, move || library::decode_track_bytes(&name, bytes));
            }
        }
    }

    pub fn eject(&mut self, deck: DeckId) {
        let slot = &mut self.decks[idx(deck)];
        // Abandon any load still in flight.
        slot.load_token += 1;
        slot.status = DeckStatus::Ready;
        self.dispatch(deck, DeckAction::EjectTrack);
        log::info!("Engine: Deck '{}' ejected", deck);
    }

    fn begin_load(&mut self, deck: DeckId) -> u64 {
        let slot = &mut self.decks[idx(deck)];
        slot.load_token += 1;
        slot.status = DeckStatus::Loading;
        self.events
            .emit_load_status(deck, LoadPhase::Decoding, None, None);
        slot.load_token
    }

    fn is_current_load(&self, deck: DeckId, token: u64) -> bool {
        let current = self.decks[idx(deck)].load_token;
        if current != token {
            log::debug!(
                "Engine: Dropping stale load result for deck '{}' (token {} vs {})",
                deck,
                token,
                current
            );
        }
        current == token
    }

    fn spawn_decode<F>(&mut self, deck: DeckId, token: u64, job: F)
    where
        F: FnOnce() -> Result<Track, AudioDecodingError> + Send + 'static,
    {
        let Some(sender) = self.commands.clone() else {
            let result = job().map(Arc::new).map_err(|e| e.to_string());
            return self.on_track_decoded(deck, token, result);
        };
        tokio::spawn(async move {
            let result = match tokio::task::spawn_blocking(job).await {
                Ok(Ok(track)) => Ok(Arc::new(track)),
                Ok(Err(e)) => Err(e.to_string()),
                Err(e) => Err(format!("Decode task failed: {}", e)),
            };
            let command = EngineCommand::TrackDecoded {
                deck,
                token,
                result,
            };
            if sender.send(command).await.is_err() {
                log::warn!("Engine: Decoded track for deck '{}' had nowhere to go", deck);
            }
        });
    }

    fn on_track_decoded(&mut self, deck: DeckId, token: u64, result: Result<Arc<Track>, String>) {
        if !self.is_current_load(deck, token) {
            return;
        }
        match result {
            Ok(track) => {
                let track = self.library.insert_shared(track);
                self.prepare_track(deck, token, track);
            }
            Err(e) => self.fail_load(deck, token, e),
        }
    }

    fn prepare_track(&mut self, deck: DeckId, token: u64, track: Arc<Track>) {
        if track.analysis().is_some() {
            return self.finish_load(deck, token, track, Ok(()));
        }
        self.events.emit_load_status(
            deck,
            LoadPhase::Analyzing,
            Some(track.id().clone()),
            None,
        );
        let estimator = Arc::clone(&self.estimator);
        let Some(sender) = self.commands.clone() else {
            let result = analysis::analyze_track(&track, estimator.as_ref())
                .map(|_| ())
                .map_err(|e| e.to_string());
            return self.finish_load(deck, token, track, result);
        };
        tokio::spawn(async move {
            let result = analysis::analyze_track_blocking(Arc::clone(&track), estimator)
                .await
                .map(|_| ())
                .map_err(|e| e.to_string());
            let command = EngineCommand::AnalysisFinished {
                deck,
                token,
                track,
                result,
            };
            if sender.send(command).await.is_err() {
                log::warn!("Engine: Analysis for deck '{}' had nowhere to go", deck);
            }
        });
    }

    fn finish_load(
        &mut self,
        deck: DeckId,
        token: u64,
        track: Arc<Track>,
        result: Result<(), String>,
    ) {
        if !self.is_current_load(deck, token) {
            return;
        }
        self.decks[idx(deck)].status = DeckStatus::Ready;
        if let Err(e) = &result {
            log::warn!(
                "Engine: Loading '{}' on deck '{}' without beat grid: {}",
                track.id(),
                deck,
                e
            );
            self.events.emit_error(Some(deck), e);
        }
        let track_id = track.id().clone();
        self.dispatch(deck, DeckAction::LoadTrack(track));
        log::info!("Engine: Deck '{}' loaded '{}'", deck, track_id);
        self.events
            .emit_load_status(deck, LoadPhase::Ready, Some(track_id), None);
    }

    fn fail_load(&mut self, deck: DeckId, token: u64, error: String) {
        if !self.is_current_load(deck, token) {
            return;
        }
        self.decks[idx(deck)].status = DeckStatus::Ready;
        log::error!("Engine: Load failed on deck '{}': {}", deck, error);
        self.events
            .emit_load_status(deck, LoadPhase::Failed, None, Some(error));
    }

    // --- MIDI ---

    pub fn load_mapping(&mut self, json: &str, name: &str) -> Result<String, MappingError> {
        self.mapping.load_json(json, name)?;
        Ok(self.emit_mapping_changed())
    }

    /// Merges one learned control into the active mapping.
    pub fn learn_midi(&mut self, message: &MidiMessage, action: MidiActionKind, deck: Option<DeckId>) {
        self.mapping.assign(message, action, deck);
        self.emit_mapping_changed();
    }

    fn emit_mapping_changed(&self) -> String {
        let file = self.mapping.active();
        self.events.emit(EngineEvent::MappingChanged(MappingEventPayload {
            name: file.name.clone(),
            entries: file.mapping.len(),
        }));
        file.name.clone()
    }

    pub fn apply_midi(&mut self, message: &MidiMessage) {
        let Some(action) = self.mapping.resolve(message) else {
            log::trace!("MIDI: Unmapped message {}", message.mapping_key());
            return;
        };
        log::debug!("MIDI: {} -> {:?}", message.mapping_key(), action);
        let value = action.control_value();
        match (action.kind, action.deck_id) {
            (MidiActionKind::SetCrossfader, _) => self.set_crossfader(value),
            (kind, None) => log::warn!("MIDI: {:?} is mapped without a deck", kind),
            (MidiActionKind::TogglePlay, Some(deck)) => {
                if let Err(e) = self.toggle_play(deck) {
                    log::warn!("MIDI: {}", e);
                }
            }
            (MidiActionKind::SetCue, Some(deck)) => {
                if self.state(deck).is_playing {
                    let position = self.position(deck);
                    self.dispatch(deck, DeckAction::SetCue(position));
                }
            }
            (MidiActionKind::JumpToCue, Some(deck)) => self.jump_to_cue(deck),
            (MidiActionKind::SetVolume, Some(deck)) => {
                self.dispatch(deck, DeckAction::SetVolume(value))
            }
            (MidiActionKind::SetLow, Some(deck)) => self.dispatch(deck, DeckAction::SetLow(value)),
            (MidiActionKind::SetMid, Some(deck)) => self.dispatch(deck, DeckAction::SetMid(value)),
            (MidiActionKind::SetHigh, Some(deck)) => {
                self.dispatch(deck, DeckAction::SetHigh(value))
            }
            (MidiActionKind::SetFilter, Some(deck)) => {
                self.dispatch(deck, DeckAction::SetFilter(value))
            }
            (MidiActionKind::JogWheel, Some(deck)) => {
                let target =
                    self.position(deck) + f64::from(action.value) * self.config.jog_step_seconds;
                self.seek(deck, target);
            }
        }
    }

    fn shutdown(&mut self) {
        for deck in DeckId::ALL {
            self.timers.cancel_deck(deck);
            self.decks[idx(deck)].transport.pause();
        }
    }
}
