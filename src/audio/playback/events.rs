use serde::Serialize;
use tokio::sync::mpsc;

use crate::audio::types::{DeckId, DeckView, TrackId};

// --- Event Payloads for Frontend ---
#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackTickEventPayload {
    pub deck_id: DeckId,
    pub current_time: f64,
    pub progress: f64,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackErrorEventPayload {
    pub deck_id: Option<DeckId>,
    pub error: String,
}

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum LoadPhase {
    Decoding,
    Analyzing,
    Ready,
    Failed,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoadStatusEventPayload {
    pub deck_id: DeckId,
    pub phase: LoadPhase,
    pub track_id: Option<TrackId>,
    pub error: Option<String>,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatusEventPayload {
    pub deck_id: DeckId,
    pub synced_to: Option<DeckId>,
    /// A temporary phase-correction rate is currently applied.
    pub is_correcting: bool,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MappingEventPayload {
    pub name: String,
    pub entries: usize,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(tag = "event", content = "payload", rename_all = "camelCase")]
pub enum EngineEvent {
    DeckUpdate(DeckView),
    Tick(PlaybackTickEventPayload),
    LoadStatus(LoadStatusEventPayload),
    SyncStatus(SyncStatusEventPayload),
    MappingChanged(MappingEventPayload),
    Error(PlaybackErrorEventPayload),
}

impl EngineEvent {
    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::DeckUpdate(_) => "playback://deck-update",
            EngineEvent::Tick(_) => "playback://tick",
            EngineEvent::LoadStatus(_) => "playback://load-update",
            EngineEvent::SyncStatus(_) => "playback://sync-status-update",
            EngineEvent::MappingChanged(_) => "midi://mapping-changed",
            EngineEvent::Error(_) => "playback://error",
        }
    }
}

// --- Event Emitter Helpers ---

/// Outgoing side of the event channel. A sink without a receiver drops
/// everything silently.
#[derive(Clone, Default)]
pub struct EventSink {
    sender: Option<mpsc::UnboundedSender<EngineEvent>>,
}

impl EventSink {
    pub fn new(sender: mpsc::UnboundedSender<EngineEvent>) -> Self {
        EventSink {
            sender: Some(sender),
        }
    }

    pub fn disconnected() -> Self {
        EventSink { sender: None }
    }

    pub fn emit(&self, event: EngineEvent) {
        let Some(sender) = &self.sender else {
            return;
        };
        let name = event.name();
        if let Err(e) = sender.send(event) {
            log::warn!("Failed to emit {}: {}", name, e);
        }
    }

    pub(crate) fn emit_deck_update(&self, view: DeckView) {
        self.emit(EngineEvent::DeckUpdate(view));
    }

    pub(crate) fn emit_tick(&self, deck_id: DeckId, current_time: f64, progress: f64) {
        self.emit(EngineEvent::Tick(PlaybackTickEventPayload {
            deck_id,
            current_time,
            progress,
        }));
    }

    pub(crate) fn emit_load_status(
        &self,
        deck_id: DeckId,
        phase: LoadPhase,
        track_id: Option<TrackId>,
        error: Option<String>,
    ) {
        self.emit(EngineEvent::LoadStatus(LoadStatusEventPayload {
            deck_id,
            phase,
            track_id,
            error,
        }));
    }

    pub(crate) fn emit_sync_status(
        &self,
        deck_id: DeckId,
        synced_to: Option<DeckId>,
        is_correcting: bool,
    ) {
        self.emit(EngineEvent::SyncStatus(SyncStatusEventPayload {
            deck_id,
            synced_to,
            is_correcting,
        }));
    }

    pub(crate) fn emit_error(&self, deck_id: Option<DeckId>, error: &str) {
        self.emit(EngineEvent::Error(PlaybackErrorEventPayload {
            deck_id,
            error: error.to_string(),
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_tag_and_camel_case() {
        let event = EngineEvent::Tick(PlaybackTickEventPayload {
            deck_id: DeckId::B,
            current_time: 1.5,
            progress: 10.0,
        });
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event\":\"tick\""));
        assert!(json.contains("\"deckId\":\"B\""));
        assert!(json.contains("\"currentTime\":1.5"));
    }

    #[test]
    fn sink_without_receiver_does_not_panic() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let sink = EventSink::new(tx);
        sink.emit_error(Some(DeckId::A), "boom");
        EventSink::disconnected().emit_error(None, "ignored");
    }
}
