use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use super::commands::EngineCommand;
use super::voice::DeckTransport;
use crate::audio::errors::{MappingError, PlaybackError};
use crate::audio::types::{DeckId, DeckState, DeckView, Track};
use crate::settings::MixerSnapshot;

// --- State Management ---

/// Cloneable front door to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    command_sender: mpsc::Sender<EngineCommand>,
}

impl EngineHandle {
    pub fn new(sender: mpsc::Sender<EngineCommand>) -> Self {
        EngineHandle {
            command_sender: sender,
        }
    }

    pub fn get_command_sender(&self) -> mpsc::Sender<EngineCommand> {
        self.command_sender.clone()
    }

    pub async fn send(&self, command: EngineCommand) -> Result<(), PlaybackError> {
        self.command_sender
            .send(command)
            .await
            .map_err(|e| PlaybackError::CommandSendError(e.to_string()))
    }

    /// For callers outside any runtime, such as a MIDI input callback thread.
    pub fn blocking_send(&self, command: EngineCommand) -> Result<(), PlaybackError> {
        self.command_sender
            .blocking_send(command)
            .map_err(|e| PlaybackError::CommandSendError(e.to_string()))
    }

    pub async fn mixer_snapshot(&self) -> Result<MixerSnapshot, PlaybackError> {
        let (tx, rx) = oneshot::channel();
        self.send(EngineCommand::GetMixer(tx)).await?;
        rx.await
            .map_err(|e| PlaybackError::ReplyDropped(e.to_string()))
    }

    pub async fn deck_view(&self, deck: DeckId) -> Result<DeckView, PlaybackError> {
        let (tx, rx) = oneshot::channel();
        self.send(EngineCommand::GetDeck { deck, reply: tx }).await?;
        rx.await
            .map_err(|e| PlaybackError::ReplyDropped(e.to_string()))
    }

    /// Returns the name of the mapping now active.
    pub async fn load_mapping(&self, json: String, name: String) -> Result<String, String> {
        let (tx, rx) = oneshot::channel();
        self.send(EngineCommand::LoadMapping {
            json,
            name,
            reply: tx,
        })
        .await?;
        let result: Result<String, MappingError> = rx
            .await
            .map_err(|e| PlaybackError::ReplyDropped(e.to_string()))?;
        Ok(result?)
    }

    /// Pretty-printed JSON of the active mapping, ready to save to a file.
    pub async fn export_mapping(&self) -> Result<String, String> {
        let (tx, rx) = oneshot::channel();
        self.send(EngineCommand::ExportMapping(tx)).await?;
        let result: Result<String, MappingError> = rx
            .await
            .map_err(|e| PlaybackError::ReplyDropped(e.to_string()))?;
        Ok(result?)
    }

    pub async fn shutdown(&self) -> Result<(), PlaybackError> {
        let (tx, rx) = oneshot::channel();
        self.send(EngineCommand::Shutdown(tx)).await?;
        rx.await
            .map_err(|e| PlaybackError::ReplyDropped(e.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeckStatus {
    Ready,
    /// Decoding or analyzing a new track; play is refused.
    Loading,
}

/// Temporary rate offset applied on top of the deck's own rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct ActiveCorrection {
    pub(crate) rate_offset: f64,
}

pub(crate) struct DeckSlot {
    pub(crate) state: DeckState,
    pub(crate) transport: Box<dyn DeckTransport>,
    pub(crate) status: DeckStatus,
    /// Identifies the newest load request; completions of older ones are dropped.
    pub(crate) load_token: u64,
    pub(crate) correction: Option<ActiveCorrection>,
}

impl DeckSlot {
    pub(crate) fn new(state: DeckState, transport: Box<dyn DeckTransport>) -> Self {
        DeckSlot {
            state,
            transport,
            status: DeckStatus::Ready,
            load_token: 0,
            correction: None,
        }
    }

    /// Rate the clock should run at right now.
    pub(crate) fn clock_rate(&self) -> f64 {
        self.state.playback_rate + self.correction.map_or(0.0, |c| c.rate_offset)
    }

    pub(crate) fn snapshot(&self) -> DeckSnapshot {
        DeckSnapshot {
            deck: self.state.id,
            is_playing: self.state.is_playing,
            position: self.transport.position(),
            playback_rate: self.state.playback_rate,
            track: self.state.track.clone(),
        }
    }
}

/// What the sync engine reads about a deck at one instant.
#[derive(Debug, Clone)]
pub struct DeckSnapshot {
    pub deck: DeckId,
    pub is_playing: bool,
    pub position: f64,
    pub playback_rate: f64,
    pub track: Option<Arc<Track>>,
}

impl DeckSnapshot {
    pub fn bpm(&self) -> Option<f64> {
        self.track.as_ref().and_then(|t| t.bpm())
    }

    pub fn grid(&self) -> Option<&[f64]> {
        self.track.as_ref().and_then(|t| t.beat_grid())
    }

    pub fn effective_bpm(&self) -> Option<f64> {
        self.bpm().map(|bpm| bpm * self.playback_rate)
    }
}
