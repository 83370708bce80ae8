use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::audio::config::CONTROL_CENTER;
use crate::audio::errors::SettingsError;
use crate::audio::types::{DeckId, MixerState};
use crate::midi::MidiMapping;

/// Mixer controls of both decks plus the crossfader.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MixerSnapshot {
    pub deck_a: MixerState,
    pub deck_b: MixerState,
    pub crossfader: f64,
}

impl Default for MixerSnapshot {
    fn default() -> Self {
        MixerSnapshot {
            deck_a: MixerState::default(),
            deck_b: MixerState::default(),
            crossfader: CONTROL_CENTER,
        }
    }
}

impl MixerSnapshot {
    pub fn deck(&self, deck: DeckId) -> &MixerState {
        match deck {
            DeckId::A => &self.deck_a,
            DeckId::B => &self.deck_b,
        }
    }
}

/// What gets persisted per user. The engine never looks inside the store.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPayload {
    pub mixer_settings: MixerSnapshot,
    #[serde(default)]
    pub midi_mapping: Option<MidiMapping>,
}

impl SettingsPayload {
    pub fn to_json(&self) -> Result<String, SettingsError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, SettingsError> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Persistence backend for user settings.
pub trait SettingsStore: Send + Sync {
    fn load(&self, user_id: &str) -> Result<Option<SettingsPayload>, SettingsError>;
    fn save(&self, user_id: &str, payload: &SettingsPayload) -> Result<(), SettingsError>;
}

/// Process-local store, useful for sessions without an account.
#[derive(Default)]
pub struct InMemorySettingsStore {
    entries: Mutex<HashMap<String, String>>,
}

impl SettingsStore for InMemorySettingsStore {
    fn load(&self, user_id: &str) -> Result<Option<SettingsPayload>, SettingsError> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| SettingsError::Store("settings map poisoned".to_string()))?;
        entries
            .get(user_id)
            .map(|json| SettingsPayload::from_json(json))
            .transpose()
    }

    fn save(&self, user_id: &str, payload: &SettingsPayload) -> Result<(), SettingsError> {
        let json = payload.to_json()?;
        self.entries
            .lock()
            .map_err(|_| SettingsError::Store("settings map poisoned".to_string()))?
            .insert(user_id.to_string(), json);
        log::debug!("Settings: Saved settings for '{}'", user_id);
        Ok(())
    }
}
