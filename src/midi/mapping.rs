use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use super::message::{CONTROL_CHANGE, MidiMessage, NOTE_OFF, NOTE_ON};
use crate::audio::config::{CONTROL_MAX, MIDI_VALUE_MAX};
use crate::audio::errors::MappingError;
use crate::audio::types::DeckId;

/// Every action a controller can trigger.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MidiActionKind {
    TogglePlay,
    SetCue,
    JumpToCue,
    SetVolume,
    SetLow,
    SetMid,
    SetHigh,
    SetFilter,
    JogWheel,
    SetCrossfader,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappingEntry {
    pub action: MidiActionKind,
    #[serde(rename = "deckId", default, skip_serializing_if = "Option::is_none")]
    pub deck_id: Option<DeckId>,
}

pub type MidiMapping = HashMap<String, MappingEntry>;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MappingFile {
    #[serde(default)]
    pub name: String,
    pub mapping: MidiMapping,
}

/// A resolved controller action. `value` is the raw 0-127 data byte, or the
/// jog direction (+1/-1) for [`MidiActionKind::JogWheel`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MidiAction {
    pub kind: MidiActionKind,
    pub deck_id: Option<DeckId>,
    pub value: i32,
}

impl MidiAction {
    /// Data byte rescaled to the 0-100 control range.
    pub fn control_value(&self) -> f64 {
        (self.value.clamp(0, MIDI_VALUE_MAX as i32) as f64 / MIDI_VALUE_MAX * CONTROL_MAX).round()
    }
}

pub fn find_action(message: &MidiMessage, mapping: &MidiMapping) -> Option<MidiAction> {
    let entry = mapping.get(&message.mapping_key())?;
    let value = match entry.action {
        MidiActionKind::JogWheel if message.velocity == 1 => 1,
        MidiActionKind::JogWheel => -1,
        _ => i32::from(message.velocity),
    };
    Some(MidiAction {
        kind: entry.action,
        deck_id: entry.deck_id,
        value,
    })
}

/// Parses a mapping file. Unknown actions, a missing or non-object `mapping`
/// and malformed JSON all reject the whole file.
pub fn parse_mapping_file(json: &str) -> Result<MappingFile, MappingError> {
    let raw: serde_json::Value = serde_json::from_str(json)?;
    let Some(entries) = raw.get("mapping").and_then(serde_json::Value::as_object) else {
        return Err(MappingError::MissingMapping);
    };

    let mut mapping = MidiMapping::with_capacity(entries.len());
    for (key, value) in entries {
        let entry: MappingEntry =
            serde_json::from_value(value.clone()).map_err(|e| MappingError::InvalidEntry {
                key: key.clone(),
                reason: e.to_string(),
            })?;
        mapping.insert(key.clone(), entry);
    }
    let name = raw
        .get("name")
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default()
        .to_string();
    Ok(MappingFile { name, mapping })
}

/// The active controller mapping. Loads are all-or-nothing.
#[derive(Debug, Clone)]
pub struct MappingStore {
    active: MappingFile,
}

impl Default for MappingStore {
    fn default() -> Self {
        MappingStore {
            active: default_mapping(),
        }
    }
}

impl MappingStore {
    pub fn new(active: MappingFile) -> Self {
        MappingStore { active }
    }

    pub fn active(&self) -> &MappingFile {
        &self.active
    }

    pub fn name(&self) -> &str {
        &self.active.name
    }

    /// Replaces the active mapping. `fallback_name` is used when the file has
    /// no name of its own.
    pub fn load_json(&mut self, json: &str, fallback_name: &str) -> Result<&MappingFile, MappingError> {
        let mut file = parse_mapping_file(json)?;
        if file.name.is_empty() {
            file.name = fallback_name.to_string();
        }
        log::info!(
            "MIDI: Loaded mapping '{}' ({} entries)",
            file.name,
            file.mapping.len()
        );
        self.active = file;
        Ok(&self.active)
    }

    pub fn load_file(&mut self, path: &Path) -> Result<&MappingFile, MappingError> {
        let json = std::fs::read_to_string(path).map_err(|e| MappingError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        let fallback = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.load_json(&json, &fallback)
    }

    pub fn set_active(&mut self, file: MappingFile) {
        self.active = file;
    }

    pub fn resolve(&self, message: &MidiMessage) -> Option<MidiAction> {
        find_action(message, &self.active.mapping)
    }

    /// Binds the control that sent `message` to `action`, replacing whatever
    /// that control did before. The key uses the raw command byte, so a
    /// learned note-on is not the same control as its note-off.
    pub fn assign(&mut self, message: &MidiMessage, action: MidiActionKind, deck_id: Option<DeckId>) {
        let key = key(message.command, message.channel, message.note);
        let previous = self.active.mapping.insert(key.clone(), entry(action, deck_id));
        self.active.name = CUSTOM_MAPPING_NAME.to_string();
        match previous {
            Some(old) => log::info!("MIDI: Rebound {} from {:?} to {:?}", key, old.action, action),
            None => log::info!("MIDI: Bound {} to {:?}", key, action),
        }
    }

    /// The active mapping as a pretty-printed mapping file.
    pub fn export_json(&self) -> Result<String, MappingError> {
        Ok(serde_json::to_string_pretty(&self.active)?)
    }
}

// --- Built-in Mappings ---

/// Name a mapping takes once a control has been learned into it.
pub const CUSTOM_MAPPING_NAME: &str = "Custom Mapping";

fn entry(action: MidiActionKind, deck_id: Option<DeckId>) -> MappingEntry {
    MappingEntry { action, deck_id }
}

fn key(command: u8, channel: u8, note: u8) -> String {
    format!("{}-{}-{}", command, channel, note)
}

/// Conceptual Traktor Kontrol S4 MK3 layout: deck A on channel 0, deck B on
/// channel 1, crossfader on CC 8 of channel 0.
pub fn default_mapping() -> MappingFile {
    use MidiActionKind::*;
    let mut mapping = MidiMapping::new();
    for (deck, channel) in [(DeckId::A, 0u8), (DeckId::B, 1u8)] {
        let d = Some(deck);
        mapping.insert(key(NOTE_ON, channel, 35), entry(TogglePlay, d));
        mapping.insert(key(NOTE_ON, channel, 36), entry(SetCue, d));
        mapping.insert(key(NOTE_OFF, channel, 36), entry(JumpToCue, d));
        mapping.insert(key(CONTROL_CHANGE, channel, 9), entry(SetVolume, d));
        mapping.insert(key(CONTROL_CHANGE, channel, 32), entry(JogWheel, d));
        mapping.insert(key(CONTROL_CHANGE, channel, 15), entry(SetHigh, d));
        mapping.insert(key(CONTROL_CHANGE, channel, 16), entry(SetMid, d));
        mapping.insert(key(CONTROL_CHANGE, channel, 17), entry(SetLow, d));
        mapping.insert(key(CONTROL_CHANGE, channel, 18), entry(SetFilter, d));
    }
    mapping.insert(key(CONTROL_CHANGE, 0, 8), entry(SetCrossfader, None));
    MappingFile {
        name: "Traktor Kontrol S4 MK3".to_string(),
        mapping,
    }
}

const KNOWN_DEVICES: &[(&str, fn() -> MappingFile)] =
    &[("Traktor Kontrol S4 MK3", default_mapping)];

/// Picks a bundled mapping whose identifier appears in the device name.
pub fn detect_mapping_for_device(device_name: &str) -> Option<MappingFile> {
    KNOWN_DEVICES
        .iter()
        .find(|(identifier, _)| device_name.contains(identifier))
        .map(|(_, build)| build())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_mapping_resolves_deck_controls() {
        let store = MappingStore::default();
        let play_b = MidiMessage::from_bytes(&[0x91, 35, 127]).unwrap();
        let action = store.resolve(&play_b).unwrap();
        assert_eq!(action.kind, MidiActionKind::TogglePlay);
        assert_eq!(action.deck_id, Some(DeckId::B));

        let release = MidiMessage::from_bytes(&[0x90, 36, 0]).unwrap();
        assert_eq!(store.resolve(&release).unwrap().kind, MidiActionKind::JumpToCue);
    }

    #[test]
    fn control_values_rescale_to_percent() {
        let store = MappingStore::default();
        let volume = MidiMessage::from_bytes(&[0xB0, 9, 127]).unwrap();
        assert_eq!(store.resolve(&volume).unwrap().control_value(), 100.0);
        let half = MidiMessage::from_bytes(&[0xB0, 9, 64]).unwrap();
        assert_eq!(store.resolve(&half).unwrap().control_value(), 50.0);
    }

    #[test]
    fn jog_direction_is_signed() {
        let store = MappingStore::default();
        let fwd = MidiMessage::from_bytes(&[0xB0, 32, 1]).unwrap();
        let back = MidiMessage::from_bytes(&[0xB0, 32, 127]).unwrap();
        assert_eq!(store.resolve(&fwd).unwrap().value, 1);
        assert_eq!(store.resolve(&back).unwrap().value, -1);
    }

    #[test]
    fn unmapped_message_resolves_to_nothing() {
        let store = MappingStore::default();
        let msg = MidiMessage::from_bytes(&[0xB5, 99, 1]).unwrap();
        assert!(store.resolve(&msg).is_none());
    }

    #[test]
    fn loads_valid_mapping_file() {
        let mut store = MappingStore::default();
        let json = r#"{ "mapping": { "176-2-7": { "action": "SET_CROSSFADER" },
                                     "144-2-1": { "action": "TOGGLE_PLAY", "deckId": "A" } } }"#;
        let file = store.load_json(json, "custom.json").unwrap();
        assert_eq!(file.name, "custom.json");
        assert_eq!(file.mapping.len(), 2);
        let msg = MidiMessage::from_bytes(&[0x92, 1, 100]).unwrap();
        assert_eq!(store.resolve(&msg).unwrap().deck_id, Some(DeckId::A));
    }

    #[test]
    fn invalid_mapping_file_keeps_active_mapping() {
        let mut store = MappingStore::default();
        let before = store.active().clone();

        let missing = store.load_json(r#"{ "name": "Broken" }"#, "broken.json");
        assert!(matches!(missing, Err(MappingError::MissingMapping)));
        let not_object = store.load_json(r#"{ "mapping": [1, 2] }"#, "x");
        assert!(matches!(not_object, Err(MappingError::MissingMapping)));
        let malformed = store.load_json("{ mapping", "x");
        assert!(matches!(malformed, Err(MappingError::Json(_))));
        let unknown = store.load_json(
            r#"{ "mapping": { "144-0-1": { "action": "LAUNCH_ROCKET" } } }"#,
            "x",
        );
        assert!(matches!(unknown, Err(MappingError::InvalidEntry { .. })));

        assert_eq!(store.active(), &before);
    }

    #[test]
    fn detects_bundled_device() {
        let found = detect_mapping_for_device("Native Instruments Traktor Kontrol S4 MK3 MIDI").unwrap();
        assert_eq!(found.name, "Traktor Kontrol S4 MK3");
        assert!(detect_mapping_for_device("Generic Keyboard").is_none());
    }

    #[test]
    fn learned_binding_survives_export() {
        let mut store = MappingStore::default();
        let pad = MidiMessage::from_bytes(&[0x93, 60, 127]).unwrap();
        store.assign(&pad, MidiActionKind::TogglePlay, Some(DeckId::B));
        assert_eq!(store.name(), CUSTOM_MAPPING_NAME);

        let json = store.export_json().unwrap();
        let file = parse_mapping_file(&json).unwrap();
        assert_eq!(file.name, CUSTOM_MAPPING_NAME);
        assert_eq!(file.mapping.len(), store.active().mapping.len());

        let reloaded = MappingStore::new(file);
        let action = reloaded.resolve(&pad).unwrap();
        assert_eq!(action.kind, MidiActionKind::TogglePlay);
        assert_eq!(action.deck_id, Some(DeckId::B));
    }

    #[test]
    fn learning_an_existing_control_replaces_it() {
        let mut store = MappingStore::default();
        let entries = store.active().mapping.len();
        let volume_a = MidiMessage::from_bytes(&[0xB0, 9, 64]).unwrap();
        store.assign(&volume_a, MidiActionKind::SetFilter, Some(DeckId::A));

        assert_eq!(store.active().mapping.len(), entries);
        assert_eq!(store.resolve(&volume_a).unwrap().kind, MidiActionKind::SetFilter);
    }

    #[test]
    fn learning_keeps_note_on_and_off_apart() {
        let mut store = MappingStore::new(MappingFile {
            name: String::new(),
            mapping: MidiMapping::new(),
        });
        let press = MidiMessage::from_bytes(&[0x90, 40, 100]).unwrap();
        store.assign(&press, MidiActionKind::SetCue, Some(DeckId::A));
        assert!(store.active().mapping.contains_key("144-0-40"));
        let release = MidiMessage::from_bytes(&[0x80, 40, 0]).unwrap();
        assert!(store.resolve(&release).is_none());
    }
}
