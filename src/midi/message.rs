use serde::{Deserialize, Serialize};

pub const NOTE_OFF: u8 = 0x80;
pub const NOTE_ON: u8 = 0x90;
pub const CONTROL_CHANGE: u8 = 0xB0;

/// A channel voice message split the way mappings address it.
/// `channel` is 0-indexed (MIDI channels 1-16 are 0-15 here).
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct MidiMessage {
    pub command: u8,
    pub channel: u8,
    pub note: u8,
    pub velocity: u8,
}

impl MidiMessage {
    /// Parses `[status, data1, data2]`. Missing data bytes read as 0; system
    /// messages (status 0xF0 and above) and running-status data are ignored.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let status = *bytes.first()?;
        if status < 0x80 || status >= 0xF0 {
            return None;
        }
        Some(MidiMessage {
            command: status & 0xF0,
            channel: status & 0x0F,
            note: bytes.get(1).copied().unwrap_or(0) & 0x7F,
            velocity: bytes.get(2).copied().unwrap_or(0) & 0x7F,
        })
    }

    /// Note-on with zero velocity is a note-off.
    pub fn effective_command(&self) -> u8 {
        if self.command == NOTE_ON && self.velocity == 0 {
            NOTE_OFF
        } else {
            self.command
        }
    }

    /// `"{command}-{channel}-{note}"` in decimal, e.g. `"144-0-35"`.
    pub fn mapping_key(&self) -> String {
        format!("{}-{}-{}", self.effective_command(), self.channel, self.note)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_status_and_channel() {
        let msg = MidiMessage::from_bytes(&[0x91, 35, 127]).unwrap();
        assert_eq!(msg.command, NOTE_ON);
        assert_eq!(msg.channel, 1);
        assert_eq!(msg.mapping_key(), "144-1-35");
    }

    #[test]
    fn zero_velocity_note_on_is_note_off() {
        let msg = MidiMessage::from_bytes(&[0x90, 36, 0]).unwrap();
        assert_eq!(msg.mapping_key(), "128-0-36");
    }

    #[test]
    fn rejects_non_channel_messages() {
        assert!(MidiMessage::from_bytes(&[]).is_none());
        assert!(MidiMessage::from_bytes(&[0xF8]).is_none());
        assert!(MidiMessage::from_bytes(&[0x40, 1]).is_none());
    }
}
