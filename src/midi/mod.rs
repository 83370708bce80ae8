pub mod mapping;
pub mod message;

pub use mapping::{
    CUSTOM_MAPPING_NAME, MappingFile, MappingStore, MidiAction, MidiActionKind, MidiMapping, default_mapping,
    detect_mapping_for_device, find_action,
};
pub use message::MidiMessage;
