pub mod analysis;
pub mod config;
pub mod decoding;
pub mod effects;
pub mod errors;
pub mod library;
pub mod looping;
pub mod playback;
pub mod reducer;
pub mod types;
