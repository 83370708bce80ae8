use symphonia::core::errors::Error as SymphoniaError;
use thiserror::Error;

use crate::audio::types::DeckId;

#[derive(Error, Debug)]
pub enum BpmError {
    #[error("Cannot estimate BPM from empty spectral flux")]
    EmptySpectralFlux,
    #[error(
        "Invalid lag range calculated (min: {min_lag}, max: {max_lag}). Sample rate: {sample_rate}, hop size: {hop_size}"
    )]
    InvalidLagRange {
        min_lag: usize,
        max_lag: usize,
        sample_rate: f32,
        hop_size: usize,
    },
    #[error(
        "Effective max lag ({eff_max_lag}) not greater than min lag ({min_lag}) after flux length check"
    )]
    EffectiveLagTooSmall { eff_max_lag: usize, min_lag: usize },
    #[error("Autocorrelation result length ({ac_len}) not greater than min lag ({min_lag})")]
    AutocorrelationTooShort { ac_len: usize, min_lag: usize },
    #[error("Calculated period is too small, cannot determine BPM")]
    PeriodTooSmall,
    #[error("Could not find a significant peak in autocorrelation for BPM estimation")]
    NoAutocorrelationPeak,
    #[error("Cannot calculate BPM from empty samples")]
    EmptySamplesForBpm,
    #[error(
        "Samples became empty after downsampling (factor {factor}). Original count: {original_count}"
    )]
    EmptyAfterDownsample {
        factor: usize,
        original_count: usize,
    },
    #[error("Spectral flux calculation resulted in empty vector. Insufficient samples?")]
    EmptyFluxVector,
}

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("BPM estimation failed for track '{track_id}': {source}")]
    Bpm {
        track_id: String,
        #[source]
        source: BpmError,
    },
    #[error("Analysis task for track '{track_id}' did not complete: {reason}")]
    TaskFailed { track_id: String, reason: String },
}

#[derive(Error, Debug)]
pub enum AudioEffectsError {
    #[error("Failed to calculate {filter_type} coefficients")]
    CoefficientCalculationError { filter_type: String },
}

#[derive(Error, Debug)]
pub enum AudioDecodingError {
    #[error("Failed to open file '{path}': {source}")]
    FileOpenError {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Symphonia format detection error for '{path}': {source}")]
    FormatError {
        path: String,
        #[source]
        source: SymphoniaError,
    },
    #[error("No suitable audio track in '{path}'")]
    NoSuitableTrack { path: String },
    #[error("Sample rate missing in '{path}'")]
    MissingSampleRate { path: String },
    #[error("Failed to create decoder for '{path}': {source}")]
    DecoderCreationError {
        path: String,
        #[source]
        source: SymphoniaError,
    },
    #[error("Symphonia fatal decode error in '{path}': {source}")]
    FatalDecodeError {
        path: String,
        #[source]
        source: SymphoniaError,
    },
    #[error("Symphonia I/O error reading packet for '{path}': {source}")]
    PacketReadIoError {
        path: String,
        #[source]
        source: SymphoniaError,
    },
    #[error("No samples decoded from '{path}'")]
    NoSamplesDecoded { path: String },
    #[error("Invalid audio buffer: {reason}")]
    InvalidBuffer { reason: String },
}

#[derive(Error, Debug)]
pub enum PlaybackError {
    #[error("Deck '{deck_id}' has no track loaded")]
    TrackNotLoaded { deck_id: DeckId },
    #[error("Deck '{deck_id}' is still analyzing its track")]
    DeckBusy { deck_id: DeckId },
    #[error("Playback could not start on deck '{deck_id}': {reason}")]
    StartRejected { deck_id: DeckId, reason: String },
    #[error("Failed to lock {what}: mutex poisoned")]
    LockPoisoned { what: &'static str },
    #[error("Failed to initialize audio output stream: {0}")]
    OutputStreamInitError(String),
    #[error("Engine command send error: {0}")]
    CommandSendError(String),
    #[error("Engine did not answer: {0}")]
    ReplyDropped(String),
    #[error("Signal chain setup failed: {0}")]
    SignalChain(#[from] AudioEffectsError),
}

#[derive(Error, Debug, PartialEq)]
pub enum SyncError {
    #[error("Deck '{slave}' cannot follow '{master}': the relation would form a cycle")]
    CyclicRelation { slave: DeckId, master: DeckId },
}

#[derive(Error, Debug)]
pub enum MappingError {
    #[error("Mapping file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Mapping file must contain a 'mapping' object")]
    MissingMapping,
    #[error("Mapping entry '{key}' is invalid: {reason}")]
    InvalidEntry { key: String, reason: String },
    #[error("Failed to read mapping file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Settings payload could not be (de)serialized: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Settings store failed: {0}")]
    Store(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Config is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

// Front-end boundaries report errors as plain strings.
impl From<AudioDecodingError> for String {
    fn from(err: AudioDecodingError) -> String {
        err.to_string()
    }
}
impl From<BpmError> for String {
    fn from(err: BpmError) -> String {
        err.to_string()
    }
}
impl From<PlaybackError> for String {
    fn from(err: PlaybackError) -> String {
        err.to_string()
    }
}
impl From<MappingError> for String {
    fn from(err: MappingError) -> String {
        err.to_string()
    }
}
