use std::fs::File;
use std::io::Cursor;
use symphonia::core::{
    audio::SampleBuffer,
    codecs::{CODEC_TYPE_NULL, DecoderOptions},
    errors::Error as SymphoniaError,
    formats::FormatOptions,
    io::{MediaSource, MediaSourceStream},
    meta::MetadataOptions,
    probe::Hint,
};

use super::config::DEFAULT_SAMPLE_CAPACITY;
use super::errors::AudioDecodingError;
use super::types::AudioBuffer;

/// Decodes an audio file into planar per-channel samples.
pub fn decode_file(path: &str) -> Result<AudioBuffer, AudioDecodingError> {
    let file = File::open(path).map_err(|e| AudioDecodingError::FileOpenError {
        path: path.to_string(),
        source: e,
    })?;
    let mut hint = Hint::new();
    if let Some(ext) = std::path::Path::new(path).extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }
    decode_source(Box::new(file), hint, path)
}

/// Decodes in-memory encoded audio (e.g. a downloaded stream). `label` only
/// shows up in logs and errors.
pub fn decode_bytes(bytes: Vec<u8>, label: &str) -> Result<AudioBuffer, AudioDecodingError> {
    decode_source(Box::new(Cursor::new(bytes)), Hint::new(), label)
}

fn decode_source(
    source: Box<dyn MediaSource>,
    hint: Hint,
    path: &str,
) -> Result<AudioBuffer, AudioDecodingError> {
    let mss = MediaSourceStream::new(source, Default::default());

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| AudioDecodingError::FormatError {
            path: path.to_string(),
            source: e,
        })?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL && t.codec_params.sample_rate.is_some())
        .ok_or_else(|| AudioDecodingError::NoSuitableTrack {
            path: path.to_string(),
        })?;

    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| AudioDecodingError::MissingSampleRate {
            path: path.to_string(),
        })?;
    let codec_params = track.codec_params.clone();

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| AudioDecodingError::DecoderCreationError {
            path: path.to_string(),
            source: e,
        })?;

    // Channel count is taken from the first decoded packet; some containers omit it.
    let mut channels: Vec<Vec<f32>> = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;

    loop {
        match format.next_packet() {
            Ok(packet) => {
                if packet.track_id() != track_id {
                    continue;
                }
                match decoder.decode(&packet) {
                    Ok(audio_buf) => {
                        let spec = *audio_buf.spec();
                        let channel_count = spec.channels.count().max(1);
                        if channels.is_empty() {
                            channels = (0..channel_count)
                                .map(|_| Vec::with_capacity(DEFAULT_SAMPLE_CAPACITY))
                                .collect();
                        }
                        if sample_buf.is_none() {
                            sample_buf =
                                Some(SampleBuffer::<f32>::new(audio_buf.capacity() as u64, spec));
                        }
                        if let Some(buf) = sample_buf.as_mut() {
                            buf.copy_interleaved_ref(audio_buf);
                            for frame in buf.samples().chunks_exact(channel_count) {
                                for (channel, &sample) in channels.iter_mut().zip(frame) {
                                    channel.push(sample);
                                }
                            }
                        }
                    }
                    Err(SymphoniaError::DecodeError(err_desc)) => {
                        log::warn!("Decode: Ignoring decode error in '{}': {}", path, err_desc);
                    }
                    Err(e) => {
                        return Err(AudioDecodingError::FatalDecodeError {
                            path: path.to_string(),
                            source: e,
                        });
                    }
                }
            }
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                log::debug!("Decode: Reached EOF for '{}'", path);
                break;
            }
            Err(SymphoniaError::ResetRequired) => {
                log::warn!("Decode: Decoder reset required unexpectedly for '{}'", path);
                break;
            }
            Err(e) => {
                return Err(AudioDecodingError::PacketReadIoError {
                    path: path.to_string(),
                    source: e,
                });
            }
        }
    }

    decoder.finalize();
    if channels.first().is_none_or(|c| c.is_empty()) {
        return Err(AudioDecodingError::NoSamplesDecoded {
            path: path.to_string(),
        });
    }
    log::debug!(
        "Decode: Decoded {} frames x {} channels at {} Hz for '{}'",
        channels[0].len(),
        channels.len(),
        sample_rate,
        path
    );

    AudioBuffer::new(channels, sample_rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_an_open_error() {
        let result = decode_file("/definitely/not/here.wav");
        assert!(matches!(result, Err(AudioDecodingError::FileOpenError { .. })));
    }

    #[test]
    fn garbage_bytes_fail_to_probe() {
        let result = decode_bytes(vec![0x13; 512], "garbage");
        assert!(matches!(result, Err(AudioDecodingError::FormatError { .. })));
    }
}
