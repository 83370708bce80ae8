use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use super::voice::{MasterBus, OutputFormat};
use crate::audio::errors::PlaybackError;

/// The system's default output device, opened in its preferred format.
pub struct OutputDevice {
    device: cpal::Device,
    config: cpal::StreamConfig,
}

impl OutputDevice {
    pub fn open_default() -> Result<Self, PlaybackError> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or_else(|| {
            PlaybackError::OutputStreamInitError("no default output device".to_string())
        })?;
        let supported = device
            .default_output_config()
            .map_err(|e| PlaybackError::OutputStreamInitError(e.to_string()))?;
        if supported.sample_format() != cpal::SampleFormat::F32 {
            return Err(PlaybackError::OutputStreamInitError(format!(
                "unsupported sample format {:?}",
                supported.sample_format()
            )));
        }
        let config = supported.config();
        log::info!(
            "[cpal] Output device: {} ({} Hz, {} channels)",
            device.name().unwrap_or_else(|_| "unknown".to_string()),
            config.sample_rate.0,
            config.channels
        );
        Ok(OutputDevice { device, config })
    }

    /// Format the deck voices must render in.
    pub fn format(&self) -> OutputFormat {
        OutputFormat {
            sample_rate: self.config.sample_rate.0,
            channels: usize::from(self.config.channels),
        }
    }

    /// Starts pulling audio from `bus`. Playback stops when the stream drops.
    pub fn start(&self, bus: MasterBus) -> Result<cpal::Stream, PlaybackError> {
        let stream = self
            .device
            .build_output_stream(
                &self.config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| bus.render(data),
                |err| log::error!("[cpal] Output stream error: {}", err),
                None,
            )
            .map_err(|e| PlaybackError::OutputStreamInitError(e.to_string()))?;
        stream
            .play()
            .map_err(|e| PlaybackError::OutputStreamInitError(e.to_string()))?;
        Ok(stream)
    }
}
