pub mod audio;
pub mod midi;
pub mod settings;

use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tokio::sync::mpsc;

use audio::analysis::SpectralFluxEstimator;
use audio::config::{ENGINE_COMMAND_CHANNEL_SIZE, EngineConfig};
use audio::effects::ChainTargets;
use audio::errors::PlaybackError;
use audio::playback::commands::EngineCommand;
use audio::playback::engine::{DeckEngine, EngineParts};
use audio::playback::events::{EngineEvent, EventSink};
use audio::playback::state::EngineHandle;
use audio::playback::time::TokioTimers;
use audio::playback::voice::{DeckVoice, MasterBus, OutputFormat, VoiceTransport};
use audio::types::DeckId;

pub fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

/// A running engine thread and the ends the host application holds on to.
pub struct EngineRuntime {
    pub handle: EngineHandle,
    /// Render source for the audio device callback.
    pub bus: MasterBus,
    pub events: mpsc::UnboundedReceiver<EngineEvent>,
    pub thread: JoinHandle<()>,
}

/// Builds both deck voices and starts the engine on its own thread.
pub fn spawn_engine(config: EngineConfig, format: OutputFormat) -> Result<EngineRuntime, PlaybackError> {
    let (command_tx, command_rx) = mpsc::channel::<EngineCommand>(ENGINE_COMMAND_CHANNEL_SIZE);
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    let voice = |deck| -> Result<Arc<Mutex<DeckVoice>>, PlaybackError> {
        let voice = DeckVoice::new(
            deck,
            format,
            config.smoothing_time_constant_seconds,
            ChainTargets::default(),
        )?;
        Ok(Arc::new(Mutex::new(voice)))
    };
    let voice_a = voice(DeckId::A)?;
    let voice_b = voice(DeckId::B)?;
    let bus = MasterBus::new(vec![Arc::clone(&voice_a), Arc::clone(&voice_b)]);

    let parts = EngineParts {
        transport_a: Box::new(VoiceTransport::new(voice_a)),
        transport_b: Box::new(VoiceTransport::new(voice_b)),
        timers: Box::new(TokioTimers::new(command_tx.clone())),
        estimator: Arc::new(SpectralFluxEstimator::default()),
        events: EventSink::new(event_tx),
    };
    let mut engine = DeckEngine::new(config, parts);
    engine.set_command_sender(command_tx.clone());

    let thread = std::thread::spawn(move || {
        audio::playback::run_engine_thread(engine, command_rx);
    });
    log::info!(
        "Engine: Spawned for {} Hz / {} channels",
        format.sample_rate,
        format.channels
    );

    Ok(EngineRuntime {
        handle: EngineHandle::new(command_tx),
        bus,
        events: event_rx,
        thread,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use audio::playback::commands::MixerControl;
    use tokio::sync::oneshot;

    #[test]
    fn engine_thread_answers_and_shuts_down() {
        let mut runtime = spawn_engine(EngineConfig::default(), OutputFormat::default()).unwrap();
        runtime
            .handle
            .blocking_send(EngineCommand::SetControl {
                deck: DeckId::B,
                control: MixerControl::Volume,
                value: 40.0,
            })
            .unwrap();

        let (tx, rx) = oneshot::channel();
        runtime.handle.blocking_send(EngineCommand::GetMixer(tx)).unwrap();
        assert_eq!(rx.blocking_recv().unwrap().deck_b.volume, 40.0);

        let (tx, rx) = oneshot::channel();
        runtime.handle.blocking_send(EngineCommand::Shutdown(tx)).unwrap();
        rx.blocking_recv().unwrap();
        runtime.thread.join().unwrap();

        let mut saw_update = false;
        while let Ok(event) = runtime.events.try_recv() {
            saw_update |= matches!(event, EngineEvent::DeckUpdate(_));
        }
        assert!(saw_update);
    }
}
