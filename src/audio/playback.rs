use std::time::Duration;
use tokio::sync::mpsc;

use crate::audio::playback::commands::EngineCommand;
use crate::audio::playback::engine::DeckEngine;

pub mod commands;
pub mod engine;
pub mod events;
#[cfg(feature = "output")]
pub mod output;
pub mod state;
pub mod sync;
#[cfg(test)]
pub(crate) mod testing;
pub mod time;
pub mod voice;

// --- Engine Thread Implementation ---

/// Drives `engine` on the calling thread until a shutdown command arrives or
/// every command sender is dropped. Timers and background loads post back into
/// `receiver`, so they must share this thread's runtime.
pub fn run_engine_thread(mut engine: DeckEngine, mut receiver: mpsc::Receiver<EngineCommand>) {
    log::info!("Engine Thread: Starting...");

    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            log::error!("Engine Thread: Failed to build Tokio runtime: {}", e);
            return;
        }
    };

    rt.block_on(async move {
        log::info!("Engine Thread: Entering main loop.");
        let mut should_shutdown = false;
        let mut progress_interval =
            tokio::time::interval(Duration::from_millis(engine.config().progress_interval_ms));
        progress_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        while !should_shutdown {
            tokio::select! {
                maybe_command = receiver.recv() => {
                    match maybe_command {
                        Some(command) => {
                            log::trace!("Engine Thread Received: {:?}", command);
                            should_shutdown = !engine.handle_command(command);
                        }
                        None => {
                            log::info!("Engine Thread: Command channel closed. Exiting loop.");
                            should_shutdown = true;
                        }
                    }
                }
                _ = progress_interval.tick(), if !should_shutdown => {
                    engine.tick();
                }
            }
        }
        log::info!("Engine Thread: Loop finished.");
    });
    log::info!("Engine Thread: Stopped.");
}
