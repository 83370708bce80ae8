use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::commands::EngineCommand;
use crate::audio::types::DeckId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Repeating poll that wraps the playhead back to the loop start.
    LoopCheck,
    /// One-shot end of a temporary sync correction rate.
    PhaseCorrection,
}

/// Posted back into the engine when a timer fires. Only the event whose
/// generation matches the registry's current one for (deck, kind) is acted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerEvent {
    pub deck: DeckId,
    pub kind: TimerKind,
    pub generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Schedule {
    Once(Duration),
    Every(Duration),
}

/// Handle to a scheduled timer. Dropping it does not stop the timer; call
/// [`TimerHandle::cancel`].
#[derive(Debug, Default)]
pub struct TimerHandle(Option<AbortHandle>);

impl TimerHandle {
    /// A handle with nothing to abort, for hosts that do not spawn tasks.
    pub fn detached() -> Self {
        TimerHandle(None)
    }

    pub fn cancel(self) {
        if let Some(handle) = self.0 {
            handle.abort();
        }
    }
}

/// Source of timer events for the engine.
pub trait TimerHost: Send {
    fn schedule(&mut self, schedule: Schedule, event: TimerEvent) -> TimerHandle;
}

/// Timers as tokio tasks posting [`EngineCommand::Timer`] into the engine's
/// own command channel. Must be used from within the engine runtime.
pub struct TokioTimers {
    sender: mpsc::Sender<EngineCommand>,
}

impl TokioTimers {
    pub fn new(sender: mpsc::Sender<EngineCommand>) -> Self {
        TokioTimers { sender }
    }
}

impl TimerHost for TokioTimers {
    fn schedule(&mut self, schedule: Schedule, event: TimerEvent) -> TimerHandle {
        let sender = self.sender.clone();
        let task = match schedule {
            Schedule::Once(delay) => tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if sender.send(EngineCommand::Timer(event)).await.is_err() {
                    log::debug!("Timers: Engine gone before {:?} fired", event);
                }
            }),
            Schedule::Every(period) => tokio::spawn(async move {
                // interval_at so the first tick is one period out, not immediate
                let mut interval = tokio::time::interval_at(Instant::now() + period, period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    interval.tick().await;
                    match sender.try_send(EngineCommand::Timer(event)) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            log::trace!("Timers: Command channel full, skipping {:?}", event);
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => break,
                    }
                }
            }),
        };
        TimerHandle(Some(task.abort_handle()))
    }
}

#[derive(Default)]
struct TimerSlot {
    generation: u64,
    handle: Option<TimerHandle>,
}

/// At most one live timer per (deck, kind). Starting or cancelling bumps the
/// generation so events already in flight become stale.
#[derive(Default)]
pub struct TimerRegistry {
    slots: HashMap<(DeckId, TimerKind), TimerSlot>,
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(
        &mut self,
        host: &mut dyn TimerHost,
        deck: DeckId,
        kind: TimerKind,
        schedule: Schedule,
    ) -> u64 {
        let slot = self.slots.entry((deck, kind)).or_default();
        if let Some(previous) = slot.handle.take() {
            previous.cancel();
        }
        slot.generation += 1;
        let event = TimerEvent {
            deck,
            kind,
            generation: slot.generation,
        };
        slot.handle = Some(host.schedule(schedule, event));
        log::debug!(
            "Timers: Started {:?} for deck '{}' (generation {})",
            kind,
            deck,
            slot.generation
        );
        slot.generation
    }

    /// Returns whether a live timer was cancelled.
    pub fn cancel(&mut self, deck: DeckId, kind: TimerKind) -> bool {
        let Some(slot) = self.slots.get_mut(&(deck, kind)) else {
            return false;
        };
        slot.generation += 1;
        match slot.handle.take() {
            Some(handle) => {
                handle.cancel();
                log::debug!("Timers: Cancelled {:?} for deck '{}'", kind, deck);
                true
            }
            None => false,
        }
    }

    pub fn cancel_deck(&mut self, deck: DeckId) {
        self.cancel(deck, TimerKind::LoopCheck);
        self.cancel(deck, TimerKind::PhaseCorrection);
    }

    pub fn is_active(&self, deck: DeckId, kind: TimerKind) -> bool {
        self.slots
            .get(&(deck, kind))
            .is_some_and(|slot| slot.handle.is_some())
    }

    pub fn is_current(&self, event: &TimerEvent) -> bool {
        self.slots
            .get(&(event.deck, event.kind))
            .is_some_and(|slot| slot.handle.is_some() && slot.generation == event.generation)
    }

    /// Marks a one-shot timer as fired so it no longer counts as active.
    pub fn complete(&mut self, event: &TimerEvent) {
        if let Some(slot) = self.slots.get_mut(&(event.deck, event.kind)) {
            if slot.generation == event.generation {
                slot.handle = None;
            }
        }
    }
}
