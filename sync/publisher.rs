//! Player-side source of truth for the replicated playback state.

use crate::protocol::{now_millis, Message, PlaybackSnapshot, PlaybackState};
use crate::transport::Transport;
use log::debug;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Holds the newest locally observed state and decides when it goes out.
///
/// Change-triggered broadcasts are coalesced: the first change after a flush
/// arms a deadline one debounce interval away, later changes only replace the
/// pending state. Continuous time updates therefore go out at most once per
/// interval instead of starving the flush. An init request is answered on the
/// spot with the newest state and leaves the pending flush alone.
pub struct StatePublisher {
    transport: Arc<dyn Transport>,
    debounce: Duration,
    current: PlaybackState,
    deadline: Option<Instant>,
    last_published_at: u64,
}

impl StatePublisher {
    pub fn new(transport: Arc<dyn Transport>, debounce: Duration, initial: PlaybackState) -> Self {
        Self {
            transport,
            debounce,
            current: initial,
            deadline: None,
            last_published_at: 0,
        }
    }

    pub fn current(&self) -> &PlaybackState {
        &self.current
    }

    pub fn update(&mut self, state: PlaybackState) {
        self.current = state;
        if self.deadline.is_none() {
            self.deadline = Some(Instant::now() + self.debounce);
        }
    }

    /// When the pending broadcast is due, if one is pending.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Broadcasts the pending state if its deadline has passed.
    pub fn flush_due(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                self.publish();
                true
            }
            _ => false,
        }
    }

    pub fn answer_init(&mut self) {
        debug!("Answering init request");
        self.publish();
    }

    /// Drops any pending broadcast. Used on teardown.
    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    fn publish(&mut self) {
        self.last_published_at = now_millis().max(self.last_published_at);
        let snapshot = PlaybackSnapshot {
            state: self.current.clone(),
            published_at: self.last_published_at,
        };
        self.transport.publish(Message::StateUpdate(snapshot));
    }
}
