use crate::protocol::{Message, PlaybackSnapshot};
use crate::transport::Transport;
use log::info;
use tokio::sync::watch;

/// What a Controller currently knows about the Player.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum ReadModel {
    /// No snapshot has arrived since attaching. Not the same as stale.
    #[default]
    Uninitialized,
    Ready(PlaybackSnapshot),
}

impl ReadModel {
    pub fn snapshot(&self) -> Option<&PlaybackSnapshot> {
        match self {
            ReadModel::Uninitialized => None,
            ReadModel::Ready(snapshot) => Some(snapshot),
        }
    }

    pub fn is_initialized(&self) -> bool {
        matches!(self, ReadModel::Ready(_))
    }
}

/// Read-only mirror of the last snapshot to arrive.
pub struct StateSubscriber {
    model: watch::Sender<ReadModel>,
}

impl Default for StateSubscriber {
    fn default() -> Self {
        Self::new()
    }
}

impl StateSubscriber {
    pub fn new() -> Self {
        let (model, _) = watch::channel(ReadModel::Uninitialized);
        Self { model }
    }

    /// Asks whichever Player is on the bus for a snapshot. Sent once; if no
    /// Player answers the model stays uninitialized.
    pub fn request_init(&self, transport: &dyn Transport) {
        info!("Requesting initial state");
        transport.publish(Message::RequestInit);
    }

    /// Replaces the whole model with `snapshot`. Arrival order wins, not
    /// `published_at`: a restarted Player may legitimately send older stamps.
    pub fn apply(&self, snapshot: PlaybackSnapshot) {
        self.model.send_replace(ReadModel::Ready(snapshot));
    }

    pub fn current(&self) -> ReadModel {
        self.model.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<ReadModel> {
        self.model.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{AudioState, PlaybackState};

    fn snapshot(current_time: f64, published_at: u64) -> PlaybackSnapshot {
        PlaybackSnapshot {
            state: PlaybackState {
                audio_state: AudioState {
                    current_time,
                    ..AudioState::default()
                },
                ..PlaybackState::default()
            },
            published_at,
        }
    }

    #[test]
    fn starts_uninitialized() {
        let subscriber = StateSubscriber::new();
        assert_eq!(subscriber.current(), ReadModel::Uninitialized);
        assert!(subscriber.current().snapshot().is_none());
    }

    #[test]
    fn last_arrival_wins_over_newer_timestamps() {
        let subscriber = StateSubscriber::new();
        let arrivals = [
            snapshot(1.0, 500),
            snapshot(2.0, 900),
            snapshot(3.0, 100),
        ];
        for s in arrivals.iter().cloned() {
            subscriber.apply(s);
        }
        assert_eq!(subscriber.current(), ReadModel::Ready(arrivals[2].clone()));
    }

    #[tokio::test]
    async fn watchers_see_each_replacement() {
        let subscriber = StateSubscriber::new();
        let mut watcher = subscriber.watch();

        subscriber.apply(snapshot(4.0, 1));
        watcher.changed().await.unwrap();
        let seen = watcher.borrow_and_update().clone();
        assert!(seen.is_initialized());
        assert_eq!(seen.snapshot().map(|s| s.published_at), Some(1));
    }
}
