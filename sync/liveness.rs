//! Controller-side view of whether a Player is out there.

/// Ordered from weakest to strongest evidence of a live Player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum ConnectionStatus {
    #[default]
    Offline,
    Online,
    Pinging,
    Connected,
}

/// Local receipt times in milliseconds. Never sent anywhere.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LivenessRecord {
    pub last_snapshot_at: Option<u64>,
    pub last_ping_at: Option<u64>,
    pub last_pong_at: Option<u64>,
}

pub struct LivenessMonitor {
    record: LivenessRecord,
    stale_threshold_ms: u64,
    pong_window_ms: u64,
}

impl LivenessMonitor {
    pub fn new(stale_threshold_ms: u64, pong_window_ms: u64) -> Self {
        Self {
            record: LivenessRecord::default(),
            stale_threshold_ms,
            pong_window_ms,
        }
    }

    pub fn record(&self) -> LivenessRecord {
        self.record
    }

    pub fn record_snapshot(&mut self, at: u64) {
        self.record.last_snapshot_at = Some(at);
    }

    pub fn record_ping(&mut self, at: u64) {
        self.record.last_ping_at = Some(at);
    }

    pub fn record_pong(&mut self, at: u64) {
        self.record.last_pong_at = Some(at);
    }

    /// Pure function of the record and `now`.
    ///
    /// A ping counts as outstanding only for one pong window; after that the
    /// status falls back to what snapshots and older pongs say.
    pub fn status_at(&self, now: u64) -> ConnectionStatus {
        let LivenessRecord {
            last_snapshot_at,
            last_ping_at,
            last_pong_at,
        } = self.record;
        let recent = |at: Option<u64>| at.is_some_and(|at| now.saturating_sub(at) <= self.stale_threshold_ms);

        if let Some(ping) = last_ping_at {
            match last_pong_at {
                Some(pong) if pong >= ping => {
                    if pong - ping <= self.pong_window_ms && recent(Some(pong)) {
                        return ConnectionStatus::Connected;
                    }
                }
                _ => {
                    if now.saturating_sub(ping) <= self.pong_window_ms {
                        return ConnectionStatus::Pinging;
                    }
                }
            }
        }

        if recent(last_snapshot_at) || recent(last_pong_at) {
            ConnectionStatus::Online
        } else {
            ConnectionStatus::Offline
        }
    }
}
