//! Keeps a secondary (video) track locked to the primary (audio) clock.
//!
//! The zone decision is a pure function of two clock readings; the
//! `DriftCorrector` turns decisions into seeks and rate changes and owns the
//! background/foreground recovery rule.

use crate::config::DriftConfig;
use crate::error::SyncError;
use log::{debug, error, info};
use tokio::sync::mpsc;
use tokio::task::{self, JoinHandle};
use tokio::time::Instant;

const NORMAL_RATE: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Zone {
    Synced,
    MinorDrift,
    MajorDrift,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriftSample {
    pub audio_time: f64,
    pub video_time: f64,
    /// Positive when the video leads.
    pub delta: f64,
}

impl DriftSample {
    pub fn new(audio_time: f64, video_time: f64) -> Self {
        Self {
            audio_time,
            video_time,
            delta: video_time - audio_time,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Correction {
    Nothing,
    SetRate(f64),
    /// Jump the secondary to `to` and run it at normal rate.
    HardSeek { to: f64 },
}

pub fn classify(sample: &DriftSample, config: &DriftConfig) -> Zone {
    let offset = sample.delta.abs();
    if offset < config.synced_threshold {
        Zone::Synced
    } else if offset > config.major_threshold {
        Zone::MajorDrift
    } else {
        Zone::MinorDrift
    }
}

/// Picks the correction for `sample` given the secondary's current rate.
/// Minor drift is only ever corrected through rate, never a jump.
pub fn decide(sample: &DriftSample, current_rate: f64, config: &DriftConfig) -> (Zone, Correction) {
    let zone = classify(sample, config);
    let target_rate = match zone {
        Zone::MajorDrift => {
            return (
                zone,
                Correction::HardSeek {
                    to: sample.audio_time,
                },
            )
        }
        Zone::Synced => NORMAL_RATE,
        Zone::MinorDrift if sample.delta > 0.0 => config.slow_rate,
        Zone::MinorDrift => config.fast_rate,
    };
    let correction = if same_rate(current_rate, target_rate) {
        Correction::Nothing
    } else {
        Correction::SetRate(target_rate)
    };
    (zone, correction)
}

fn same_rate(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

/// Playback handle of the track being kept in step.
pub trait SecondaryTrack {
    /// Current position in seconds, `None` while nothing is loaded.
    fn position(&self) -> Option<f64>;
    fn seek(&mut self, seconds: f64) -> Result<(), SyncError>;
    fn set_rate(&mut self, rate: f64) -> Result<(), SyncError>;
    fn pause(&mut self) -> Result<(), SyncError>;
    fn resume(&mut self) -> Result<(), SyncError>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClockEvent {
    /// Primary clock advanced.
    Tick { primary_time: f64 },
    PrimaryPaused,
    PrimaryResumed { primary_time: f64 },
    /// Host process went to the background.
    Hidden,
    /// Host process is in the foreground again.
    Visible { primary_time: f64 },
    /// New media was loaded into the secondary; it starts at normal rate.
    SecondaryReloaded,
}

pub struct DriftCorrector<T> {
    track: T,
    config: DriftConfig,
    rate: f64,
    primary_playing: bool,
    hidden: bool,
    cooldown_until: Option<Instant>,
}

impl<T: SecondaryTrack> DriftCorrector<T> {
    pub fn new(track: T, config: DriftConfig) -> Self {
        Self {
            track,
            config,
            rate: NORMAL_RATE,
            primary_playing: true,
            hidden: false,
            cooldown_until: None,
        }
    }

    pub fn track(&self) -> &T {
        &self.track
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn into_track(self) -> T {
        self.track
    }

    /// Returns the zone when the event led to a drift evaluation.
    pub fn handle(&mut self, event: ClockEvent, now: Instant) -> Result<Option<Zone>, SyncError> {
        match event {
            ClockEvent::Tick { primary_time } => self.evaluate(primary_time, now),
            ClockEvent::PrimaryPaused => {
                self.primary_playing = false;
                if !self.hidden {
                    self.track.pause()?;
                }
                Ok(None)
            }
            ClockEvent::PrimaryResumed { primary_time } => {
                self.primary_playing = true;
                if !self.hidden {
                    self.track.resume()?;
                    return self.evaluate(primary_time, now);
                }
                Ok(None)
            }
            ClockEvent::Hidden => {
                if !self.hidden {
                    debug!("Backgrounded, pausing secondary track");
                    self.hidden = true;
                    self.track.pause()?;
                }
                Ok(None)
            }
            ClockEvent::Visible { primary_time } => {
                if self.hidden {
                    self.hidden = false;
                    self.resync(primary_time, now)?;
                }
                Ok(None)
            }
            ClockEvent::SecondaryReloaded => {
                self.rate = NORMAL_RATE;
                Ok(None)
            }
        }
    }

    fn evaluate(&mut self, primary_time: f64, now: Instant) -> Result<Option<Zone>, SyncError> {
        if self.hidden || !self.primary_playing {
            return Ok(None);
        }
        if let Some(until) = self.cooldown_until {
            if now < until {
                return Ok(None);
            }
            self.cooldown_until = None;
        }
        let Some(video_time) = self.track.position() else {
            return Ok(None);
        };

        let sample = DriftSample::new(primary_time, video_time);
        let (zone, correction) = decide(&sample, self.rate, &self.config);
        match correction {
            Correction::Nothing => {}
            Correction::SetRate(rate) => {
                debug!("Drift {:+.3}s, secondary rate {}", sample.delta, rate);
                self.track.set_rate(rate)?;
                self.rate = rate;
            }
            Correction::HardSeek { to } => {
                info!("Drift {:+.3}s, hard seek to {:.3}", sample.delta, to);
                self.track.seek(to)?;
                self.reset_rate()?;
            }
        }
        Ok(Some(zone))
    }

    /// One explicit hard resync after coming back to the foreground, then a
    /// quiet period so the decode backlog does not read as major drift.
    fn resync(&mut self, primary_time: f64, now: Instant) -> Result<(), SyncError> {
        info!("Foreground again, resyncing secondary to {:.3}", primary_time);
        self.track.seek(primary_time)?;
        self.reset_rate()?;
        if self.primary_playing {
            self.track.resume()?;
        }
        self.cooldown_until = Some(now + self.config.resume_cooldown());
        Ok(())
    }

    fn reset_rate(&mut self) -> Result<(), SyncError> {
        if !same_rate(self.rate, NORMAL_RATE) {
            self.track.set_rate(NORMAL_RATE)?;
            self.rate = NORMAL_RATE;
        }
        Ok(())
    }
}

impl<T: SecondaryTrack + Send + 'static> DriftCorrector<T> {
    /// Runs the corrector as its own control loop. The loop ends, handing the
    /// track back, once every event sender is dropped.
    pub fn spawn(self) -> (mpsc::Sender<ClockEvent>, JoinHandle<T>) {
        let (sender, mut events) = mpsc::channel(32);
        let handle = task::spawn(async move {
            let mut corrector = self;
            while let Some(event) = events.recv().await {
                if let Err(e) = corrector.handle(event, Instant::now()) {
                    error!("Drift correction failed: {}", e);
                }
            }
            corrector.into_track()
        });
        (sender, handle)
    }
}
