use gstreamer::prelude::*;
use gstreamer::{ClockTime, Element, SeekFlags, SeekType};
use std::time::Duration;
use tandem::{SecondaryTrack, SyncError};

pub fn clock_time(seconds: f64) -> ClockTime {
    let duration = Duration::try_from_secs_f64(seconds.max(0.0)).unwrap_or_default();
    ClockTime::from_nseconds(u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX))
}

pub fn seconds(time: ClockTime) -> f64 {
    Duration::from_nanos(time.nseconds()).as_secs_f64()
}

/// Seek that only changes speed. It neither flushes nor repositions, so the
/// picture keeps running while the rate moves.
#[derive(Debug, Clone, Copy, PartialEq)]
struct RateChange {
    rate: f64,
    flags: SeekFlags,
    start_type: SeekType,
    stop_type: SeekType,
}

impl RateChange {
    fn new(rate: f64) -> Self {
        Self {
            rate,
            flags: SeekFlags::INSTANT_RATE_CHANGE,
            start_type: SeekType::None,
            stop_type: SeekType::None,
        }
    }
}

/// Muted playbin carrying the video rendition of the current track.
#[derive(Clone, Debug)]
pub struct VideoTrack {
    element: Element,
}

impl VideoTrack {
    pub fn new() -> Result<Self, SyncError> {
        let element = gstreamer::ElementFactory::make("playbin")
            .name("secondary")
            .build()
            .map_err(|_| SyncError::Element("Failed to create video playbin".to_string()))?;
        element.set_property("mute", true);
        Ok(Self { element })
    }

    pub fn load(&self, uri: Option<&str>, playing: bool) -> Result<(), SyncError> {
        self.element
            .set_state(gstreamer::State::Null)
            .map_err(|_| SyncError::State("Failed to reset video pipeline".to_string()))?;
        let Some(uri) = uri else {
            return Ok(());
        };
        self.element.set_property("uri", uri);
        let state = if playing {
            gstreamer::State::Playing
        } else {
            gstreamer::State::Paused
        };
        self.element
            .set_state(state)
            .map_err(|_| SyncError::State("Failed to start video pipeline".to_string()))?;
        Ok(())
    }
}

impl SecondaryTrack for VideoTrack {
    fn position(&self) -> Option<f64> {
        self.element.query_position::<ClockTime>().map(seconds)
    }

    fn seek(&mut self, to: f64) -> Result<(), SyncError> {
        self.element
            .seek_simple(SeekFlags::FLUSH | SeekFlags::ACCURATE, clock_time(to))?;
        Ok(())
    }

    fn set_rate(&mut self, rate: f64) -> Result<(), SyncError> {
        let change = RateChange::new(rate);
        self.element.seek(
            change.rate,
            change.flags,
            change.start_type,
            ClockTime::NONE,
            change.stop_type,
            ClockTime::NONE,
        )?;
        Ok(())
    }

    fn pause(&mut self) -> Result<(), SyncError> {
        self.element
            .set_state(gstreamer::State::Paused)
            .map_err(|_| SyncError::State("Failed to pause video".to_string()))?;
        Ok(())
    }

    fn resume(&mut self) -> Result<(), SyncError> {
        self.element
            .set_state(gstreamer::State::Playing)
            .map_err(|_| SyncError::State("Failed to resume video".to_string()))?;
        Ok(())
    }
}
