use crate::player::playlist::{Playlist, Track};
use crate::player::video::{clock_time, seconds, VideoTrack};
use futures_util::stream::StreamExt;
use gstreamer::prelude::*;
use gstreamer::{ClockTime, Element, MessageView, SeekFlags};
use log::{debug, error, info, warn};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tandem::{
    AudioState, ClockEvent, PlaybackControl, PlaybackState, Settings, StateSink, SyncError,
};
use tokio::sync::mpsc;
use tokio::task::{self, JoinHandle};
use tokio::time::{self, MissedTickBehavior};

/// How often the playing position is sampled for snapshots and drift ticks.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

struct DeckInner {
    playlist: Playlist,
    current: usize,
    playing: bool,
    volume: f64,
    looping: bool,
    shuffle: bool,
    settings: Settings,
    clock: Option<mpsc::Sender<ClockEvent>>,
}

impl DeckInner {
    fn clock_event(&self, event: ClockEvent) {
        if let Some(clock) = &self.clock {
            if let Err(e) = clock.try_send(event) {
                debug!("Drift corrector missed {:?}: {}", event, e);
            }
        }
    }
}

/// The Player's playback engine: an audio playbin plus, when the playlist
/// carries video, a muted secondary playbin driven by the drift corrector.
///
/// Every mutation pushes a fresh `PlaybackState` into the session's sink.
#[derive(Clone)]
pub struct Deck {
    inner: Arc<Mutex<DeckInner>>,
    audio: Element,
    video: Option<VideoTrack>,
    sink: StateSink,
}

impl Deck {
    pub fn new(playlist: Playlist, settings: Settings, sink: StateSink) -> Result<Self, SyncError> {
        let audio = gstreamer::ElementFactory::make("playbin")
            .name("primary")
            .build()
            .map_err(|_| SyncError::Element("Failed to create audio playbin".to_string()))?;
        let video = if playlist.has_video() {
            Some(VideoTrack::new()?)
        } else {
            None
        };
        info!("GStreamer created successfully.");

        Ok(Self {
            inner: Arc::new(Mutex::new(DeckInner {
                playlist,
                current: 0,
                playing: false,
                volume: 1.0,
                looping: false,
                shuffle: false,
                settings,
                clock: None,
            })),
            audio,
            video,
            sink,
        })
    }

    pub fn video(&self) -> Option<VideoTrack> {
        self.video.clone()
    }

    fn lock(&self) -> Result<MutexGuard<'_, DeckInner>, SyncError> {
        self.inner
            .lock()
            .map_err(|_| SyncError::Engine("Deck state poisoned".to_string()))
    }

    pub fn attach_clock(&self, clock: mpsc::Sender<ClockEvent>) -> Result<(), SyncError> {
        self.lock()?.clock = Some(clock);
        Ok(())
    }

    /// Drops the event sender so the drift corrector loop can finish.
    pub fn detach_clock(&self) -> Result<(), SyncError> {
        self.lock()?.clock = None;
        Ok(())
    }

    fn position(&self) -> f64 {
        self.audio.query_position::<ClockTime>().map_or(0.0, seconds)
    }

    pub fn state(&self) -> Result<PlaybackState, SyncError> {
        let inner = self.lock()?;
        let track = inner.playlist.tracks.get(inner.current);
        let duration = self
            .audio
            .query_duration::<ClockTime>()
            .map(seconds)
            .or_else(|| track.map(|track| track.duration))
            .unwrap_or_default();
        let current_song_ref = track.map(|track| {
            let mut summary = track.summary();
            summary.duration = duration;
            summary
        });

        Ok(PlaybackState {
            current_song_ref,
            cover_art_ref: track.and_then(|track| track.cover.clone()),
            audio_state: AudioState {
                is_playing: inner.playing,
                current_time: self.position(),
                duration,
                volume: inner.volume,
                is_looping: inner.looping,
                is_shuffle: inner.shuffle,
            },
            playlist: inner.playlist.summaries(),
            settings_subset: inner.settings.clone(),
        })
    }

    pub fn push_state(&self) {
        match self.state() {
            Ok(state) => self.sink.push(state),
            Err(e) => error!("Failed to read playback state: {}", e),
        }
    }

    fn apply<F>(&self, change: F) -> Result<(), SyncError>
    where
        F: FnOnce(&Self, &mut DeckInner) -> Result<(), SyncError>,
    {
        {
            let mut inner = self.lock()?;
            change(self, &mut inner)?;
        }
        self.push_state();
        Ok(())
    }

    fn set_playing(&self, inner: &mut DeckInner, playing: bool) -> Result<(), SyncError> {
        let target = if playing {
            gstreamer::State::Playing
        } else {
            gstreamer::State::Paused
        };
        self.audio
            .set_state(target)
            .map_err(|_| SyncError::State(format!("Failed to set audio to {target:?}")))?;
        inner.playing = playing;
        inner.clock_event(if playing {
            ClockEvent::PrimaryResumed {
                primary_time: self.position(),
            }
        } else {
            ClockEvent::PrimaryPaused
        });
        Ok(())
    }

    /// Points both pipelines at track `index`. The deck only reports the new
    /// track once the audio pipeline accepted it.
    fn load(&self, inner: &mut DeckInner, index: usize, playing: bool) -> Result<(), SyncError> {
        let track: Track = inner.playlist.get(index)?.clone();
        info!("Loading track {} ({})", track.id, track.title);

        let uri = glib::filename_to_uri(&track.path, None)?;
        let video_uri = track
            .video
            .as_deref()
            .map(|path| glib::filename_to_uri(path, None))
            .transpose()?;

        self.audio
            .set_state(gstreamer::State::Null)
            .map_err(|_| SyncError::State("Failed to reset audio pipeline".to_string()))?;
        self.audio.set_property("uri", uri.as_str());
        self.audio.set_property("volume", inner.volume);

        if let Some(video) = &self.video {
            video.load(video_uri.as_deref(), playing)?;
            inner.clock_event(ClockEvent::SecondaryReloaded);
        }

        let target = if playing {
            gstreamer::State::Playing
        } else {
            gstreamer::State::Paused
        };
        self.audio
            .set_state(target)
            .map_err(|_| SyncError::State("Failed to start audio pipeline".to_string()))?;
        inner.current = index;
        inner.playing = playing;
        Ok(())
    }

    fn step(&self, inner: &mut DeckInner, forward: bool) -> Result<(), SyncError> {
        let index = if forward {
            inner.playlist.next_index(inner.current, inner.shuffle)
        } else {
            inner.playlist.previous_index(inner.current, inner.shuffle)
        };
        let index = index.ok_or_else(|| SyncError::Engine("Playlist is empty".to_string()))?;
        self.load(inner, index, true)
    }

    /// Loads the first track and starts playing it.
    pub fn start(&self) -> Result<(), SyncError> {
        self.apply(|deck, inner| {
            if inner.playlist.is_empty() {
                warn!("Current playlist is empty");
                return Ok(());
            }
            deck.load(inner, 0, true)?;
            inner.clock_event(ClockEvent::PrimaryResumed {
                primary_time: 0.0,
            });
            Ok(())
        })
    }

    pub fn stop(&self) -> Result<(), SyncError> {
        self.audio
            .set_state(gstreamer::State::Null)
            .map_err(|_| SyncError::State("Failed to stop audio".to_string()))?;
        if let Some(video) = &self.video {
            video.load(None, false)?;
        }
        self.lock()?.playing = false;
        Ok(())
    }

    fn on_end_of_stream(&self) -> Result<(), SyncError> {
        self.apply(|deck, inner| {
            if inner.looping {
                info!("Repeating current track");
                deck.audio
                    .seek_simple(SeekFlags::FLUSH | SeekFlags::ACCURATE, ClockTime::ZERO)?;
                inner.clock_event(ClockEvent::Tick { primary_time: 0.0 });
                Ok(())
            } else {
                deck.step(inner, true)
            }
        })
    }

    fn poll(&self) {
        let playing = match self.lock() {
            Ok(inner) => {
                if inner.playing {
                    inner.clock_event(ClockEvent::Tick {
                        primary_time: self.position(),
                    });
                }
                inner.playing
            }
            Err(e) => {
                error!("Position poll failed: {}", e);
                return;
            }
        };
        if playing {
            self.push_state();
        }
    }

    /// Samples the playing position so `currentTime` advances in the
    /// published snapshots and the drift corrector gets its ticks.
    pub fn spawn_position_poller(&self) -> JoinHandle<()> {
        let deck = self.clone();
        task::spawn(async move {
            let mut ticker = time::interval(POLL_INTERVAL);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                deck.poll();
            }
        })
    }

    pub fn spawn_end_of_stream_listener(&self) -> Result<JoinHandle<()>, SyncError> {
        let bus = self
            .audio
            .bus()
            .ok_or_else(|| SyncError::Element("Failed to get GStreamer bus".to_string()))?;
        let deck = self.clone();

        Ok(task::spawn(async move {
            let mut messages = bus.stream();
            while let Some(message) = messages.next().await {
                match message.view() {
                    MessageView::Eos(_) => {
                        info!("Track finished playing. Handling EOS...");
                        if let Err(e) = deck.on_end_of_stream() {
                            error!("Failed to advance after EOS: {}", e);
                        }
                    }
                    MessageView::Error(err) => {
                        error!("Error from GStreamer pipeline: {}", err.error());
                    }
                    _ => (),
                }
            }
        }))
    }
}

impl PlaybackControl for Deck {
    fn play(&mut self) -> Result<(), SyncError> {
        info!("Resume playback");
        self.apply(|deck, inner| deck.set_playing(inner, true))
    }

    fn pause(&mut self) -> Result<(), SyncError> {
        info!("Pause");
        self.apply(|deck, inner| deck.set_playing(inner, false))
    }

    fn toggle_play(&mut self) -> Result<(), SyncError> {
        self.apply(|deck, inner| {
            let playing = !inner.playing;
            deck.set_playing(inner, playing)
        })
    }

    fn next(&mut self) -> Result<(), SyncError> {
        info!("Play next song");
        self.apply(|deck, inner| deck.step(inner, true))
    }

    fn prev(&mut self) -> Result<(), SyncError> {
        info!("Play previous song");
        self.apply(|deck, inner| deck.step(inner, false))
    }

    fn seek(&mut self, to: f64) -> Result<(), SyncError> {
        self.apply(|deck, inner| {
            let to = to.max(0.0);
            deck.audio
                .seek_simple(SeekFlags::FLUSH | SeekFlags::ACCURATE, clock_time(to))?;
            inner.clock_event(ClockEvent::Tick { primary_time: to });
            Ok(())
        })
    }

    fn set_volume(&mut self, volume: f64) -> Result<(), SyncError> {
        self.apply(|deck, inner| {
            if !volume.is_finite() {
                return Err(SyncError::Engine(format!("Volume {volume} is not a number")));
            }
            let volume = volume.clamp(0.0, 1.0);
            deck.audio.set_property("volume", volume);
            inner.volume = volume;
            Ok(())
        })
    }

    fn set_loop(&mut self, enabled: bool) -> Result<(), SyncError> {
        self.apply(|_, inner| {
            inner.looping = enabled;
            Ok(())
        })
    }

    fn set_shuffle(&mut self, enabled: bool) -> Result<(), SyncError> {
        self.apply(|_, inner| {
            inner.shuffle = enabled;
            Ok(())
        })
    }

    fn reorder(&mut self, from: usize, to: usize) -> Result<(), SyncError> {
        self.apply(|_, inner| {
            let current = inner.current;
            inner.current = inner.playlist.move_track(from, to, current)?;
            Ok(())
        })
    }

    fn play_song(&mut self, song_id: &str) -> Result<(), SyncError> {
        info!("Play {}", song_id);
        self.apply(|deck, inner| {
            let index = inner.playlist.find_track_index(song_id).ok_or_else(|| {
                SyncError::Engine(format!("Track with id {song_id} not found in the playlist"))
            })?;
            deck.load(inner, index, true)
        })
    }
}
