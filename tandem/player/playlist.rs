use rand::seq::IteratorRandom;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tandem::{SongSummary, SyncError};

#[derive(Deserialize, Clone, Debug, PartialEq)]
pub struct Track {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub artist: String,
    pub path: PathBuf,
    #[serde(default)]
    pub duration: f64,
    pub cover: Option<String>,
    /// Video rendition kept in step with the audio.
    pub video: Option<PathBuf>,
}

impl Track {
    pub fn summary(&self) -> SongSummary {
        SongSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            artist: self.artist.clone(),
            duration: self.duration,
        }
    }
}

#[derive(Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Playlist {
    #[serde(default)]
    pub tracks: Vec<Track>,
}

impl Playlist {
    pub async fn load_from_file(file_path: &Path) -> Result<Self, SyncError> {
        log::info!("Loading playlist");
        let content = tokio::fs::read_to_string(file_path).await?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, SyncError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(toml::from_str(content)?)
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn has_video(&self) -> bool {
        self.tracks.iter().any(|track| track.video.is_some())
    }

    pub fn get(&self, index: usize) -> Result<&Track, SyncError> {
        self.tracks
            .get(index)
            .ok_or_else(|| SyncError::Engine("Track index out of bounds".to_string()))
    }

    pub fn find_track_index(&self, id: &str) -> Option<usize> {
        self.tracks.iter().position(|track| track.id == id)
    }

    pub fn next_index(&self, current: usize, shuffle: bool) -> Option<usize> {
        let len = self.tracks.len();
        if len == 0 {
            return None;
        }
        if shuffle && len > 1 {
            let mut rng = rand::thread_rng();
            return (0..len).filter(|&i| i != current).choose(&mut rng);
        }
        Some((current + 1) % len)
    }

    pub fn previous_index(&self, current: usize, shuffle: bool) -> Option<usize> {
        let len = self.tracks.len();
        if len == 0 {
            return None;
        }
        if shuffle {
            return self.next_index(current, true);
        }
        Some(if current == 0 { len - 1 } else { current - 1 })
    }

    /// Moves the track at `from` to `to`, returning where the track that was
    /// at `current` ended up.
    pub fn move_track(&mut self, from: usize, to: usize, current: usize) -> Result<usize, SyncError> {
        let len = self.tracks.len();
        if from >= len || to >= len {
            return Err(SyncError::Engine(format!(
                "Cannot move track {from} to {to} in a playlist of {len}"
            )));
        }
        let current_id = self.tracks.get(current).map(|track| track.id.clone());
        let track = self.tracks.remove(from);
        self.tracks.insert(to, track);
        Ok(current_id
            .and_then(|id| self.find_track_index(&id))
            .unwrap_or(current))
    }

    pub fn summaries(&self) -> Vec<SongSummary> {
        self.tracks.iter().map(Track::summary).collect()
    }
}
