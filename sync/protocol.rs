//! Wire messages shared by Player and Controller.
//!
//! Everything here is serialized as camelCase JSON. Field names are part of
//! the contract with existing peers and must not be renamed.

use crate::error::SyncError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

/// Serializable projection of a song. Peers identify songs by `id` only.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SongSummary {
    pub id: String,
    pub title: String,
    pub artist: String,
    pub duration: f64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AudioState {
    pub is_playing: bool,
    pub current_time: f64,
    pub duration: f64,
    pub volume: f64,
    pub is_looping: bool,
    pub is_shuffle: bool,
}

impl Default for AudioState {
    fn default() -> Self {
        Self {
            is_playing: false,
            current_time: 0.0,
            duration: 0.0,
            volume: 1.0,
            is_looping: false,
            is_shuffle: false,
        }
    }
}

/// Settings piggybacked on the snapshot. Opaque to this crate: unknown keys
/// are kept and sent back out untouched.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub accent_color: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Player state as observed locally, before it is stamped for publishing.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackState {
    pub current_song_ref: Option<SongSummary>,
    pub cover_art_ref: Option<String>,
    pub audio_state: AudioState,
    pub playlist: Vec<SongSummary>,
    pub settings_subset: Settings,
}

/// Full-state broadcast. Always a replace, never a diff.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackSnapshot {
    #[serde(flatten)]
    pub state: PlaybackState,
    pub published_at: u64,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandKind {
    Play,
    Pause,
    TogglePlay,
    Next,
    Prev,
    Seek,
    SetVolume,
    SetLoop,
    SetShuffle,
    Reorder,
    PlaySong,
    Ping,
    #[serde(other)]
    Unknown,
}

/// A decoded command with its typed payload.
#[derive(Clone, Debug, PartialEq)]
pub enum Directive {
    Play,
    Pause,
    TogglePlay,
    Next,
    Prev,
    Seek(f64),
    SetVolume(f64),
    SetLoop(bool),
    SetShuffle(bool),
    Reorder { from: usize, to: usize },
    PlaySong(String),
    Ping,
}

#[derive(Serialize, Deserialize)]
struct SeekPayload {
    time: f64,
}

#[derive(Serialize, Deserialize)]
struct VolumePayload {
    volume: f64,
}

#[derive(Serialize, Deserialize)]
struct SwitchPayload {
    enabled: bool,
}

#[derive(Serialize, Deserialize)]
struct ReorderPayload {
    from: usize,
    to: usize,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaySongPayload {
    song_id: String,
}

impl Directive {
    pub fn kind(&self) -> CommandKind {
        match self {
            Directive::Play => CommandKind::Play,
            Directive::Pause => CommandKind::Pause,
            Directive::TogglePlay => CommandKind::TogglePlay,
            Directive::Next => CommandKind::Next,
            Directive::Prev => CommandKind::Prev,
            Directive::Seek(_) => CommandKind::Seek,
            Directive::SetVolume(_) => CommandKind::SetVolume,
            Directive::SetLoop(_) => CommandKind::SetLoop,
            Directive::SetShuffle(_) => CommandKind::SetShuffle,
            Directive::Reorder { .. } => CommandKind::Reorder,
            Directive::PlaySong(_) => CommandKind::PlaySong,
            Directive::Ping => CommandKind::Ping,
        }
    }

    fn payload(&self) -> Result<Value, SyncError> {
        let value = match self {
            Directive::Seek(time) => serde_json::to_value(SeekPayload { time: *time })?,
            Directive::SetVolume(volume) => serde_json::to_value(VolumePayload { volume: *volume })?,
            Directive::SetLoop(enabled) | Directive::SetShuffle(enabled) => {
                serde_json::to_value(SwitchPayload { enabled: *enabled })?
            }
            Directive::Reorder { from, to } => serde_json::to_value(ReorderPayload {
                from: *from,
                to: *to,
            })?,
            Directive::PlaySong(song_id) => serde_json::to_value(PlaySongPayload {
                song_id: song_id.clone(),
            })?,
            _ => Value::Null,
        };
        Ok(value)
    }
}

/// Controller to Player directive as it travels on the bus.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    pub kind: CommandKind,
    #[serde(default)]
    pub payload: Value,
    pub issued_at: u64,
}

fn parse_payload<T: for<'de> Deserialize<'de>>(kind: CommandKind, payload: &Value) -> Result<T, SyncError> {
    serde_json::from_value(payload.clone())
        .map_err(|e| SyncError::InvalidPayload(format!("{kind:?}: {e}")))
}

impl Command {
    pub fn new(directive: &Directive) -> Result<Self, SyncError> {
        Ok(Self {
            kind: directive.kind(),
            payload: directive.payload()?,
            issued_at: now_millis(),
        })
    }

    /// Decodes the kind-dependent payload. `Ok(None)` means the kind is not
    /// one this build understands.
    pub fn directive(&self) -> Result<Option<Directive>, SyncError> {
        let kind = self.kind;
        let directive = match kind {
            CommandKind::Play => Directive::Play,
            CommandKind::Pause => Directive::Pause,
            CommandKind::TogglePlay => Directive::TogglePlay,
            CommandKind::Next => Directive::Next,
            CommandKind::Prev => Directive::Prev,
            CommandKind::Seek => {
                Directive::Seek(parse_payload::<SeekPayload>(kind, &self.payload)?.time)
            }
            CommandKind::SetVolume => {
                Directive::SetVolume(parse_payload::<VolumePayload>(kind, &self.payload)?.volume)
            }
            CommandKind::SetLoop => {
                Directive::SetLoop(parse_payload::<SwitchPayload>(kind, &self.payload)?.enabled)
            }
            CommandKind::SetShuffle => {
                Directive::SetShuffle(parse_payload::<SwitchPayload>(kind, &self.payload)?.enabled)
            }
            CommandKind::Reorder => {
                let ReorderPayload { from, to } = parse_payload(kind, &self.payload)?;
                Directive::Reorder { from, to }
            }
            CommandKind::PlaySong => {
                Directive::PlaySong(parse_payload::<PlaySongPayload>(kind, &self.payload)?.song_id)
            }
            CommandKind::Ping => Directive::Ping,
            CommandKind::Unknown => return Ok(None),
        };
        Ok(Some(directive))
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Pong {
    pub responded_at: u64,
}

/// Everything that travels on the bus.
#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    StateUpdate(PlaybackSnapshot),
    RequestInit,
    Command(Command),
    Pong(Pong),
    /// A `type` this build does not know, whatever its payload.
    Unknown,
}

/// Envelope as read off the wire, before the payload is interpreted.
#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
}

impl Message {
    pub fn encode(&self) -> Result<String, SyncError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(raw: &str) -> Result<Self, SyncError> {
        let Envelope { kind, payload } = serde_json::from_str(raw)?;
        let message = match kind.as_str() {
            "STATE_UPDATE" => Message::StateUpdate(serde_json::from_value(payload)?),
            "REQUEST_INIT" => Message::RequestInit,
            "COMMAND" => Message::Command(serde_json::from_value(payload)?),
            "PONG" => Message::Pong(serde_json::from_value(payload)?),
            _ => Message::Unknown,
        };
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn snapshot_uses_camel_case_wire_names() {
        let snapshot = PlaybackSnapshot {
            state: PlaybackState {
                current_song_ref: Some(SongSummary {
                    id: "s1".into(),
                    title: "Intro".into(),
                    artist: "Band".into(),
                    duration: 180.0,
                }),
                cover_art_ref: Some("cover.jpg".into()),
                audio_state: AudioState {
                    is_playing: true,
                    current_time: 5.0,
                    ..AudioState::default()
                },
                playlist: Vec::new(),
                settings_subset: Settings::default(),
            },
            published_at: 42,
        };
        let value = serde_json::to_value(Message::StateUpdate(snapshot)).unwrap();
        assert_eq!(value["type"], "STATE_UPDATE");
        let payload = &value["payload"];
        assert_eq!(payload["currentSongRef"]["id"], "s1");
        assert_eq!(payload["coverArtRef"], "cover.jpg");
        assert_eq!(payload["audioState"]["isPlaying"], true);
        assert_eq!(payload["audioState"]["currentTime"], 5.0);
        assert_eq!(payload["audioState"]["isShuffle"], false);
        assert_eq!(payload["publishedAt"], 42);
        assert!(payload["settingsSubset"].is_object());
    }

    #[test]
    fn opaque_settings_survive_a_trip_over_the_wire() {
        let raw = json!({
            "type": "STATE_UPDATE",
            "payload": {
                "currentSongRef": null,
                "coverArtRef": null,
                "audioState": {
                    "isPlaying": false, "currentTime": 0.0, "duration": 0.0,
                    "volume": 0.5, "isLooping": true, "isShuffle": false
                },
                "playlist": [],
                "settingsSubset": { "accentColor": "#123456", "lyricsOffset": 250 },
                "publishedAt": 7
            }
        })
        .to_string();
        let message = Message::decode(&raw).unwrap();
        let Message::StateUpdate(snapshot) = &message else {
            panic!("expected a state update, got {message:?}");
        };
        assert_eq!(
            snapshot.state.settings_subset.accent_color.as_deref(),
            Some("#123456")
        );
        let back = serde_json::to_value(&message).unwrap();
        assert_eq!(back["payload"]["settingsSubset"]["lyricsOffset"], 250);
    }

    #[test]
    fn unknown_message_type_never_decodes_to_a_known_message() {
        let message = Message::decode(r#"{"type":"LYRICS_SYNC"}"#).unwrap();
        assert_eq!(message, Message::Unknown);

        let with_payload =
            Message::decode(r#"{"type":"LYRICS_SYNC","payload":{"line":3}}"#).unwrap();
        assert_eq!(with_payload, Message::Unknown);

        assert!(Message::decode(r#"{"payload":{}}"#).is_err());
        assert!(Message::decode(r#"{"type":"PONG","payload":{"late":true}}"#).is_err());
    }

    #[test]
    fn request_init_has_no_payload() {
        assert_eq!(
            Message::RequestInit.encode().unwrap(),
            r#"{"type":"REQUEST_INIT"}"#
        );
        assert_eq!(
            Message::decode(r#"{"type":"REQUEST_INIT"}"#).unwrap(),
            Message::RequestInit
        );
    }

    #[test]
    fn command_payloads_decode_per_kind() {
        let seek = Command::new(&Directive::Seek(42.0)).unwrap();
        let value = serde_json::to_value(&seek).unwrap();
        assert_eq!(value["kind"], "SEEK");
        assert_eq!(value["payload"]["time"], 42.0);
        assert_eq!(seek.directive().unwrap(), Some(Directive::Seek(42.0)));

        let play_song = Command::new(&Directive::PlaySong("abc".into())).unwrap();
        assert_eq!(serde_json::to_value(&play_song).unwrap()["payload"]["songId"], "abc");

        let volume = Command::new(&Directive::SetVolume(0.25)).unwrap();
        let value = serde_json::to_value(&volume).unwrap();
        assert_eq!(value["kind"], "SET_VOLUME");
        assert_eq!(value["payload"], json!({"volume": 0.25}));
        assert_eq!(volume.directive().unwrap(), Some(Directive::SetVolume(0.25)));

        let looping = Command::new(&Directive::SetLoop(true)).unwrap();
        let value = serde_json::to_value(&looping).unwrap();
        assert_eq!(value["kind"], "SET_LOOP");
        assert_eq!(value["payload"], json!({"enabled": true}));
        assert_eq!(looping.directive().unwrap(), Some(Directive::SetLoop(true)));

        let shuffle: Command = serde_json::from_value(json!({
            "kind": "SET_SHUFFLE", "payload": {"enabled": false}, "issuedAt": 1
        }))
        .unwrap();
        assert_eq!(shuffle.directive().unwrap(), Some(Directive::SetShuffle(false)));

        let reorder: Command = serde_json::from_value(json!({
            "kind": "REORDER", "payload": {"from": 3, "to": 0}, "issuedAt": 1
        }))
        .unwrap();
        assert_eq!(
            reorder.directive().unwrap(),
            Some(Directive::Reorder { from: 3, to: 0 })
        );
    }

    #[test]
    fn unknown_command_kind_is_not_an_error() {
        let command: Command = serde_json::from_value(json!({
            "kind": "SET_EQUALIZER", "payload": {"band": 2}, "issuedAt": 1
        }))
        .unwrap();
        assert_eq!(command.kind, CommandKind::Unknown);
        assert_eq!(command.directive().unwrap(), None);
    }

    #[test]
    fn malformed_payload_is_reported() {
        let command: Command = serde_json::from_value(json!({
            "kind": "SET_VOLUME", "payload": "loud", "issuedAt": 1
        }))
        .unwrap();
        assert!(matches!(
            command.directive(),
            Err(SyncError::InvalidPayload(_))
        ));
    }
}
