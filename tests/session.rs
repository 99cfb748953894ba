use std::sync::{Arc, Mutex};
use std::time::Duration;
use tandem::protocol::AudioState;
use tandem::transport::Transport;
use tandem::{
    ConnectionStatus, ControllerSession, Directive, LocalBus, Message, PlaybackControl,
    PlaybackState, PlayerSession, ReadModel, Role, SongSummary, StateSink, SyncConfig, SyncError,
};
use tokio::time::{advance, sleep, timeout, Instant};

#[derive(Clone)]
struct FakeDeck {
    state: Arc<Mutex<PlaybackState>>,
    applied: Arc<Mutex<Vec<Directive>>>,
    sink: StateSink,
}

impl FakeDeck {
    fn new(sink: StateSink) -> Self {
        let playlist = ["a", "b", "c"]
            .iter()
            .map(|id| SongSummary {
                id: (*id).to_string(),
                title: format!("Song {id}"),
                artist: "Tester".to_string(),
                duration: 120.0,
            })
            .collect();
        Self {
            state: Arc::new(Mutex::new(PlaybackState {
                playlist,
                ..PlaybackState::default()
            })),
            applied: Arc::new(Mutex::new(Vec::new())),
            sink,
        }
    }

    fn audio(&self) -> AudioState {
        self.state.lock().unwrap().audio_state.clone()
    }

    fn applied(&self) -> usize {
        self.applied.lock().unwrap().len()
    }

    fn change(&mut self, directive: Directive, edit: impl FnOnce(&mut PlaybackState)) -> Result<(), SyncError> {
        let snapshot = {
            let mut state = self.state.lock().unwrap();
            edit(&mut state);
            state.clone()
        };
        self.applied.lock().unwrap().push(directive);
        self.sink.push(snapshot);
        Ok(())
    }
}

impl PlaybackControl for FakeDeck {
    fn play(&mut self) -> Result<(), SyncError> {
        self.change(Directive::Play, |s| s.audio_state.is_playing = true)
    }
    fn pause(&mut self) -> Result<(), SyncError> {
        self.change(Directive::Pause, |s| s.audio_state.is_playing = false)
    }
    fn toggle_play(&mut self) -> Result<(), SyncError> {
        self.change(Directive::TogglePlay, |s| {
            s.audio_state.is_playing = !s.audio_state.is_playing;
        })
    }
    fn next(&mut self) -> Result<(), SyncError> {
        self.change(Directive::Next, |_| {})
    }
    fn prev(&mut self) -> Result<(), SyncError> {
        self.change(Directive::Prev, |_| {})
    }
    fn seek(&mut self, seconds: f64) -> Result<(), SyncError> {
        self.change(Directive::Seek(seconds), |s| s.audio_state.current_time = seconds)
    }
    fn set_volume(&mut self, volume: f64) -> Result<(), SyncError> {
        self.change(Directive::SetVolume(volume), |s| s.audio_state.volume = volume)
    }
    fn set_loop(&mut self, enabled: bool) -> Result<(), SyncError> {
        self.change(Directive::SetLoop(enabled), |s| s.audio_state.is_looping = enabled)
    }
    fn set_shuffle(&mut self, enabled: bool) -> Result<(), SyncError> {
        self.change(Directive::SetShuffle(enabled), |s| s.audio_state.is_shuffle = enabled)
    }
    fn reorder(&mut self, from: usize, to: usize) -> Result<(), SyncError> {
        self.change(Directive::Reorder { from, to }, |s| {
            let song = s.playlist.remove(from);
            s.playlist.insert(to, song);
        })
    }
    fn play_song(&mut self, song_id: &str) -> Result<(), SyncError> {
        let song = self
            .state
            .lock()
            .unwrap()
            .playlist
            .iter()
            .find(|song| song.id == song_id)
            .cloned()
            .ok_or_else(|| SyncError::Engine(format!("no song {song_id}")))?;
        self.change(Directive::PlaySong(song_id.to_string()), |s| {
            s.current_song_ref = Some(song);
            s.audio_state.is_playing = true;
        })
    }
}

fn player_config() -> SyncConfig {
    SyncConfig::default()
}

fn controller_config() -> SyncConfig {
    SyncConfig::default().with_role(Role::Controller)
}

async fn start_player(bus: &LocalBus) -> (PlayerSession<FakeDeck>, FakeDeck) {
    let (sink, updates) = StateSink::channel();
    let deck = FakeDeck::new(sink);
    let initial = deck.state.lock().unwrap().clone();
    let session = PlayerSession::start(
        &player_config(),
        Arc::new(bus.connect()),
        deck.clone(),
        initial,
        updates,
    )
    .await
    .unwrap();
    (session, deck)
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

fn current_time(model: &ReadModel) -> Option<f64> {
    model.snapshot().map(|s| s.state.audio_state.current_time)
}

#[tokio::test(start_paused = true)]
async fn late_controller_gets_state_before_the_next_flush() {
    let bus = LocalBus::default();
    let (player, deck) = start_player(&bus).await;
    sleep(Duration::from_millis(200)).await;

    let t0 = Instant::now();
    let mut state = deck.state.lock().unwrap().clone();
    state.audio_state.current_time = 5.0;
    deck.sink.push(state);
    tokio::task::yield_now().await;
    advance(Duration::from_millis(10)).await;

    let controller = ControllerSession::start(&controller_config(), Arc::new(bus.connect())).unwrap();
    let model = controller
        .wait_initialized(Duration::from_millis(80))
        .await
        .expect("init request was not answered immediately");

    assert!(t0.elapsed() < Duration::from_millis(100));
    assert_eq!(current_time(&model), Some(5.0));

    controller.shutdown().await.unwrap();
    player.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn toggle_is_not_idempotent_but_seek_is() {
    let bus = LocalBus::default();
    let (player, deck) = start_player(&bus).await;
    let controller = ControllerSession::start(&controller_config(), Arc::new(bus.connect())).unwrap();
    controller.wait_initialized(Duration::from_secs(1)).await.unwrap();

    controller.send(Directive::TogglePlay).unwrap();
    controller.send(Directive::TogglePlay).unwrap();
    controller.send(Directive::Seek(42.0)).unwrap();
    controller.send(Directive::Seek(42.0)).unwrap();
    eventually(|| deck.applied() == 4).await;

    let audio = deck.audio();
    assert!(!audio.is_playing);
    assert!((audio.current_time - 42.0).abs() < f64::EPSILON);

    let mut state = controller.state();
    timeout(
        Duration::from_secs(1),
        state.wait_for(|model| current_time(model) == Some(42.0)),
    )
    .await
    .unwrap()
    .unwrap();

    controller.shutdown().await.unwrap();
    player.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn play_song_by_identifier_reaches_the_mirror() {
    let bus = LocalBus::default();
    let (player, _deck) = start_player(&bus).await;
    let controller = ControllerSession::start(&controller_config(), Arc::new(bus.connect())).unwrap();
    controller.wait_initialized(Duration::from_secs(1)).await.unwrap();

    controller.send(Directive::Reorder { from: 2, to: 0 }).unwrap();
    controller.send(Directive::PlaySong("b".to_string())).unwrap();

    let mut state = controller.state();
    let model = timeout(
        Duration::from_secs(1),
        state.wait_for(|model| {
            model
                .snapshot()
                .and_then(|s| s.state.current_song_ref.as_ref())
                .is_some_and(|song| song.id == "b")
        }),
    )
    .await
    .unwrap()
    .unwrap()
    .clone();

    let order: Vec<_> = model
        .snapshot()
        .unwrap()
        .state
        .playlist
        .iter()
        .map(|song| song.id.clone())
        .collect();
    assert_eq!(order, vec!["c", "a", "b"]);

    controller.shutdown().await.unwrap();
    player.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn ping_round_trip_marks_the_player_connected() {
    let bus = LocalBus::default();
    let (player, deck) = start_player(&bus).await;
    let controller = ControllerSession::start(&controller_config(), Arc::new(bus.connect())).unwrap();
    controller.wait_initialized(Duration::from_secs(1)).await.unwrap();

    controller.ping().unwrap();
    let mut status = controller.status();
    timeout(
        Duration::from_secs(1),
        status.wait_for(|s| *s == ConnectionStatus::Connected),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(deck.applied(), 0);

    controller.shutdown().await.unwrap();
    player.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn silent_player_degrades_to_offline() {
    let bus = LocalBus::default();
    let (player, _deck) = start_player(&bus).await;
    let controller = ControllerSession::start(&controller_config(), Arc::new(bus.connect())).unwrap();
    controller.wait_initialized(Duration::from_secs(1)).await.unwrap();

    let mut status = controller.status();
    timeout(
        Duration::from_secs(2),
        status.wait_for(|s| *s == ConnectionStatus::Online),
    )
    .await
    .unwrap()
    .unwrap();

    player.shutdown().await.unwrap();
    let went_offline = Instant::now();
    timeout(
        Duration::from_secs(15),
        status.wait_for(|s| *s == ConnectionStatus::Offline),
    )
    .await
    .unwrap()
    .unwrap();
    assert!(went_offline.elapsed() >= Duration::from_secs(10));
    assert!(controller.current().is_initialized());

    controller.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn controller_without_player_stays_uninitialized_until_one_publishes() {
    let bus = LocalBus::default();
    let controller = ControllerSession::start(&controller_config(), Arc::new(bus.connect())).unwrap();

    assert!(controller.wait_initialized(Duration::from_secs(5)).await.is_none());
    assert_eq!(controller.current(), ReadModel::Uninitialized);
    assert_eq!(*controller.status().borrow(), ConnectionStatus::Offline);

    let (player, _deck) = start_player(&bus).await;
    assert!(controller.wait_initialized(Duration::from_secs(1)).await.is_some());

    controller.shutdown().await.unwrap();
    player.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn second_player_is_refused() {
    let bus = LocalBus::default();
    let (first, _deck) = start_player(&bus).await;

    let (sink, updates) = StateSink::channel();
    let second = PlayerSession::start(
        &player_config(),
        Arc::new(bus.connect()),
        FakeDeck::new(sink),
        PlaybackState::default(),
        updates,
    )
    .await;
    assert!(matches!(second, Err(SyncError::PlayerAlreadyActive)));

    first.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn role_is_checked_at_start() {
    let bus = LocalBus::default();
    let (sink, updates) = StateSink::channel();
    let result = PlayerSession::start(
        &controller_config(),
        Arc::new(bus.connect()),
        FakeDeck::new(sink),
        PlaybackState::default(),
        updates,
    )
    .await;
    assert!(matches!(result, Err(SyncError::RoleMismatch(_))));
    assert!(matches!(
        ControllerSession::start(&player_config(), Arc::new(bus.connect())),
        Err(SyncError::RoleMismatch(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn teardown_cancels_the_pending_broadcast() {
    let bus = LocalBus::default();
    let (player, deck) = start_player(&bus).await;
    let mut listener = bus.connect().subscribe();

    let returned = player.shutdown().await.unwrap();
    assert_eq!(returned.applied(), deck.applied());
    assert!(timeout(Duration::from_secs(1), listener.recv()).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn commands_from_unknown_future_kinds_are_ignored_end_to_end() {
    let bus = LocalBus::default();
    let (player, deck) = start_player(&bus).await;
    let raw = bus.connect();

    let future_command = Message::decode(
        r#"{"type":"COMMAND","payload":{"kind":"SET_EQUALIZER","payload":{"band":1},"issuedAt":1}}"#,
    )
    .unwrap();
    raw.publish(future_command);
    raw.publish(Message::decode(r#"{"type":"COMMAND","payload":{"kind":"PLAY","payload":null,"issuedAt":2}}"#).unwrap());

    eventually(|| deck.applied() == 1).await;
    assert!(deck.audio().is_playing);

    player.shutdown().await.unwrap();
}
