//! Role-specific control loops tying the pieces to a transport.
//!
//! Each session owns one task. Every timer it uses (debounce deadline,
//! liveness tick) lives inside that task, so shutting the session down or
//! dropping its handle cancels them with it.

use crate::command::{CommandDispatcher, CommandSender, PlaybackControl};
use crate::config::{Role, SyncConfig};
use crate::error::SyncError;
use crate::liveness::{ConnectionStatus, LivenessMonitor};
use crate::protocol::{Directive, Message, PlaybackState};
use crate::publisher::StatePublisher;
use crate::subscriber::{ReadModel, StateSubscriber};
use crate::transport::{Subscription, Transport};
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{self, JoinHandle};
use tokio::time::{self, Instant, MissedTickBehavior};

/// Feeds locally observed Player state into a running `PlayerSession`.
/// Cheap to clone and never blocks.
#[derive(Clone, Debug)]
pub struct StateSink {
    sender: mpsc::UnboundedSender<PlaybackState>,
}

pub struct StateUpdates {
    receiver: mpsc::UnboundedReceiver<PlaybackState>,
}

impl StateSink {
    pub fn channel() -> (StateSink, StateUpdates) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (StateSink { sender }, StateUpdates { receiver })
    }

    pub fn push(&self, state: PlaybackState) {
        if self.sender.send(state).is_err() {
            debug!("Player session is gone, state update dropped");
        }
    }
}

fn expect_role(config: &SyncConfig, role: Role) -> Result<(), SyncError> {
    if config.role == role {
        Ok(())
    } else {
        Err(SyncError::RoleMismatch(format!(
            "configured as {:?}, started as {:?}",
            config.role, role
        )))
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Listens for another Player answering our own init request.
async fn probe_for_player(subscription: &mut Subscription, backlog: &mut Vec<Message>) -> bool {
    while let Some(message) = subscription.recv().await {
        if let Message::StateUpdate(_) = message {
            return true;
        }
        backlog.push(message);
    }
    false
}

struct PlayerLoop<H> {
    publisher: StatePublisher,
    dispatcher: CommandDispatcher<H>,
    subscription: Subscription,
    updates: StateUpdates,
}

impl<H: PlaybackControl> PlayerLoop<H> {
    fn on_message(&mut self, message: Message) {
        match message {
            Message::RequestInit => self.publisher.answer_init(),
            Message::Command(command) => self.dispatcher.dispatch(&command),
            Message::StateUpdate(_) => {
                error!("Another player is publishing state on this bus; only one player per bus is supported");
            }
            Message::Pong(_) | Message::Unknown => {}
        }
    }

    async fn run(mut self, mut shutdown: oneshot::Receiver<()>) -> H {
        loop {
            let deadline = self.publisher.deadline();
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                Some(state) = self.updates.receiver.recv() => self.publisher.update(state),
                message = self.subscription.recv() => match message {
                    Some(message) => self.on_message(message),
                    None => {
                        warn!("Bus closed, player session ending");
                        break;
                    }
                },
                () = sleep_until(deadline) => {
                    self.publisher.flush_due(Instant::now());
                }
            }
        }
        self.publisher.cancel();
        info!("Player session stopped");
        self.dispatcher.into_handler()
    }
}

/// Handle to the Player role: publishes state, answers init requests, and
/// dispatches incoming commands to `H`.
pub struct PlayerSession<H> {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<H>,
}

impl<H: PlaybackControl + Send + 'static> PlayerSession<H> {
    /// Attaches to the bus as the single Player.
    ///
    /// With a non-zero `conflict_probe_ms` the bus is first asked for state;
    /// if another Player answers within the probe window this fails with
    /// `PlayerAlreadyActive`. Requests and commands that arrive during the
    /// probe are handled once the session is up.
    pub async fn start(
        config: &SyncConfig,
        transport: Arc<dyn Transport>,
        handler: H,
        initial: PlaybackState,
        updates: StateUpdates,
    ) -> Result<Self, SyncError> {
        expect_role(config, Role::Player)?;
        let mut subscription = transport.subscribe();
        let mut backlog = Vec::new();

        if config.conflict_probe_ms > 0 {
            transport.publish(Message::RequestInit);
            let probe = probe_for_player(&mut subscription, &mut backlog);
            if let Ok(true) = time::timeout(config.conflict_probe(), probe).await {
                return Err(SyncError::PlayerAlreadyActive);
            }
        }

        let mut publisher = StatePublisher::new(Arc::clone(&transport), config.debounce(), PlaybackState::default());
        publisher.update(initial);
        let mut player = PlayerLoop {
            publisher,
            dispatcher: CommandDispatcher::new(handler, transport),
            subscription,
            updates,
        };
        for message in backlog {
            player.on_message(message);
        }

        let (shutdown, shutdown_receiver) = oneshot::channel();
        let task = task::spawn(player.run(shutdown_receiver));
        info!("Player session started");
        Ok(Self {
            shutdown: Some(shutdown),
            task,
        })
    }
}

impl<H> PlayerSession<H> {
    /// Stops the loop and hands the command handler back.
    pub async fn shutdown(mut self) -> Result<H, SyncError> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        Ok((&mut self.task).await?)
    }
}

impl<H> Drop for PlayerSession<H> {
    fn drop(&mut self) {
        if self.shutdown.is_some() {
            self.task.abort();
        }
    }
}

struct ControllerLoop {
    transport: Arc<dyn Transport>,
    subscriber: StateSubscriber,
    sender: CommandSender,
    liveness: LivenessMonitor,
    status: watch::Sender<ConnectionStatus>,
    subscription: Subscription,
    outgoing: mpsc::UnboundedReceiver<Directive>,
    epoch: Instant,
    tick: Duration,
}

impl ControllerLoop {
    fn now_ms(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn refresh_status(&self) {
        let status = self.liveness.status_at(self.now_ms());
        self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                debug!("Connection status {:?} -> {:?}", current, status);
                *current = status;
                true
            }
        });
    }

    fn issue(&mut self, directive: &Directive) {
        if *directive == Directive::Ping {
            let now = self.now_ms();
            self.liveness.record_ping(now);
        }
        if let Err(e) = self.sender.send(directive) {
            error!("Failed to send {:?}: {}", directive, e);
        }
        self.refresh_status();
    }

    fn on_message(&mut self, message: Message) {
        match message {
            Message::StateUpdate(snapshot) => {
                let now = self.now_ms();
                self.liveness.record_snapshot(now);
                self.subscriber.apply(snapshot);
                self.refresh_status();
            }
            Message::Pong(_) => {
                let now = self.now_ms();
                self.liveness.record_pong(now);
                self.refresh_status();
            }
            Message::RequestInit | Message::Command(_) | Message::Unknown => {}
        }
    }

    async fn run(mut self, mut shutdown: oneshot::Receiver<()>) {
        self.subscriber.request_init(self.transport.as_ref());
        let mut tick = time::interval(self.tick);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                Some(directive) = self.outgoing.recv() => self.issue(&directive),
                message = self.subscription.recv() => match message {
                    Some(message) => self.on_message(message),
                    None => {
                        warn!("Bus closed, controller session ending");
                        break;
                    }
                },
                _ = tick.tick() => self.refresh_status(),
            }
        }
        // Commands queued before shutdown still go out.
        while let Ok(directive) = self.outgoing.try_recv() {
            self.issue(&directive);
        }
        info!("Controller session stopped");
    }
}

/// Handle to the Controller role: mirrors the Player's state, tracks
/// liveness, and sends commands.
pub struct ControllerSession {
    outgoing: mpsc::UnboundedSender<Directive>,
    model: watch::Receiver<ReadModel>,
    status: watch::Receiver<ConnectionStatus>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ControllerSession {
    /// Attaches and immediately asks for the Player's state.
    pub fn start(config: &SyncConfig, transport: Arc<dyn Transport>) -> Result<Self, SyncError> {
        expect_role(config, Role::Controller)?;
        let subscription = transport.subscribe();
        let subscriber = StateSubscriber::new();
        let model = subscriber.watch();
        let (status_sender, status) = watch::channel(ConnectionStatus::Offline);
        let (outgoing, outgoing_receiver) = mpsc::unbounded_channel();

        let controller = ControllerLoop {
            sender: CommandSender::new(Arc::clone(&transport)),
            transport,
            subscriber,
            liveness: LivenessMonitor::new(config.stale_threshold_ms, config.pong_window_ms),
            status: status_sender,
            subscription,
            outgoing: outgoing_receiver,
            epoch: Instant::now(),
            tick: config.liveness_tick(),
        };

        let (shutdown, shutdown_receiver) = oneshot::channel();
        let task = task::spawn(controller.run(shutdown_receiver));
        info!("Controller session started");
        Ok(Self {
            outgoing,
            model,
            status,
            shutdown: Some(shutdown),
            task,
        })
    }

    pub fn send(&self, directive: Directive) -> Result<(), SyncError> {
        self.outgoing
            .send(directive)
            .map_err(|_| SyncError::SessionClosed)
    }

    pub fn ping(&self) -> Result<(), SyncError> {
        self.send(Directive::Ping)
    }

    pub fn state(&self) -> watch::Receiver<ReadModel> {
        self.model.clone()
    }

    pub fn current(&self) -> ReadModel {
        self.model.borrow().clone()
    }

    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Waits for the first snapshot. `None` if none arrived within `limit`.
    pub async fn wait_initialized(&self, limit: Duration) -> Option<ReadModel> {
        let mut model = self.model.clone();
        let ready = match time::timeout(limit, model.wait_for(ReadModel::is_initialized)).await {
            Ok(Ok(ready)) => Some(ready.clone()),
            _ => None,
        };
        ready
    }

    pub async fn shutdown(mut self) -> Result<(), SyncError> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        Ok((&mut self.task).await?)
    }
}

impl Drop for ControllerSession {
    fn drop(&mut self) {
        if self.shutdown.is_some() {
            self.task.abort();
        }
    }
}
