//! Command channel: Controller directives in, PONG replies out.

use crate::error::SyncError;
use crate::protocol::{now_millis, Command, Directive, Message, Pong};
use crate::transport::Transport;
use log::{debug, error, info, warn};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// The Player's playback engine as seen by the command channel.
///
/// `toggle_play` flips whatever the current state is, so a duplicated delivery
/// flips twice. `seek`, `set_volume` and the switches are absolute and
/// converge no matter how often they arrive. Implementations must keep that
/// distinction.
pub trait PlaybackControl {
    fn play(&mut self) -> Result<(), SyncError>;
    fn pause(&mut self) -> Result<(), SyncError>;
    fn toggle_play(&mut self) -> Result<(), SyncError>;
    fn next(&mut self) -> Result<(), SyncError>;
    fn prev(&mut self) -> Result<(), SyncError>;
    fn seek(&mut self, seconds: f64) -> Result<(), SyncError>;
    fn set_volume(&mut self, volume: f64) -> Result<(), SyncError>;
    fn set_loop(&mut self, enabled: bool) -> Result<(), SyncError>;
    fn set_shuffle(&mut self, enabled: bool) -> Result<(), SyncError>;
    fn reorder(&mut self, from: usize, to: usize) -> Result<(), SyncError>;
    /// `song_id` must be resolved against the Player's own playlist.
    fn play_song(&mut self, song_id: &str) -> Result<(), SyncError>;
}

fn apply<H: PlaybackControl + ?Sized>(handler: &mut H, directive: &Directive) -> Result<(), SyncError> {
    match directive {
        Directive::Play => handler.play(),
        Directive::Pause => handler.pause(),
        Directive::TogglePlay => handler.toggle_play(),
        Directive::Next => handler.next(),
        Directive::Prev => handler.prev(),
        Directive::Seek(seconds) => handler.seek(*seconds),
        Directive::SetVolume(volume) => handler.set_volume(*volume),
        Directive::SetLoop(enabled) => handler.set_loop(*enabled),
        Directive::SetShuffle(enabled) => handler.set_shuffle(*enabled),
        Directive::Reorder { from, to } => handler.reorder(*from, *to),
        Directive::PlaySong(song_id) => handler.play_song(song_id),
        // Answered by the dispatcher itself.
        Directive::Ping => Ok(()),
    }
}

/// Player-side dispatch table.
///
/// Each handler call runs inside a catch-and-log boundary: an `Err` or a
/// panic from one command is logged and the message loop carries on.
pub struct CommandDispatcher<H> {
    handler: H,
    transport: Arc<dyn Transport>,
}

impl<H: PlaybackControl> CommandDispatcher<H> {
    pub fn new(handler: H, transport: Arc<dyn Transport>) -> Self {
        Self { handler, transport }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn into_handler(self) -> H {
        self.handler
    }

    pub fn dispatch(&mut self, command: &Command) {
        let directive = match command.directive() {
            Ok(Some(directive)) => directive,
            Ok(None) => {
                debug!("Ignoring command of unknown kind");
                return;
            }
            Err(e) => {
                warn!("Dropping malformed command: {}", e);
                return;
            }
        };

        if directive == Directive::Ping {
            self.transport.publish(Message::Pong(Pong {
                responded_at: now_millis(),
            }));
            return;
        }

        info!("Applying {:?}", directive);
        let handler = &mut self.handler;
        match panic::catch_unwind(AssertUnwindSafe(|| apply(handler, &directive))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Command {:?} failed: {}", directive.kind(), e),
            Err(_) => error!("Handler for {:?} panicked", directive.kind()),
        }
    }
}

/// Controller-side sender. Fire-and-forget: no acknowledgement, no retry, no
/// way to withdraw a command once sent.
#[derive(Clone)]
pub struct CommandSender {
    transport: Arc<dyn Transport>,
}

impl CommandSender {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    pub fn send(&self, directive: &Directive) -> Result<Command, SyncError> {
        let command = Command::new(directive)?;
        self.transport.publish(Message::Command(command.clone()));
        Ok(command)
    }
}
