use super::{Delivery, Subscription, Transport};
use crate::error::SyncError;
use crate::protocol::Message;
use futures_util::stream::StreamExt;
use log::{debug, error, info, warn};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::{self, JoinHandle};
use zbus::message::Type as MessageType;
use zbus::{interface, Connection, ConnectionBuilder, MatchRule, MessageStream, SignalContext};

pub const BUS_INTERFACE: &str = "org.tandem.Bus";
pub const BUS_PATH: &str = "/org/tandem/Bus";

const INBOUND_CAPACITY: usize = 256;
// Every signal reaching this endpoint comes from some other connection.
const REMOTE_ORIGIN: u64 = 0;

pub struct BusEndpoint;

#[interface(name = "org.tandem.Bus")]
impl BusEndpoint {
    #[zbus(signal)]
    async fn message(ctxt: &SignalContext<'_>, payload: &str) -> zbus::Result<()>;
}

enum Outbound {
    Publish(Message),
    Flush(oneshot::Sender<()>),
}

/// Session-bus endpoint. Messages travel as JSON in the `Message` signal of
/// `org.tandem.Bus`.
pub struct DbusTransport {
    outbound: mpsc::UnboundedSender<Outbound>,
    inbound: broadcast::Sender<Delivery>,
    tasks: Vec<JoinHandle<()>>,
}

impl DbusTransport {
    pub async fn connect() -> Result<Self, SyncError> {
        let connection = ConnectionBuilder::session()?
            .serve_at(BUS_PATH, BusEndpoint)?
            .build()
            .await?;
        Self::with_connection(connection).await
    }

    pub async fn with_connection(connection: Connection) -> Result<Self, SyncError> {
        let own_name = connection
            .unique_name()
            .map(ToString::to_string)
            .ok_or_else(|| SyncError::Transport("Connection has no unique name".to_string()))?;

        let rule = MatchRule::builder()
            .msg_type(MessageType::Signal)
            .interface(BUS_INTERFACE)?
            .member("Message")?
            .path(BUS_PATH)?
            .build();
        let stream = MessageStream::for_match_rule(rule, &connection, Some(INBOUND_CAPACITY)).await?;
        let ctxt = SignalContext::new(&connection, BUS_PATH)?;

        let (outbound, outbound_receiver) = mpsc::unbounded_channel();
        let (inbound, _) = broadcast::channel(INBOUND_CAPACITY);

        let tasks = vec![
            task::spawn(emit_outbound(ctxt, outbound_receiver)),
            task::spawn(forward_inbound(stream, own_name.clone(), inbound.clone())),
        ];
        info!("Attached to session bus as {}", own_name);

        Ok(Self {
            outbound,
            inbound,
            tasks,
        })
    }

    /// Resolves once every message published so far has been handed to the bus.
    pub async fn flush(&self) -> Result<(), SyncError> {
        let (done, wait) = oneshot::channel();
        self.outbound.send(Outbound::Flush(done))?;
        wait.await
            .map_err(|e| SyncError::Transport(format!("Outbound task gone: {e}")))
    }
}

impl Transport for DbusTransport {
    fn publish(&self, message: Message) {
        if self.outbound.send(Outbound::Publish(message)).is_err() {
            error!("Bus outbound task has stopped, message dropped");
        }
    }

    fn subscribe(&self) -> Subscription {
        Subscription::new(self.inbound.subscribe(), None)
    }
}

impl Drop for DbusTransport {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn emit_outbound(
    ctxt: SignalContext<'static>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    while let Some(item) = outbound.recv().await {
        match item {
            Outbound::Publish(message) => {
                let payload = match message.encode() {
                    Ok(payload) => payload,
                    Err(e) => {
                        error!("Failed to encode bus message: {}", e);
                        continue;
                    }
                };
                if let Err(e) = BusEndpoint::message(&ctxt, &payload).await {
                    error!("Failed to emit bus message: {}", e);
                }
            }
            Outbound::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

async fn forward_inbound(
    mut stream: MessageStream,
    own_name: String,
    inbound: broadcast::Sender<Delivery>,
) {
    while let Some(next) = stream.next().await {
        let msg = match next {
            Ok(msg) => msg,
            Err(e) => {
                warn!("Error reading from session bus: {}", e);
                continue;
            }
        };
        let header = msg.header();
        if header
            .sender()
            .is_some_and(|sender| sender.as_str() == own_name)
        {
            continue;
        }
        let body = msg.body();
        let payload: String = match body.deserialize() {
            Ok(payload) => payload,
            Err(e) => {
                debug!("Ignoring bus signal with unexpected body: {}", e);
                continue;
            }
        };
        match Message::decode(&payload) {
            Ok(message) => {
                let _ = inbound.send(Delivery {
                    origin: REMOTE_ORIGIN,
                    message,
                });
            }
            Err(e) => debug!("Ignoring malformed bus message: {}", e),
        }
    }
    info!("Session bus stream ended");
}
