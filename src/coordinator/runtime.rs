//! Endpoint Runtime
//!
//! Every endpoint lives inside one tokio task and is only ever touched from
//! there. Transports, the poll ticker and the UI all post into the same
//! unbounded queue, so events for one link are applied in delivery order and
//! nothing needs a lock.
//!
//! ```text
//!  transports ──EventSink──┐
//!  poll ticker ──PollTick──┼──▶ mpsc queue ──▶ endpoint task ──▶ watch<StatusSnapshot>
//!  EndpointHandle ─Request─┘                        │
//!                                                   └──────────▶ mpsc<AppEvent>
//! ```

use crate::coordinator::status::{EventReporter, StatusSurface};
use crate::domain::command::Command;
use crate::domain::errors::LinkError;
use crate::domain::models::{AppEvent, PeerIdentity, StatusSnapshot, TransportKind};
use crate::infrastructure::transport::{EventSink, TransportInput};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// One role's coordinator. All methods run on the endpoint's own task.
pub trait Endpoint: Send + 'static {
    fn name(&self) -> &str;

    /// Paired roles sample reachability on a fixed interval.
    fn poll_interval(&self) -> Option<Duration> {
        None
    }

    fn on_transport(&mut self, input: TransportInput);

    fn on_poll(&mut self) {}

    fn activate(&mut self);

    fn refresh(&mut self);

    fn request_authorization(&mut self) {}

    fn disconnect(&mut self) {}

    fn connect_to_peer(&mut self, _peer: &PeerIdentity) -> Result<(), LinkError> {
        Err(LinkError::TransportUnsupported(TransportKind::PeerToPeer))
    }

    fn send_command(&mut self, command: Command) -> Result<(), LinkError>;

    fn snapshot(&self) -> StatusSnapshot;

    /// Stop discovery, end sessions, cancel subscriptions.
    fn teardown(&mut self);
}

type Reply = oneshot::Sender<Result<(), LinkError>>;

#[derive(Debug)]
pub enum UserRequest {
    Activate,
    Refresh,
    RequestAuthorization,
    Disconnect,
    ConnectToPeer(PeerIdentity, Reply),
    SendCommand(Command, Reply),
}

#[derive(Debug)]
pub enum EndpointInput {
    Transport(TransportInput),
    PollTick,
    Request(UserRequest),
    Shutdown(oneshot::Sender<()>),
}

/// Applies one input. A shutdown request is handed back instead.
fn dispatch<E: Endpoint>(endpoint: &mut E, input: EndpointInput) -> Option<oneshot::Sender<()>> {
    match input {
        EndpointInput::Transport(input) => endpoint.on_transport(input),
        EndpointInput::PollTick => endpoint.on_poll(),
        EndpointInput::Request(request) => match request {
            UserRequest::Activate => endpoint.activate(),
            UserRequest::Refresh => endpoint.refresh(),
            UserRequest::RequestAuthorization => endpoint.request_authorization(),
            UserRequest::Disconnect => endpoint.disconnect(),
            UserRequest::ConnectToPeer(peer, reply) => {
                let _ = reply.send(endpoint.connect_to_peer(&peer));
            }
            UserRequest::SendCommand(command, reply) => {
                let _ = reply.send(endpoint.send_command(command));
            }
        },
        EndpointInput::Shutdown(ack) => return Some(ack),
    }
    None
}

async fn run<E: Endpoint>(
    mut endpoint: E,
    mut queue: mpsc::UnboundedReceiver<EndpointInput>,
    surface: StatusSurface,
    ticker: Option<JoinHandle<()>>,
) {
    info!("{} endpoint running", endpoint.name());

    while let Some(input) = queue.recv().await {
        let shutdown = dispatch(&mut endpoint, input);
        surface.publish(endpoint.snapshot());

        if let Some(ack) = shutdown {
            if let Some(ticker) = &ticker {
                ticker.abort();
            }
            // Nothing posted from here on reaches the endpoint.
            queue.close();
            endpoint.teardown();
            surface.publish(endpoint.snapshot());
            info!("{} endpoint torn down", endpoint.name());
            let _ = ack.send(());
            return;
        }
    }

    debug!("{} endpoint queue closed", endpoint.name());
    if let Some(ticker) = ticker {
        ticker.abort();
    }
    endpoint.teardown();
    surface.publish(endpoint.snapshot());
    info!("{} endpoint dropped by every handle; torn down", endpoint.name());
}

/// Holds only a weak sender, so the queue closes once every handle is gone.
async fn poll_ticker(every: Duration, queue: mpsc::WeakUnboundedSender<EndpointInput>) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let Some(queue) = queue.upgrade() else {
            break;
        };
        if queue.send(EndpointInput::PollTick).is_err() {
            break;
        }
    }
}

/// Builds an endpoint around a fresh queue and starts its task.
///
/// `build` receives the sink transports should post into and the reporter
/// for alerts. Must be called from within a tokio runtime.
///
/// Only [`EndpointHandle`]s keep the queue open. Transports and the ticker
/// hold weak senders, so dropping the last handle tears the endpoint down.
pub fn spawn<E, F>(build: F) -> (EndpointHandle, mpsc::UnboundedReceiver<AppEvent>)
where
    E: Endpoint,
    F: FnOnce(EventSink, EventReporter) -> E,
{
    let (queue_tx, queue_rx) = mpsc::unbounded_channel();
    let sink_tx = queue_tx.downgrade();
    let sink = EventSink::new(move |input| {
        sink_tx
            .upgrade()
            .is_some_and(|tx| tx.send(EndpointInput::Transport(input)).is_ok())
    });
    let (reporter, events) = EventReporter::channel();

    let endpoint = build(sink, reporter);
    let (surface, status) = StatusSurface::new(endpoint.snapshot());
    let ticker = endpoint
        .poll_interval()
        .map(|every| tokio::spawn(poll_ticker(every, queue_tx.downgrade())));
    tokio::spawn(run(endpoint, queue_rx, surface, ticker));

    (
        EndpointHandle {
            queue: queue_tx,
            status,
        },
        events,
    )
}

/// Cloneable front door used by the UI layer.
#[derive(Clone)]
pub struct EndpointHandle {
    queue: mpsc::UnboundedSender<EndpointInput>,
    status: watch::Receiver<StatusSnapshot>,
}

impl EndpointHandle {
    fn post(&self, request: UserRequest) -> bool {
        self.queue.send(EndpointInput::Request(request)).is_ok()
    }

    pub fn activate(&self) -> bool {
        self.post(UserRequest::Activate)
    }

    pub fn refresh(&self) -> bool {
        self.post(UserRequest::Refresh)
    }

    pub fn request_authorization(&self) -> bool {
        self.post(UserRequest::RequestAuthorization)
    }

    pub fn disconnect(&self) -> bool {
        self.post(UserRequest::Disconnect)
    }

    pub async fn connect_to_peer(&self, peer: PeerIdentity) -> Result<(), LinkError> {
        let (reply, answer) = oneshot::channel();
        self.post(UserRequest::ConnectToPeer(peer, reply));
        answer.await.unwrap_or_else(|_| Err(shut_down()))
    }

    pub async fn send_command(&self, command: Command) -> Result<(), LinkError> {
        let (reply, answer) = oneshot::channel();
        self.post(UserRequest::SendCommand(command, reply));
        answer.await.unwrap_or_else(|_| Err(shut_down()))
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> StatusSnapshot {
        self.status.borrow().clone()
    }

    pub fn status(&self) -> watch::Receiver<StatusSnapshot> {
        self.status.clone()
    }

    /// Waits until a published snapshot satisfies `pred`, or `timeout` passes.
    pub async fn wait_for<P>(&self, timeout: Duration, pred: P) -> Option<StatusSnapshot>
    where
        P: FnMut(&StatusSnapshot) -> bool,
    {
        let mut status = self.status.clone();
        let found = match tokio::time::timeout(timeout, status.wait_for(pred)).await {
            Ok(Ok(snapshot)) => Some(snapshot.clone()),
            _ => None,
        };
        found
    }

    /// Tears the endpoint down and waits until it is gone. Idempotent.
    pub async fn shutdown(&self) {
        let (ack, done) = oneshot::channel();
        if self.queue.send(EndpointInput::Shutdown(ack)).is_ok() {
            let _ = done.await;
        }
    }
}

fn shut_down() -> LinkError {
    LinkError::SendFailed("endpoint shut down".to_string())
}
