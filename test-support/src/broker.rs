//! In-memory broker double.
//!
//! `FakeBroker` records every lifecycle call and keeps per-queue message
//! lists that survive across connections, like a real broker would. Failures
//! can be scripted per step.

use std::collections::BTreeMap;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use workmgrd::broker::{Broker, BrokerChannel, BrokerConnection, BrokerError, Message};
use workmgrd::publisher::Outcome;

/// A call observed by the fake broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerEvent {
    /// A connection was opened.
    Connected,
    /// A channel was opened.
    ChannelOpened,
    /// A queue was declared.
    QueueDeclared { queue: String, durable: bool },
    /// A message was published, whether or not it was routed.
    Published(PublishedMessage),
    /// A channel close was requested.
    ChannelClosed,
    /// A connection close was requested.
    ConnectionClosed,
}

/// A message as seen by the fake broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    /// Routing key.
    pub queue: String,
    /// Body decoded as UTF-8.
    pub body: String,
    /// Persistent delivery requested.
    pub persistent: bool,
    /// Mandatory routing requested.
    pub mandatory: bool,
}

#[derive(Debug, Default)]
struct State {
    events: Vec<BrokerEvent>,
    queues: BTreeMap<String, Vec<PublishedMessage>>,
    refuse_connections: usize,
    refuse_channels: usize,
    refuse_declares: usize,
    fail_publish_at: Option<usize>,
    publish_attempts: usize,
    unroutable: bool,
    fail_channel_close: bool,
    fail_connection_close: bool,
}

fn refused(what: &str) -> BrokerError {
    Box::new(io::Error::new(
        io::ErrorKind::ConnectionRefused,
        format!("{what} refused by fake broker"),
    ))
}

/// Scriptable in-memory broker.
#[derive(Debug, Clone, Default)]
pub struct FakeBroker {
    state: Arc<Mutex<State>>,
}

impl FakeBroker {
    /// A broker that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse the next `n` connection attempts.
    #[must_use]
    pub fn refuse_connections(self, n: usize) -> Self {
        self.lock().refuse_connections = n;
        self
    }

    /// Refuse the next `n` channel openings.
    #[must_use]
    pub fn refuse_channels(self, n: usize) -> Self {
        self.lock().refuse_channels = n;
        self
    }

    /// Refuse the next `n` queue declarations.
    #[must_use]
    pub fn refuse_declares(self, n: usize) -> Self {
        self.lock().refuse_declares = n;
        self
    }

    /// Fail the publish attempt with zero-based index `attempt`, counted over
    /// the broker's lifetime.
    #[must_use]
    pub fn fail_publish_at(self, attempt: usize) -> Self {
        self.lock().fail_publish_at = Some(attempt);
        self
    }

    /// Return every mandatory message as unroutable.
    #[must_use]
    pub fn unroutable(self) -> Self {
        self.lock().unroutable = true;
        self
    }

    /// Make channel closes report an error.
    #[must_use]
    pub fn fail_channel_close(self) -> Self {
        self.lock().fail_channel_close = true;
        self
    }

    /// Make connection closes report an error.
    #[must_use]
    pub fn fail_connection_close(self) -> Self {
        self.lock().fail_connection_close = true;
        self
    }

    /// Every call observed so far, in order.
    #[must_use]
    pub fn events(&self) -> Vec<BrokerEvent> {
        self.lock().events.clone()
    }

    /// Messages routed to `queue`, in arrival order.
    #[must_use]
    pub fn messages(&self, queue: &str) -> Vec<PublishedMessage> {
        self.lock().queues.get(queue).cloned().unwrap_or_default()
    }

    /// Bodies of the messages routed to `queue`.
    #[must_use]
    pub fn bodies(&self, queue: &str) -> Vec<String> {
        self.messages(queue).into_iter().map(|m| m.body).collect()
    }

    /// Connections opened and not yet closed.
    #[must_use]
    pub fn open_connections(&self) -> usize {
        let state = self.lock();
        let opened = state
            .events
            .iter()
            .filter(|e| matches!(e, BrokerEvent::Connected))
            .count();
        let closed = state
            .events
            .iter()
            .filter(|e| matches!(e, BrokerEvent::ConnectionClosed))
            .count();
        opened.saturating_sub(closed)
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        lock(&self.state)
    }
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Connection handed out by [`FakeBroker`].
#[derive(Debug)]
pub struct FakeConnection {
    state: Arc<Mutex<State>>,
}

/// Channel handed out by [`FakeConnection`].
#[derive(Debug)]
pub struct FakeChannel {
    state: Arc<Mutex<State>>,
}

impl Broker for FakeBroker {
    type Connection = FakeConnection;

    async fn connect(&self) -> Result<FakeConnection, BrokerError> {
        let mut state = self.lock();
        if state.refuse_connections > 0 {
            state.refuse_connections -= 1;
            return Err(refused("connection"));
        }
        state.events.push(BrokerEvent::Connected);
        Ok(FakeConnection {
            state: Arc::clone(&self.state),
        })
    }
}

impl BrokerConnection for FakeConnection {
    type Channel = FakeChannel;

    async fn open_channel(&self) -> Result<FakeChannel, BrokerError> {
        let mut state = lock(&self.state);
        if state.refuse_channels > 0 {
            state.refuse_channels -= 1;
            return Err(refused("channel"));
        }
        state.events.push(BrokerEvent::ChannelOpened);
        Ok(FakeChannel {
            state: Arc::clone(&self.state),
        })
    }

    async fn close(&self) -> Result<(), BrokerError> {
        let mut state = lock(&self.state);
        state.events.push(BrokerEvent::ConnectionClosed);
        if state.fail_connection_close {
            return Err(Box::new(io::Error::new(
                io::ErrorKind::NotConnected,
                "connection already closed",
            )));
        }
        Ok(())
    }
}

impl BrokerChannel for FakeChannel {
    async fn declare_durable_queue(&self, queue: &str) -> Result<(), BrokerError> {
        let mut state = lock(&self.state);
        if state.refuse_declares > 0 {
            state.refuse_declares -= 1;
            return Err(refused("queue declaration"));
        }
        state.events.push(BrokerEvent::QueueDeclared {
            queue: queue.to_owned(),
            durable: true,
        });
        state.queues.entry(queue.to_owned()).or_default();
        Ok(())
    }

    async fn publish(&self, message: Message<'_>) -> Result<Outcome, BrokerError> {
        let mut state = lock(&self.state);
        let attempt = state.publish_attempts;
        state.publish_attempts += 1;
        if state.fail_publish_at == Some(attempt) {
            return Err(Box::new(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "channel closed by fake broker",
            )));
        }

        let record = PublishedMessage {
            queue: message.queue.to_owned(),
            body: String::from_utf8_lossy(message.body).into_owned(),
            persistent: message.persistent,
            mandatory: message.mandatory,
        };
        state.events.push(BrokerEvent::Published(record.clone()));
        let routable = !state.unroutable;
        match state.queues.get_mut(message.queue) {
            Some(queue) if routable => {
                queue.push(record);
                Ok(Outcome::Accepted)
            }
            _ if message.mandatory => Ok(Outcome::Rejected),
            _ => Ok(Outcome::Accepted),
        }
    }

    async fn close(&self) -> Result<(), BrokerError> {
        let mut state = lock(&self.state);
        state.events.push(BrokerEvent::ChannelClosed);
        if state.fail_channel_close {
            return Err(Box::new(io::Error::new(
                io::ErrorKind::NotConnected,
                "channel already closed",
            )));
        }
        Ok(())
    }
}
