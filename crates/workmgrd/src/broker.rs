//! Broker connection lifecycle.
//!
//! A cycle talks to the broker through one connection and one channel. They
//! are acquired by [`with_connection`], handed to the cycle body, and released
//! channel first whatever the body returns. Failures while closing are
//! collected in a [`ReleaseReport`] and never replace the body's result.
//!
//! If the body never finishes, because its future is dropped or it panics,
//! the session is closed by a task spawned on the current runtime.

use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

use crate::publisher::Outcome;

/// Error type produced by broker implementations.
pub type BrokerError = Box<dyn std::error::Error + Send + Sync>;

/// Channel type opened by a broker's connections.
pub type ChannelOf<B> = <<B as Broker>::Connection as BrokerConnection>::Channel;

/// A message ready to be published to the default exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Message<'a> {
    /// Destination queue, used as the routing key.
    pub queue: &'a str,
    /// Encoded message body.
    pub body: &'a [u8],
    /// Ask the broker to keep the message across restarts.
    pub persistent: bool,
    /// Ask the broker to return the message if no queue receives it.
    pub mandatory: bool,
}

/// Entry point to a message broker.
pub trait Broker: Send + Sync {
    /// Connection type produced by [`Broker::connect`].
    type Connection: BrokerConnection + 'static;

    /// Open a new connection.
    fn connect(&self) -> impl Future<Output = Result<Self::Connection, BrokerError>> + Send;
}

/// An open broker connection.
pub trait BrokerConnection: Send + Sync {
    /// Channel type opened on this connection.
    type Channel: BrokerChannel + 'static;

    /// Open a channel on the connection.
    fn open_channel(&self) -> impl Future<Output = Result<Self::Channel, BrokerError>> + Send;

    /// Close the connection.
    fn close(&self) -> impl Future<Output = Result<(), BrokerError>> + Send;
}

/// An open channel on a broker connection.
pub trait BrokerChannel: Send + Sync {
    /// Declare `queue` as durable. Declaring an existing queue is a no-op.
    fn declare_durable_queue(
        &self,
        queue: &str,
    ) -> impl Future<Output = Result<(), BrokerError>> + Send;

    /// Publish `message` and wait for the broker's routing verdict.
    fn publish(
        &self,
        message: Message<'_>,
    ) -> impl Future<Output = Result<Outcome, BrokerError>> + Send;

    /// Close the channel.
    fn close(&self) -> impl Future<Output = Result<(), BrokerError>> + Send;
}

/// Failures establishing or using a broker connection.
///
/// All variants are treated alike by the publish loop: the cycle is abandoned
/// and retried after the usual delay.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The connection could not be opened.
    #[error("failed to connect to broker: {0}")]
    Connect(#[source] BrokerError),
    /// A channel could not be opened on the connection.
    #[error("failed to open channel: {0}")]
    Channel(#[source] BrokerError),
    /// The work queue could not be declared.
    #[error("failed to declare queue `{queue}`: {source}")]
    Declare {
        queue: String,
        #[source]
        source: BrokerError,
    },
    /// A message could not be published.
    #[error("failed to publish to queue `{queue}`: {source}")]
    Publish {
        queue: String,
        #[source]
        source: BrokerError,
    },
}

/// Failures suppressed while releasing a connection and its channel.
#[derive(Debug, Default)]
#[must_use = "release failures are only visible through the report"]
pub struct ReleaseReport {
    /// Error returned when closing the channel.
    pub channel: Option<BrokerError>,
    /// Error returned when closing the connection.
    pub connection: Option<BrokerError>,
}

impl ReleaseReport {
    /// Whether both resources closed without error.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.channel.is_none() && self.connection.is_none()
    }

    /// Record suppressed failures at debug level and discard them.
    pub fn log(self) {
        if let Some(e) = &self.channel {
            tracing::debug!(error = %e, "Ignoring channel close failure");
        }
        if let Some(e) = &self.connection {
            tracing::debug!(error = %e, "Ignoring connection close failure");
        }
    }
}

/// Close `channel`, then `connection`, collecting any failures.
pub async fn release<C: BrokerConnection>(channel: &C::Channel, connection: &C) -> ReleaseReport {
    let channel = channel.close().await.err();
    let connection = connection.close().await.err();
    ReleaseReport {
        channel,
        connection,
    }
}

/// Connect, open a channel and declare `work_queue` as durable.
///
/// Anything opened before a failing step is released before the error is
/// returned.
///
/// # Errors
///
/// Returns a [`ConnectionError`] naming the step that failed.
pub async fn acquire<B: Broker>(
    broker: &B,
    work_queue: &str,
) -> Result<(B::Connection, ChannelOf<B>), ConnectionError> {
    let connection = broker.connect().await.map_err(ConnectionError::Connect)?;
    let channel = match connection.open_channel().await {
        Ok(channel) => channel,
        Err(e) => {
            ReleaseReport {
                channel: None,
                connection: connection.close().await.err(),
            }
            .log();
            return Err(ConnectionError::Channel(e));
        }
    };
    if let Err(source) = channel.declare_durable_queue(work_queue).await {
        release(&channel, &connection).await.log();
        return Err(ConnectionError::Declare {
            queue: work_queue.to_owned(),
            source,
        });
    }
    tracing::debug!(queue = work_queue, "Broker session established");
    Ok((connection, channel))
}

/// An acquired connection and channel that are closed even if the owner
/// never gets to close them.
struct Session<C: BrokerConnection + 'static> {
    connection: Arc<C>,
    channel: Arc<C::Channel>,
    released: bool,
}

impl<C: BrokerConnection + 'static> Session<C> {
    fn new(connection: C, channel: C::Channel) -> Self {
        Self {
            connection: Arc::new(connection),
            channel: Arc::new(channel),
            released: false,
        }
    }

    async fn release(mut self) -> ReleaseReport {
        let report = release(&*self.channel, &*self.connection).await;
        self.released = true;
        report
    }
}

impl<C: BrokerConnection + 'static> Drop for Session<C> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let connection = Arc::clone(&self.connection);
        let channel = Arc::clone(&self.channel);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::debug!("Releasing abandoned broker session");
                handle.spawn(async move {
                    release(&*channel, &*connection).await.log();
                });
            }
            Err(_) => tracing::warn!("Broker session dropped outside a runtime"),
        }
    }
}

/// Run `body` with a freshly acquired channel and release it afterwards.
///
/// The channel and connection are closed after `body` completes, whether it
/// succeeded or failed. Close failures are logged and dropped. If the
/// returned future is dropped before `body` completes, or `body` panics, the
/// close runs on a spawned task instead.
///
/// # Errors
///
/// Returns the acquisition error converted into `E`, or the error returned by
/// `body`.
pub async fn with_connection<B, F, T, E>(broker: &B, work_queue: &str, body: F) -> Result<T, E>
where
    B: Broker,
    F: AsyncFnOnce(&ChannelOf<B>) -> Result<T, E>,
    E: From<ConnectionError>,
{
    let (connection, channel) = acquire(broker, work_queue).await?;
    let session = Session::new(connection, channel);
    let result = body(&*session.channel).await;
    session.release().await.log();
    result
}
