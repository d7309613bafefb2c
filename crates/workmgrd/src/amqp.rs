//! AMQP 0-9-1 broker backed by `lapin`.
//!
//! Messages go through the default exchange with the queue name as routing
//! key. Channels run in publisher-confirm mode so that a mandatory message
//! returned as unroutable is known before `publish` resolves.

use std::fmt;

use lapin::options::{BasicPublishOptions, ConfirmSelectOptions, QueueDeclareOptions};
use lapin::publisher_confirm::Confirmation;
use lapin::types::FieldTable;
use lapin::uri::AMQPUri;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use thiserror::Error;

use crate::broker::{Broker, BrokerChannel, BrokerConnection, BrokerError, Message};
use crate::publisher::Outcome;

/// AMQP `delivery-mode` marking a message persistent.
const DELIVERY_MODE_PERSISTENT: u8 = 2;
/// AMQP `delivery-mode` for messages the broker may keep in memory only.
const DELIVERY_MODE_TRANSIENT: u8 = 1;
/// Reply code sent when closing channels and connections normally.
const REPLY_SUCCESS: u16 = 200;
/// Default exchange, routing straight to the queue named by the routing key.
const DEFAULT_EXCHANGE: &str = "";

/// The connection string is not a valid AMQP URI.
#[derive(Debug, Error)]
#[error("invalid broker connection string: {0}")]
pub struct InvalidUri(String);

/// Broker reached through an AMQP URI.
#[derive(Clone)]
pub struct AmqpBroker {
    uri: AMQPUri,
}

impl AmqpBroker {
    /// Parse `connection_string` as an AMQP URI.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidUri`] when the string cannot be parsed.
    pub fn new(connection_string: &str) -> Result<Self, InvalidUri> {
        connection_string
            .parse::<AMQPUri>()
            .map(|uri| Self { uri })
            .map_err(InvalidUri)
    }

    /// Host, port and virtual host of the broker, without credentials.
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!(
            "{}:{}/{}",
            self.uri.authority.host, self.uri.authority.port, self.uri.vhost
        )
    }
}

impl fmt::Debug for AmqpBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AmqpBroker")
            .field("endpoint", &self.endpoint())
            .finish_non_exhaustive()
    }
}

impl Broker for AmqpBroker {
    type Connection = AmqpConnection;

    async fn connect(&self) -> Result<AmqpConnection, BrokerError> {
        let connection =
            Connection::connect_uri(self.uri.clone(), ConnectionProperties::default()).await?;
        Ok(AmqpConnection(connection))
    }
}

/// An open AMQP connection.
pub struct AmqpConnection(Connection);

impl BrokerConnection for AmqpConnection {
    type Channel = AmqpChannel;

    async fn open_channel(&self) -> Result<AmqpChannel, BrokerError> {
        let channel = self.0.create_channel().await?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;
        Ok(AmqpChannel(channel))
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.0.close(REPLY_SUCCESS, "Closing").await?;
        Ok(())
    }
}

/// An AMQP channel in publisher-confirm mode.
pub struct AmqpChannel(Channel);

impl BrokerChannel for AmqpChannel {
    async fn declare_durable_queue(&self, queue: &str) -> Result<(), BrokerError> {
        let options = QueueDeclareOptions {
            durable: true,
            ..QueueDeclareOptions::default()
        };
        self.0
            .queue_declare(queue, options, FieldTable::default())
            .await?;
        Ok(())
    }

    async fn publish(&self, message: Message<'_>) -> Result<Outcome, BrokerError> {
        let options = BasicPublishOptions {
            mandatory: message.mandatory,
            ..BasicPublishOptions::default()
        };
        let properties =
            BasicProperties::default().with_delivery_mode(delivery_mode(message.persistent));
        let confirmation = self
            .0
            .basic_publish(
                DEFAULT_EXCHANGE,
                message.queue,
                options,
                message.body,
                properties,
            )
            .await?
            .await?;
        Ok(outcome_of(&confirmation))
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.0.close(REPLY_SUCCESS, "Closing").await?;
        Ok(())
    }
}

fn delivery_mode(persistent: bool) -> u8 {
    if persistent {
        DELIVERY_MODE_PERSISTENT
    } else {
        DELIVERY_MODE_TRANSIENT
    }
}

/// An acknowledgement carrying a returned message means the broker could not
/// route it.
fn outcome_of(confirmation: &Confirmation) -> Outcome {
    match confirmation {
        Confirmation::Ack(None) | Confirmation::NotRequested => Outcome::Accepted,
        Confirmation::Ack(Some(_)) | Confirmation::Nack(_) => Outcome::Rejected,
    }
}
