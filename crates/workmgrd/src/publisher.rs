//! Publishing of individual jobs.
//!
//! Each job is encoded with [`workmgr_lib::to_canonical_string`] and published
//! as a persistent, mandatory message on the work queue. The broker's routing
//! verdict is final: a returned job is logged and dropped.

use thiserror::Error;
use workmgr_lib::Job;

use crate::broker::{BrokerChannel, ConnectionError, Message};

/// Broker verdict for one published job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The message was routed to at least one queue.
    Accepted,
    /// The message was returned as unroutable.
    Rejected,
}

/// Errors raised while publishing a job.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The job could not be encoded.
    #[error("failed to encode job: {0}")]
    Encode(#[from] serde_json::Error),
    /// The channel failed while publishing.
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// Publish `job` to `work_queue` over `channel`.
///
/// Accepted jobs are logged at info level and returned jobs at error level,
/// both with the encoded body.
///
/// # Errors
///
/// Returns [`PublishError`] if encoding fails or the broker reports an error
/// other than a routing rejection.
pub async fn publish<C: BrokerChannel>(
    channel: &C,
    work_queue: &str,
    job: &Job,
) -> Result<Outcome, PublishError> {
    let body = job.to_canonical_string()?;
    let message = Message {
        queue: work_queue,
        body: body.as_bytes(),
        persistent: true,
        mandatory: true,
    };
    let outcome = channel
        .publish(message)
        .await
        .map_err(|source| ConnectionError::Publish {
            queue: work_queue.to_owned(),
            source,
        })?;
    match outcome {
        Outcome::Accepted => tracing::info!(queue = work_queue, body = %body, "Queued message"),
        Outcome::Rejected => tracing::error!(queue = work_queue, body = %body, "Returned message"),
    }
    Ok(outcome)
}
