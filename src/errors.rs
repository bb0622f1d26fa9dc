// Copyright (c) 2025, The Newsroom Authors
// MIT License
// All rights reserved.

//! # Error Types
//!
//! Transport errors (`AmqpError`) are raised synchronously to the direct
//! caller, the dispatcher or the loop. The dispatcher folds everything it sees
//! into `DispatchError`, whose [`is_recoverable`](DispatchError::is_recoverable)
//! flag is the only thing the loop inspects: recoverable failures trigger
//! backoff and reconnect, the rest stop the loop after notifying the operator.

use crate::events::ChannelMode;
use thiserror::Error;

/// Errors raised by the broker transport: connections, channels, declarations
/// and the acknowledgement operations.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AmqpError {
    /// Error establishing a connection to the broker
    #[error("failure to connect")]
    ConnectionError,

    /// Error creating a channel from an established connection
    #[error("failure to create a channel")]
    ChannelError,

    /// Operation attempted on a closed connection
    #[error("connection is closed")]
    ConnectionClosed,

    /// Operation attempted on a closed channel
    #[error("channel is closed")]
    ChannelClosed,

    /// Operation outside the channel's declared capability mode
    #[error("a {mode} channel is prohibited to {operation}")]
    OperationProhibited {
        mode: ChannelMode,
        operation: &'static str,
    },

    /// Error declaring the fanout with the given name
    #[error("failure to declare the fanout `{0}`")]
    DeclareFanoutError(String),

    /// Error declaring the queue with the given name
    #[error("failure to declare the queue `{0}`")]
    DeclareQueueError(String),

    /// Error binding a queue to a fanout
    #[error("failure to bind queue `{0}` to fanout `{1}`")]
    BindingError(String, String),

    /// Error publishing a message, including a broker nack of the delivery
    #[error("failure to publish")]
    PublishingError,

    /// A mandatory publish was returned: no queue was bound to the fanout
    #[error("message could not be routed to any queue")]
    Unroutable,

    /// Error acknowledging a message
    #[error("failure to ack message")]
    AckMessageError,

    /// Error negative-acknowledging a message
    #[error("failure to nack message")]
    NackMessageError,

    /// Error pulling a delivery from the queue
    #[error("failure to consume message")]
    ConsumeError,
}

/// Failure produced by a handler while processing one event.
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("{0}")]
    Message(String),

    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),

    /// The handler panicked on its worker task.
    #[error("handler panicked")]
    Panicked,
}

/// The dispatch result algebra.
///
/// Recoverable variants mark conditions worth a reconnect and retry; the
/// others are contract or configuration defects that must stop the loop.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// No binding matches the event topic and no catch-all is registered.
    /// The event was dropped without requeue; redelivering it forever cannot
    /// fix a missing binding.
    #[error("no binding matches topic `{0}`")]
    MissingBinding(String),

    /// The handler returned an outcome bound to a different delivery.
    #[error("handler answered delivery {got}, expected {expected}")]
    ForeignOutcome { expected: u64, got: u64 },

    /// The handler asked for the event to be requeued; the attempt did not
    /// fully succeed and the loop should back off before the redelivery.
    #[error("event {tag} was rejected for requeue")]
    Requeued { tag: u64 },

    /// The handler failed or panicked; the event was requeued.
    #[error("handler failed")]
    Handler(#[source] HandlerError),

    /// Publishing the response failed; the event was requeued, not lost.
    #[error("failure to publish the response")]
    Publish(#[source] AmqpError),

    /// An accept/reject channel operation failed.
    #[error("channel operation failed")]
    Channel(#[from] AmqpError),
}

impl DispatchError {
    /// Whether the loop may recover by reconnecting and retrying.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            DispatchError::MissingBinding(_) | DispatchError::ForeignOutcome { .. }
        )
    }
}

/// Failure delivering an operator notification. Logged, never escalated.
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("failure to deliver the notification: {0}")]
    DeliveryError(String),
}
