// Copyright (c) 2025, The Newsroom Authors
// MIT License
// All rights reserved.

//! # Event Data Model
//!
//! This module defines the types exchanged between the broker adapter, the
//! dispatcher and the handlers: the delivered `Event`, the outbound `Message`,
//! the channel capability mode and the outcome a handler produces for one event.

use crate::errors::HandlerError;
use async_trait::async_trait;
use std::fmt;

#[cfg(test)]
use mockall::automock;

/// One delivery pulled from the broker.
///
/// The delivery tag identifies the event for the lifetime of the channel
/// session it was delivered on; it is meaningless on any other session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub topic: String,
    pub delivery_tag: u64,
    pub body: Vec<u8>,
}

impl Event {
    pub fn new(topic: &str, delivery_tag: u64, body: impl Into<Vec<u8>>) -> Event {
        Event {
            topic: topic.to_owned(),
            delivery_tag,
            body: body.into(),
        }
    }
}

/// An outbound message, built by a handler as the response to an event.
///
/// Responses are mandatory by default: the broker reports back when the
/// message could not be routed to any queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub body: Vec<u8>,
    pub mandatory: bool,
    pub persistent: bool,
}

impl Message {
    pub fn new(body: impl Into<Vec<u8>>) -> Message {
        Message {
            body: body.into(),
            mandatory: true,
            persistent: false,
        }
    }

    /// Marks the message durable, surviving a broker restart.
    pub fn persistent(mut self) -> Self {
        self.persistent = true;
        self
    }

    /// Clears the return-if-unroutable flag.
    pub fn not_mandatory(mut self) -> Self {
        self.mandatory = false;
        self
    }
}

/// Capability of a channel, fixed at creation.
///
/// Any operation outside the declared mode fails with
/// [`AmqpError::OperationProhibited`](crate::errors::AmqpError::OperationProhibited),
/// never a silent no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMode {
    Publishing,
    Consuming,
    Bidirectional,
}

impl ChannelMode {
    pub fn can_publish(&self) -> bool {
        matches!(self, ChannelMode::Publishing | ChannelMode::Bidirectional)
    }

    pub fn can_consume(&self) -> bool {
        matches!(self, ChannelMode::Consuming | ChannelMode::Bidirectional)
    }
}

impl fmt::Display for ChannelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelMode::Publishing => write!(f, "publishing"),
            ChannelMode::Consuming => write!(f, "consuming"),
            ChannelMode::Bidirectional => write!(f, "bidirectional"),
        }
    }
}

/// What a handler decided about one event.
///
/// Outcomes are constructed from the event they answer so the dispatcher can
/// verify the outcome belongs to the delivery it is completing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// Processing succeeded; optionally publish a response before the ack.
    Accept {
        delivery_tag: u64,
        message: Option<Message>,
    },
    /// Processing failed; with `requeue` the broker redelivers the event,
    /// without it the event is permanently dropped.
    Reject { delivery_tag: u64, requeue: bool },
}

impl HandlerOutcome {
    pub fn accept(event: &Event) -> HandlerOutcome {
        HandlerOutcome::Accept {
            delivery_tag: event.delivery_tag,
            message: None,
        }
    }

    pub fn accept_with(event: &Event, message: Message) -> HandlerOutcome {
        HandlerOutcome::Accept {
            delivery_tag: event.delivery_tag,
            message: Some(message),
        }
    }

    pub fn reject(event: &Event, requeue: bool) -> HandlerOutcome {
        HandlerOutcome::Reject {
            delivery_tag: event.delivery_tag,
            requeue,
        }
    }

    pub fn delivery_tag(&self) -> u64 {
        match self {
            HandlerOutcome::Accept { delivery_tag, .. } => *delivery_tag,
            HandlerOutcome::Reject { delivery_tag, .. } => *delivery_tag,
        }
    }
}

/// Processes one delivered event.
///
/// Handlers run on worker tasks, so they must be safe to call off the
/// coordinator thread. A returned error (or a panic) is interpreted by the
/// dispatcher as reject-with-requeue.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, event: &Event) -> Result<HandlerOutcome, HandlerError>;
}
