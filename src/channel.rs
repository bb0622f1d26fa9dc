// Copyright (c) 2025, The Newsroom Authors
// MIT License
// All rights reserved.

//! # Broker Capability Traits
//!
//! This module defines the closed set of interfaces the dispatch core consumes:
//! `Channel`, `Connection` and `ConnectionFactory`. One concrete adapter per
//! broker technology implements them (see [`crate::rabbit`] for the RabbitMQ
//! one); everything above these traits is broker-agnostic.
//!
//! Channels are not safe for concurrent use. A connection exclusively owns its
//! channels and the loop task that drives the connection is the only caller of
//! any channel operation.

use crate::{
    errors::AmqpError,
    events::{ChannelMode, Event, Message},
};
use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

/// A logical conduit bound to one fanout or queue.
///
/// The capability mode is fixed at creation: publishing on a consuming channel
/// (and vice versa) fails with [`AmqpError::OperationProhibited`]. Once closed
/// a channel never reopens; a new session requires a new channel.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Channel: Send + Sync {
    fn mode(&self) -> ChannelMode;

    fn is_closed(&self) -> bool;

    /// Sends one message to the channel's fanout, durable when
    /// `message.persistent` and return-if-unroutable when `message.mandatory`.
    async fn publish(&self, message: &Message) -> Result<(), AmqpError>;

    /// Pulls the next ready delivery from the channel's queue.
    ///
    /// This is the lazy consume sequence, one element per call: `Ok(None)`
    /// means nothing is ready right now, or the channel was cancelled. The
    /// sequence restarts only via a new channel.
    async fn consume(&mut self) -> Result<Option<Event>, AmqpError>;

    /// Acknowledges successful processing. Accepting the same event twice is
    /// undefined; the dispatcher enforces the single-accept invariant.
    async fn accept(&self, event: &Event) -> Result<(), AmqpError>;

    /// Negatively acknowledges; with `requeue` the broker redelivers the
    /// event, without it the event is permanently dropped.
    async fn reject(&self, event: &Event, requeue: bool) -> Result<(), AmqpError>;

    /// Stops future deliveries without closing the channel. Accept/reject for
    /// already-delivered events remain valid.
    async fn cancel(&mut self) -> Result<(), AmqpError>;

    /// Releases the channel. No-op if already closed.
    async fn close(&self) -> Result<(), AmqpError>;
}

/// Owns one transport session and creates its channels.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Connection: Send + Sync {
    fn is_closed(&self) -> bool;

    /// Keeps the transport session alive while the owner is idle.
    async fn keep_alive(&self) -> Result<(), AmqpError>;

    /// Declares the fanout named `topic` if absent and returns a
    /// [`ChannelMode::Publishing`] channel bound to it.
    async fn publisher(&self, topic: &str) -> Result<Box<dyn Channel>, AmqpError>;

    /// Declares one durable queue, binds it to every non-empty topic and
    /// returns a [`ChannelMode::Consuming`] channel over it.
    async fn consumer(&self, topics: &[String]) -> Result<Box<dyn Channel>, AmqpError>;

    /// Releases the transport session. Idempotent.
    async fn close(&self) -> Result<(), AmqpError>;
}

/// Builds connections from configuration; the only place that knows how to
/// reach the broker.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn create(&self) -> Result<Box<dyn Connection>, AmqpError>;
}
