// Copyright (c) 2025, The Newsroom Authors
// MIT License
// All rights reserved.

//! # Newsroom Events
//!
//! The event-consumption core shared by the newsroom annotation services:
//! a persistent loop pulling events from fanout topics, dispatching each one
//! to the handler bound to its topic, publishing the handler's response and
//! settling the delivery, with automatic reconnection on recoverable broker
//! failures.
//!
//! Services provide [`events::Handler`] implementations, register them in a
//! [`bindings::Bindings`] table and hand the table to an
//! [`event_loop::EventLoop`] built over an AMQP connection factory:
//!
//! ```no_run
//! use std::sync::Arc;
//! use newsroom_events::{
//!     bindings::Bindings,
//!     config::{AmqpConfig, EventLoopConfig},
//!     event_loop::EventLoop,
//!     notifier::LogNotifier,
//!     rabbit::AmqpConnectionFactory,
//! };
//! # use newsroom_events::events::{Event, Handler, HandlerOutcome};
//! # use newsroom_events::errors::HandlerError;
//! # struct FeedHandler;
//! # #[async_trait::async_trait]
//! # impl Handler for FeedHandler {
//! #     async fn handle(&self, event: &Event) -> Result<HandlerOutcome, HandlerError> {
//! #         Ok(HandlerOutcome::accept(event))
//! #     }
//! # }
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let factory = Arc::new(AmqpConnectionFactory::new(AmqpConfig::default()));
//! let bindings = Bindings::new().bind("feed", Arc::new(FeedHandler));
//! let config = EventLoopConfig::new("annotations").concurrency(4);
//!
//! let event_loop = EventLoop::new(factory, bindings, Arc::new(LogNotifier), config);
//! let handle = event_loop.handle();
//! # drop(handle);
//! event_loop.run().await?;
//! # Ok(())
//! # }
//! ```

pub mod bindings;
pub mod channel;
pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod event_loop;
pub mod events;
pub mod notifier;
pub mod rabbit;
