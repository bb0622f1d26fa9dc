// Copyright (c) 2025, The Newsroom Authors
// MIT License
// All rights reserved.

//! # Event Loop
//!
//! The top-level state machine: connect, declare the topics, pull events,
//! dispatch them under a concurrency bound, classify failures as recoverable
//! or fatal, back off and reconnect or notify and stop.
//!
//! One coordinator task owns the connection and both channels and is the only
//! caller of any channel operation. Handler invocations run on worker tasks;
//! a worker never touches a channel, it posts its result back over an mpsc
//! channel and the coordinator performs the accept/reject/publish itself.
//! Recovery is always "close everything, rebuild from scratch": a delivery
//! tag is only valid within the session that produced it, so there is nothing
//! worth salvaging from a broken connection.

use crate::{
    bindings::Bindings,
    channel::{Channel, Connection, ConnectionFactory},
    config::EventLoopConfig,
    dispatcher::{self, Dispatched, EventDispatcher},
    errors::{DispatchError, HandlerError},
    events::{Event, HandlerOutcome},
    notifier::Notifier,
};
use std::{fmt, sync::Arc};
use tokio::{
    sync::{mpsc, watch},
    time::sleep,
};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    Idle,
    Connecting,
    Consuming,
    Backoff,
    Stopped,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopState::Idle => write!(f, "idle"),
            LoopState::Connecting => write!(f, "connecting"),
            LoopState::Consuming => write!(f, "consuming"),
            LoopState::Backoff => write!(f, "backoff"),
            LoopState::Stopped => write!(f, "stopped"),
        }
    }
}

/// How one connection session ended.
enum SessionEnd {
    Stopped,
    Backoff,
    Fatal(DispatchError),
}

/// A finished handler invocation, posted back by a worker.
struct Completion {
    event: Event,
    handled: Result<HandlerOutcome, HandlerError>,
}

/// Cross-thread stop switch for a running [`EventLoop`].
#[derive(Clone)]
pub struct LoopHandle {
    shutdown: Arc<watch::Sender<bool>>,
}

impl LoopHandle {
    /// Requests the loop to stop: no new pulls, in-flight dispatches drain,
    /// then the connection is closed. Safe to call from any thread, terminal.
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }
}

/// The persistent consume-dispatch service over one binding table.
pub struct EventLoop {
    factory: Arc<dyn ConnectionFactory>,
    bindings: Bindings,
    notifier: Arc<dyn Notifier>,
    config: EventLoopConfig,
    state: LoopState,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl EventLoop {
    pub fn new(
        factory: Arc<dyn ConnectionFactory>,
        bindings: Bindings,
        notifier: Arc<dyn Notifier>,
        config: EventLoopConfig,
    ) -> EventLoop {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        EventLoop {
            factory,
            bindings,
            notifier,
            config,
            state: LoopState::Idle,
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
        }
    }

    /// A stop switch usable while [`run`](Self::run) owns the loop.
    pub fn handle(&self) -> LoopHandle {
        LoopHandle {
            shutdown: Arc::clone(&self.shutdown_tx),
        }
    }

    /// Runs until stopped or a fatal failure.
    ///
    /// Recoverable failures close the connection, back off for the configured
    /// fixed interval and reconnect from scratch, indefinitely. Fatal ones
    /// notify the operator (best effort) and return the error.
    pub async fn run(mut self) -> Result<(), DispatchError> {
        info!(topics = ?self.bindings.topics(), "event loop starting");

        loop {
            if self.stop_requested() {
                self.transition(LoopState::Stopped);
                return Ok(());
            }

            self.transition(LoopState::Connecting);
            let connection = match self.factory.create().await {
                Ok(connection) => connection,
                Err(err) => {
                    warn!(error = err.to_string(), "failure to connect, backing off");
                    self.backoff().await;
                    continue;
                }
            };

            let end = self.consume_session(connection.as_ref()).await;

            if let Err(err) = connection.close().await {
                warn!(error = err.to_string(), "failure to close the connection");
            }

            match end {
                SessionEnd::Stopped => {
                    self.transition(LoopState::Stopped);
                    return Ok(());
                }
                SessionEnd::Backoff => self.backoff().await,
                SessionEnd::Fatal(err) => {
                    error!(error = err.to_string(), "fatal failure, stopping the event loop");
                    if let Err(notify_err) = self.notifier.notify("event loop stopped", &err).await
                    {
                        warn!(error = notify_err.to_string(), "failure to notify the operator");
                    }
                    self.transition(LoopState::Stopped);
                    return Err(err);
                }
            }
        }
    }

    /// One connection session: build the channels, pull and dispatch until
    /// the session ends one way or another.
    async fn consume_session(&mut self, connection: &dyn Connection) -> SessionEnd {
        let publisher = match connection.publisher(&self.config.response_topic).await {
            Ok(channel) => channel,
            Err(err) => {
                warn!(error = err.to_string(), "failure to open the publisher channel");
                return SessionEnd::Backoff;
            }
        };
        let mut consumer = match connection.consumer(&self.bindings.topics()).await {
            Ok(channel) => channel,
            Err(err) => {
                warn!(error = err.to_string(), "failure to open the consumer channel");
                return SessionEnd::Backoff;
            }
        };

        self.transition(LoopState::Consuming);

        // Deserialized settings may carry a zero; the pool needs a worker.
        let concurrency = self.config.concurrency.max(1);
        let (results_tx, mut results_rx) = mpsc::channel::<Completion>(concurrency);
        let mut in_flight: usize = 0;
        let mut pending: Option<Completion> = None;

        loop {
            if self.stop_requested() {
                info!(in_flight, "stop requested, draining in-flight dispatches");
                if let Err(err) = consumer.cancel().await {
                    warn!(error = err.to_string(), "failure to cancel the consumer");
                }
                for done in pending.take() {
                    in_flight -= 1;
                    self.drain(&*consumer, &*publisher, done).await;
                }
                while in_flight > 0 {
                    let Some(done) = results_rx.recv().await else {
                        break;
                    };
                    in_flight -= 1;
                    self.drain(&*consumer, &*publisher, done).await;
                }
                if let Err(err) = publisher.close().await {
                    warn!(error = err.to_string(), "failure to close the publisher channel");
                }
                if let Err(err) = consumer.close().await {
                    warn!(error = err.to_string(), "failure to close the consumer channel");
                }
                return SessionEnd::Stopped;
            }

            // Interpret finished dispatches on the coordinator task.
            let mut finished: Vec<Completion> = pending.take().into_iter().collect();
            while let Ok(done) = results_rx.try_recv() {
                finished.push(done);
            }
            for done in finished {
                in_flight -= 1;
                let dispatcher = EventDispatcher::new(&self.bindings, &*consumer, &*publisher);
                match dispatcher.complete(&done.event, done.handled).await {
                    Ok(Dispatched { published }) => {
                        debug!(tag = done.event.delivery_tag, published, "dispatch completed");
                    }
                    Err(err) if err.is_recoverable() => {
                        warn!(error = err.to_string(), "recoverable dispatch failure, reconnecting");
                        return SessionEnd::Backoff;
                    }
                    Err(err) => return SessionEnd::Fatal(err),
                }
            }

            // Pull new deliveries only while capacity remains.
            if in_flight < concurrency {
                match consumer.consume().await {
                    Ok(Some(event)) => match self.bindings.resolve(&event.topic) {
                        Some(handler) => {
                            debug!(topic = event.topic, tag = event.delivery_tag, "dequeued event");
                            in_flight += 1;
                            let results_tx = results_tx.clone();
                            tokio::spawn(async move {
                                let handled = dispatcher::invoke(handler.as_ref(), &event).await;
                                let _ = results_tx.send(Completion { event, handled }).await;
                            });
                            // Fill the remaining capacity before sleeping.
                            continue;
                        }
                        None => {
                            let dispatcher =
                                EventDispatcher::new(&self.bindings, &*consumer, &*publisher);
                            match dispatcher.dispatch(&event).await {
                                Ok(_) => {}
                                Err(err) if err.is_recoverable() => return SessionEnd::Backoff,
                                Err(err) => return SessionEnd::Fatal(err),
                            }
                        }
                    },
                    Ok(None) => {
                        if in_flight == 0 {
                            if let Err(err) = connection.keep_alive().await {
                                warn!(error = err.to_string(), "connection lost while idle");
                                return SessionEnd::Backoff;
                            }
                        }
                    }
                    Err(err) => {
                        warn!(error = err.to_string(), "failure to pull the next event");
                        return SessionEnd::Backoff;
                    }
                }
            }

            // Poll tick: wake early on stop, or on a completion when the
            // worker pool is saturated.
            tokio::select! {
                _ = sleep(self.config.poll_tick()) => {}
                _ = self.shutdown_rx.changed() => {}
                done = results_rx.recv(), if in_flight > 0 => {
                    pending = done;
                }
            }
        }
    }

    /// Applies a completion while stopping; failures only get logged, the
    /// session is ending either way.
    async fn drain(&self, consumer: &dyn Channel, publisher: &dyn Channel, done: Completion) {
        let dispatcher = EventDispatcher::new(&self.bindings, consumer, publisher);
        let tag = done.event.delivery_tag;
        match dispatcher.complete(&done.event, done.handled).await {
            Ok(_) => debug!(tag, "in-flight dispatch drained"),
            Err(err) => warn!(tag, error = err.to_string(), "in-flight dispatch failed while draining"),
        }
    }

    async fn backoff(&mut self) {
        self.transition(LoopState::Backoff);
        tokio::select! {
            _ = sleep(self.config.backoff_interval()) => {}
            _ = self.shutdown_rx.changed() => {}
        }
    }

    fn stop_requested(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    fn transition(&mut self, state: LoopState) {
        if self.state != state {
            info!(from = %self.state, to = %state, "state transition");
            self.state = state;
        }
    }
}
