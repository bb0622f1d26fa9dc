// Copyright (c) 2025, The Newsroom Authors
// MIT License
// All rights reserved.

//! # Event Dispatcher
//!
//! Pure routing and translation logic for one delivered event: resolve the
//! binding, invoke the handler, interpret the outcome and perform the
//! corresponding channel operations. The dispatcher owns no state beyond the
//! bindings and the two channels it is given; it is constructed per event by
//! the loop task, which is also the only caller of any channel operation.

use crate::{
    bindings::Bindings,
    channel::Channel,
    errors::{DispatchError, HandlerError},
    events::{Event, Handler, HandlerOutcome},
};
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use tracing::{debug, error, warn};

/// Successful completion of one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dispatched {
    /// Whether a response was published before the accept.
    pub published: bool,
}

/// Runs a handler, folding a panic into the error the dispatcher interprets
/// as reject-with-requeue.
pub(crate) async fn invoke(
    handler: &dyn Handler,
    event: &Event,
) -> Result<HandlerOutcome, HandlerError> {
    match AssertUnwindSafe(handler.handle(event)).catch_unwind().await {
        Ok(handled) => handled,
        Err(_) => Err(HandlerError::Panicked),
    }
}

/// Routes one event to its handler and translates the outcome into channel
/// operations on the consumer and publisher channels.
pub struct EventDispatcher<'d> {
    bindings: &'d Bindings,
    consumer: &'d dyn Channel,
    publisher: &'d dyn Channel,
}

impl<'d> EventDispatcher<'d> {
    pub fn new(
        bindings: &'d Bindings,
        consumer: &'d dyn Channel,
        publisher: &'d dyn Channel,
    ) -> EventDispatcher<'d> {
        EventDispatcher {
            bindings,
            consumer,
            publisher,
        }
    }

    /// Full pipeline for one event: match, invoke, interpret.
    ///
    /// An event with no binding (and no catch-all) is dropped without requeue
    /// and reported as the fatal [`DispatchError::MissingBinding`]; requeueing
    /// it would only spin the same unroutable event through the broker
    /// forever.
    pub async fn dispatch(&self, event: &Event) -> Result<Dispatched, DispatchError> {
        let Some(handler) = self.bindings.resolve(&event.topic) else {
            warn!(
                topic = event.topic,
                tag = event.delivery_tag,
                "no binding for topic, dropping event"
            );
            self.consumer.reject(event, false).await?;
            return Err(DispatchError::MissingBinding(event.topic.clone()));
        };

        let handled = invoke(handler.as_ref(), event).await;
        self.complete(event, handled).await
    }

    /// Interprets a finished handler invocation.
    ///
    /// This is the half of [`dispatch`](Self::dispatch) the loop runs on its
    /// own task after a worker posts its result back; every channel operation
    /// for the event happens here, exactly once, after the handler completed.
    pub async fn complete(
        &self,
        event: &Event,
        handled: Result<HandlerOutcome, HandlerError>,
    ) -> Result<Dispatched, DispatchError> {
        let outcome = match handled {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(
                    topic = event.topic,
                    tag = event.delivery_tag,
                    error = err.to_string(),
                    "handler failed, requeueing event"
                );
                self.consumer.reject(event, true).await?;
                return Err(DispatchError::Handler(err));
            }
        };

        if outcome.delivery_tag() != event.delivery_tag {
            // Contract violation, not an I/O condition: no channel call.
            return Err(DispatchError::ForeignOutcome {
                expected: event.delivery_tag,
                got: outcome.delivery_tag(),
            });
        }

        match outcome {
            HandlerOutcome::Accept { message: None, .. } => {
                self.consumer.accept(event).await?;
                debug!(topic = event.topic, tag = event.delivery_tag, "event accepted");
                Ok(Dispatched { published: false })
            }
            HandlerOutcome::Accept {
                message: Some(message),
                ..
            } => {
                if let Err(err) = self.publisher.publish(&message).await {
                    error!(
                        topic = event.topic,
                        tag = event.delivery_tag,
                        error = err.to_string(),
                        "failure to publish the response, requeueing event"
                    );
                    self.consumer.reject(event, true).await?;
                    return Err(DispatchError::Publish(err));
                }
                self.consumer.accept(event).await?;
                debug!(
                    topic = event.topic,
                    tag = event.delivery_tag,
                    "response published and event accepted"
                );
                Ok(Dispatched { published: true })
            }
            HandlerOutcome::Reject { requeue, .. } => {
                self.consumer.reject(event, requeue).await?;
                if requeue {
                    warn!(topic = event.topic, tag = event.delivery_tag, "event requeued");
                    Err(DispatchError::Requeued {
                        tag: event.delivery_tag,
                    })
                } else {
                    debug!(topic = event.topic, tag = event.delivery_tag, "event dropped");
                    Ok(Dispatched { published: false })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MockChannel;
    use crate::errors::AmqpError;
    use crate::events::{Message, MockHandler};
    use mockall::{predicate::eq, Sequence};
    use std::sync::Arc;

    const TOPIC: &str = "feed";

    fn event() -> Event {
        Event::new(TOPIC, 7, "hello")
    }

    fn bindings_with(handler: MockHandler) -> Bindings {
        Bindings::new().bind(TOPIC, Arc::new(handler))
    }

    #[tokio::test]
    async fn accepted_with_message_publishes_the_response_then_accepts() {
        let mut handler = MockHandler::new();
        handler
            .expect_handle()
            .returning(|e| Ok(HandlerOutcome::accept_with(e, Message::new("hello-ack"))));
        let bindings = bindings_with(handler);

        let mut seq = Sequence::new();
        let mut publisher = MockChannel::new();
        publisher
            .expect_publish()
            .with(eq(Message::new("hello-ack")))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        let mut consumer = MockChannel::new();
        consumer
            .expect_accept()
            .with(eq(event()))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let sut = EventDispatcher::new(&bindings, &consumer, &publisher);

        let result = sut.dispatch(&event()).await.unwrap();

        assert_eq!(result, Dispatched { published: true });
    }

    #[tokio::test]
    async fn accepted_with_message_but_publish_fails_requeues_the_event() {
        let mut handler = MockHandler::new();
        handler
            .expect_handle()
            .returning(|e| Ok(HandlerOutcome::accept_with(e, Message::new("hello-ack"))));
        let bindings = bindings_with(handler);

        let mut publisher = MockChannel::new();
        publisher
            .expect_publish()
            .returning(|_| Err(AmqpError::PublishingError));
        let mut consumer = MockChannel::new();
        consumer.expect_accept().never();
        consumer
            .expect_reject()
            .with(eq(event()), eq(true))
            .times(1)
            .returning(|_, _| Ok(()));

        let sut = EventDispatcher::new(&bindings, &consumer, &publisher);

        let err = sut.dispatch(&event()).await.unwrap_err();

        assert!(err.is_recoverable());
        assert!(matches!(err, DispatchError::Publish(AmqpError::PublishingError)));
    }

    #[tokio::test]
    async fn accepted_without_message_accepts_the_event() {
        let mut handler = MockHandler::new();
        handler
            .expect_handle()
            .returning(|e| Ok(HandlerOutcome::accept(e)));
        let bindings = bindings_with(handler);

        let mut publisher = MockChannel::new();
        publisher.expect_publish().never();
        let mut consumer = MockChannel::new();
        consumer
            .expect_accept()
            .with(eq(event()))
            .times(1)
            .returning(|_| Ok(()));

        let sut = EventDispatcher::new(&bindings, &consumer, &publisher);

        let result = sut.dispatch(&event()).await.unwrap();

        assert_eq!(result, Dispatched { published: false });
    }

    #[tokio::test]
    async fn rejected_with_requeue_is_a_recoverable_failure() {
        let mut handler = MockHandler::new();
        handler
            .expect_handle()
            .returning(|e| Ok(HandlerOutcome::reject(e, true)));
        let bindings = bindings_with(handler);

        let publisher = MockChannel::new();
        let mut consumer = MockChannel::new();
        consumer
            .expect_reject()
            .with(eq(event()), eq(true))
            .times(1)
            .returning(|_, _| Ok(()));

        let sut = EventDispatcher::new(&bindings, &consumer, &publisher);

        let err = sut.dispatch(&event()).await.unwrap_err();

        assert!(err.is_recoverable());
        assert!(matches!(err, DispatchError::Requeued { tag: 7 }));
    }

    #[tokio::test]
    async fn rejected_without_requeue_drops_the_event_and_succeeds() {
        let mut handler = MockHandler::new();
        handler
            .expect_handle()
            .returning(|e| Ok(HandlerOutcome::reject(e, false)));
        let bindings = bindings_with(handler);

        let publisher = MockChannel::new();
        let mut consumer = MockChannel::new();
        consumer
            .expect_reject()
            .with(eq(event()), eq(false))
            .times(1)
            .returning(|_, _| Ok(()));

        let sut = EventDispatcher::new(&bindings, &consumer, &publisher);

        let result = sut.dispatch(&event()).await.unwrap();

        assert_eq!(result, Dispatched { published: false });
    }

    #[tokio::test]
    async fn handler_failure_requeues_the_event() {
        let mut handler = MockHandler::new();
        handler
            .expect_handle()
            .returning(|_| Err(HandlerError::Message("boom".to_owned())));
        let bindings = bindings_with(handler);

        let publisher = MockChannel::new();
        let mut consumer = MockChannel::new();
        consumer.expect_accept().never();
        consumer
            .expect_reject()
            .with(eq(event()), eq(true))
            .times(1)
            .returning(|_, _| Ok(()));

        let sut = EventDispatcher::new(&bindings, &consumer, &publisher);

        let err = sut.dispatch(&event()).await.unwrap_err();

        assert!(err.is_recoverable());
        assert!(matches!(err, DispatchError::Handler(HandlerError::Message(_))));
    }

    #[tokio::test]
    async fn handler_panic_requeues_the_event() {
        let mut handler = MockHandler::new();
        handler.expect_handle().returning(|_| panic!("boom"));
        let bindings = bindings_with(handler);

        let publisher = MockChannel::new();
        let mut consumer = MockChannel::new();
        consumer
            .expect_reject()
            .with(eq(event()), eq(true))
            .times(1)
            .returning(|_, _| Ok(()));

        let sut = EventDispatcher::new(&bindings, &consumer, &publisher);

        let err = sut.dispatch(&event()).await.unwrap_err();

        assert!(err.is_recoverable());
        assert!(matches!(err, DispatchError::Handler(HandlerError::Panicked)));
    }

    #[tokio::test]
    async fn outcome_for_another_delivery_is_fatal_without_channel_calls() {
        let mut handler = MockHandler::new();
        handler.expect_handle().returning(|_| {
            Ok(HandlerOutcome::Accept {
                delivery_tag: 99,
                message: None,
            })
        });
        let bindings = bindings_with(handler);

        // No expectations: any channel call would fail the test.
        let publisher = MockChannel::new();
        let consumer = MockChannel::new();

        let sut = EventDispatcher::new(&bindings, &consumer, &publisher);

        let err = sut.dispatch(&event()).await.unwrap_err();

        assert!(!err.is_recoverable());
        assert!(matches!(
            err,
            DispatchError::ForeignOutcome { expected: 7, got: 99 }
        ));
    }

    #[tokio::test]
    async fn missing_binding_drops_the_event_and_is_fatal() {
        let bindings = Bindings::new().bind("scraps", Arc::new(MockHandler::new()));

        let publisher = MockChannel::new();
        let mut consumer = MockChannel::new();
        consumer
            .expect_reject()
            .with(eq(event()), eq(false))
            .times(1)
            .returning(|_, _| Ok(()));

        let sut = EventDispatcher::new(&bindings, &consumer, &publisher);

        let err = sut.dispatch(&event()).await.unwrap_err();

        assert!(!err.is_recoverable());
        assert!(matches!(err, DispatchError::MissingBinding(topic) if topic == TOPIC));
    }

    #[tokio::test]
    async fn catch_all_binding_handles_unmatched_topics() {
        let mut catch_all = MockHandler::new();
        catch_all
            .expect_handle()
            .times(1)
            .returning(|e| Ok(HandlerOutcome::accept(e)));
        let bindings = Bindings::new()
            .bind("scraps", Arc::new(MockHandler::new()))
            .bind("", Arc::new(catch_all));

        let publisher = MockChannel::new();
        let mut consumer = MockChannel::new();
        consumer
            .expect_accept()
            .with(eq(event()))
            .times(1)
            .returning(|_| Ok(()));

        let sut = EventDispatcher::new(&bindings, &consumer, &publisher);

        let result = sut.dispatch(&event()).await.unwrap();

        assert_eq!(result, Dispatched { published: false });
    }

    #[tokio::test]
    async fn reject_failure_during_requeue_is_a_channel_failure() {
        let mut handler = MockHandler::new();
        handler
            .expect_handle()
            .returning(|e| Ok(HandlerOutcome::reject(e, true)));
        let bindings = bindings_with(handler);

        let publisher = MockChannel::new();
        let mut consumer = MockChannel::new();
        consumer
            .expect_reject()
            .returning(|_, _| Err(AmqpError::NackMessageError));

        let sut = EventDispatcher::new(&bindings, &consumer, &publisher);

        let err = sut.dispatch(&event()).await.unwrap_err();

        assert!(err.is_recoverable());
        assert!(matches!(err, DispatchError::Channel(AmqpError::NackMessageError)));
    }
}
