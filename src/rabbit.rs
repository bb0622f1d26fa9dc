// Copyright (c) 2025, The Newsroom Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Adapter
//!
//! The one concrete implementation of the broker capability traits, backed by
//! `lapin`. Topics map to fanout exchanges, the consumer side pulls from one
//! durable queue bound to every subscribed topic, and publishes wait for the
//! broker's confirmation so an unroutable mandatory message surfaces as an
//! error instead of vanishing.

use crate::{
    channel::{Channel, Connection, ConnectionFactory},
    config::AmqpConfig,
    errors::AmqpError,
    events::{ChannelMode, Event, Message},
};
use async_trait::async_trait;
use lapin::{
    options::{
        BasicAckOptions, BasicGetOptions, BasicNackOptions, BasicPublishOptions,
        ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    publisher_confirm::Confirmation,
    types::{FieldTable, LongString, ShortString},
    BasicProperties, ConnectionProperties,
};
use tracing::{debug, error};
use uuid::Uuid;

/// AMQP reply code for a clean shutdown.
const REPLY_SUCCESS: u16 = 200;

/// Builds [`AmqpConnection`]s from an [`AmqpConfig`].
pub struct AmqpConnectionFactory {
    config: AmqpConfig,
}

impl AmqpConnectionFactory {
    pub fn new(config: AmqpConfig) -> AmqpConnectionFactory {
        AmqpConnectionFactory { config }
    }
}

#[async_trait]
impl ConnectionFactory for AmqpConnectionFactory {
    async fn create(&self) -> Result<Box<dyn Connection>, AmqpError> {
        debug!(host = self.config.host, vhost = self.config.vhost, "creating amqp connection");

        let options = ConnectionProperties::default()
            .with_connection_name(LongString::from(self.config.name.clone()));

        let conn = match lapin::Connection::connect(&self.config.uri(), options).await {
            Ok(conn) => conn,
            Err(err) => {
                error!(error = err.to_string(), "failure to connect");
                return Err(AmqpError::ConnectionError);
            }
        };
        debug!("amqp connected");

        Ok(Box::new(AmqpConnection {
            inner: conn,
            queue: self.config.queue.clone(),
        }))
    }
}

/// A live `lapin` connection plus the queue name its consumer channels use.
pub struct AmqpConnection {
    inner: lapin::Connection,
    queue: String,
}

impl AmqpConnection {
    async fn create_channel(&self) -> Result<lapin::Channel, AmqpError> {
        if self.is_closed() {
            return Err(AmqpError::ConnectionClosed);
        }

        debug!("creating amqp channel");
        let channel = match self.inner.create_channel().await {
            Ok(channel) => channel,
            Err(err) => {
                error!(error = err.to_string(), "error to create the channel");
                return Err(AmqpError::ChannelError);
            }
        };

        if let Err(err) = channel.confirm_select(ConfirmSelectOptions { nowait: false }).await {
            error!(error = err.to_string(), "error to enable publisher confirms");
            return Err(AmqpError::ChannelError);
        }

        Ok(channel)
    }
}

#[async_trait]
impl Connection for AmqpConnection {
    fn is_closed(&self) -> bool {
        !self.inner.status().connected()
    }

    async fn keep_alive(&self) -> Result<(), AmqpError> {
        // lapin pumps its own heartbeat reactor; report a dead session so the
        // owner can rebuild from scratch.
        if self.is_closed() {
            return Err(AmqpError::ConnectionClosed);
        }
        Ok(())
    }

    async fn publisher(&self, topic: &str) -> Result<Box<dyn Channel>, AmqpError> {
        let channel = self.create_channel().await?;
        declare_fanout(&channel, topic).await?;

        Ok(Box::new(AmqpChannel {
            inner: channel,
            fanout: topic.to_owned(),
            queue: String::new(),
            mode: ChannelMode::Publishing,
            cancelled: false,
        }))
    }

    async fn consumer(&self, topics: &[String]) -> Result<Box<dyn Channel>, AmqpError> {
        let channel = self.create_channel().await?;

        debug!(queue = self.queue, "declaring queue");
        if let Err(err) = channel
            .queue_declare(
                &self.queue,
                QueueDeclareOptions {
                    passive: false,
                    durable: true,
                    exclusive: false,
                    auto_delete: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
        {
            error!(error = err.to_string(), queue = self.queue, "error to declare the queue");
            return Err(AmqpError::DeclareQueueError(self.queue.clone()));
        }

        for topic in topics.iter().filter(|topic| !topic.is_empty()) {
            declare_fanout(&channel, topic).await?;

            debug!(queue = self.queue, fanout = topic, "binding queue to fanout");
            if let Err(err) = channel
                .queue_bind(
                    &self.queue,
                    topic,
                    "",
                    QueueBindOptions { nowait: false },
                    FieldTable::default(),
                )
                .await
            {
                error!(error = err.to_string(), "error to bind queue to fanout");
                return Err(AmqpError::BindingError(self.queue.clone(), topic.clone()));
            }
        }

        Ok(Box::new(AmqpChannel {
            inner: channel,
            fanout: String::new(),
            queue: self.queue.clone(),
            mode: ChannelMode::Consuming,
            cancelled: false,
        }))
    }

    async fn close(&self) -> Result<(), AmqpError> {
        if self.is_closed() {
            return Ok(());
        }
        if let Err(err) = self.inner.close(REPLY_SUCCESS, "closing").await {
            error!(error = err.to_string(), "error to close the connection");
            return Err(AmqpError::ConnectionError);
        }
        Ok(())
    }
}

async fn declare_fanout(channel: &lapin::Channel, topic: &str) -> Result<(), AmqpError> {
    debug!(fanout = topic, "declaring fanout");
    match channel
        .exchange_declare(
            topic,
            lapin::ExchangeKind::Fanout,
            ExchangeDeclareOptions {
                passive: false,
                durable: false,
                auto_delete: true,
                internal: false,
                nowait: false,
            },
            FieldTable::default(),
        )
        .await
    {
        Err(err) => {
            error!(error = err.to_string(), fanout = topic, "error to declare the fanout");
            Err(AmqpError::DeclareFanoutError(topic.to_owned()))
        }
        _ => Ok(()),
    }
}

/// A `lapin` channel fixed to one capability mode, publishing to one fanout
/// or pulling from one queue.
pub struct AmqpChannel {
    inner: lapin::Channel,
    fanout: String,
    queue: String,
    mode: ChannelMode,
    cancelled: bool,
}

impl AmqpChannel {
    fn assert_open(&self) -> Result<(), AmqpError> {
        if self.is_closed() {
            return Err(AmqpError::ChannelClosed);
        }
        Ok(())
    }
}

#[async_trait]
impl Channel for AmqpChannel {
    fn mode(&self) -> ChannelMode {
        self.mode
    }

    fn is_closed(&self) -> bool {
        !self.inner.status().connected()
    }

    async fn publish(&self, message: &Message) -> Result<(), AmqpError> {
        self.assert_open()?;
        if !self.mode.can_publish() {
            return Err(AmqpError::OperationProhibited {
                mode: self.mode,
                operation: "publish",
            });
        }

        let properties = BasicProperties::default()
            .with_message_id(ShortString::from(Uuid::new_v4().to_string()))
            .with_delivery_mode(if message.persistent { 2 } else { 1 });

        let confirm = match self
            .inner
            .basic_publish(
                &self.fanout,
                "",
                BasicPublishOptions {
                    immediate: false,
                    mandatory: message.mandatory,
                },
                &message.body,
                properties,
            )
            .await
        {
            Ok(confirm) => confirm,
            Err(err) => {
                error!(error = err.to_string(), "error publishing message");
                return Err(AmqpError::PublishingError);
            }
        };

        match confirm.await {
            Err(err) => {
                error!(error = err.to_string(), "error awaiting publisher confirmation");
                Err(AmqpError::PublishingError)
            }
            Ok(Confirmation::Nack(_)) => Err(AmqpError::PublishingError),
            // The broker returned a mandatory message: nothing was bound to
            // the fanout.
            Ok(Confirmation::Ack(Some(_))) => Err(AmqpError::Unroutable),
            Ok(_) => Ok(()),
        }
    }

    async fn consume(&mut self) -> Result<Option<Event>, AmqpError> {
        self.assert_open()?;
        if !self.mode.can_consume() {
            return Err(AmqpError::OperationProhibited {
                mode: self.mode,
                operation: "consume",
            });
        }
        if self.cancelled {
            return Ok(None);
        }

        match self
            .inner
            .basic_get(&self.queue, BasicGetOptions { no_ack: false })
            .await
        {
            Ok(Some(message)) => {
                let delivery = message.delivery;
                Ok(Some(Event {
                    topic: delivery.exchange.to_string(),
                    delivery_tag: delivery.delivery_tag,
                    body: delivery.data,
                }))
            }
            Ok(None) => Ok(None),
            Err(err) => {
                error!(error = err.to_string(), queue = self.queue, "error to consume message");
                Err(AmqpError::ConsumeError)
            }
        }
    }

    async fn accept(&self, event: &Event) -> Result<(), AmqpError> {
        self.assert_open()?;
        match self
            .inner
            .basic_ack(event.delivery_tag, BasicAckOptions { multiple: false })
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), tag = event.delivery_tag, "error to ack message");
                Err(AmqpError::AckMessageError)
            }
            _ => Ok(()),
        }
    }

    async fn reject(&self, event: &Event, requeue: bool) -> Result<(), AmqpError> {
        self.assert_open()?;
        match self
            .inner
            .basic_nack(
                event.delivery_tag,
                BasicNackOptions {
                    multiple: false,
                    requeue,
                },
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), tag = event.delivery_tag, "error to nack message");
                Err(AmqpError::NackMessageError)
            }
            _ => Ok(()),
        }
    }

    async fn cancel(&mut self) -> Result<(), AmqpError> {
        self.assert_open()?;
        self.cancelled = true;
        Ok(())
    }

    async fn close(&self) -> Result<(), AmqpError> {
        if self.is_closed() {
            return Ok(());
        }
        if let Err(err) = self.inner.close(REPLY_SUCCESS, "closing").await {
            error!(error = err.to_string(), "error to close the channel");
            return Err(AmqpError::ChannelError);
        }
        Ok(())
    }
}
