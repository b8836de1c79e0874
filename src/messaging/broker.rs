use crate::config::TransportConfig;
use crate::error::Error;
use crate::messaging::message::{mqtt_topic_to_routing_key, routing_key_to_mqtt_topic, RawMessage};
use anyhow::Result;
use async_trait::async_trait;
use deadpool_lapin::{Config, Manager, Pool};
use futures_util::stream::StreamExt;
use lapin::{
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, ExchangeDeclareOptions,
        QueueBindOptions, QueueDeclareOptions,
    },
    types::FieldTable,
    BasicProperties, Channel, ConnectionProperties, Consumer, ExchangeKind,
};
use log::{debug, error, info, warn};
use rand::Rng;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;
use uuid::Uuid;

/// Callback function type for raw message handling
pub type MessageCallback = Arc<dyn Fn(RawMessage) -> Result<()> + Send + Sync>;

/// Message broker service trait
#[async_trait]
pub trait MessageBrokerTrait: Send + Sync {
    /// Publish a JSON payload under a routing key
    async fn publish<T: Serialize + Send + Sync>(&self, routing_key: &str, payload: &T) -> Result<()>;

    /// Deliver every message on an MQTT-style topic filter to `callback`
    async fn subscribe(&self, topic: &str, callback: MessageCallback) -> Result<String>;

    /// Stop a subscription and wait for its consumer to finish
    async fn unsubscribe(&self, subscription_id: &str) -> Result<()>;

    /// Stop every subscription
    async fn shutdown(&self);
}

/// Exponential reconnect delay with jitter
#[derive(Debug, Clone)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        let max = max.max(min);
        Self { min, max, current: min }
    }

    /// Delay before the next attempt; doubles the base up to the maximum
    pub fn next_delay(&mut self) -> Duration {
        let base = self.current;
        self.current = (self.current * 2).min(self.max);

        let jitter_ms = (base.as_millis() / 10) as u64;
        if jitter_ms == 0 {
            return base;
        }
        base + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }

    pub fn reset(&mut self) {
        self.current = self.min;
    }
}

/// Build the AMQP URI for a transport configuration
pub fn amqp_uri(config: &TransportConfig) -> Result<String> {
    let mut url = Url::parse(&format!("amqp://{}:{}", config.host, config.port))
        .map_err(|e| Error::Config(format!("Invalid broker address {}:{}: {}", config.host, config.port, e)))?;

    if let Some(username) = config.username.as_deref().filter(|u| !u.is_empty()) {
        url.set_username(username)
            .map_err(|_| Error::Config("Broker URI cannot carry a username".to_string()))?;
        url.set_password(config.password.as_deref())
            .map_err(|_| Error::Config("Broker URI cannot carry a password".to_string()))?;
    }

    let vhost = config.vhost.replace('%', "%25").replace('/', "%2f");
    url.set_path(&format!("/{}", vhost));

    Ok(url.to_string())
}

struct Subscription {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Shared state a consumer task needs
#[derive(Clone)]
struct ConsumerContext {
    pool: Pool,
    exchange: String,
    retry_delay: Duration,
    max_retry_delay: Duration,
}

/// AMQP message broker implementation
pub struct MessageBroker {
    /// Connection pool
    pool: Pool,
    /// Configuration
    config: TransportConfig,
    /// Subscriptions map
    subscriptions: Arc<RwLock<HashMap<String, Subscription>>>,
    /// Parent of every subscription's stop signal
    root_token: CancellationToken,
}

impl MessageBroker {
    /// Create a new message broker. Connections are opened lazily.
    pub fn new(config: TransportConfig) -> Result<Self> {
        let timeout = Duration::from_millis(config.timeout_ms);
        let mut connection_properties = ConnectionProperties::default();
        if let Some(client_id) = &config.client_id {
            connection_properties = connection_properties.with_connection_name(client_id.clone().into());
        }

        let pool_config = Config {
            url: Some(amqp_uri(&config)?),
            pool: Some(deadpool_lapin::PoolConfig {
                max_size: config.pool_size.max(1) as usize,
                queue_mode: deadpool::managed::QueueMode::Fifo,
                timeouts: deadpool::managed::Timeouts {
                    wait: Some(timeout),
                    create: Some(timeout),
                    recycle: Some(timeout),
                },
            }),
            connection_properties,
        };
        let pool = pool_config
            .create_pool(Some(deadpool_lapin::Runtime::Tokio1))
            .map_err(|e| Error::Transport(format!("Failed to create broker pool: {}", e)))?;

        Ok(Self {
            pool,
            config,
            subscriptions: Arc::new(RwLock::new(HashMap::new())),
            root_token: CancellationToken::new(),
        })
    }

    fn consumer_context(&self) -> ConsumerContext {
        ConsumerContext {
            pool: self.pool.clone(),
            exchange: self.config.exchange.clone(),
            retry_delay: Duration::from_millis(self.config.retry_delay_ms),
            max_retry_delay: Duration::from_millis(self.config.max_retry_delay_ms),
        }
    }

    /// Get a pooled connection with retry
    async fn get_connection(&self) -> Result<deadpool::managed::Object<Manager>> {
        let mut attempts = 0;
        let max_attempts = self.config.retry_attempts.max(1);

        loop {
            attempts += 1;
            match self.pool.get().await {
                Ok(conn) => return Ok(conn),
                Err(err) => {
                    if attempts >= max_attempts {
                        return Err(Error::Transport(format!(
                            "Failed to get broker connection after {} attempts: {}",
                            attempts, err
                        ))
                        .into());
                    }

                    warn!(
                        "Failed to get broker connection (attempt {}/{}): {}",
                        attempts, max_attempts, err
                    );

                    tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
                }
            }
        }
    }
}

/// Declare the exchange. Broker-owned `amq.*` exchanges only allow passive declares.
async fn declare_exchange(channel: &Channel, exchange: &str) -> Result<()> {
    channel
        .exchange_declare(
            exchange,
            ExchangeKind::Topic,
            ExchangeDeclareOptions {
                passive: exchange.starts_with("amq."),
                durable: true,
                auto_delete: false,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| Error::Transport(format!("Failed to declare exchange {}: {}", exchange, e)))?;
    Ok(())
}

/// Open a channel with an exclusive queue bound to `routing_key`
async fn open_consumer(ctx: &ConsumerContext, routing_key: &str) -> Result<(Channel, Consumer)> {
    let conn = ctx
        .pool
        .get()
        .await
        .map_err(|e| Error::Transport(format!("Failed to get broker connection: {}", e)))?;

    let channel = conn
        .create_channel()
        .await
        .map_err(|e| Error::Transport(format!("Failed to create channel: {}", e)))?;

    declare_exchange(&channel, &ctx.exchange).await?;

    let queue_name = format!("scc.{}.{}", routing_key.replace(['.', '*', '#'], "_"), Uuid::new_v4());

    channel
        .queue_declare(
            &queue_name,
            QueueDeclareOptions {
                exclusive: true,
                auto_delete: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| Error::Transport(format!("Failed to declare queue: {}", e)))?;

    debug!("Created queue: {} for routing key: {}", queue_name, routing_key);

    channel
        .queue_bind(
            &queue_name,
            &ctx.exchange,
            routing_key,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(|e| Error::Transport(format!("Failed to bind queue: {}", e)))?;

    let consumer = channel
        .basic_consume(
            &queue_name,
            &format!("consumer-{}", Uuid::new_v4()),
            BasicConsumeOptions {
                no_ack: false,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| Error::Transport(format!("Failed to create consumer: {}", e)))?;

    Ok((channel, consumer))
}

/// Drain deliveries until the stream ends or `token` fires.
///
/// Returns `true` when the stream ended on its own and a reconnect is needed.
async fn pump(consumer: &mut Consumer, callback: &MessageCallback, token: &CancellationToken) -> bool {
    loop {
        let delivery = tokio::select! {
            _ = token.cancelled() => return false,
            delivery = consumer.next() => delivery,
        };

        match delivery {
            Some(Ok(delivery)) => {
                let message = RawMessage::new(
                    routing_key_to_mqtt_topic(delivery.routing_key.as_str()),
                    delivery.data.clone(),
                );

                if let Err(e) = callback(message) {
                    error!("Error processing message: {}", e);
                }

                // Ack regardless of outcome so a bad payload cannot block the queue
                if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
                    error!("Failed to acknowledge message: {}", e);
                }
            }
            Some(Err(e)) => {
                error!("Error receiving message: {}", e);
                return true;
            }
            None => return true,
        }
    }
}

/// Subscription loop: connect, consume, reconnect with backoff until cancelled
async fn run_consumer(
    ctx: ConsumerContext,
    topic: String,
    callback: MessageCallback,
    token: CancellationToken,
) {
    let routing_key = mqtt_topic_to_routing_key(&topic);
    let mut backoff = Backoff::new(ctx.retry_delay, ctx.max_retry_delay);

    loop {
        let opened = tokio::select! {
            _ = token.cancelled() => break,
            opened = open_consumer(&ctx, &routing_key) => opened,
        };

        match opened {
            Ok((channel, mut consumer)) => {
                backoff.reset();
                info!("Subscribed to {} (routing key {})", topic, routing_key);

                let reconnect = pump(&mut consumer, &callback, &token).await;
                if let Err(e) = channel.close(200, "OK").await {
                    debug!("Channel close for {} failed: {}", topic, e);
                }
                if !reconnect {
                    break;
                }
                warn!("Disconnected from broker while consuming {}", topic);
            }
            Err(e) => {
                warn!("Failed to subscribe to {}: {}", topic, e);
            }
        }

        let delay = backoff.next_delay();
        info!("Reconnecting to {} in {:?}", topic, delay);
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    info!("Consumer stopped for topic: {}", topic);
}

#[async_trait]
impl MessageBrokerTrait for MessageBroker {
    async fn publish<T: Serialize + Send + Sync>(&self, routing_key: &str, payload: &T) -> Result<()> {
        let message = serde_json::to_vec(payload)
            .map_err(|e| Error::Serialization(format!("Failed to serialize payload: {}", e)))?;

        let conn = self.get_connection().await?;
        let channel = conn
            .create_channel()
            .await
            .map_err(|e| Error::Transport(format!("Failed to create channel: {}", e)))?;

        declare_exchange(&channel, &self.config.exchange).await?;

        channel
            .basic_publish(
                &self.config.exchange,
                routing_key,
                BasicPublishOptions::default(),
                &message,
                BasicProperties::default().with_content_type("application/json".into()),
            )
            .await
            .map_err(|e| Error::Transport(format!("Failed to publish message: {}", e)))?;

        if let Err(e) = channel.close(200, "OK").await {
            debug!("Channel close after publish failed: {}", e);
        }

        debug!("Published message with routing key: {}", routing_key);

        Ok(())
    }

    async fn subscribe(&self, topic: &str, callback: MessageCallback) -> Result<String> {
        if self.root_token.is_cancelled() {
            return Err(Error::Transport("Broker is shut down".to_string()).into());
        }

        let subscription_id = Uuid::new_v4().to_string();
        let token = self.root_token.child_token();

        let handle = tokio::spawn(run_consumer(
            self.consumer_context(),
            topic.to_string(),
            callback,
            token.clone(),
        ));

        self.subscriptions
            .write()
            .await
            .insert(subscription_id.clone(), Subscription { token, handle });

        info!("Started consumer for topic: {} (subscription: {})", topic, subscription_id);

        Ok(subscription_id)
    }

    async fn unsubscribe(&self, subscription_id: &str) -> Result<()> {
        let subscription = self.subscriptions.write().await.remove(subscription_id);

        match subscription {
            Some(subscription) => {
                subscription.token.cancel();
                if let Err(e) = subscription.handle.await {
                    warn!("Consumer task for {} ended abnormally: {}", subscription_id, e);
                }
                info!("Unsubscribed: {}", subscription_id);
                Ok(())
            }
            None => Err(Error::NotFound(format!("Subscription not found: {}", subscription_id)).into()),
        }
    }

    async fn shutdown(&self) {
        self.root_token.cancel();

        let subscriptions: Vec<(String, Subscription)> = self.subscriptions.write().await.drain().collect();
        for (id, subscription) in subscriptions {
            if let Err(e) = subscription.handle.await {
                warn!("Consumer task for {} ended abnormally: {}", id, e);
            }
        }

        self.pool.close();
        info!("Message broker shut down");
    }
}

/// Create a message broker service
pub fn create_message_broker(config: TransportConfig) -> Result<Arc<MessageBroker>> {
    let broker = MessageBroker::new(config)?;

    Ok(Arc::new(broker))
}
