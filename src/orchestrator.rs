use crate::adapters::{FrigateAdapter, ReolinkAdapter, SourceAdapter};
use crate::config::Config;
use crate::dedupe::SharedAggregator;
use crate::error::Error;
use crate::events::Event;
use crate::messaging::{MessageBrokerTrait, MessageCallback, RawMessage};
use crate::notify::NotificationSink;
use anyhow::Result;
use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A broker topic and the adapter that understands its payloads
#[derive(Clone)]
pub struct Route {
    pub topic: String,
    pub adapter: Arc<dyn SourceAdapter>,
}

impl Route {
    pub fn new(topic: impl Into<String>, adapter: Arc<dyn SourceAdapter>) -> Self {
        Self {
            topic: topic.into(),
            adapter,
        }
    }
}

/// Routes described by the configuration: Frigate always, Reolink when enabled.
///
/// Frigate events carry the configured authoritative source name so the
/// aggregator recognizes them as confirmations.
pub fn routes_from_config(config: &Config) -> Vec<Route> {
    let mut routes = vec![Route::new(
        config.transport.topic.clone(),
        Arc::new(FrigateAdapter::with_source(
            config.dedupe.authoritative_source.clone(),
        )),
    )];

    if config.reolink.enabled {
        routes.push(Route::new(
            config.reolink.topic.clone(),
            Arc::new(ReolinkAdapter::new(config.reolink.camera_id.clone())),
        ));
    }

    routes
}

/// Broker callback: normalize, aggregate, forward emissions
fn message_handler(
    adapter: Arc<dyn SourceAdapter>,
    aggregator: SharedAggregator,
    incidents: mpsc::UnboundedSender<Event>,
) -> MessageCallback {
    Arc::new(move |message: RawMessage| -> Result<()> {
        let Some(event) = adapter.handle_message(&message.topic, &message.payload) else {
            return Ok(());
        };

        debug!(
            "Normalized {} event: {}/{} at {}",
            event.source, event.camera_id, event.event_type, event.ts
        );

        if let Some(incident) = aggregator.process(event) {
            incidents
                .send(incident)
                .map_err(|_| Error::Internal("Incident channel closed".to_string()))?;
        }
        Ok(())
    })
}

/// Owns the pipeline from broker subscriptions to the notification sink
pub struct Orchestrator<B: MessageBrokerTrait> {
    broker: Arc<B>,
    aggregator: SharedAggregator,
    routes: Vec<Route>,
    sink: Arc<dyn NotificationSink>,
}

impl<B: MessageBrokerTrait + 'static> Orchestrator<B> {
    pub fn new(broker: Arc<B>, aggregator: SharedAggregator, sink: Arc<dyn NotificationSink>) -> Self {
        Self {
            broker,
            aggregator,
            routes: Vec::new(),
            sink,
        }
    }

    pub fn with_routes(mut self, routes: impl IntoIterator<Item = Route>) -> Self {
        self.routes.extend(routes);
        self
    }

    pub fn aggregator(&self) -> &SharedAggregator {
        &self.aggregator
    }

    /// Run until `shutdown` is cancelled, then unsubscribe and flush the sink
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        if self.routes.is_empty() {
            return Err(Error::Config("No source routes configured".to_string()).into());
        }

        let (tx, rx) = mpsc::unbounded_channel::<Event>();
        let sink_stop = CancellationToken::new();
        let sink_task = tokio::spawn(drain_incidents(rx, self.sink.clone(), sink_stop.clone()));

        let mut subscriptions = Vec::with_capacity(self.routes.len());
        for route in &self.routes {
            let callback = message_handler(route.adapter.clone(), self.aggregator.clone(), tx.clone());
            match self.broker.subscribe(&route.topic, callback).await {
                Ok(id) => {
                    info!("Routing {} to {} adapter", route.topic, route.adapter.source());
                    subscriptions.push(id);
                }
                Err(e) => {
                    error!("Failed to subscribe to {}: {}", route.topic, e);
                    self.unsubscribe_all(&subscriptions).await;
                    sink_stop.cancel();
                    let _ = sink_task.await;
                    return Err(e);
                }
            }
        }
        drop(tx);

        shutdown.cancelled().await;
        info!("Stopping event pipeline");

        self.unsubscribe_all(&subscriptions).await;
        sink_stop.cancel();
        if let Err(e) = sink_task.await {
            error!("Notification task ended abnormally: {}", e);
        }

        info!("Event pipeline stopped");
        Ok(())
    }

    async fn unsubscribe_all(&self, subscriptions: &[String]) {
        for id in subscriptions {
            if let Err(e) = self.broker.unsubscribe(id).await {
                warn!("Failed to unsubscribe {}: {}", id, e);
            }
        }
    }
}

async fn notify(sink: &dyn NotificationSink, incident: Event) {
    let summary = incident.summary();
    if let Err(e) = sink.notify(&summary).await {
        error!(
            "Failed to deliver incident for {}/{}: {}",
            summary.camera_id, summary.event_type, e
        );
    }
}

/// Feed emitted incidents to the sink until stopped, then flush what is queued
async fn drain_incidents(
    mut rx: mpsc::UnboundedReceiver<Event>,
    sink: Arc<dyn NotificationSink>,
    stop: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            incident = rx.recv() => match incident {
                Some(incident) => notify(sink.as_ref(), incident).await,
                None => return,
            },
            _ = stop.cancelled() => break,
        }
    }

    while let Ok(incident) = rx.try_recv() {
        notify(sink.as_ref(), incident).await;
    }
}
