/// Raw broker delivery handed to subscription callbacks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    /// Topic the message was published on, in MQTT syntax
    pub topic: String,
    /// Undecoded message body
    pub payload: Vec<u8>,
}

impl RawMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Translate an MQTT topic filter into an AMQP topic routing key.
///
/// MQTT publishes bridged into a topic exchange use `.` as the level
/// separator, and the single-level wildcard `+` becomes `*`.
pub fn mqtt_topic_to_routing_key(topic: &str) -> String {
    topic
        .split('/')
        .map(|level| if level == "+" { "*" } else { level })
        .collect::<Vec<_>>()
        .join(".")
}

/// Inverse of [`mqtt_topic_to_routing_key`] for concrete routing keys
pub fn routing_key_to_mqtt_topic(routing_key: &str) -> String {
    routing_key.replace('.', "/")
}
