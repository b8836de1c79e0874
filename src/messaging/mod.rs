pub mod broker;
pub mod message;
#[cfg(test)]
mod tests;

pub use broker::{create_message_broker, MessageBroker, MessageBrokerTrait, MessageCallback};
pub use message::RawMessage;
