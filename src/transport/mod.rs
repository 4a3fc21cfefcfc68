pub mod memory;
pub mod mqtt;
pub mod traits;

pub use memory::MemoryBus;
pub use mqtt::{MqttBus, MqttConfig};
pub use traits::{BusMessage, LivenessStore, MessageBus, SubscriptionId};
