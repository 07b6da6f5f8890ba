pub mod display;
pub mod publisher;

pub use display::{DisplayDriver, DisplayLink, DisplayMetric, DisplayOpener, RefreshTrigger, SerialDisplayOpener};
pub use publisher::{MessageBus, MqttBus, PublishPayload, Publisher};
