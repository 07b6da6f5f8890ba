pub mod settings;

pub use settings::{
    BridgeConfig,
    DisplayConfig,
    FlowConfig,
    GatewayConfig,
    MeterConfig,
    MqttConfig,
};
