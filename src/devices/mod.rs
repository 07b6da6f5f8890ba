pub mod edge;
pub mod power_meter;
pub mod pulse_counter;

pub use edge::{run_pull_refresh, EdgeSource};
#[cfg(feature = "gpio")]
pub use edge::GpioEdgeSource;
pub use power_meter::{decode_f32, decode_registers, PowerReading, RegisterField, POWER_METER_REGISTER_MAP};
pub use pulse_counter::{PulseCounter, PulseWindow};
