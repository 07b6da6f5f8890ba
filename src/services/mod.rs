pub mod flow_integrator;
pub mod query;
pub mod reading_bridge;
pub mod register_poller;
pub mod telemetry_state;

pub use flow_integrator::{FlowIntegrator, FlowSample};
pub use query::{FlowData, QuerySurface};
pub use reading_bridge::ReadingBridge;
pub use register_poller::{PollOutcome, RegisterPoller};
pub use telemetry_state::{TelemetrySnapshot, TelemetryState};
