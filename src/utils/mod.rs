pub mod error;
pub mod link;

pub use error::GatewayError;
pub use link::{Backoff, BackoffPolicy, LinkState, LinkStatus};

/// Round half away from zero to `decimals` places.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}
