//! Flow sensor input: the hardware edge source feeding the [`PulseCounter`].

use log::{error, info};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use super::pulse_counter::PulseCounter;
use crate::utils::error::GatewayError;

pub trait EdgeSource: Send {
    /// Routes every qualifying edge into `counter.record()`.
    fn attach(&mut self, counter: Arc<PulseCounter>) -> Result<(), GatewayError>;

    /// Re-applies the input's pull-up bias.
    fn reassert_pull_up(&mut self) -> Result<(), GatewayError>;

    fn describe(&self) -> String;
}

/// Re-asserts the pull configuration forever. Pull bias on these boards has
/// been seen to drift, after which falling edges stop arriving.
pub async fn run_pull_refresh(source: Arc<Mutex<dyn EdgeSource>>, period: Duration) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    loop {
        ticker.tick().await;
        let mut guard = source.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.reassert_pull_up() {
            Ok(()) => info!("🔁 Re-asserted pull-up on {}", guard.describe()),
            Err(e) => error!("❌ Pull-up refresh failed on {}: {}", guard.describe(), e),
        }
    }
}

#[cfg(feature = "gpio")]
pub use self::gpio::GpioEdgeSource;

#[cfg(feature = "gpio")]
mod gpio {
    use rppal::gpio::{Gpio, InputPin, Level, Trigger};
    use std::sync::Arc;

    use super::EdgeSource;
    use crate::devices::pulse_counter::PulseCounter;
    use crate::utils::error::GatewayError;

    /// Falling-edge input with the SoC's internal pull-up.
    pub struct GpioEdgeSource {
        gpio: Gpio,
        pin: u8,
        input: Option<InputPin>,
        counter: Option<Arc<PulseCounter>>,
    }

    fn gpio_error(pin: u8, err: rppal::gpio::Error) -> GatewayError {
        GatewayError::Transport(format!("GPIO {}: {}", pin, err))
    }

    impl GpioEdgeSource {
        pub fn new(pin: u8) -> Result<Self, GatewayError> {
            let gpio = Gpio::new().map_err(|e| gpio_error(pin, e))?;
            Ok(Self {
                gpio,
                pin,
                input: None,
                counter: None,
            })
        }

        fn arm(&mut self) -> Result<(), GatewayError> {
            let counter = match &self.counter {
                Some(counter) => counter.clone(),
                None => return Ok(()),
            };

            let mut input = self
                .gpio
                .get(self.pin)
                .map_err(|e| gpio_error(self.pin, e))?
                .into_input_pullup();
            input.set_reset_on_drop(false);
            input
                .set_async_interrupt(Trigger::FallingEdge, move |_: Level| counter.record())
                .map_err(|e| gpio_error(self.pin, e))?;

            self.input = Some(input);
            Ok(())
        }
    }

    impl EdgeSource for GpioEdgeSource {
        fn attach(&mut self, counter: Arc<PulseCounter>) -> Result<(), GatewayError> {
            self.counter = Some(counter);
            self.input = None;
            self.arm()
        }

        // Re-acquiring the pin as input-pullup rewrites the bias registers;
        // the interrupt is re-armed on the fresh handle.
        fn reassert_pull_up(&mut self) -> Result<(), GatewayError> {
            if let Some(mut input) = self.input.take() {
                input
                    .clear_async_interrupt()
                    .map_err(|e| gpio_error(self.pin, e))?;
            }
            self.arm()
        }

        fn describe(&self) -> String {
            format!("GPIO pin {}", self.pin)
        }
    }
}
