//! The relay that opens the gate.
//!
//! Which implementation runs is decided once at startup from
//! [`RelayMode`]; nothing probes for hardware at runtime.

#[cfg(feature = "gpio")]
pub mod gpio;

use std::time::Duration;
use tracing::{info, warn};

use crate::config::{GateConfig, RelayMode};
use crate::error::{GateError, GateResult};

pub trait GateActuator {
    /// Opens the gate and blocks until it has been closed again.
    fn open(&mut self, duration: Duration) -> GateResult<()>;
}

/// Stand-in for machines without a relay attached.
#[derive(Debug, Default)]
pub struct LoggingRelay {
    openings: u64,
}

impl GateActuator for LoggingRelay {
    fn open(&mut self, duration: Duration) -> GateResult<()> {
        self.openings += 1;
        info!(
            "Trigger gate (simulated) for {:.1}s, opening #{}",
            duration.as_secs_f64(),
            self.openings
        );
        Ok(())
    }
}

/// A digital output the relay coil hangs off.
pub trait OutputLine {
    fn set_high(&mut self) -> GateResult<()>;
    fn set_low(&mut self) -> GateResult<()>;
}

/// Relay driven through an [`OutputLine`]: high, hold, low.
pub struct PinRelay<L: OutputLine> {
    line: L,
}

impl<L: OutputLine> PinRelay<L> {
    pub fn new(mut line: L) -> GateResult<Self> {
        line.set_low()?;
        Ok(Self { line })
    }
}

impl<L: OutputLine> GateActuator for PinRelay<L> {
    fn open(&mut self, duration: Duration) -> GateResult<()> {
        self.line.set_high()?;
        info!("Gate open, holding for {:.1}s", duration.as_secs_f64());
        spin_sleep::sleep(duration);
        self.line.set_low()?;
        info!("Gate closed");
        Ok(())
    }
}

impl<L: OutputLine> Drop for PinRelay<L> {
    fn drop(&mut self) {
        if let Err(e) = self.line.set_low() {
            warn!("Cannot release relay line: {e}");
        }
    }
}

/// Builds the relay selected by the configuration.
pub fn build_actuator(config: &GateConfig) -> GateResult<Box<dyn GateActuator>> {
    match config.relay {
        RelayMode::Log => {
            info!("No relay hardware configured, gate openings are logged only");
            Ok(Box::new(LoggingRelay::default()))
        }
        #[cfg(feature = "gpio")]
        RelayMode::Gpio => {
            let line = gpio::GpioLine::open(config.relay_pin)?;
            info!("Relay on GPIO pin {}", config.relay_pin);
            Ok(Box::new(PinRelay::new(line)?))
        }
        #[cfg(not(feature = "gpio"))]
        RelayMode::Gpio => Err(GateError::config(
            "GATE_RELAY=gpio requires a build with the `gpio` feature",
        )),
    }
}
