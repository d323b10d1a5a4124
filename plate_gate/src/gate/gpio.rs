use rppal::gpio::{Gpio, OutputPin};

use super::OutputLine;
use crate::error::{GateError, GateResult};

/// BCM-numbered Raspberry Pi output pin.
pub struct GpioLine {
    pin: OutputPin,
}

impl GpioLine {
    pub fn open(bcm_pin: u8) -> GateResult<Self> {
        let gpio = Gpio::new().map_err(|e| GateError::Actuator(e.to_string()))?;
        let pin = gpio
            .get(bcm_pin)
            .map_err(|e| GateError::Actuator(format!("pin {bcm_pin}: {e}")))?
            .into_output_low();
        Ok(Self { pin })
    }
}

impl OutputLine for GpioLine {
    fn set_high(&mut self) -> GateResult<()> {
        self.pin.set_high();
        Ok(())
    }

    fn set_low(&mut self) -> GateResult<()> {
        self.pin.set_low();
        Ok(())
    }
}
