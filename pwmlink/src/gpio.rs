//! Relay outputs driven straight from Raspberry Pi GPIO pins.

use std::collections::BTreeMap;

use rppal::gpio::{Gpio, OutputPin};

use crate::{relay::RelayBank, Error, Result};

/// GPIO pins of the heater ssrs, in channel order starting at channel 1
pub const DEFAULT_SSR_PINS: [u8; 6] = [18, 27, 10, 11, 6, 13];

pub struct GpioRelayBank {
    pins: BTreeMap<u16, OutputPin>,
}

impl GpioRelayBank {
    /// Claim `pins`, mapping channel `n` to `pins[n - 1]`. Every pin starts low.
    pub fn new(pins: &[u8]) -> Result<Self> {
        let gpio = Gpio::new()?;

        let pins = pins
            .iter()
            .enumerate()
            .map(|(i, pin)| -> Result<(u16, OutputPin)> {
                Ok((i as u16 + 1, gpio.get(*pin)?.into_output_low()))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;

        Ok(Self { pins })
    }
}

impl RelayBank for GpioRelayBank {
    #[inline]
    fn has_channel(&self, channel: u16) -> bool {
        self.pins.contains_key(&channel)
    }

    fn set(&mut self, channel: u16, on: bool) -> Result<()> {
        let pin = self
            .pins
            .get_mut(&channel)
            .ok_or(Error::UnknownChannel(channel))?;

        match on {
            true => pin.set_high(),
            false => pin.set_low(),
        }

        Ok(())
    }

    fn all_off(&mut self) -> Result<()> {
        for pin in self.pins.values_mut() {
            pin.set_low();
        }

        Ok(())
    }
}
