//! Raspberry Pi hardware backend (rppal)
//!
//! Only compiled with the `rpi` feature. Pin numbers from the config are in
//! physical BOARD positions by default and get translated to BCM numbers
//! here; rppal itself speaks BCM only.

use std::time::Duration;

use rppal::gpio::{Gpio, InputPin, OutputPin, Trigger};
use rppal::spi::{Bus, Mode, SlaveSelect, Spi};

use super::traits::{DigitalInput, DigitalOutput, IrqListener, Level, SpiBus};
use crate::domain::{ControlError, Result};
use crate::infra::config::{Edge, PinNumbering, RfidConfig};

/// Physical header position to BCM GPIO number. Positions that carry power
/// or ground map to None.
const BOARD_TO_BCM: [Option<u8>; 41] = [
    None, // no pin 0
    None,
    None,
    Some(2),
    None,
    Some(3),
    None,
    Some(4),
    Some(14),
    None,
    Some(15),
    Some(17),
    Some(18),
    Some(27),
    None,
    Some(22),
    Some(23),
    None,
    Some(24),
    Some(10),
    None,
    Some(9),
    Some(25),
    Some(11),
    Some(8),
    None,
    Some(7),
    Some(0),
    Some(1),
    Some(5),
    None,
    Some(6),
    Some(12),
    Some(13),
    None,
    Some(19),
    Some(16),
    Some(26),
    Some(20),
    None,
    Some(21),
];

/// Translate a configured pin number to BCM.
pub fn resolve_pin(numbering: PinNumbering, pin: u8) -> Result<u8> {
    match numbering {
        PinNumbering::Bcm => Ok(pin),
        PinNumbering::Board => BOARD_TO_BCM
            .get(pin as usize)
            .copied()
            .flatten()
            .ok_or_else(|| ControlError::hardware(format!("board pin {pin} is not a GPIO"))),
    }
}

fn to_level(level: rppal::gpio::Level) -> Level {
    match level {
        rppal::gpio::Level::Low => Level::Low,
        rppal::gpio::Level::High => Level::High,
    }
}

fn to_trigger(edge: Edge) -> Trigger {
    match edge {
        Edge::Rising => Trigger::RisingEdge,
        Edge::Falling => Trigger::FallingEdge,
    }
}

fn gpio_err(e: rppal::gpio::Error) -> ControlError {
    ControlError::hardware(format!("gpio: {e}"))
}

pub struct RpiInput {
    pin: InputPin,
}

impl RpiInput {
    /// Open a BCM-numbered pin as an input, with the internal pull-up when
    /// `pullup` is set.
    pub fn open(bcm: u8, pullup: bool) -> Result<Self> {
        let gpio = Gpio::new().map_err(gpio_err)?;
        let pin = gpio.get(bcm).map_err(gpio_err)?;
        let pin = if pullup { pin.into_input_pullup() } else { pin.into_input() };
        Ok(Self { pin })
    }
}

impl DigitalInput for RpiInput {
    fn read(&self) -> Result<Level> {
        Ok(to_level(self.pin.read()))
    }

    fn on_edge(&mut self, edge: Edge, mut callback: Box<dyn FnMut(Level) + Send>) -> Result<()> {
        self.pin
            .set_async_interrupt(to_trigger(edge), move |level| callback(to_level(level)))
            .map_err(gpio_err)
    }

    fn clear_edge(&mut self) -> Result<()> {
        self.pin.clear_async_interrupt().map_err(gpio_err)
    }
}

pub struct RpiOutput {
    pin: OutputPin,
}

impl RpiOutput {
    pub fn open(bcm: u8) -> Result<Self> {
        let gpio = Gpio::new().map_err(gpio_err)?;
        Ok(Self { pin: gpio.get(bcm).map_err(gpio_err)?.into_output() })
    }
}

impl DigitalOutput for RpiOutput {
    fn write(&mut self, level: Level) -> Result<()> {
        self.pin.write(match level {
            Level::Low => rppal::gpio::Level::Low,
            Level::High => rppal::gpio::Level::High,
        });
        Ok(())
    }
}

/// Blocking edge wait on a dedicated pin, used for the RC522 IRQ line.
pub struct RpiIrq {
    pin: InputPin,
    armed: Option<Edge>,
}

impl RpiIrq {
    pub fn open(bcm: u8, pullup: bool) -> Result<Self> {
        let gpio = Gpio::new().map_err(gpio_err)?;
        let pin = gpio.get(bcm).map_err(gpio_err)?;
        let pin = if pullup { pin.into_input_pullup() } else { pin.into_input() };
        Ok(Self { pin, armed: None })
    }
}

impl IrqListener for RpiIrq {
    fn wait_edge(&mut self, edge: Edge, timeout: Duration) -> Result<bool> {
        if self.armed != Some(edge) {
            self.pin.set_interrupt(to_trigger(edge)).map_err(gpio_err)?;
            self.armed = Some(edge);
        }
        Ok(self.pin.poll_interrupt(false, Some(timeout)).map_err(gpio_err)?.is_some())
    }
}

pub struct RpiSpi {
    spi: Spi,
}

impl RpiSpi {
    pub fn open(cfg: &RfidConfig) -> Result<Self> {
        let bus = match cfg.spi_bus {
            0 => Bus::Spi0,
            1 => Bus::Spi1,
            other => return Err(ControlError::hardware(format!("spi bus {other} not available"))),
        };
        let slave = match cfg.spi_slave {
            0 => SlaveSelect::Ss0,
            1 => SlaveSelect::Ss1,
            other => return Err(ControlError::hardware(format!("spi slave {other} not available"))),
        };
        let spi = Spi::new(bus, slave, cfg.spi_clock_hz, Mode::Mode0)
            .map_err(|e| ControlError::hardware(format!("spi: {e}")))?;
        Ok(Self { spi })
    }
}

impl SpiBus for RpiSpi {
    fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<()> {
        self.spi
            .transfer(read, write)
            .map_err(|e| ControlError::hardware(format!("spi transfer: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_board_pin_mapping() {
        assert_eq!(resolve_pin(PinNumbering::Board, 18).unwrap(), 24);
        assert_eq!(resolve_pin(PinNumbering::Board, 15).unwrap(), 22);
        assert_eq!(resolve_pin(PinNumbering::Board, 40).unwrap(), 21);
        assert_eq!(resolve_pin(PinNumbering::Bcm, 24).unwrap(), 24);
    }

    #[test]
    fn test_power_pins_rejected() {
        assert!(resolve_pin(PinNumbering::Board, 1).is_err());
        assert!(resolve_pin(PinNumbering::Board, 6).is_err());
        assert!(resolve_pin(PinNumbering::Board, 41).is_err());
    }
}
