//! MFRC522 register-level driver
//!
//! Speaks to the reader chip over SPI and sleeps on its IRQ line between
//! polls. The [`TagReader`] trait is the seam the reader thread works
//! against; tests script a mock implementation instead of the chip.

use std::time::Duration;

use tracing::{debug, trace};

use crate::domain::Result;
use crate::hw::{DigitalOutput, IrqListener, Level, SpiBus};
use crate::infra::config::{Edge, KeyType};

// chip commands
const CMD_IDLE: u8 = 0x00;
const CMD_CALC_CRC: u8 = 0x03;
const CMD_TRANSCEIVE: u8 = 0x0C;
const CMD_MF_AUTHENT: u8 = 0x0E;
const CMD_SOFT_RESET: u8 = 0x0F;

// PICC commands
const PICC_REQIDL: u8 = 0x26;
const PICC_REQALL: u8 = 0x52;
const PICC_ANTICOLL: u8 = 0x93;
const PICC_SELECT: u8 = 0x93;
const PICC_READ: u8 = 0x30;
const PICC_HALT: u8 = 0x50;

// registers
const REG_COMMAND: u8 = 0x01;
const REG_COM_I_EN: u8 = 0x02;
const REG_COM_IRQ: u8 = 0x04;
const REG_DIV_IRQ: u8 = 0x05;
const REG_ERROR: u8 = 0x06;
const REG_STATUS2: u8 = 0x08;
const REG_FIFO_DATA: u8 = 0x09;
const REG_FIFO_LEVEL: u8 = 0x0A;
const REG_CONTROL: u8 = 0x0C;
const REG_BIT_FRAMING: u8 = 0x0D;
const REG_MODE: u8 = 0x11;
const REG_TX_CONTROL: u8 = 0x14;
const REG_TX_ASK: u8 = 0x15;
const REG_CRC_RESULT_M: u8 = 0x21;
const REG_CRC_RESULT_L: u8 = 0x22;
const REG_T_MODE: u8 = 0x2A;
const REG_T_PRESCALER: u8 = 0x2B;
const REG_T_RELOAD_H: u8 = 0x2C;
const REG_T_RELOAD_L: u8 = 0x2D;

/// Card reader operations needed by the reader thread.
pub trait TagReader: Send {
    fn init(&mut self) -> Result<()>;

    /// Arm the receive interrupt and send short REQIDL probes until a tag
    /// answers or `cancelled` reports true. Returns true when a tag woke
    /// the IRQ line.
    fn wait_for_tag(&mut self, cancelled: &mut dyn FnMut() -> bool) -> Result<bool>;

    /// Probe for an idle (not halted) tag in the field.
    fn request_idle(&mut self) -> Result<bool>;

    /// Probe for any tag in the field, halted ones included.
    fn request_all(&mut self) -> Result<bool>;

    /// Run the anticollision cascade, returning the 5-byte uid frame
    /// (4 uid bytes plus checksum) when exactly one tag answered cleanly.
    fn anticollision(&mut self) -> Result<Option<[u8; 5]>>;

    fn select(&mut self, uid: &[u8; 5]) -> Result<bool>;

    fn authenticate(
        &mut self,
        block: u8,
        key: &[u8; 6],
        key_type: KeyType,
        uid: &[u8; 5],
    ) -> Result<bool>;

    fn read_block(&mut self, block: u8) -> Result<Option<[u8; 16]>>;

    fn stop_crypto(&mut self) -> Result<()>;

    fn halt(&mut self) -> Result<()>;
}

enum Comm {
    Ok { data: Vec<u8>, bits: usize },
    NoReply,
}

pub struct Rc522 {
    spi: Box<dyn SpiBus>,
    irq: Box<dyn IrqListener>,
    reset: Box<dyn DigitalOutput>,
    irq_poll: Duration,
}

impl Rc522 {
    pub fn new(
        spi: Box<dyn SpiBus>,
        irq: Box<dyn IrqListener>,
        reset: Box<dyn DigitalOutput>,
    ) -> Self {
        Self { spi, irq, reset, irq_poll: Duration::from_millis(500) }
    }

    fn write_reg(&mut self, reg: u8, value: u8) -> Result<()> {
        let out = [(reg << 1) & 0x7E, value];
        let mut inp = [0u8; 2];
        self.spi.transfer(&mut inp, &out)
    }

    fn read_reg(&mut self, reg: u8) -> Result<u8> {
        let out = [((reg << 1) & 0x7E) | 0x80, 0];
        let mut inp = [0u8; 2];
        self.spi.transfer(&mut inp, &out)?;
        Ok(inp[1])
    }

    fn set_bits(&mut self, reg: u8, mask: u8) -> Result<()> {
        let value = self.read_reg(reg)?;
        self.write_reg(reg, value | mask)
    }

    fn clear_bits(&mut self, reg: u8, mask: u8) -> Result<()> {
        let value = self.read_reg(reg)?;
        self.write_reg(reg, value & !mask)
    }

    fn antenna_on(&mut self) -> Result<()> {
        let value = self.read_reg(REG_TX_CONTROL)?;
        if value & 0x03 != 0x03 {
            self.set_bits(REG_TX_CONTROL, 0x03)?;
        }
        Ok(())
    }

    fn calculate_crc(&mut self, data: &[u8]) -> Result<[u8; 2]> {
        self.clear_bits(REG_DIV_IRQ, 0x04)?;
        self.set_bits(REG_FIFO_LEVEL, 0x80)?;
        for &byte in data {
            self.write_reg(REG_FIFO_DATA, byte)?;
        }
        self.write_reg(REG_COMMAND, CMD_CALC_CRC)?;
        for _ in 0..255 {
            if self.read_reg(REG_DIV_IRQ)? & 0x04 != 0 {
                break;
            }
        }
        Ok([self.read_reg(REG_CRC_RESULT_L)?, self.read_reg(REG_CRC_RESULT_M)?])
    }

    /// Run one chip command with `data` in the FIFO and collect the reply.
    fn transceive(&mut self, command: u8, data: &[u8]) -> Result<Comm> {
        let irq_en: u8 = match command {
            CMD_MF_AUTHENT => 0x12,
            _ => 0x77,
        };
        self.write_reg(REG_COM_I_EN, irq_en | 0x80)?;
        self.clear_bits(REG_COM_IRQ, 0x80)?;
        self.set_bits(REG_FIFO_LEVEL, 0x80)?;
        self.write_reg(REG_COMMAND, CMD_IDLE)?;

        for &byte in data {
            self.write_reg(REG_FIFO_DATA, byte)?;
        }
        self.write_reg(REG_COMMAND, command)?;
        if command == CMD_TRANSCEIVE {
            self.set_bits(REG_BIT_FRAMING, 0x80)?;
        }

        let mut completed = false;
        for _ in 0..2000 {
            let irq = self.read_reg(REG_COM_IRQ)?;
            // RxIRq or IdleIRq means done, TimerIRq means the tag went quiet
            if irq & 0x30 != 0 {
                completed = true;
                break;
            }
            if irq & 0x01 != 0 {
                break;
            }
        }
        self.clear_bits(REG_BIT_FRAMING, 0x80)?;

        if !completed {
            return Ok(Comm::NoReply);
        }
        if self.read_reg(REG_ERROR)? & 0x1B != 0 {
            trace!(event = "rc522_comm_error");
            return Ok(Comm::NoReply);
        }

        let mut count = self.read_reg(REG_FIFO_LEVEL)? as usize;
        let last_bits = (self.read_reg(REG_CONTROL)? & 0x07) as usize;
        let bits =
            if last_bits != 0 { count.saturating_sub(1) * 8 + last_bits } else { count * 8 };
        count = count.clamp(1, 16);
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(self.read_reg(REG_FIFO_DATA)?);
        }
        Ok(Comm::Ok { data: out, bits })
    }

    fn request(&mut self, mode: u8) -> Result<bool> {
        self.write_reg(REG_BIT_FRAMING, 0x07)?;
        match self.transceive(CMD_TRANSCEIVE, &[mode])? {
            Comm::Ok { bits, .. } => Ok(bits == 0x10),
            Comm::NoReply => Ok(false),
        }
    }
}

impl TagReader for Rc522 {
    fn init(&mut self) -> Result<()> {
        self.reset.write(Level::High)?;
        self.write_reg(REG_COMMAND, CMD_SOFT_RESET)?;
        self.write_reg(REG_T_MODE, 0x8D)?;
        self.write_reg(REG_T_PRESCALER, 0x3E)?;
        self.write_reg(REG_T_RELOAD_L, 30)?;
        self.write_reg(REG_T_RELOAD_H, 0)?;
        self.write_reg(REG_TX_ASK, 0x40)?;
        self.write_reg(REG_MODE, 0x3D)?;
        self.antenna_on()?;
        debug!(event = "rc522_initialized");
        Ok(())
    }

    fn wait_for_tag(&mut self, cancelled: &mut dyn FnMut() -> bool) -> Result<bool> {
        self.write_reg(REG_COM_IRQ, 0x00)?;
        self.write_reg(REG_COM_I_EN, 0xA0)?;
        loop {
            if cancelled() {
                return Ok(false);
            }
            // fire one REQIDL probe, then sleep on the IRQ line
            self.write_reg(REG_FIFO_DATA, PICC_REQIDL)?;
            self.write_reg(REG_COMMAND, CMD_TRANSCEIVE)?;
            self.write_reg(REG_BIT_FRAMING, 0x87)?;
            if self.irq.wait_edge(Edge::Falling, self.irq_poll)? {
                return Ok(true);
            }
        }
    }

    fn request_idle(&mut self) -> Result<bool> {
        self.request(PICC_REQIDL)
    }

    fn request_all(&mut self) -> Result<bool> {
        self.request(PICC_REQALL)
    }

    fn anticollision(&mut self) -> Result<Option<[u8; 5]>> {
        self.write_reg(REG_BIT_FRAMING, 0x00)?;
        match self.transceive(CMD_TRANSCEIVE, &[PICC_ANTICOLL, 0x20])? {
            Comm::Ok { data, .. } if data.len() == 5 => {
                let check = data[0] ^ data[1] ^ data[2] ^ data[3];
                if check != data[4] {
                    debug!(event = "rc522_uid_checksum_mismatch");
                    return Ok(None);
                }
                let mut uid = [0u8; 5];
                uid.copy_from_slice(&data);
                Ok(Some(uid))
            }
            _ => Ok(None),
        }
    }

    fn select(&mut self, uid: &[u8; 5]) -> Result<bool> {
        let mut buf = vec![PICC_SELECT, 0x70];
        buf.extend_from_slice(uid);
        let crc = self.calculate_crc(&buf)?;
        buf.extend_from_slice(&crc);
        match self.transceive(CMD_TRANSCEIVE, &buf)? {
            Comm::Ok { bits, .. } => Ok(bits == 0x18),
            Comm::NoReply => Ok(false),
        }
    }

    fn authenticate(
        &mut self,
        block: u8,
        key: &[u8; 6],
        key_type: KeyType,
        uid: &[u8; 5],
    ) -> Result<bool> {
        let auth_mode = match key_type {
            KeyType::A => 0x60,
            KeyType::B => 0x61,
        };
        let mut buf = vec![auth_mode, block];
        buf.extend_from_slice(key);
        buf.extend_from_slice(&uid[..4]);
        match self.transceive(CMD_MF_AUTHENT, &buf)? {
            Comm::Ok { .. } => Ok(self.read_reg(REG_STATUS2)? & 0x08 != 0),
            Comm::NoReply => Ok(false),
        }
    }

    fn read_block(&mut self, block: u8) -> Result<Option<[u8; 16]>> {
        let mut buf = vec![PICC_READ, block];
        let crc = self.calculate_crc(&buf)?;
        buf.extend_from_slice(&crc);
        match self.transceive(CMD_TRANSCEIVE, &buf)? {
            Comm::Ok { data, .. } if data.len() == 16 => {
                let mut out = [0u8; 16];
                out.copy_from_slice(&data);
                Ok(Some(out))
            }
            _ => Ok(None),
        }
    }

    fn stop_crypto(&mut self) -> Result<()> {
        self.clear_bits(REG_STATUS2, 0x08)
    }

    fn halt(&mut self) -> Result<()> {
        let mut buf = vec![PICC_HALT, 0];
        let crc = self.calculate_crc(&buf)?;
        buf.extend_from_slice(&crc);
        // a halted tag does not answer, NoReply is the expected outcome
        self.transceive(CMD_TRANSCEIVE, &buf)?;
        Ok(())
    }
}

impl std::fmt::Debug for Rc522 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rc522").finish_non_exhaustive()
    }
}
