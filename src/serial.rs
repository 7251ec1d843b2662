//! Serial transfer (Link Cable) functions and structures.

use std::io::Cursor;

use greyboy_common::{
    data::{read_u16, read_u8, write_u16, write_u8},
    error::Error,
};

use crate::{
    consts::{SB_ADDR, SC_ADDR},
    state::StateComponent,
    warnln,
};

/// Number of T-cycles between two shifted bits when the
/// internal clock (8192 Hz) is selected.
pub const BIT_CYCLES: u16 = 512;

pub trait SerialDevice {
    /// Sends a byte (u8) through the serial connection, returning
    /// the byte received from the other end.
    ///
    /// This operation semantics is seen from the device perspective
    /// meaning that a byte is moved from the device to the Game Boy.
    fn send(&mut self) -> u8;

    /// Receives a byte (u8) from the serial connection,
    /// can be either another device or the host.
    ///
    /// This operation semantics is seen from the device perspective
    /// meaning that a byte is moved from the Game Boy to the device.
    fn receive(&mut self, byte: u8);

    /// Returns a short description of the serial device.
    fn description(&self) -> String;

    /// Returns a string describing the current state of the
    /// serial device, useful for debugging purposes.
    fn state(&self) -> String;
}

pub struct Serial {
    data: u8,
    shift_clock: bool,
    transferring: bool,
    timer: u16,
    bit_count: u8,
    byte_send: u8,
    byte_receive: u8,
    int_serial: bool,
    device: Box<dyn SerialDevice>,
}

impl Serial {
    pub fn new() -> Self {
        Self {
            data: 0x0,
            shift_clock: false,
            transferring: false,
            timer: 0,
            bit_count: 0,
            byte_send: 0x0,
            byte_receive: 0x0,
            int_serial: false,
            device: Box::<NullDevice>::default(),
        }
    }

    pub fn reset(&mut self) {
        self.data = 0x0;
        self.shift_clock = false;
        self.transferring = false;
        self.timer = 0;
        self.bit_count = 0;
        self.byte_send = 0x0;
        self.byte_receive = 0x0;
        self.int_serial = false;
    }

    /// Advances the serial clock by one T-cycle, the transfer only
    /// progresses when driven by the internal clock, an external
    /// clock never arrives on an unconnected link cable.
    pub fn clock(&mut self) {
        if !self.transferring || !self.shift_clock {
            return;
        }

        self.timer = self.timer.saturating_sub(1);
        if self.timer == 0 {
            let bit = (self.byte_receive >> (7 - self.bit_count)) & 0x01;
            self.data = (self.data << 1) | bit;

            self.tick_transfer();

            self.timer = BIT_CYCLES;
        }
    }

    pub fn read(&self, addr: u16) -> u8 {
        match addr {
            // 0xFF01 — SB: Serial transfer data
            SB_ADDR => self.data,
            // 0xFF02 — SC: Serial transfer control
            SC_ADDR =>
            {
                #[allow(clippy::bool_to_int_with_if)]
                (if self.shift_clock { 0x01 } else { 0x00 }
                    | if self.transferring { 0x80 } else { 0x00 }
                    | 0x7e)
            }
            _ => {
                warnln!("Reading from unknown Serial location 0x{:04x}", addr);
                #[allow(unreachable_code)]
                0xff
            }
        }
    }

    pub fn write(&mut self, addr: u16, value: u8) {
        match addr {
            // 0xFF01 — SB: Serial transfer data
            SB_ADDR => self.data = value,
            // 0xFF02 — SC: Serial transfer control
            SC_ADDR => {
                self.shift_clock = value & 0x01 == 0x01;
                self.transferring = value & 0x80 == 0x80;

                // a transfer request with the internal clock selected
                // starts the bit engine, the byte exchange with the
                // device is resolved eagerly and then shifted on time
                if self.transferring && self.shift_clock {
                    self.bit_count = 0;
                    self.timer = BIT_CYCLES;
                    self.byte_receive = self.device.send();
                    self.byte_send = self.data;
                }
            }
            _ => warnln!("Writing to unknown Serial location 0x{:04x}", addr),
        }
    }

    #[inline(always)]
    pub fn int_serial(&self) -> bool {
        self.int_serial
    }

    #[inline(always)]
    pub fn set_int_serial(&mut self, value: bool) {
        self.int_serial = value;
    }

    #[inline(always)]
    pub fn ack_serial(&mut self) {
        self.set_int_serial(false);
    }

    pub fn transferring(&self) -> bool {
        self.transferring
    }

    pub fn device(&self) -> &dyn SerialDevice {
        self.device.as_ref()
    }

    pub fn device_mut(&mut self) -> &mut dyn SerialDevice {
        self.device.as_mut()
    }

    pub fn set_device(&mut self, device: Box<dyn SerialDevice>) {
        self.device = device;
    }

    /// Ticks the transfer operation, incrementing the bit count
    /// and handling the transfer completion.
    fn tick_transfer(&mut self) {
        self.bit_count += 1;
        if self.bit_count == 8 {
            self.transferring = false;
            self.bit_count = 0;

            // the outgoing byte has been completely shifted
            // into the device, deliver it
            self.device.receive(self.byte_send);

            // signals the interrupt for the serial transfer
            // completion, a new byte is ready to be read
            self.int_serial = true;
        }
    }
}

impl StateComponent for Serial {
    fn state(&self) -> Result<Vec<u8>, Error> {
        let mut cursor = Cursor::new(vec![]);
        write_u8(&mut cursor, self.data)?;
        write_u8(&mut cursor, self.shift_clock as u8)?;
        write_u8(&mut cursor, self.transferring as u8)?;
        write_u16(&mut cursor, self.timer)?;
        write_u8(&mut cursor, self.bit_count)?;
        write_u8(&mut cursor, self.byte_send)?;
        write_u8(&mut cursor, self.byte_receive)?;
        write_u8(&mut cursor, self.int_serial as u8)?;
        Ok(cursor.into_inner())
    }

    fn set_state(&mut self, data: &[u8]) -> Result<(), Error> {
        let mut cursor = Cursor::new(data);
        let value = read_u8(&mut cursor)?;
        let shift_clock = read_u8(&mut cursor)? != 0;
        let transferring = read_u8(&mut cursor)? != 0;
        let timer = read_u16(&mut cursor)?;
        let bit_count = read_u8(&mut cursor)?;
        let byte_send = read_u8(&mut cursor)?;
        let byte_receive = read_u8(&mut cursor)?;
        let int_serial = read_u8(&mut cursor)? != 0;
        self.data = value;
        self.shift_clock = shift_clock;
        self.transferring = transferring;
        self.timer = timer;
        self.bit_count = bit_count;
        self.byte_send = byte_send;
        self.byte_receive = byte_receive;
        self.int_serial = int_serial;
        Ok(())
    }
}

impl Default for Serial {
    fn default() -> Self {
        Self::new()
    }
}

pub struct NullDevice {}

impl NullDevice {
    pub fn new() -> Self {
        Self {}
    }
}

impl SerialDevice for NullDevice {
    fn send(&mut self) -> u8 {
        0xff
    }

    fn receive(&mut self, _: u8) {}

    fn description(&self) -> String {
        String::from("Null")
    }

    fn state(&self) -> String {
        String::from("")
    }
}

impl Default for NullDevice {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::{Serial, BIT_CYCLES};

    #[test]
    fn test_transfer_duration() {
        let mut serial = Serial::new();
        serial.write(0xff01, 0xa5);
        serial.write(0xff02, 0x81);
        assert!(serial.transferring());

        // seven bits shifted, the transfer is still running
        for _ in 0..BIT_CYCLES * 7 {
            serial.clock();
        }
        assert!(serial.transferring());
        assert!(!serial.int_serial());

        // the eighth bit completes the exchange
        for _ in 0..BIT_CYCLES {
            serial.clock();
        }
        assert!(!serial.transferring());
        assert!(serial.int_serial());
        assert_eq!(serial.read(0xff02) & 0x80, 0x00);
    }

    #[test]
    fn test_unconnected_reads_ff() {
        let mut serial = Serial::new();
        serial.write(0xff01, 0x12);
        serial.write(0xff02, 0x81);
        for _ in 0..BIT_CYCLES * 8 {
            serial.clock();
        }
        assert_eq!(serial.read(0xff01), 0xff);
    }

    #[test]
    fn test_external_clock_never_ticks() {
        let mut serial = Serial::new();
        serial.write(0xff01, 0x12);
        serial.write(0xff02, 0x80);
        for _ in 0..BIT_CYCLES * 16 {
            serial.clock();
        }
        assert!(serial.transferring());
        assert!(!serial.int_serial());
    }
}
