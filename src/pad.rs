//! Joypad (P1 matrix) functions and structures.

use std::io::Cursor;

use greyboy_common::{
    data::{read_u8, write_u8},
    error::Error,
};

use crate::{state::StateComponent, warnln};

pub struct Pad {
    down: bool,
    up: bool,
    left: bool,
    right: bool,
    start: bool,
    select: bool,
    b: bool,
    a: bool,
    action_selected: bool,
    direction_selected: bool,
    int_pad: bool,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PadKey {
    Up,
    Down,
    Left,
    Right,
    Start,
    Select,
    A,
    B,
}

impl Pad {
    pub fn new() -> Self {
        Self {
            down: false,
            up: false,
            left: false,
            right: false,
            start: false,
            select: false,
            b: false,
            a: false,
            action_selected: false,
            direction_selected: false,
            int_pad: false,
        }
    }

    pub fn reset(&mut self) {
        self.down = false;
        self.up = false;
        self.left = false;
        self.right = false;
        self.start = false;
        self.select = false;
        self.b = false;
        self.a = false;
        self.action_selected = false;
        self.direction_selected = false;
        self.int_pad = false;
    }

    pub fn read(&self, addr: u16) -> u8 {
        match addr & 0x00ff {
            0x0000 => {
                // inputs are active low, both selection groups may be
                // enabled at once in which case the nibbles are merged
                let mut nibble = 0x0f;
                if self.direction_selected {
                    nibble &= if self.right { 0x00 } else { 0x01 }
                        | if self.left { 0x00 } else { 0x02 }
                        | if self.up { 0x00 } else { 0x04 }
                        | if self.down { 0x00 } else { 0x08 };
                }
                if self.action_selected {
                    nibble &= if self.a { 0x00 } else { 0x01 }
                        | if self.b { 0x00 } else { 0x02 }
                        | if self.select { 0x00 } else { 0x04 }
                        | if self.start { 0x00 } else { 0x08 };
                }
                0xc0 | if self.direction_selected { 0x00 } else { 0x10 }
                    | if self.action_selected { 0x00 } else { 0x20 }
                    | nibble
            }
            _ => {
                warnln!("Reading from unknown Pad location 0x{:04x}", addr);
                #[allow(unreachable_code)]
                0xff
            }
        }
    }

    pub fn write(&mut self, addr: u16, value: u8) {
        match addr & 0x00ff {
            0x0000 => {
                self.direction_selected = value & 0x10 == 0x00;
                self.action_selected = value & 0x20 == 0x00;
            }
            _ => warnln!("Writing to unknown Pad location 0x{:04x}", addr),
        }
    }

    pub fn key_press(&mut self, key: PadKey) {
        let action = matches!(key, PadKey::Start | PadKey::Select | PadKey::A | PadKey::B);
        match key {
            PadKey::Up => self.up = true,
            PadKey::Down => self.down = true,
            PadKey::Left => self.left = true,
            PadKey::Right => self.right = true,
            PadKey::Start => self.start = true,
            PadKey::Select => self.select = true,
            PadKey::A => self.a = true,
            PadKey::B => self.b = true,
        }

        // a selected input line going high to low raises
        // the joypad interrupt
        if (action && self.action_selected) || (!action && self.direction_selected) {
            self.int_pad = true;
        }
    }

    pub fn key_lift(&mut self, key: PadKey) {
        match key {
            PadKey::Up => self.up = false,
            PadKey::Down => self.down = false,
            PadKey::Left => self.left = false,
            PadKey::Right => self.right = false,
            PadKey::Start => self.start = false,
            PadKey::Select => self.select = false,
            PadKey::A => self.a = false,
            PadKey::B => self.b = false,
        }
    }

    /// Whether any of the eight keys is currently held, used
    /// to release the CPU from the STOP state.
    pub fn any_pressed(&self) -> bool {
        self.down
            || self.up
            || self.left
            || self.right
            || self.start
            || self.select
            || self.b
            || self.a
    }

    #[inline(always)]
    pub fn int_pad(&self) -> bool {
        self.int_pad
    }

    #[inline(always)]
    pub fn set_int_pad(&mut self, value: bool) {
        self.int_pad = value;
    }

    #[inline(always)]
    pub fn ack_pad(&mut self) {
        self.set_int_pad(false);
    }
}

impl StateComponent for Pad {
    fn state(&self) -> Result<Vec<u8>, Error> {
        let mut cursor = Cursor::new(vec![]);
        let mut keys = 0x00u8;
        for (index, pressed) in [
            self.down,
            self.up,
            self.left,
            self.right,
            self.start,
            self.select,
            self.b,
            self.a,
        ]
        .into_iter()
        .enumerate()
        {
            if pressed {
                keys |= 1 << index;
            }
        }
        write_u8(&mut cursor, keys)?;
        write_u8(&mut cursor, self.action_selected as u8)?;
        write_u8(&mut cursor, self.direction_selected as u8)?;
        write_u8(&mut cursor, self.int_pad as u8)?;
        Ok(cursor.into_inner())
    }

    fn set_state(&mut self, data: &[u8]) -> Result<(), Error> {
        let mut cursor = Cursor::new(data);
        let keys = read_u8(&mut cursor)?;
        let action_selected = read_u8(&mut cursor)? != 0;
        let direction_selected = read_u8(&mut cursor)? != 0;
        let int_pad = read_u8(&mut cursor)? != 0;
        self.down = keys & 0x01 != 0;
        self.up = keys & 0x02 != 0;
        self.left = keys & 0x04 != 0;
        self.right = keys & 0x08 != 0;
        self.start = keys & 0x10 != 0;
        self.select = keys & 0x20 != 0;
        self.b = keys & 0x40 != 0;
        self.a = keys & 0x80 != 0;
        self.action_selected = action_selected;
        self.direction_selected = direction_selected;
        self.int_pad = int_pad;
        Ok(())
    }
}

impl Default for Pad {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::{Pad, PadKey};

    #[test]
    fn test_matrix_selection() {
        let mut pad = Pad::new();
        pad.key_press(PadKey::A);

        // no group selected, inputs read released
        pad.write(0xff00, 0x30);
        assert_eq!(pad.read(0xff00) & 0x0f, 0x0f);

        // action group selected, A reads pressed (bit 0 clear)
        pad.write(0xff00, 0x10);
        assert_eq!(pad.read(0xff00) & 0x0f, 0x0e);

        // direction group selected, A not visible
        pad.write(0xff00, 0x20);
        assert_eq!(pad.read(0xff00) & 0x0f, 0x0f);
    }

    #[test]
    fn test_interrupt_on_press() {
        let mut pad = Pad::new();
        pad.write(0xff00, 0x10);
        assert!(!pad.int_pad());

        pad.key_press(PadKey::Up);
        assert!(!pad.int_pad());

        pad.key_press(PadKey::Start);
        assert!(pad.int_pad());

        pad.ack_pad();
        assert!(!pad.int_pad());
    }

    #[test]
    fn test_merged_groups() {
        let mut pad = Pad::new();
        pad.key_press(PadKey::Right);
        pad.key_press(PadKey::B);

        pad.write(0xff00, 0x00);
        assert_eq!(pad.read(0xff00) & 0x0f, 0x0c);
    }
}
