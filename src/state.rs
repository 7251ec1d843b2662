//! Save state infrastructure for the complete machine.
//!
//! Every stateful component implements [`StateComponent`] and serializes
//! itself into a little-endian byte stream. The top level container adds
//! a magic value, a format version and a CRC32 of the payload so that a
//! foreign or truncated blob is rejected before any component is touched.

use std::io::Cursor;

use greyboy_common::{
    data::{read_bytes, read_u16, read_u32, read_u64, write_bytes, write_u16, write_u32, write_u64},
    error::Error,
};
use greyboy_hashing::crc32::crc32;

use crate::gb::GameBoy;

/// Magic string that prefixes every save state blob.
pub const STATE_MAGIC: &[u8; 4] = b"GBSS";

/// Current version of the save state format, bumped on
/// every structural change.
pub const STATE_VERSION: u16 = 1;

/// Number of component blocks that the payload carries,
/// in the fixed serialization order.
const STATE_BLOCKS: usize = 9;

pub trait StateComponent {
    /// Serializes the component state into a byte buffer.
    fn state(&self) -> Result<Vec<u8>, Error>;

    /// Restores the component state from the given byte buffer.
    ///
    /// Implementations parse every field before mutating themselves
    /// so that a malformed buffer leaves the component unchanged.
    fn set_state(&mut self, data: &[u8]) -> Result<(), Error>;
}

impl GameBoy {
    /// Serializes the complete machine state into a self-describing
    /// byte stream.
    pub fn save_state(&self) -> Result<Vec<u8>, Error> {
        let mut payload = Cursor::new(vec![]);
        let mut clock = Cursor::new(vec![]);
        write_u64(&mut clock, self.clock())?;
        let blocks: [Vec<u8>; STATE_BLOCKS] = [
            clock.into_inner(),
            self.cpu_i().state()?,
            self.mmu_i().state()?,
            self.ppu_i().state()?,
            self.timer_i().state()?,
            self.dma_i().state()?,
            self.serial_i().state()?,
            self.pad_i().state()?,
            self.rom_i().state()?,
        ];
        for block in &blocks {
            write_u32(&mut payload, block.len() as u32)?;
            write_bytes(&mut payload, block)?;
        }
        let payload = payload.into_inner();

        let mut cursor = Cursor::new(vec![]);
        write_bytes(&mut cursor, STATE_MAGIC)?;
        write_u16(&mut cursor, STATE_VERSION)?;
        write_u32(&mut cursor, crc32(&payload))?;
        write_bytes(&mut cursor, &payload)?;
        Ok(cursor.into_inner())
    }

    /// Restores the complete machine state from the given byte stream.
    ///
    /// Fails with [`Error::StateCorrupt`] or [`Error::StateVersionMismatch`]
    /// without touching the current state when the blob is not usable.
    pub fn load_state(&mut self, data: &[u8]) -> Result<(), Error> {
        let mut cursor = Cursor::new(data);
        let magic = read_bytes(&mut cursor, 4).map_err(|_| Error::StateCorrupt)?;
        if magic != STATE_MAGIC {
            return Err(Error::StateCorrupt);
        }
        let version = read_u16(&mut cursor).map_err(|_| Error::StateCorrupt)?;
        if version != STATE_VERSION {
            return Err(Error::StateVersionMismatch);
        }
        let checksum = read_u32(&mut cursor).map_err(|_| Error::StateCorrupt)?;
        let payload = &data[cursor.position() as usize..];
        if crc32(payload) != checksum {
            return Err(Error::StateCorrupt);
        }

        let mut blocks: Vec<&[u8]> = vec![];
        let mut cursor = Cursor::new(payload);
        for _ in 0..STATE_BLOCKS {
            let length = read_u32(&mut cursor).map_err(|_| Error::StateCorrupt)? as usize;
            let start = cursor.position() as usize;
            if start + length > payload.len() {
                return Err(Error::StateCorrupt);
            }
            blocks.push(&payload[start..start + length]);
            cursor.set_position((start + length) as u64);
        }
        if cursor.position() as usize != payload.len() {
            return Err(Error::StateCorrupt);
        }

        let mut clock = Cursor::new(blocks[0]);
        let clock = read_u64(&mut clock).map_err(|_| Error::StateCorrupt)?;
        self.set_clock(clock);
        self.cpu().set_state(blocks[1])?;
        self.mmu().set_state(blocks[2])?;
        self.ppu().set_state(blocks[3])?;
        self.timer().set_state(blocks[4])?;
        self.dma().set_state(blocks[5])?;
        self.serial().set_state(blocks[6])?;
        self.pad().set_state(blocks[7])?;
        self.rom().set_state(blocks[8])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::test::build_test;

    use super::{STATE_MAGIC, STATE_VERSION};

    #[test]
    fn test_save_state_header() {
        let game_boy = build_test(Default::default());
        let state = game_boy.save_state().unwrap();
        assert_eq!(&state[0..4], STATE_MAGIC);
        assert_eq!(u16::from_le_bytes([state[4], state[5]]), STATE_VERSION);
    }

    #[test]
    fn test_load_state_rejects_garbage() {
        let mut game_boy = build_test(Default::default());
        assert!(game_boy.load_state(b"not a state").is_err());
    }

    #[test]
    fn test_load_state_rejects_bad_crc() {
        let mut game_boy = build_test(Default::default());
        let mut state = game_boy.save_state().unwrap();
        let last = state.len() - 1;
        state[last] ^= 0xff;
        assert!(game_boy.load_state(&state).is_err());
    }

    #[test]
    fn test_round_trip_is_noop() {
        let mut game_boy = build_test(Default::default());
        game_boy.clocks(1024);

        let state = game_boy.save_state().unwrap();
        game_boy.clocks(333);
        game_boy.load_state(&state).unwrap();

        assert_eq!(game_boy.save_state().unwrap(), state);
    }
}
