//! Test harness helpers, including synthetic cartridge builders
//! that carry a valid header so they pass ROM validation.

use crate::{
    devices::buffer::BufferDevice,
    gb::GameBoy,
    rom::NINTENDO_LOGO,
};

#[derive(Default)]
pub struct TestOptions {
    /// Whether the machine boots directly into the post boot
    /// state, skipping the boot ROM. Defaults to true.
    pub skip_boot: Option<bool>,
}

/// Builds a 32 KiB (or larger) ROM image with a valid header:
/// canonical logo, cartridge type, size codes and checksum.
pub fn build_rom(rom_type: u8, rom_size: u8, ram_size: u8) -> Vec<u8> {
    let size = 0x8000usize << rom_size;
    let mut data = vec![0x00; size];
    data[0x0104..=0x0133].copy_from_slice(&NINTENDO_LOGO);
    data[0x0147] = rom_type;
    data[0x0148] = rom_size;
    data[0x0149] = ram_size;
    let mut sum: u8 = 0;
    for i in 0x0134..=0x014c {
        sum = sum.wrapping_sub(data[i]).wrapping_sub(1);
    }
    data[0x014d] = sum;
    data
}

/// Builds a plain 32 KiB ROM whose entry point jumps to the
/// provided program, placed right after the header.
pub fn build_rom_program(code: &[u8]) -> Vec<u8> {
    let mut data = build_rom(0x00, 0x00, 0x00);
    // NOP; JP 0x0150
    data[0x0100..0x0104].copy_from_slice(&[0x00, 0xc3, 0x50, 0x01]);
    data[0x0150..0x0150 + code.len()].copy_from_slice(code);
    data
}

/// Builds a machine with a buffer serial device attached and a
/// blank cartridge loaded, booted to the post boot state unless
/// requested otherwise.
pub fn build_test(options: TestOptions) -> GameBoy {
    let device = Box::<BufferDevice>::default();
    let mut game_boy = GameBoy::new();
    game_boy.load_rom_empty().unwrap();
    game_boy.attach_serial(device);
    if options.skip_boot.unwrap_or(true) {
        game_boy.boot();
    }
    game_boy
}

#[cfg(test)]
mod tests {
    use super::{build_rom, build_rom_program};

    #[test]
    fn test_build_rom_header() {
        let data = build_rom(0x01, 0x02, 0x03);
        assert_eq!(data.len(), 0x20000);
        assert_eq!(data[0x0147], 0x01);

        let mut sum: u8 = 0;
        for i in 0x0134..=0x014c {
            sum = sum.wrapping_sub(data[i]).wrapping_sub(1);
        }
        assert_eq!(data[0x014d], sum);
    }

    #[test]
    fn test_build_rom_program_entry() {
        let data = build_rom_program(&[0x18, 0xfe]);
        assert_eq!(&data[0x0101..0x0104], &[0xc3, 0x50, 0x01]);
        assert_eq!(data[0x0150], 0x18);
    }
}
