//! MMU (Memory Management Unit) functions and structures.
//!
//! Routes every 16 bit address to the owning component. Two access
//! paths exist: the raw `read`/`write` pair used by the DMA engine and
//! by host tooling, and the `cpu_read`/`cpu_write` pair that applies
//! the bus arbitration rules (DMA lock out, PPU mode blocking of VRAM
//! and OAM) that the CPU observes.

use std::io::Cursor;

use greyboy_common::{
    data::{read_into, read_u8, write_bytes, write_u8},
    error::Error,
};

use crate::{
    consts::{BOOT_ADDR, DMA_ADDR, IE_ADDR, IF_ADDR, P1_ADDR},
    dma::Dma,
    gb::Components,
    pad::Pad,
    ppu::{Ppu, PpuMode},
    rom::Cartridge,
    serial::Serial,
    state::StateComponent,
    timer::Timer,
    warnln,
};

/// Size of the DMG boot ROM overlay.
pub const BOOT_SIZE: usize = 256;

/// Size of the work RAM (two fixed 4KB banks).
pub const RAM_SIZE: usize = 8192;

pub struct Mmu {
    /// Register that controls the interrupts that are considered
    /// to be enabled and should be triggered.
    pub ie: u8,

    /// Reference to the PPU (Picture Processing Unit) that is going
    /// to be used both for VRAM/OAM/HRAM access and to forward
    /// some of the access operations.
    ppu: Ppu,

    /// Reference to the DMA (Direct Memory Access) controller that
    /// owns the OAM transfer state.
    dma: Dma,

    /// Reference to the Gamepad structure that is going to control
    /// the I/O access to this device.
    pad: Pad,

    /// The timer controller to be used as part of the I/O access
    /// that is memory mapped.
    timer: Timer,

    /// The serial data transfer controller to be used to control the
    /// link cable connection, this component is memory mapped.
    serial: Serial,

    /// The cartridge ROM that is currently loaded into the system,
    /// going to be used to access ROM and external RAM banks.
    rom: Cartridge,

    /// Flag that controls the access to the boot ROM overlay in the
    /// 0x0000-0x00FF memory area, once unset by a write to the BOOT
    /// register the overlay is locked off for good.
    boot_active: bool,

    /// Buffer used to store the boot ROM, the code executed at
    /// the beginning of the Game Boy power on sequence.
    boot: Vec<u8>,

    /// Buffer that is used to store the work RAM of the system,
    /// mapped in range 0xC000-0xDFFF and echoed at 0xE000-0xFDFF.
    ram: [u8; RAM_SIZE],
}

impl Mmu {
    pub fn new(components: Components) -> Self {
        Self {
            ppu: components.ppu,
            dma: components.dma,
            pad: components.pad,
            timer: components.timer,
            serial: components.serial,
            rom: Cartridge::new(),
            boot_active: true,
            boot: vec![0x00; BOOT_SIZE],
            ram: [0x00; RAM_SIZE],
            ie: 0x0,
        }
    }

    pub fn reset(&mut self) {
        self.rom = Cartridge::new();
        self.boot_active = true;
        self.boot = vec![0x00; BOOT_SIZE];
        self.ram = [0x00; RAM_SIZE];
        self.ie = 0x0;
    }

    /// Reads a byte from the given address with no access
    /// arbitration, the view of the bus that the DMA engine
    /// and host tooling get.
    pub fn read(&self, addr: u16) -> u8 {
        match addr {
            // 0x0000-0x0FFF - BOOT (256 B) + ROM0 start
            0x0000..=0x0fff => {
                if self.boot_active && addr <= 0x00ff {
                    return self.boot[addr as usize];
                }
                self.rom.read(addr)
            }

            // 0x1000-0x3FFF - ROM 0
            // 0x4000-0x7FFF - ROM 1 (Banked)
            0x1000..=0x7fff => self.rom.read(addr),

            // 0x8000-0x9FFF - Graphics: VRAM (8 KB)
            0x8000..=0x9fff => self.ppu.read(addr),

            // 0xA000-0xBFFF - External RAM (8 KB)
            0xa000..=0xbfff => self.rom.read(addr),

            // 0xC000-0xDFFF - Working RAM (8 KB)
            // 0xE000-0xFDFF - Working RAM echo
            0xc000..=0xfdff => self.ram[(addr & 0x1fff) as usize],

            // 0xFE00-0xFE9F - Object attribute memory (OAM)
            0xfe00..=0xfe9f => self.ppu.read(addr),

            // 0xFEA0-0xFEFF - Not Usable
            0xfea0..=0xfeff => 0xff,

            // 0xFF00 - Joypad input
            P1_ADDR => self.pad.read(addr),

            // 0xFF01-0xFF02 - Serial data transfer
            0xff01..=0xff02 => self.serial.read(addr),

            // 0xFF04-0xFF07 - Timer and divider
            0xff04..=0xff07 => self.timer.read(addr),

            // 0xFF0F — IF: Interrupt flag
            IF_ADDR => self.if_register(),

            // 0xFF10-0xFF3F — Audio registers, the APU is not
            // emulated and the range reads as open bus
            0xff10..=0xff3f => 0xff,

            // 0xFF40-0xFF45 - PPU registers
            // 0xFF47-0xFF4B - PPU registers
            0xff40..=0xff45 | 0xff47..=0xff4b => self.ppu.read(addr),

            // 0xFF46 — DMA: OAM DMA source address & start
            DMA_ADDR => self.dma.read(addr),

            // 0xFF50 - Boot overlay control
            BOOT_ADDR => 0xfe | u8::from(!self.boot_active),

            // 0xFF80-0xFFFE - High RAM (HRAM)
            0xff80..=0xfffe => self.ppu.read(addr),

            // 0xFFFF — IE: Interrupt enable
            IE_ADDR => self.ie,

            addr => {
                warnln!("Reading from unknown location 0x{:04x}", addr);
                #[allow(unreachable_code)]
                0xff
            }
        }
    }

    /// Writes a byte to the given address with no access
    /// arbitration applied.
    pub fn write(&mut self, addr: u16, value: u8) {
        match addr {
            // 0x0000-0x7FFF - Cartridge ROM / MBC registers
            0x0000..=0x7fff => self.rom.write(addr, value),

            // 0x8000-0x9FFF - Graphics: VRAM (8 KB)
            0x8000..=0x9fff => self.ppu.write(addr, value),

            // 0xA000-0xBFFF - External RAM (8 KB)
            0xa000..=0xbfff => self.rom.write(addr, value),

            // 0xC000-0xDFFF - Working RAM (8 KB)
            // 0xE000-0xFDFF - Working RAM echo
            0xc000..=0xfdff => self.ram[(addr & 0x1fff) as usize] = value,

            // 0xFE00-0xFE9F - Object attribute memory (OAM)
            0xfe00..=0xfe9f => self.ppu.write(addr, value),

            // 0xFEA0-0xFEFF - Not Usable
            0xfea0..=0xfeff => {}

            // 0xFF00 - Joypad input
            P1_ADDR => self.pad.write(addr, value),

            // 0xFF01-0xFF02 - Serial data transfer
            0xff01..=0xff02 => self.serial.write(addr, value),

            // 0xFF04-0xFF07 - Timer and divider
            0xff04..=0xff07 => self.timer.write(addr, value),

            // 0xFF0F — IF: Interrupt flag
            IF_ADDR => self.set_if_register(value),

            // 0xFF10-0xFF3F — Audio registers, ignored
            0xff10..=0xff3f => {}

            // 0xFF40-0xFF45 - PPU registers
            // 0xFF47-0xFF4B - PPU registers
            0xff40..=0xff45 | 0xff47..=0xff4b => self.ppu.write(addr, value),

            // 0xFF46 — DMA: OAM DMA source address & start
            DMA_ADDR => self.dma.write(addr, value),

            // 0xFF50 - Boot overlay control, any write locks the
            // overlay off permanently
            BOOT_ADDR => self.boot_active = false,

            // 0xFF80-0xFFFE - High RAM (HRAM)
            0xff80..=0xfffe => self.ppu.write(addr, value),

            // 0xFFFF — IE: Interrupt enable
            IE_ADDR => self.ie = value,

            addr => warnln!("Writing to unknown location 0x{:04x}", addr),
        }
    }

    /// CPU view of a read: while a DMA transfer is running every
    /// bus except HRAM (and the DMA register itself) reads as open
    /// bus, and the PPU blocks VRAM/OAM during the modes in which
    /// it owns them.
    pub fn cpu_read(&self, addr: u16) -> u8 {
        if self.dma.active() && !Self::dma_accessible(addr) {
            return 0xff;
        }
        match addr {
            0x8000..=0x9fff if self.vram_blocked() => 0xff,
            0xfe00..=0xfe9f if self.oam_blocked() => 0xff,
            _ => self.read(addr),
        }
    }

    /// CPU view of a write, conflicting requests resolve in favor
    /// of the bus owner and the CPU write is dropped.
    pub fn cpu_write(&mut self, addr: u16, value: u8) {
        if self.dma.active() && (0xfe00..=0xfe9f).contains(&addr) {
            return;
        }
        match addr {
            0x8000..=0x9fff if self.vram_blocked() => (),
            0xfe00..=0xfe9f if self.oam_blocked() => (),
            _ => self.write(addr, value),
        }
    }

    fn dma_accessible(addr: u16) -> bool {
        (0xff80..=0xfffe).contains(&addr) || addr == DMA_ADDR
    }

    fn vram_blocked(&self) -> bool {
        self.ppu.lcd_on() && self.ppu.mode() == PpuMode::PixelTransfer
    }

    fn oam_blocked(&self) -> bool {
        self.ppu.lcd_on()
            && matches!(self.ppu.mode(), PpuMode::OamScan | PpuMode::PixelTransfer)
    }

    /// Assembles the IF register from the distributed per
    /// component interrupt lines, the upper three bits are
    /// hardwired to one.
    pub fn if_register(&self) -> u8 {
        #[allow(clippy::bool_to_int_with_if)]
        (if self.ppu.int_vblank() { 0x01 } else { 0x00 }
            | if self.ppu.int_stat() { 0x02 } else { 0x00 }
            | if self.timer.int_tima() { 0x04 } else { 0x00 }
            | if self.serial.int_serial() { 0x08 } else { 0x00 }
            | if self.pad.int_pad() { 0x10 } else { 0x00 }
            | 0xe0)
    }

    pub fn set_if_register(&mut self, value: u8) {
        self.ppu.set_int_vblank(value & 0x01 == 0x01);
        self.ppu.set_int_stat(value & 0x02 == 0x02);
        self.timer.set_int_tima(value & 0x04 == 0x04);
        self.serial.set_int_serial(value & 0x08 == 0x08);
        self.pad.set_int_pad(value & 0x10 == 0x10);
    }

    /// Interrupts that are both pending and enabled, the value
    /// the CPU samples on every machine cycle.
    #[inline(always)]
    pub fn pending_interrupts(&self) -> u8 {
        self.if_register() & self.ie & 0x1f
    }

    /// Acknowledges the interrupt with the given bit index,
    /// clearing its line in the owning component.
    pub fn ack_interrupt(&mut self, index: u8) {
        match index {
            0 => self.ppu.ack_vblank(),
            1 => self.ppu.ack_stat(),
            2 => self.timer.ack_tima(),
            3 => self.serial.ack_serial(),
            4 => self.pad.ack_pad(),
            _ => warnln!("Acknowledging unknown interrupt {}", index),
        }
    }

    /// Moves one byte of an active DMA transfer, called once
    /// per machine cycle.
    pub fn clock_dma(&mut self) {
        if !self.dma.active() {
            return;
        }
        let data = self.read(self.dma.source_addr());
        self.ppu.write(0xfe00 + self.dma.cursor(), data);
        self.dma.advance();
    }

    pub fn ppu(&mut self) -> &mut Ppu {
        &mut self.ppu
    }

    pub fn ppu_i(&self) -> &Ppu {
        &self.ppu
    }

    pub fn dma(&mut self) -> &mut Dma {
        &mut self.dma
    }

    pub fn dma_i(&self) -> &Dma {
        &self.dma
    }

    pub fn pad(&mut self) -> &mut Pad {
        &mut self.pad
    }

    pub fn pad_i(&self) -> &Pad {
        &self.pad
    }

    pub fn timer(&mut self) -> &mut Timer {
        &mut self.timer
    }

    pub fn timer_i(&self) -> &Timer {
        &self.timer
    }

    pub fn serial(&mut self) -> &mut Serial {
        &mut self.serial
    }

    pub fn serial_i(&self) -> &Serial {
        &self.serial
    }

    pub fn rom(&mut self) -> &mut Cartridge {
        &mut self.rom
    }

    pub fn rom_i(&self) -> &Cartridge {
        &self.rom
    }

    pub fn set_rom(&mut self, rom: Cartridge) {
        self.rom = rom;
    }

    pub fn boot_active(&self) -> bool {
        self.boot_active
    }

    pub fn set_boot_active(&mut self, value: bool) {
        self.boot_active = value;
    }

    pub fn write_boot(&mut self, addr: u16, buffer: &[u8]) {
        self.boot[addr as usize..addr as usize + buffer.len()].clone_from_slice(buffer);
    }

    pub fn ram(&self) -> &[u8; RAM_SIZE] {
        &self.ram
    }
}

impl StateComponent for Mmu {
    fn state(&self) -> Result<Vec<u8>, Error> {
        let mut cursor = Cursor::new(vec![]);
        write_u8(&mut cursor, self.ie)?;
        write_u8(&mut cursor, self.boot_active as u8)?;
        write_bytes(&mut cursor, &self.ram)?;
        Ok(cursor.into_inner())
    }

    fn set_state(&mut self, data: &[u8]) -> Result<(), Error> {
        let mut cursor = Cursor::new(data);
        let ie = read_u8(&mut cursor)?;
        let boot_active = read_u8(&mut cursor)? != 0;
        let mut ram = [0u8; RAM_SIZE];
        read_into(&mut cursor, &mut ram)?;
        self.ie = ie;
        self.boot_active = boot_active;
        self.ram = ram;
        Ok(())
    }
}

impl Default for Mmu {
    fn default() -> Self {
        Mmu::new(Components::default())
    }
}

#[cfg(test)]
mod tests {
    use super::Mmu;

    #[test]
    fn test_not_usable_region() {
        let mut mmu = Mmu::default();
        assert_eq!(mmu.read(0xfea0), 0xff);
        assert_eq!(mmu.read(0xfeff), 0xff);
        mmu.write(0xfea0, 0x12);
        assert_eq!(mmu.read(0xfea0), 0xff);
    }

    #[test]
    fn test_echo_ram() {
        let mut mmu = Mmu::default();
        mmu.write(0xc123, 0x42);
        assert_eq!(mmu.read(0xe123), 0x42);
        mmu.write(0xfdff, 0x24);
        assert_eq!(mmu.read(0xddff), 0x24);
    }

    #[test]
    fn test_if_upper_bits_hardwired() {
        let mut mmu = Mmu::default();
        assert_eq!(mmu.read(0xff0f) & 0xe0, 0xe0);
        mmu.write(0xff0f, 0x00);
        assert_eq!(mmu.read(0xff0f), 0xe0);
        mmu.write(0xff0f, 0x1f);
        assert_eq!(mmu.read(0xff0f), 0xff);
    }

    #[test]
    fn test_boot_overlay_locks_off() {
        let mut mmu = Mmu::default();
        mmu.write_boot(0x0000, &[0x18, 0xfe]);
        assert!(mmu.boot_active());
        assert_eq!(mmu.read(0x0000), 0x18);

        // any write to the BOOT register disables the overlay
        // for good, including a zero write
        mmu.write(0xff50, 0x01);
        assert!(!mmu.boot_active());
        assert_eq!(mmu.read(0xff50) & 0x01, 0x01);
        mmu.write(0xff50, 0x00);
        assert!(!mmu.boot_active());
    }

    #[test]
    fn test_vram_blocked_during_pixel_transfer() {
        let mut mmu = Mmu::default();
        mmu.write(0x8000, 0x42);
        assert_eq!(mmu.cpu_read(0x8000), 0x42);

        // switch the LCD on and advance into pixel transfer
        mmu.write(0xff40, 0x80);
        for _ in 0..85 {
            mmu.ppu().clock();
        }
        assert_eq!(mmu.cpu_read(0x8000), 0xff);
        mmu.cpu_write(0x8000, 0x24);
        assert_eq!(mmu.read(0x8000), 0x42);
    }

    #[test]
    fn test_oam_blocked_during_scan() {
        let mut mmu = Mmu::default();
        mmu.write(0xfe00, 0x42);
        mmu.write(0xff40, 0x80);
        mmu.ppu().clock();
        assert_eq!(mmu.cpu_read(0xfe00), 0xff);
        assert_eq!(mmu.read(0xfe00), 0x42);
    }

    #[test]
    fn test_dma_locks_cpu_out() {
        let mut mmu = Mmu::default();
        mmu.write(0xc000, 0x42);
        mmu.write(0xff80, 0x24);
        mmu.cpu_write(0xff46, 0xc0);

        // everything but HRAM and the DMA register reads 0xFF
        assert_eq!(mmu.cpu_read(0xc000), 0xff);
        assert_eq!(mmu.cpu_read(0xff80), 0x24);
        assert_eq!(mmu.cpu_read(0xff46), 0xc0);

        // run the 160 machine cycles of the transfer
        for _ in 0..160 {
            mmu.clock_dma();
        }
        assert_eq!(mmu.cpu_read(0xc000), 0x42);
        assert_eq!(mmu.read(0xfe00), 0x42);
        assert_eq!(mmu.read(0xfe9f), mmu.read(0xc09f));
    }
}
