//! Game Boy emulation entrypoint and associated functions and structures.
//!
//! Most of the meaningful publicly available functions and structures to
//! build a working emulator should be present here. The [`GameBoy`]
//! structure owns every component and drives them in lock step, one
//! T-cycle at a time.
//!
//! # Examples
//!
//! Creates a simple [`GameBoy`] instance, skips the boot sequence and
//! runs a single frame of emulation.
//!
//! ```rust
//! use greyboy::gb::GameBoy;
//! let mut game_boy = GameBoy::new();
//! game_boy.load_rom_empty().unwrap();
//! game_boy.boot();
//! let cycles = game_boy.frame();
//! println!("Ran {} cycles", cycles);
//! ```

use std::fmt::{self, Display, Formatter};

use greyboy_common::{error::Error, util::read_file};

use crate::{
    cpu::Cpu,
    data::BootRom,
    dma::Dma,
    info::Info,
    mmu::Mmu,
    pad::{Pad, PadKey},
    ppu::{Ppu, PpuMode, FRAME_BUFFER_RGB_SIZE, FRAME_BUFFER_SIZE},
    rom::Cartridge,
    serial::{Serial, SerialDevice},
    timer::{Timer, DIV_POST_BOOT},
};

/// Aggregation structure allowing the bundling of
/// all the components of a GameBoy into a single
/// element for easy access.
#[derive(Default)]
pub struct Components {
    pub ppu: Ppu,
    pub dma: Dma,
    pub pad: Pad,
    pub timer: Timer,
    pub serial: Serial,
}

/// Snapshot of the CPU and PPU registers, useful for
/// debugging and for host UIs.
pub struct Registers {
    pub pc: u16,
    pub sp: u16,
    pub a: u8,
    pub b: u8,
    pub c: u8,
    pub d: u8,
    pub e: u8,
    pub h: u8,
    pub l: u8,
    pub scy: u8,
    pub scx: u8,
    pub wy: u8,
    pub wx: u8,
    pub ly: u8,
    pub lyc: u8,
}

/// Top level structure that abstracts the usage of the
/// Game Boy system under the greyboy emulator.
///
/// Should serve as the main entry-point API.
pub struct GameBoy {
    /// Reference to the Game Boy CPU component, which in turn
    /// owns the MMU and through it every other component.
    cpu: Cpu,

    /// Monotonic T-cycle counter, the two low bits select the
    /// phase within the current machine cycle.
    clock: u64,

    /// The boot ROM that will (or was) used to boot the
    /// current Game Boy system.
    boot_rom: BootRom,
}

impl GameBoy {
    /// The logic frequency of the Game Boy CPU in Hz.
    pub const CPU_FREQ: u32 = 4194304;

    /// The visual frequency (refresh rate) of the Game Boy,
    /// close to 60 Hz.
    pub const VISUAL_FREQ: f32 = 59.7275;

    /// The T-cycles taken to run a complete frame loop in the
    /// Game Boy's PPU.
    pub const LCD_CYCLES: u32 = 70224;

    pub fn new() -> Self {
        let components = Components::default();
        let mmu = Mmu::new(components);
        let cpu = Cpu::new(mmu);
        Self {
            cpu,
            clock: 0,
            boot_rom: BootRom::None,
        }
    }

    pub fn reset(&mut self) {
        self.ppu().reset();
        self.timer().reset();
        self.serial().reset();
        self.dma().reset();
        self.pad().reset();
        self.mmu().reset();
        self.cpu.reset();
        self.clock = 0;
    }

    /// Advances the machine by exactly one T-cycle, ticking the
    /// components in the fixed order: CPU, PPU, timers, DMA and
    /// serial. The CPU executes one micro operation per machine
    /// cycle, on the first of its four T-phases.
    pub fn tick(&mut self) {
        // a STOP freezes both the CPU and the PPU until one of
        // the joypad keys is observed as pressed
        if self.cpu.stopped() {
            if self.pad_i().any_pressed() {
                self.cpu.set_stopped(false);
            } else {
                self.clock = self.clock.wrapping_add(1);
                return;
            }
        }

        let phase = (self.clock & 0x03) as u8;
        if phase == 0 {
            self.cpu.clock();
        }
        self.ppu().clock();
        if phase == 3 {
            self.timer().clock();
            self.mmu().clock_dma();
            self.rom().clock(4);
        }
        self.serial().clock();
        self.clock = self.clock.wrapping_add(1);
    }

    /// Advances the machine by the given number of T-cycles.
    pub fn clocks(&mut self, count: usize) {
        for _ in 0..count {
            self.tick();
        }
    }

    /// Runs the machine until the next VBlank begins and returns
    /// the number of T-cycles elapsed. With the LCD disabled (or
    /// stuck) one frame's worth of cycles is run instead.
    pub fn frame(&mut self) -> u32 {
        if !self.ppu_i().lcd_on() {
            self.clocks(Self::LCD_CYCLES as usize);
            return Self::LCD_CYCLES;
        }
        let mut cycles = 0u32;
        let frame = self.ppu_i().frame_index();
        while self.ppu_i().frame_index() == frame && cycles < Self::LCD_CYCLES * 2 {
            self.tick();
            cycles += 1;
        }
        cycles
    }

    /// Runs the machine until the CPU's PC reaches the provided
    /// address, capped to the given number of T-cycles.
    pub fn step_to(&mut self, addr: u16, limit: usize) -> usize {
        let mut cycles = 0;
        while self.cpu.pc() != addr && cycles < limit {
            self.tick();
            cycles += 1;
        }
        cycles
    }

    pub fn key_press(&mut self, key: PadKey) {
        self.pad().key_press(key);
    }

    pub fn key_lift(&mut self, key: PadKey) {
        self.pad().key_lift(key);
    }

    /// Direct boot method that immediately jumps the machine
    /// to the post boot state, this will effectively skip the
    /// boot sequence and jump to the cartridge execution.
    pub fn boot(&mut self) {
        self.cpu.boot();
        self.timer().set_div(DIV_POST_BOOT);
        self.ppu().boot();
        self.ppu().set_int_vblank(true);
    }

    /// Loads a boot ROM image into the overlay area, the machine
    /// will execute it from address zero after a reset.
    pub fn load_boot(&mut self, data: &[u8]) {
        self.mmu().write_boot(0x0000, data);
        self.boot_rom = BootRom::Other;
    }

    pub fn load_boot_path(&mut self, path: &str) -> Result<(), Error> {
        let data = read_file(path)?;
        self.load_boot(&data);
        Ok(())
    }

    pub fn load_cartridge(&mut self, rom: Cartridge) -> Result<&mut Cartridge, Error> {
        self.mmu().set_rom(rom);
        Ok(self.mmu().rom())
    }

    /// Parses and validates the provided ROM image, instantiating
    /// the matching memory bank controller and resetting every
    /// component of the machine.
    pub fn load_rom(&mut self, data: &[u8]) -> Result<&mut Cartridge, Error> {
        let rom = Cartridge::from_data(data)?;
        self.reset();
        self.load_cartridge(rom)
    }

    pub fn load_rom_file(&mut self, path: &str) -> Result<&mut Cartridge, Error> {
        let data = read_file(path)?;
        self.load_rom(&data)
    }

    /// Loads a blank (all zeros, valid header) 32 KiB cartridge,
    /// useful for testing and for boot ROM only usage.
    pub fn load_rom_empty(&mut self) -> Result<&mut Cartridge, Error> {
        let data = crate::test::build_rom(0x00, 0x00, 0x00);
        self.load_rom(&data)
    }

    pub fn attach_serial(&mut self, device: Box<dyn SerialDevice>) {
        self.serial().set_device(device);
    }

    pub fn read_memory(&mut self, addr: u16) -> u8 {
        self.mmu().read(addr)
    }

    pub fn write_memory(&mut self, addr: u16, value: u8) {
        self.mmu().write(addr, value);
    }

    pub fn registers(&mut self) -> Registers {
        let ppu_registers = self.ppu().registers();
        Registers {
            pc: self.cpu.pc,
            sp: self.cpu.sp,
            a: self.cpu.a,
            b: self.cpu.b,
            c: self.cpu.c,
            d: self.cpu.d,
            e: self.cpu.e,
            h: self.cpu.h,
            l: self.cpu.l,
            scy: ppu_registers.scy,
            scx: ppu_registers.scx,
            wy: ppu_registers.wy,
            wx: ppu_registers.wx,
            ly: ppu_registers.ly,
            lyc: ppu_registers.lyc,
        }
    }

    pub fn boot_rom(&self) -> BootRom {
        self.boot_rom
    }

    pub fn ppu_ly(&self) -> u8 {
        self.ppu_i().ly()
    }

    pub fn ppu_mode(&self) -> PpuMode {
        self.ppu_i().mode()
    }

    pub fn ppu_frame(&self) -> u16 {
        self.ppu_i().frame_index()
    }

    pub fn description(&self, column_length: usize) -> String {
        let version_l = format!("{:width$}", "Version", width = column_length);
        let system_l = format!("{:width$}", "System", width = column_length);
        let boot_rom_l = format!("{:width$}", "Boot ROM", width = column_length);
        let serial_l = format!("{:width$}", "Serial", width = column_length);
        format!(
            "{}  {}\n{}  {}\n{}  {}\n{}  {}",
            version_l,
            Info::version(),
            system_l,
            Info::system(),
            boot_rom_l,
            self.boot_rom,
            serial_l,
            self.serial_i().device().description(),
        )
    }
}

/// Accessor implementations, exposing the individual components
/// through the ownership chain.
impl GameBoy {
    pub fn cpu(&mut self) -> &mut Cpu {
        &mut self.cpu
    }

    pub fn cpu_i(&self) -> &Cpu {
        &self.cpu
    }

    pub fn mmu(&mut self) -> &mut Mmu {
        self.cpu.mmu()
    }

    pub fn mmu_i(&self) -> &Mmu {
        self.cpu.mmu_i()
    }

    pub fn ppu(&mut self) -> &mut Ppu {
        self.cpu.mmu().ppu()
    }

    pub fn ppu_i(&self) -> &Ppu {
        self.cpu.mmu_i().ppu_i()
    }

    pub fn dma(&mut self) -> &mut Dma {
        self.cpu.mmu().dma()
    }

    pub fn dma_i(&self) -> &Dma {
        self.cpu.mmu_i().dma_i()
    }

    pub fn pad(&mut self) -> &mut Pad {
        self.cpu.mmu().pad()
    }

    pub fn pad_i(&self) -> &Pad {
        self.cpu.mmu_i().pad_i()
    }

    pub fn timer(&mut self) -> &mut Timer {
        self.cpu.mmu().timer()
    }

    pub fn timer_i(&self) -> &Timer {
        self.cpu.mmu_i().timer_i()
    }

    pub fn serial(&mut self) -> &mut Serial {
        self.cpu.mmu().serial()
    }

    pub fn serial_i(&self) -> &Serial {
        self.cpu.mmu_i().serial_i()
    }

    pub fn rom(&mut self) -> &mut Cartridge {
        self.cpu.mmu().rom()
    }

    pub fn rom_i(&self) -> &Cartridge {
        self.cpu.mmu_i().rom_i()
    }

    pub fn frame_buffer(&self) -> &[u8; FRAME_BUFFER_SIZE] {
        self.ppu_i().frame_buffer()
    }

    pub fn frame_buffer_rgb(&self) -> [u8; FRAME_BUFFER_RGB_SIZE] {
        self.ppu_i().frame_buffer_rgb()
    }

    pub fn clock(&self) -> u64 {
        self.clock
    }

    pub fn set_clock(&mut self, value: u64) {
        self.clock = value;
    }
}

impl Default for GameBoy {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for GameBoy {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description(9))
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        devices::buffer::BufferDevice,
        pad::PadKey,
        ppu::PpuMode,
        test::{build_rom_program, build_test, TestOptions},
    };

    use super::GameBoy;

    #[test]
    fn test_boot_state() {
        let game_boy = build_test(TestOptions::default());

        assert_eq!(game_boy.cpu_i().pc(), 0x0100);
        assert_eq!(game_boy.cpu_i().sp(), 0xfffe);
        assert_eq!(game_boy.cpu_i().af(), 0x01b0);
        assert_eq!(game_boy.cpu_i().bc(), 0x0013);
        assert_eq!(game_boy.cpu_i().de(), 0x00d8);
        assert_eq!(game_boy.cpu_i().hl(), 0x014d);
        assert!(!game_boy.cpu_i().ime());

        let mmu = game_boy.mmu_i();
        assert_eq!(mmu.read(0xff04), 0xab);
        assert_eq!(mmu.read(0xff05), 0x00);
        assert_eq!(mmu.read(0xff06), 0x00);
        assert_eq!(mmu.read(0xff07), 0xf8);
        assert_eq!(mmu.read(0xff0f), 0xe1);
        assert_eq!(mmu.read(0xff40), 0x91);
        assert_eq!(mmu.read(0xff41), 0x81);
        assert_eq!(mmu.read(0xff44), 0x99);
        assert_eq!(mmu.read(0xff47), 0xfc);
        assert_eq!(mmu.read(0xff46), 0xff);
    }

    #[test]
    fn test_frame_advances_to_vblank() {
        let mut game_boy = build_test(TestOptions::default());

        // the machine boots late in VBlank so the first frame is
        // short, the second one takes a full frame loop
        game_boy.frame();
        let cycles = game_boy.frame();
        assert_eq!(game_boy.ppu_mode(), PpuMode::VBlank);
        assert_eq!(game_boy.ppu_ly(), 144);
        assert_eq!(cycles, GameBoy::LCD_CYCLES);
    }

    #[test]
    fn test_vram_clear_loop() {
        // LD SP; XOR A; LCD off; LD HL, 0x9FFF; then clear VRAM
        // downwards until BIT 7, H turns zero
        let rom = build_rom_program(&[
            0x31, 0xfe, 0xff, // LD SP, 0xFFFE
            0xaf, // XOR A
            0xe0, 0x40, // LDH [FF40], A
            0x21, 0xff, 0x9f, // LD HL, 0x9FFF
            0x32, // LD [HL-], A
            0xcb, 0x7c, // BIT 7, H
            0x20, 0xfb, // JR NZ, -5
            0x00, // NOP
        ]);
        let mut game_boy = build_test(TestOptions::default());
        game_boy.load_rom(&rom).unwrap();
        game_boy.boot();

        // dirty the complete VRAM area before running the loop
        for addr in 0x8000..=0x9fffu16 {
            game_boy.write_memory(addr, 0xaa);
        }

        game_boy.clocks(300000);

        assert_eq!(game_boy.cpu_i().hl(), 0x7fff);
        for addr in 0x8000..=0x9fffu16 {
            assert_eq!(game_boy.read_memory(addr), 0x00);
        }
    }

    #[test]
    fn test_joypad_program() {
        // selects the action buttons and continuously stores the
        // P1 value into 0xC000
        let rom = build_rom_program(&[
            0xaf, // XOR A
            0xe0, 0x40, // LDH [FF40], A
            0x3e, 0x10, // LD A, 0x10
            0xe0, 0x00, // LDH [FF00], A
            0xf0, 0x00, // LDH A, [FF00]
            0xea, 0x00, 0xc0, // LD [0xC000], A
            0x18, 0xf9, // JR -7
        ]);
        let mut game_boy = build_test(TestOptions::default());
        game_boy.load_rom(&rom).unwrap();
        game_boy.boot();

        game_boy.clocks(1000);
        game_boy.key_press(PadKey::A);
        game_boy.clocks(1000);

        let value = game_boy.read_memory(0xc000);
        assert_eq!(value & 0x01, 0x00);
        assert_eq!(value & 0x0f, 0x0e);
        assert!(game_boy.pad_i().int_pad());
    }

    #[test]
    fn test_background_probe() {
        let mut game_boy = build_test(TestOptions::default());

        // identity palette, tile 0 row 0 set to color 1, the
        // tilemap is left zeroed
        game_boy.write_memory(0xff47, 0xe4);
        game_boy.write_memory(0x8000, 0xff);
        game_boy.write_memory(0x8001, 0x00);

        game_boy.frame();
        game_boy.frame();

        let frame_buffer = game_boy.frame_buffer();
        for x in 0..160 {
            assert_eq!(frame_buffer[x], 1);
            assert_eq!(frame_buffer[160 + x], 0);
        }
    }

    #[test]
    fn test_serial_program() {
        // writes 0x42 to SB and starts a transfer with the
        // internal clock selected
        let rom = build_rom_program(&[
            0x3e, 0x42, // LD A, 0x42
            0xe0, 0x01, // LDH [FF01], A
            0x3e, 0x81, // LD A, 0x81
            0xe0, 0x02, // LDH [FF02], A
            0x18, 0xfe, // JR -2
        ]);
        let mut game_boy = build_test(TestOptions::default());
        game_boy.load_rom(&rom).unwrap();
        game_boy.attach_serial(Box::<BufferDevice>::default());
        game_boy.boot();

        game_boy.clocks(512 * 8 + 256);
        assert_eq!(game_boy.serial_i().device().state(), "B");
        assert!(game_boy.serial_i().int_serial());
    }

    #[test]
    fn test_stop_freezes_until_key() {
        let rom = build_rom_program(&[
            0x10, 0x00, // STOP
            0x3c, // INC A
            0x18, 0xfe, // JR -2
        ]);
        let mut game_boy = build_test(TestOptions::default());
        game_boy.load_rom(&rom).unwrap();
        game_boy.boot();

        game_boy.clocks(64);
        assert!(game_boy.cpu_i().stopped());
        let frame = game_boy.ppu_frame();
        game_boy.clocks(200000);
        assert_eq!(game_boy.ppu_frame(), frame);

        game_boy.key_press(PadKey::Start);
        game_boy.clocks(64);
        assert!(!game_boy.cpu_i().stopped());
        assert!(game_boy.cpu_i().a > 0x01);
    }

    #[test]
    fn test_dma_transfer_program() {
        // the transfer is started from a routine staged in HRAM,
        // the only memory the CPU can still execute from
        let rom = build_rom_program(&[
            0x3e, 0xc1, // LD A, 0xC1
            0xcd, 0x80, 0xff, // CALL 0xFF80
            0x18, 0xfe, // JR -2
        ]);
        let mut game_boy = build_test(TestOptions::default());
        game_boy.load_rom(&rom).unwrap();
        game_boy.boot();

        // HRAM routine: LDH [FF46], A; LD B, 0x50; DEC B;
        // JR NZ, -3; RET
        for (offset, byte) in [0xe0, 0x46, 0x06, 0x50, 0x05, 0x20, 0xfd, 0xc9]
            .into_iter()
            .enumerate()
        {
            game_boy.write_memory(0xff80 + offset as u16, byte);
        }
        for offset in 0..160u16 {
            game_boy.write_memory(0xc100 + offset, offset as u8);
        }

        game_boy.clocks(4000);
        assert!(!game_boy.dma_i().active());
        for offset in 0..160u16 {
            assert_eq!(game_boy.read_memory(0xfe00 + offset), offset as u8);
        }
    }

    #[test]
    fn test_interrupt_priority() {
        let mut rom = build_rom_program(&[
            0xfb, // EI
            0x18, 0xfe, // JR -2
        ]);
        // VBlank handler increments A, timer handler increments B
        rom[0x40] = 0x3c;
        rom[0x41] = 0xd9;
        rom[0x50] = 0x04;
        rom[0x51] = 0xd9;
        let mut game_boy = build_test(TestOptions::default());
        game_boy.load_rom(&rom).unwrap();
        game_boy.boot();

        game_boy.write_memory(0xffff, 0x05);
        game_boy.write_memory(0xff0f, 0x05);

        // VBlank wins the priority encoding, the timer line is
        // still pending after its handler returned
        game_boy.clocks(64);
        assert_eq!(game_boy.cpu_i().a, 0x02);
        assert_eq!(game_boy.cpu_i().b, 0x00);
        assert_eq!(game_boy.read_memory(0xff0f) & 0x04, 0x04);

        game_boy.clocks(128);
        assert_eq!(game_boy.cpu_i().b, 0x01);
        assert_eq!(game_boy.read_memory(0xff0f) & 0x05, 0x00);
    }

    #[test]
    fn test_invalid_rom_rejected() {
        let mut game_boy = GameBoy::new();
        let data = vec![0x00; 0x8000];
        assert!(game_boy.load_rom(&data).is_err());
    }
}
