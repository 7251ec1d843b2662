//! Cartridge (ROM) related functions and structures.

use core::fmt;
use std::{
    cmp::max,
    fmt::{Display, Formatter},
    io::Cursor,
    vec,
};

use greyboy_common::{
    data::{read_bytes, read_u16, read_u32, read_u64, read_u8, write_bytes, write_u16, write_u32,
        write_u64, write_u8},
    error::Error,
    util::{read_file, timestamp},
};

use crate::{debugln, state::StateComponent, warnln};

pub const ROM_BANK_SIZE: usize = 16384;
pub const RAM_BANK_SIZE: usize = 8192;

/// The canonical Nintendo logo bitmap stored at 0x0104-0x0133,
/// used as part of the cartridge header validation.
pub const NINTENDO_LOGO: [u8; 48] = [
    0xce, 0xed, 0x66, 0x66, 0xcc, 0x0d, 0x00, 0x0b, 0x03, 0x73, 0x00, 0x83, 0x00, 0x0c, 0x00,
    0x0d, 0x00, 0x08, 0x11, 0x1f, 0x88, 0x89, 0x00, 0x0e, 0xdc, 0xcc, 0x6e, 0xe6, 0xdd, 0xdd,
    0xd9, 0x99, 0xbb, 0xbb, 0x67, 0x63, 0x6e, 0x0e, 0xec, 0xcc, 0xdd, 0xdc, 0x99, 0x9f, 0xbb,
    0xb9, 0x33, 0x3e,
];

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RomType {
    RomOnly = 0x00,
    Mbc1 = 0x01,
    Mbc1Ram = 0x02,
    Mbc1RamBattery = 0x03,
    Mbc3TimerBattery = 0x0f,
    Mbc3TimerRamBattery = 0x10,
    Mbc3 = 0x11,
    Mbc3Ram = 0x12,
    Mbc3RamBattery = 0x13,
    Mbc5 = 0x19,
    Mbc5Ram = 0x1a,
    Mbc5RamBattery = 0x1b,
    Mbc5Rumble = 0x1c,
    Mbc5RumbleRam = 0x1d,
    Mbc5RumbleRamBattery = 0x1e,
    Unknown = 0xef,
}

impl RomType {
    pub fn description(&self) -> &'static str {
        match self {
            RomType::RomOnly => "ROM Only",
            RomType::Mbc1 => "MBC1",
            RomType::Mbc1Ram => "MBC1 + RAM",
            RomType::Mbc1RamBattery => "MBC1 + RAM + Battery",
            RomType::Mbc3TimerBattery => "MBC3 + TIMER + BATTERY",
            RomType::Mbc3TimerRamBattery => "MBC3 + TIMER + RAM + BATTERY",
            RomType::Mbc3 => "MBC3",
            RomType::Mbc3Ram => "MBC3 + RAM",
            RomType::Mbc3RamBattery => "MBC3 + RAM + BATTERY",
            RomType::Mbc5 => "MBC5",
            RomType::Mbc5Ram => "MBC5 + RAM",
            RomType::Mbc5RamBattery => "MBC5 + RAM + BATTERY",
            RomType::Mbc5Rumble => "MBC5 + RUMBLE",
            RomType::Mbc5RumbleRam => "MBC5 + RUMBLE + RAM",
            RomType::Mbc5RumbleRamBattery => "MBC5 + RUMBLE + RAM + BATTERY",
            RomType::Unknown => "Unknown",
        }
    }
}

impl Display for RomType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RomSize {
    Size32K,
    Size64K,
    Size128K,
    Size256K,
    Size512K,
    Size1M,
    Size2M,
    Size4M,
    Size8M,
    SizeUnknown,
}

impl RomSize {
    pub fn description(&self) -> &'static str {
        match self {
            RomSize::Size32K => "32 KB",
            RomSize::Size64K => "64 KB",
            RomSize::Size128K => "128 KB",
            RomSize::Size256K => "256 KB",
            RomSize::Size512K => "512 KB",
            RomSize::Size1M => "1 MB",
            RomSize::Size2M => "2 MB",
            RomSize::Size4M => "4 MB",
            RomSize::Size8M => "8 MB",
            RomSize::SizeUnknown => "Unknown",
        }
    }

    pub fn rom_banks(&self) -> u16 {
        match self {
            RomSize::Size32K => 2,
            RomSize::Size64K => 4,
            RomSize::Size128K => 8,
            RomSize::Size256K => 16,
            RomSize::Size512K => 32,
            RomSize::Size1M => 64,
            RomSize::Size2M => 128,
            RomSize::Size4M => 256,
            RomSize::Size8M => 512,
            RomSize::SizeUnknown => 0,
        }
    }
}

impl Display for RomSize {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RamSize {
    NoRam,
    Unused,
    Size8K,
    Size32K,
    Size64K,
    Size128K,
    SizeUnknown,
}

impl RamSize {
    pub fn description(&self) -> &'static str {
        match self {
            RamSize::NoRam => "No RAM",
            RamSize::Unused => "Unused",
            RamSize::Size8K => "8 KB",
            RamSize::Size32K => "32 KB",
            RamSize::Size64K => "64 KB",
            RamSize::Size128K => "128 KB",
            RamSize::SizeUnknown => "Unknown",
        }
    }

    pub fn ram_banks(&self) -> u16 {
        match self {
            RamSize::NoRam => 0,
            RamSize::Unused => 0,
            RamSize::Size8K => 1,
            RamSize::Size32K => 4,
            RamSize::Size64K => 8,
            RamSize::Size128K => 16,
            RamSize::SizeUnknown => 0,
        }
    }
}

impl Display for RamSize {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Live and latched register files of the MBC3 real time clock.
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct RtcRegisters {
    pub seconds: u8,
    pub minutes: u8,
    pub hours: u8,
    pub day_low: u8,
    pub day_high: u8,
}

impl RtcRegisters {
    /// Whether the halt bit (DH bit 6) is stopping the clock.
    pub fn halted(&self) -> bool {
        self.day_high & 0x40 == 0x40
    }

    fn days(&self) -> u16 {
        self.day_low as u16 | ((self.day_high as u16 & 0x01) << 8)
    }

    fn set_days(&mut self, value: u16) {
        self.day_low = value as u8;
        self.day_high = (self.day_high & 0xfe) | ((value >> 8) as u8 & 0x01);
        if value > 0x1ff {
            // day counter overflow is sticky until software clears it
            self.day_high |= 0x80;
        }
    }

    /// Moves the clock forward by the given number of seconds,
    /// used both for emulated ticking and for wall time catch up.
    pub fn advance_seconds(&mut self, value: u64) {
        if self.halted() || value == 0 {
            return;
        }
        let mut total = self.seconds as u64
            + self.minutes as u64 * 60
            + self.hours as u64 * 3600
            + self.days() as u64 * 86400;
        total += value;
        self.seconds = (total % 60) as u8;
        self.minutes = (total / 60 % 60) as u8;
        self.hours = (total / 3600 % 24) as u8;
        self.set_days((total / 86400) as u16);
    }

    fn as_bytes(&self) -> [u8; 5] {
        [
            self.seconds,
            self.minutes,
            self.hours,
            self.day_low,
            self.day_high,
        ]
    }

    fn from_bytes(data: &[u8]) -> Self {
        Self {
            seconds: data[0],
            minutes: data[1],
            hours: data[2],
            day_low: data[3],
            day_high: data[4],
        }
    }
}

/// Structure that defines the ROM and RAM contents of a Game Boy
/// cartridge. Should correctly address the specifics of all the
/// supported MBCs (Memory Bank Controllers).
#[derive(Clone)]
pub struct Cartridge {
    /// The complete data of the ROM cartridge, should
    /// include the complete set of ROM banks.
    rom_data: Vec<u8>,

    /// The base RAM that is going to be used to store
    /// temporary data for the cartridge.
    ram_data: Vec<u8>,

    /// The MBC (Memory Bank Controller) to be used for
    /// RAM and ROM access on the current cartridge.
    mbc: &'static Mbc,

    /// The number of ROM banks (of 16KB) that are available
    /// to the current cartridge, this is a computed value
    /// to allow improved performance.
    rom_bank_count: u16,

    /// The number of RAM banks (of 8KB) that are available
    /// to the current cartridge, this is a computed value
    /// to allow improved performance.
    ram_bank_count: u16,

    /// The offset address to the switchable ROM bank that is
    /// currently visible at 0x4000-0x7FFF.
    rom_offset: usize,

    /// The offset address to the ROM bank that is currently
    /// visible at 0x0000-0x3FFF, non zero only for MBC1 in
    /// RAM banking mode with large ROM images.
    rom_lower_offset: usize,

    /// The offset address to the ERAM bank that is
    /// currently in use by the ROM cartridge.
    ram_offset: usize,

    /// If the RAM access is enabled, this flag allows
    /// control of memory access to avoid corruption.
    ram_enabled: bool,

    /// Low bits of the selected ROM bank, as written to the
    /// ROMB register (width depends on the MBC).
    rom_bank_lo: u8,

    /// Upper ROM bank bits / RAM bank selector as written to
    /// the RAMB register, interpretation depends on the MBC
    /// and on the banking mode.
    rom_bank_hi: u8,

    /// Banking mode register of MBC1 (0 = ROM banking
    /// mode, 1 = RAM banking mode).
    mbc_mode: u8,

    /// The live RTC register file of an MBC3 cartridge with
    /// timer support.
    rtc: RtcRegisters,

    /// The latched snapshot of the RTC registers, exposed
    /// through the RAM window.
    rtc_latched: RtcRegisters,

    /// Sub second T-cycle accumulator for the RTC.
    rtc_cycles: u32,

    /// Value previously written to the RTC latch register,
    /// a 1 then 0 sequence triggers the latch.
    rtc_latch_last: u8,

    /// The current rumble state of the cartridge, this
    /// boolean value controls if vibration is currently active.
    rumble_active: bool,

    /// Callback function to be called whenever there's a new
    /// rumble vibration triggered or when it's disabled.
    rumble_cb: fn(active: bool),
}

impl Cartridge {
    pub fn new() -> Self {
        Self {
            rom_data: vec![],
            ram_data: vec![],
            mbc: &NO_MBC,
            rom_bank_count: 0,
            ram_bank_count: 0,
            rom_offset: 0x4000,
            rom_lower_offset: 0x0000,
            ram_offset: 0x0000,
            ram_enabled: false,
            rom_bank_lo: 0x1,
            rom_bank_hi: 0x0,
            mbc_mode: 0x0,
            rtc: RtcRegisters::default(),
            rtc_latched: RtcRegisters::default(),
            rtc_cycles: 0,
            rtc_latch_last: 0xff,
            rumble_active: false,
            rumble_cb: |_| {},
        }
    }

    pub fn from_data(data: &[u8]) -> Result<Self, Error> {
        let mut cartridge = Cartridge::new();
        cartridge.set_data(data)?;
        Ok(cartridge)
    }

    pub fn from_file(path: &str) -> Result<Self, Error> {
        let data = read_file(path)?;
        Self::from_data(&data)
    }

    pub fn read(&self, addr: u16) -> u8 {
        match addr {
            // 0x0000-0x7FFF: 16 KiB ROM bank 00 & 16 KiB ROM Bank 01-NN
            0x0000..=0x7fff => (self.mbc.read_rom)(self, addr),
            // 0xA000-0xBFFF: 8 KiB External RAM
            0xa000..=0xbfff => (self.mbc.read_ram)(self, addr),
            _ => {
                debugln!("Reading from unknown Cartridge location 0x{:04x}", addr);
                0xff
            }
        }
    }

    pub fn write(&mut self, addr: u16, value: u8) {
        match addr {
            // 0x0000-0x7FFF: MBC control registers
            0x0000..=0x7fff => (self.mbc.write_rom)(self, addr, value),
            // 0xA000-0xBFFF: 8 KiB External RAM
            0xa000..=0xbfff => (self.mbc.write_ram)(self, addr, value),
            _ => debugln!("Writing to unknown Cartridge location 0x{:04x}", addr),
        }
    }

    /// Advances the cartridge RTC (if present) by the given
    /// number of T-cycles.
    pub fn clock(&mut self, cycles: u32) {
        if !self.has_rtc() || self.rtc.halted() {
            return;
        }
        self.rtc_cycles += cycles;
        if self.rtc_cycles >= 4194304 {
            self.rtc_cycles -= 4194304;
            self.rtc.advance_seconds(1);
        }
    }

    pub fn reset(&mut self) {
        *self = Cartridge::new();
    }

    pub fn data(&self) -> &Vec<u8> {
        &self.rom_data
    }

    pub fn ram_enabled(&self) -> bool {
        self.ram_enabled
    }

    pub fn rom_bank(&self) -> u16 {
        (self.rom_offset / ROM_BANK_SIZE) as u16
    }

    pub fn ram_bank(&self) -> u8 {
        (self.ram_offset / RAM_BANK_SIZE) as u8
    }

    fn set_rom_bank(&mut self, rom_bank: u16) {
        self.rom_offset = rom_bank as usize * ROM_BANK_SIZE;
    }

    fn set_ram_bank(&mut self, ram_bank: u8) {
        self.ram_offset = ram_bank as usize * RAM_BANK_SIZE;
    }

    pub fn set_rumble_cb(&mut self, rumble_cb: fn(active: bool)) {
        self.rumble_cb = rumble_cb;
    }

    pub fn trigger_rumble(&self) {
        (self.rumble_cb)(self.rumble_active);
    }

    fn set_data(&mut self, data: &[u8]) -> Result<(), Error> {
        Self::ensure_data(data)?;
        self.rom_data = data.to_vec();
        if !self.valid_logo() || !self.valid_checksum() {
            self.rom_data = vec![];
            return Err(Error::InvalidRom);
        }
        self.mbc = self.mbc()?;
        self.rom_bank_count = self.rom_size().rom_banks();
        self.ram_bank_count = self.ram_size().ram_banks();
        self.allocate_ram();
        self.set_rom_bank(1);
        self.set_ram_bank(0);
        Ok(())
    }

    fn mbc(&self) -> Result<&'static Mbc, Error> {
        Ok(match self.rom_type() {
            RomType::RomOnly => &NO_MBC,
            RomType::Mbc1 | RomType::Mbc1Ram | RomType::Mbc1RamBattery => &MBC1,
            RomType::Mbc3TimerBattery
            | RomType::Mbc3TimerRamBattery
            | RomType::Mbc3
            | RomType::Mbc3Ram
            | RomType::Mbc3RamBattery => &MBC3,
            RomType::Mbc5
            | RomType::Mbc5Ram
            | RomType::Mbc5RamBattery
            | RomType::Mbc5Rumble
            | RomType::Mbc5RumbleRam
            | RomType::Mbc5RumbleRamBattery => &MBC5,
            RomType::Unknown => return Err(Error::UnsupportedMbc),
        })
    }

    fn allocate_ram(&mut self) {
        let ram_banks = max(self.ram_bank_count, 1);
        self.ram_data = vec![0u8; ram_banks as usize * RAM_BANK_SIZE];
    }

    /// Ensures that the data provided has the shape of a Game Boy
    /// ROM image, a power of two between 32 KiB and 8 MiB.
    fn ensure_data(data: &[u8]) -> Result<(), Error> {
        if data.len() < 0x8000 || data.len() > 0x800000 || !data.len().is_power_of_two() {
            return Err(Error::RomSize);
        }
        Ok(())
    }

    /// Recomputes the three MBC1 bank offsets from the raw ROMB,
    /// RAMB and MODE register values.
    fn update_mbc1_offsets(&mut self) {
        let bank_mask = self.rom_bank_count.saturating_sub(1);
        let mut lo = self.rom_bank_lo as u16 & 0x1f;
        if lo == 0 {
            lo = 1;
        }
        let hi = (self.rom_bank_hi as u16 & 0x03) << 5;
        self.set_rom_bank((hi | lo) & bank_mask);
        if self.mbc_mode == 0x1 {
            self.rom_lower_offset = ((hi & bank_mask) as usize) * ROM_BANK_SIZE;
            let ram_mask = self.ram_bank_count.saturating_sub(1) as u8;
            self.set_ram_bank(self.rom_bank_hi & 0x03 & ram_mask);
        } else {
            self.rom_lower_offset = 0x0000;
            self.set_ram_bank(0);
        }
    }

    fn has_rtc(&self) -> bool {
        matches!(
            self.rom_type(),
            RomType::Mbc3TimerBattery | RomType::Mbc3TimerRamBattery
        )
    }

    pub fn has_rumble(&self) -> bool {
        matches!(
            self.rom_type(),
            RomType::Mbc5Rumble | RomType::Mbc5RumbleRam | RomType::Mbc5RumbleRamBattery
        )
    }

    pub fn has_battery(&self) -> bool {
        matches!(
            self.rom_type(),
            RomType::Mbc1RamBattery
                | RomType::Mbc3TimerBattery
                | RomType::Mbc3TimerRamBattery
                | RomType::Mbc3RamBattery
                | RomType::Mbc5RamBattery
                | RomType::Mbc5RumbleRamBattery
        )
    }

    pub fn title(&self) -> String {
        let mut offset = 0;
        for byte in &self.rom_data[0x0134..=0x0143] {
            if *byte == 0u8 || *byte & 0x80 != 0x00 {
                break;
            }
            offset += 1;
        }
        String::from(
            std::str::from_utf8(&self.rom_data[0x0134..0x0134 + offset])
                .unwrap_or("")
                .trim(),
        )
    }

    pub fn rom_type(&self) -> RomType {
        if self.rom_data.len() < 0x0148 {
            return RomType::Unknown;
        }
        match self.rom_data[0x0147] {
            0x00 => RomType::RomOnly,
            0x01 => RomType::Mbc1,
            0x02 => RomType::Mbc1Ram,
            0x03 => RomType::Mbc1RamBattery,
            0x0f => RomType::Mbc3TimerBattery,
            0x10 => RomType::Mbc3TimerRamBattery,
            0x11 => RomType::Mbc3,
            0x12 => RomType::Mbc3Ram,
            0x13 => RomType::Mbc3RamBattery,
            0x19 => RomType::Mbc5,
            0x1a => RomType::Mbc5Ram,
            0x1b => RomType::Mbc5RamBattery,
            0x1c => RomType::Mbc5Rumble,
            0x1d => RomType::Mbc5RumbleRam,
            0x1e => RomType::Mbc5RumbleRamBattery,
            _ => RomType::Unknown,
        }
    }

    pub fn rom_size(&self) -> RomSize {
        if self.rom_data.len() < 0x0149 {
            return RomSize::SizeUnknown;
        }
        match self.rom_data[0x0148] {
            0x00 => RomSize::Size32K,
            0x01 => RomSize::Size64K,
            0x02 => RomSize::Size128K,
            0x03 => RomSize::Size256K,
            0x04 => RomSize::Size512K,
            0x05 => RomSize::Size1M,
            0x06 => RomSize::Size2M,
            0x07 => RomSize::Size4M,
            0x08 => RomSize::Size8M,
            _ => RomSize::SizeUnknown,
        }
    }

    pub fn ram_size(&self) -> RamSize {
        if self.rom_data.len() < 0x014a {
            return RamSize::SizeUnknown;
        }
        match self.rom_data[0x0149] {
            0x00 => RamSize::NoRam,
            0x01 => RamSize::Unused,
            0x02 => RamSize::Size8K,
            0x03 => RamSize::Size32K,
            0x04 => RamSize::Size128K,
            0x05 => RamSize::Size64K,
            _ => RamSize::SizeUnknown,
        }
    }

    /// Header checksum over 0x0134-0x014C as computed by the boot
    /// ROM, the stored value at 0x014D must match it.
    pub fn checksum(&self) -> u8 {
        let mut sum: u8 = 0;
        for i in 0x0134..=0x014c {
            sum = sum.wrapping_sub(self.rom_data[i]).wrapping_sub(1);
        }
        sum
    }

    pub fn valid_checksum(&self) -> bool {
        self.rom_data[0x014d] == self.checksum()
    }

    pub fn valid_logo(&self) -> bool {
        self.rom_data[0x0104..=0x0133] == NINTENDO_LOGO
    }

    /// Serializes the battery backed contents of the cartridge,
    /// the flat RAM plus (for timer cartridges) the live and
    /// latched RTC registers and the current wall timestamp.
    pub fn ram_contents(&self) -> Vec<u8> {
        let mut data = self.ram_data.clone();
        if self.has_rtc() {
            data.extend_from_slice(&self.rtc.as_bytes());
            data.extend_from_slice(&self.rtc_latched.as_bytes());
            data.extend_from_slice(&timestamp().to_le_bytes());
        }
        data
    }

    /// Restores battery backed contents, aging the RTC by the
    /// wall time elapsed since the contents were saved.
    pub fn set_ram_contents(&mut self, data: &[u8]) -> Result<(), Error> {
        let ram_len = self.ram_data.len();
        if self.has_rtc() {
            if data.len() != ram_len + 18 {
                return Err(Error::InvalidData);
            }
            self.ram_data = data[..ram_len].to_vec();
            self.rtc = RtcRegisters::from_bytes(&data[ram_len..ram_len + 5]);
            self.rtc_latched = RtcRegisters::from_bytes(&data[ram_len + 5..ram_len + 10]);
            let saved = u64::from_le_bytes(data[ram_len + 10..ram_len + 18].try_into().unwrap());
            self.rtc
                .advance_seconds(timestamp().saturating_sub(saved));
        } else {
            if data.len() != ram_len {
                return Err(Error::InvalidData);
            }
            self.ram_data = data.to_vec();
        }
        Ok(())
    }

    pub fn rom_data(&self) -> &Vec<u8> {
        &self.rom_data
    }

    pub fn ram_data(&self) -> &Vec<u8> {
        &self.ram_data
    }

    pub fn ram_data_mut(&mut self) -> &mut Vec<u8> {
        &mut self.ram_data
    }

    pub fn set_ram_data(&mut self, data: &[u8]) {
        self.ram_data = data.to_vec();
    }

    pub fn rtc(&self) -> &RtcRegisters {
        &self.rtc
    }

    pub fn rtc_latched(&self) -> &RtcRegisters {
        &self.rtc_latched
    }

    pub fn description(&self, column_length: usize) -> String {
        let title_l = format!("{:width$}", "Title", width = column_length);
        let type_l = format!("{:width$}", "Type", width = column_length);
        let rom_size_l = format!("{:width$}", "ROM Size", width = column_length);
        let ram_size_l = format!("{:width$}", "RAM Size", width = column_length);
        format!(
            "{}  {}\n{}  {}\n{}  {}\n{}  {}",
            title_l,
            self.title(),
            type_l,
            self.rom_type(),
            rom_size_l,
            self.rom_size(),
            ram_size_l,
            self.ram_size()
        )
    }
}

impl StateComponent for Cartridge {
    fn state(&self) -> Result<Vec<u8>, Error> {
        let mut cursor = Cursor::new(vec![]);
        write_u8(&mut cursor, self.ram_enabled as u8)?;
        write_u8(&mut cursor, self.rom_bank_lo)?;
        write_u8(&mut cursor, self.rom_bank_hi)?;
        write_u8(&mut cursor, self.mbc_mode)?;
        write_u16(&mut cursor, self.rom_bank())?;
        write_u32(&mut cursor, (self.rom_lower_offset / ROM_BANK_SIZE) as u32)?;
        write_u8(&mut cursor, self.ram_bank())?;
        write_bytes(&mut cursor, &self.rtc.as_bytes())?;
        write_bytes(&mut cursor, &self.rtc_latched.as_bytes())?;
        write_u32(&mut cursor, self.rtc_cycles)?;
        write_u8(&mut cursor, self.rtc_latch_last)?;
        write_u8(&mut cursor, self.rumble_active as u8)?;
        write_u64(&mut cursor, self.ram_data.len() as u64)?;
        write_bytes(&mut cursor, &self.ram_data)?;
        Ok(cursor.into_inner())
    }

    fn set_state(&mut self, data: &[u8]) -> Result<(), Error> {
        let mut cursor = Cursor::new(data);
        let ram_enabled = read_u8(&mut cursor)? != 0;
        let rom_bank_lo = read_u8(&mut cursor)?;
        let rom_bank_hi = read_u8(&mut cursor)?;
        let mbc_mode = read_u8(&mut cursor)?;
        let rom_bank = read_u16(&mut cursor)?;
        let rom_lower_bank = read_u32(&mut cursor)?;
        let ram_bank = read_u8(&mut cursor)?;
        let rtc = RtcRegisters::from_bytes(&read_bytes(&mut cursor, 5)?);
        let rtc_latched = RtcRegisters::from_bytes(&read_bytes(&mut cursor, 5)?);
        let rtc_cycles = read_u32(&mut cursor)?;
        let rtc_latch_last = read_u8(&mut cursor)?;
        let rumble_active = read_u8(&mut cursor)? != 0;
        let ram_len = read_u64(&mut cursor)? as usize;
        let ram_data = read_bytes(&mut cursor, ram_len)?;
        self.ram_enabled = ram_enabled;
        self.rom_bank_lo = rom_bank_lo;
        self.rom_bank_hi = rom_bank_hi;
        self.mbc_mode = mbc_mode;
        self.set_rom_bank(rom_bank);
        self.rom_lower_offset = rom_lower_bank as usize * ROM_BANK_SIZE;
        self.set_ram_bank(ram_bank);
        self.rtc = rtc;
        self.rtc_latched = rtc_latched;
        self.rtc_cycles = rtc_cycles;
        self.rtc_latch_last = rtc_latch_last;
        self.rumble_active = rumble_active;
        self.ram_data = ram_data;
        Ok(())
    }
}

impl Default for Cartridge {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for Cartridge {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description(9))
    }
}

pub struct Mbc {
    pub name: &'static str,
    pub read_rom: fn(rom: &Cartridge, addr: u16) -> u8,
    pub write_rom: fn(rom: &mut Cartridge, addr: u16, value: u8),
    pub read_ram: fn(rom: &Cartridge, addr: u16) -> u8,
    pub write_ram: fn(rom: &mut Cartridge, addr: u16, value: u8),
}

pub static NO_MBC: Mbc = Mbc {
    name: "No MBC",
    read_rom: |rom: &Cartridge, addr: u16| -> u8 {
        *rom.rom_data.get(addr as usize).unwrap_or(&0xff)
    },
    write_rom: |_rom: &mut Cartridge, addr: u16, _value: u8| {
        // some titles poke the (nonexistent) banking registers,
        // the writes are silently dropped
        debugln!("Ignored write to plain Cartridge ROM 0x{:04x}", addr);
    },
    read_ram: |rom: &Cartridge, addr: u16| -> u8 {
        *rom.ram_data.get((addr - 0xa000) as usize).unwrap_or(&0xff)
    },
    write_ram: |rom: &mut Cartridge, addr: u16, value: u8| {
        rom.ram_data[(addr - 0xa000) as usize] = value;
    },
};

pub static MBC1: Mbc = Mbc {
    name: "MBC1",
    read_rom: |rom: &Cartridge, addr: u16| -> u8 {
        match addr {
            // 0x0000-0x3FFF - ROM bank 00 (or 0x20/0x40/0x60 in mode 1)
            0x0000..=0x3fff => *rom
                .rom_data
                .get(rom.rom_lower_offset + addr as usize)
                .unwrap_or(&0xff),
            // 0x4000-0x7FFF - ROM bank 01-7F
            0x4000..=0x7fff => *rom
                .rom_data
                .get(rom.rom_offset + (addr - 0x4000) as usize)
                .unwrap_or(&0xff),
            _ => {
                warnln!("Reading from unknown Cartridge ROM location 0x{:04x}", addr);
                #[allow(unreachable_code)]
                0xff
            }
        }
    },
    write_rom: |rom: &mut Cartridge, addr: u16, value: u8| {
        match addr {
            // 0x0000-0x1FFF - RAMG: RAM enabled flag
            0x0000..=0x1fff => {
                rom.ram_enabled = (value & 0x0f) == 0x0a;
            }
            // 0x2000-0x3FFF - ROMB: ROM bank selection 5 lower bits
            0x2000..=0x3fff => {
                rom.rom_bank_lo = value & 0x1f;
                rom.update_mbc1_offsets();
            }
            // 0x4000-0x5FFF - RAMB: RAM bank / upper ROM bank bits
            0x4000..=0x5fff => {
                rom.rom_bank_hi = value & 0x03;
                rom.update_mbc1_offsets();
            }
            // 0x6000-0x7FFF - MODE: banking mode selection
            0x6000..=0x7fff => {
                rom.mbc_mode = value & 0x01;
                rom.update_mbc1_offsets();
            }
            _ => warnln!("Writing to unknown Cartridge ROM location 0x{:04x}", addr),
        }
    },
    read_ram: |rom: &Cartridge, addr: u16| -> u8 {
        if !rom.ram_enabled || rom.ram_bank_count == 0 {
            return 0xff;
        }
        rom.ram_data[rom.ram_offset + (addr - 0xa000) as usize]
    },
    write_ram: |rom: &mut Cartridge, addr: u16, value: u8| {
        if !rom.ram_enabled || rom.ram_bank_count == 0 {
            return;
        }
        rom.ram_data[rom.ram_offset + (addr - 0xa000) as usize] = value;
    },
};

pub static MBC3: Mbc = Mbc {
    name: "MBC3",
    read_rom: |rom: &Cartridge, addr: u16| -> u8 {
        match addr {
            // 0x0000-0x3FFF - ROM bank 00
            0x0000..=0x3fff => rom.rom_data[addr as usize],
            // 0x4000-0x7FFF - ROM bank 01-7F
            0x4000..=0x7fff => *rom
                .rom_data
                .get(rom.rom_offset + (addr - 0x4000) as usize)
                .unwrap_or(&0xff),
            _ => {
                warnln!("Reading from unknown Cartridge ROM location 0x{:04x}", addr);
                #[allow(unreachable_code)]
                0xff
            }
        }
    },
    write_rom: |rom: &mut Cartridge, addr: u16, value: u8| {
        match addr {
            // 0x0000-0x1FFF - RAMG: RAM and RTC enabled flag
            0x0000..=0x1fff => {
                rom.ram_enabled = (value & 0x0f) == 0x0a;
            }
            // 0x2000-0x3FFF - ROMB: ROM bank selection
            0x2000..=0x3fff => {
                let mut rom_bank = value as u16 & 0x7f;
                rom_bank &= rom.rom_bank_count.saturating_sub(1);
                if rom_bank == 0 {
                    rom_bank = 1;
                }
                rom.rom_bank_lo = rom_bank as u8;
                rom.set_rom_bank(rom_bank);
            }
            // 0x4000-0x5FFF - RAMB: RAM bank or RTC register selection
            0x4000..=0x5fff => {
                rom.rom_bank_hi = value & 0x0f;
                if value <= 0x03 {
                    let ram_bank = value & (rom.ram_bank_count.saturating_sub(1) as u8);
                    rom.set_ram_bank(ram_bank);
                }
            }
            // 0x6000-0x7FFF - RTC latch, a 1 then 0 sequence copies
            // the live registers into the latched snapshot
            0x6000..=0x7fff => {
                if rom.rtc_latch_last == 0x01 && value == 0x00 {
                    rom.rtc_latched = rom.rtc;
                }
                rom.rtc_latch_last = value;
            }
            _ => warnln!("Writing to unknown Cartridge ROM location 0x{:04x}", addr),
        }
    },
    read_ram: |rom: &Cartridge, addr: u16| -> u8 {
        if !rom.ram_enabled {
            return 0xff;
        }
        match rom.rom_bank_hi {
            0x00..=0x03 => rom.ram_data[rom.ram_offset + (addr - 0xa000) as usize],
            0x08 => rom.rtc_latched.seconds,
            0x09 => rom.rtc_latched.minutes,
            0x0a => rom.rtc_latched.hours,
            0x0b => rom.rtc_latched.day_low,
            0x0c => rom.rtc_latched.day_high,
            _ => 0xff,
        }
    },
    write_ram: |rom: &mut Cartridge, addr: u16, value: u8| {
        if !rom.ram_enabled {
            return;
        }
        match rom.rom_bank_hi {
            0x00..=0x03 => rom.ram_data[rom.ram_offset + (addr - 0xa000) as usize] = value,
            0x08 => {
                rom.rtc.seconds = value & 0x3f;
                rom.rtc_cycles = 0;
            }
            0x09 => rom.rtc.minutes = value & 0x3f,
            0x0a => rom.rtc.hours = value & 0x1f,
            0x0b => rom.rtc.day_low = value,
            0x0c => rom.rtc.day_high = value & 0xc1,
            _ => (),
        }
    },
};

pub static MBC5: Mbc = Mbc {
    name: "MBC5",
    read_rom: |rom: &Cartridge, addr: u16| -> u8 {
        match addr {
            // 0x0000-0x3FFF - ROM bank 00
            0x0000..=0x3fff => rom.rom_data[addr as usize],
            // 0x4000-0x7FFF - ROM bank 00-1FF
            0x4000..=0x7fff => *rom
                .rom_data
                .get(rom.rom_offset + (addr - 0x4000) as usize)
                .unwrap_or(&0xff),
            _ => {
                warnln!("Reading from unknown Cartridge ROM location 0x{:04x}", addr);
                #[allow(unreachable_code)]
                0xff
            }
        }
    },
    write_rom: |rom: &mut Cartridge, addr: u16, value: u8| {
        match addr {
            // 0x0000-0x1FFF - RAMG: RAM enabled flag
            0x0000..=0x1fff => {
                rom.ram_enabled = (value & 0x0f) == 0x0a;
            }
            // 0x2000-0x2FFF - ROMB0: ROM bank selection 8 lower bits,
            // writing 0 really selects bank 0 on MBC5
            0x2000..=0x2fff => {
                rom.rom_bank_lo = value;
                let rom_bank = (((rom.rom_bank_hi as u16 & 0x01) << 8) | value as u16)
                    & rom.rom_bank_count.saturating_sub(1);
                rom.set_rom_bank(rom_bank);
            }
            // 0x3000-0x3FFF - ROMB1: ROM bank selection 9th bit
            0x3000..=0x3fff => {
                rom.rom_bank_hi = value & 0x01;
                let rom_bank = (((value as u16 & 0x01) << 8) | rom.rom_bank_lo as u16)
                    & rom.rom_bank_count.saturating_sub(1);
                rom.set_rom_bank(rom_bank);
            }
            // 0x4000-0x5FFF - RAMB: RAM bank selection (4 bits)
            0x4000..=0x5fff => {
                let mut ram_bank = value & 0x0f;

                // handles the rumble flag for the cartridges
                // that support the rumble operation
                if rom.has_rumble() {
                    ram_bank = value & 0x07;
                    let rumble = (value & 0x08) == 0x08;
                    if rom.rumble_active != rumble {
                        rom.rumble_active = rumble;
                        rom.trigger_rumble();
                    }
                }

                if ram_bank as u16 >= rom.ram_bank_count {
                    return;
                }

                rom.set_ram_bank(ram_bank);
            }
            _ => warnln!("Writing to unknown Cartridge ROM location 0x{:04x}", addr),
        }
    },
    read_ram: |rom: &Cartridge, addr: u16| -> u8 {
        if !rom.ram_enabled || rom.ram_bank_count == 0 {
            return 0xff;
        }
        rom.ram_data[rom.ram_offset + (addr - 0xa000) as usize]
    },
    write_ram: |rom: &mut Cartridge, addr: u16, value: u8| {
        if !rom.ram_enabled || rom.ram_bank_count == 0 {
            return;
        }
        rom.ram_data[rom.ram_offset + (addr - 0xa000) as usize] = value;
    },
};

#[cfg(test)]
mod tests {
    use crate::test::build_rom;

    use super::{Cartridge, RamSize, RomSize, RomType};

    #[test]
    fn test_header_validation() {
        let data = build_rom(0x00, 0x00, 0x00);
        let cartridge = Cartridge::from_data(&data).unwrap();
        assert!(cartridge.valid_logo());
        assert!(cartridge.valid_checksum());
        assert_eq!(cartridge.rom_type(), RomType::RomOnly);
        assert_eq!(cartridge.rom_size(), RomSize::Size32K);
        assert_eq!(cartridge.ram_size(), RamSize::NoRam);
    }

    #[test]
    fn test_invalid_logo_rejected() {
        let mut data = build_rom(0x00, 0x00, 0x00);
        data[0x0104] ^= 0xff;
        assert!(Cartridge::from_data(&data).is_err());
    }

    #[test]
    fn test_invalid_checksum_rejected() {
        let mut data = build_rom(0x00, 0x00, 0x00);
        data[0x014d] ^= 0xff;
        assert!(Cartridge::from_data(&data).is_err());
    }

    #[test]
    fn test_unsupported_mbc_rejected() {
        // 0xFE is HuC3 which is outside of the supported families
        let data = build_rom(0xfe, 0x00, 0x00);
        assert!(Cartridge::from_data(&data).is_err());
    }

    #[test]
    fn test_invalid_size_rejected() {
        let data = vec![0x00; 0x6000];
        assert!(Cartridge::from_data(&data).is_err());
    }

    #[test]
    fn test_mbc1_rom_banking() {
        let mut data = build_rom(0x01, 0x03, 0x02);
        // tag the first byte of each bank with the bank number
        for bank in 0..16usize {
            data[bank * 0x4000] = bank as u8;
        }
        data[0x014d] = 0x00;
        let checksum = {
            let mut sum: u8 = 0;
            for i in 0x0134..=0x014c {
                sum = sum.wrapping_sub(data[i]).wrapping_sub(1);
            }
            sum
        };
        data[0x014d] = checksum;
        let mut cartridge = Cartridge::from_data(&data).unwrap();

        assert_eq!(cartridge.read(0x4000), 0x01);

        cartridge.write(0x2000, 0x05);
        assert_eq!(cartridge.rom_bank(), 5);
        assert_eq!(cartridge.read(0x4000), 0x05);

        // writing zero to ROMB selects bank 1
        cartridge.write(0x2000, 0x00);
        assert_eq!(cartridge.rom_bank(), 1);

        // bank number wraps to the available bank count
        cartridge.write(0x2000, 0x1f);
        assert_eq!(cartridge.rom_bank(), 0x1f & 0x0f);
    }

    #[test]
    fn test_mbc1_ram_enable() {
        let data = build_rom(0x02, 0x00, 0x02);
        let mut cartridge = Cartridge::from_data(&data).unwrap();

        assert_eq!(cartridge.read(0xa000), 0xff);
        cartridge.write(0xa000, 0x42);

        cartridge.write(0x0000, 0x0a);
        cartridge.write(0xa000, 0x42);
        assert_eq!(cartridge.read(0xa000), 0x42);

        cartridge.write(0x0000, 0x00);
        assert_eq!(cartridge.read(0xa000), 0xff);
    }

    #[test]
    fn test_mbc1_ram_banking_mode() {
        let data = build_rom(0x03, 0x00, 0x03);
        let mut cartridge = Cartridge::from_data(&data).unwrap();
        cartridge.write(0x0000, 0x0a);

        // mode 1 routes RAMB to the RAM bank selection
        cartridge.write(0x6000, 0x01);
        cartridge.write(0x4000, 0x02);
        cartridge.write(0xa000, 0x11);
        cartridge.write(0x4000, 0x00);
        cartridge.write(0xa000, 0x22);
        assert_eq!(cartridge.read(0xa000), 0x22);
        cartridge.write(0x4000, 0x02);
        assert_eq!(cartridge.read(0xa000), 0x11);

        // back in mode 0 only bank 0 is visible
        cartridge.write(0x6000, 0x00);
        assert_eq!(cartridge.read(0xa000), 0x22);
    }

    #[test]
    fn test_mbc5_ram_banking() {
        let data = build_rom(0x1a, 0x00, 0x03);
        let mut cartridge = Cartridge::from_data(&data).unwrap();
        cartridge.write(0x0000, 0x0a);

        cartridge.write(0x4000, 0x03);
        cartridge.write(0xa000, 0x33);
        cartridge.write(0x4000, 0x00);
        cartridge.write(0xa000, 0x44);
        assert_eq!(cartridge.read(0xa000), 0x44);
        cartridge.write(0x4000, 0x03);
        assert_eq!(cartridge.read(0xa000), 0x33);
    }

    #[test]
    fn test_mbc5_nine_bit_banking() {
        let data = build_rom(0x19, 0x07, 0x00);
        let mut cartridge = Cartridge::from_data(&data).unwrap();

        cartridge.write(0x2000, 0x34);
        cartridge.write(0x3000, 0x01);
        assert_eq!(cartridge.rom_bank(), 0x134);

        // MBC5 does not remap bank 0
        cartridge.write(0x3000, 0x00);
        cartridge.write(0x2000, 0x00);
        assert_eq!(cartridge.rom_bank(), 0);
    }

    #[test]
    fn test_mbc3_rtc_latch() {
        let data = build_rom(0x10, 0x00, 0x02);
        let mut cartridge = Cartridge::from_data(&data).unwrap();
        cartridge.write(0x0000, 0x0a);

        // one emulated second on the live clock
        cartridge.clock(4194304);
        assert_eq!(cartridge.rtc().seconds, 1);

        // the latched snapshot only updates on the 1 -> 0 sequence
        cartridge.write(0x4000, 0x08);
        assert_eq!(cartridge.read(0xa000), 0);
        cartridge.write(0x6000, 0x01);
        cartridge.write(0x6000, 0x00);
        assert_eq!(cartridge.read(0xa000), 1);
    }

    #[test]
    fn test_mbc3_rtc_halt() {
        let data = build_rom(0x10, 0x00, 0x02);
        let mut cartridge = Cartridge::from_data(&data).unwrap();
        cartridge.write(0x0000, 0x0a);

        // set the halt bit through the DH register
        cartridge.write(0x4000, 0x0c);
        cartridge.write(0xa000, 0x40);
        cartridge.clock(4194304 * 2);
        assert_eq!(cartridge.rtc().seconds, 0);
    }

    #[test]
    fn test_ram_contents_round_trip() {
        let data = build_rom(0x03, 0x00, 0x02);
        let mut cartridge = Cartridge::from_data(&data).unwrap();
        cartridge.write(0x0000, 0x0a);
        cartridge.write(0xa000, 0x99);

        let contents = cartridge.ram_contents();
        let mut other = Cartridge::from_data(&data).unwrap();
        other.set_ram_contents(&contents).unwrap();
        other.write(0x0000, 0x0a);
        assert_eq!(other.read(0xa000), 0x99);
    }
}
