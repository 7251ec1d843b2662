//! Boot ROM descriptors.
//!
//! The boot ROM images themselves are not bundled with the crate, they
//! are loaded from the host file system (or skipped entirely by jumping
//! straight to the post-boot state).

use std::fmt::{self, Display, Formatter};

/// Enumeration that describes the boot ROM currently loaded
/// into the machine, if any.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BootRom {
    /// No boot ROM loaded, the machine must be started through
    /// the direct post-boot state.
    None,

    /// The original 256 byte DMG boot ROM.
    Dmg,

    /// A boot ROM image provided by the host.
    Other,
}

impl BootRom {
    pub fn description(&self) -> &'static str {
        match self {
            BootRom::None => "None",
            BootRom::Dmg => "DMG",
            BootRom::Other => "Other",
        }
    }
}

impl Display for BootRom {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}
