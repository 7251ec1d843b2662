//! Static information about the current crate.

pub struct Info;

impl Info {
    /// Obtains the name of the emulator.
    pub fn name() -> String {
        String::from("Greyboy")
    }

    /// Obtains the version of the emulator.
    pub fn version() -> String {
        String::from(env!("CARGO_PKG_VERSION"))
    }

    /// Obtains the name of the base system emulated.
    pub fn system() -> String {
        String::from("Game Boy (DMG)")
    }
}
