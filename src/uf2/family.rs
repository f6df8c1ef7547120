use std::convert::TryFrom;
use std::fmt;
use std::str::FromStr;

use num_enum::{IntoPrimitive, TryFromPrimitive};
use thiserror::Error;

/// Microcontroller families the bootloader can be asked to accept an image for
#[repr(u32)]
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, IntoPrimitive, TryFromPrimitive)]
pub enum Family {
    Rp2040 = 0xE48B_FF56,
    Samd21 = 0x68ED_2B88,
    Samd51 = 0x5511_4460,
    Nrf52840 = 0xADA5_2840,
    Stm32f4 = 0x5775_5A57,
}

#[derive(Debug, Error)]
#[error("Unknown chip family {:?}, expected one of: {}", .0, Family::NAMES.join(", "))]
pub struct UnknownFamily(pub String);

impl Family {
    pub const ALL: [Family; 5] = [
        Family::Rp2040,
        Family::Samd21,
        Family::Samd51,
        Family::Nrf52840,
        Family::Stm32f4,
    ];

    pub const NAMES: [&'static str; 5] = ["rp2040", "samd21", "samd51", "nrf52840", "stm32f4"];

    /// The family identifier written to every block
    pub fn id(self) -> u32 {
        self.into()
    }

    /// Returns the family with the given identifier, if it is known
    pub fn from_id(id: u32) -> Option<Family> {
        Family::try_from(id).ok()
    }

    /// The address raw binaries are loaded at when no load addresses are available
    pub fn base_address(self) -> u32 {
        match self {
            Family::Rp2040 => 0x1000_0000,
            // Behind the UF2 bootloader
            Family::Samd21 => 0x0000_2000,
            Family::Samd51 => 0x0000_4000,
            // Behind the S140 SoftDevice
            Family::Nrf52840 => 0x0002_6000,
            Family::Stm32f4 => 0x0800_0000,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Family::Rp2040 => "rp2040",
            Family::Samd21 => "samd21",
            Family::Samd51 => "samd51",
            Family::Nrf52840 => "nrf52840",
            Family::Stm32f4 => "stm32f4",
        }
    }
}

impl Default for Family {
    fn default() -> Family {
        Family::Rp2040
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Family {
    type Err = UnknownFamily;

    fn from_str(s: &str) -> Result<Family, UnknownFamily> {
        Family::ALL
            .iter()
            .copied()
            .find(|family| family.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownFamily(s.to_string()))
    }
}
