//! Dual-image bootloader driven by a single persisted selector word.
//!
//! On every reset the [`Bootloader`] reads the selector from flash, picks the image slot it names
//! and hands the processor over to that image. An unrecognized selector (erased flash, zero,
//! garbage) is repaired by writing the default selector before handing off.
//!
//! Firmware updates are performed by an external updater through [`Bootloader::update_firmware`]:
//! the target slot is erased and programmed, the selector is committed, and the system is reset so
//! that the next boot dispatches from a clean state.
#![no_std]

use core::fmt;

use serde::{Deserialize, Serialize};

pub mod boot;
pub mod dispatch;
pub mod flag;
pub mod flash;
pub mod layout;

mod log;

#[cfg(test)]
extern crate std;

#[cfg(test)]
mod mock;

pub use dispatch::{Bootloader, State};
pub use flag::{FlagError, FlagStore};
pub use flash::{Fault, FlashController, FlashError, Programmer};
pub use layout::{FlagConfig, Layout, LayoutError, SlotConfig};

/// Selector value for the first image slot.
pub const SELECT_IMAGE_1: u32 = 1;
/// Selector value for the second image slot.
pub const SELECT_IMAGE_2: u32 = 2;
/// Value of a word of erased flash.
pub const ERASED_WORD: u32 = 0xFFFF_FFFF;

/// Image slot, numbered from one in layout order.
///
/// The slot number doubles as the selector value persisted in flash.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Serialize, Deserialize)]
#[serde(try_from = "u8")]
pub struct Slot(pub(crate) u8);

impl Slot {
    pub const ONE: Slot = Slot(1);
    pub const TWO: Slot = Slot(2);

    /// Slot with the given number. Slot numbers start at one.
    pub const fn new(number: u8) -> Option<Slot> {
        if number == 0 { None } else { Some(Slot(number)) }
    }

    pub const fn number(self) -> u8 {
        self.0
    }

    /// Position of this slot in [`Layout::slots`].
    pub const fn index(self) -> usize {
        self.0 as usize - 1
    }

    /// Selector value that makes the dispatcher boot this slot.
    pub const fn selector(self) -> u32 {
        self.0 as u32
    }
}

/// Slot number zero.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct InvalidSlot;

impl fmt::Display for InvalidSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("slot numbers start at one")
    }
}

impl TryFrom<u8> for Slot {
    type Error = InvalidSlot;

    fn try_from(number: u8) -> Result<Self, InvalidSlot> {
        Slot::new(number).ok_or(InvalidSlot)
    }
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Error {
    Flash(FlashError),
    Flag(FlagError),
    Layout(LayoutError),
    /// The address does not start any configured image slot.
    UnknownSlot(u32),
    /// The firmware payload does not fit in the target slot.
    PayloadTooLarge { len: usize, capacity: u32 },
}

impl From<FlashError> for Error {
    fn from(e: FlashError) -> Self {
        Error::Flash(e)
    }
}

impl From<FlagError> for Error {
    fn from(e: FlagError) -> Self {
        Error::Flag(e)
    }
}

impl From<LayoutError> for Error {
    fn from(e: LayoutError) -> Self {
        Error::Layout(e)
    }
}
