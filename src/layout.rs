//! Flash layout: where the selector lives and where each image slot lives.
//!
//! The layout is plain data, so a board describes any number of slots without code changes.
//! [`Layout::validate`] checks it against the sector geometry of the flash controller.

use core::ops::Range;

use serde::{Deserialize, Serialize};

use crate::{Slot, flash::FlashController};

/// Sector sizes of bank 1 on STM32F405/407, starting at [`STM32F4_FLASH_BASE`].
pub const STM32F4_SECTORS: [u32; 12] = [
    16 * 1024,
    16 * 1024,
    16 * 1024,
    16 * 1024,
    64 * 1024,
    128 * 1024,
    128 * 1024,
    128 * 1024,
    128 * 1024,
    128 * 1024,
    128 * 1024,
    128 * 1024,
];

pub const STM32F4_FLASH_BASE: u32 = 0x0800_0000;

/// Memory-mapped flash made of consecutive sectors of possibly different sizes.
#[derive(Clone, Copy, Debug)]
pub struct Geometry<'a> {
    pub base: u32,
    pub sectors: &'a [u32],
}

impl<'a> Geometry<'a> {
    pub const STM32F4: Geometry<'static> = Geometry {
        base: STM32F4_FLASH_BASE,
        sectors: &STM32F4_SECTORS,
    };

    /// Address range covered by a sector.
    pub fn sector(&self, index: u32) -> Option<Range<u32>> {
        let index = index as usize;
        if index >= self.sectors.len() {
            return None;
        }
        let start = self.base + self.sectors[..index].iter().sum::<u32>();
        Some(start..start + self.sectors[index])
    }

    /// Sector that contains `address`.
    pub fn sector_of(&self, address: u32) -> Option<u32> {
        (0..self.sectors.len() as u32)
            .find(|&i| self.sector(i).is_some_and(|r| r.contains(&address)))
    }
}

/// Location of the persisted selector word.
///
/// The flag sector is erased on every selector update, so it must hold nothing else of value.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct FlagConfig {
    pub address: u32,
    pub sector: u32,
}

/// An image slot: the vector table sits at `base`, the slot spans `sector_count` sectors.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct SlotConfig {
    pub base: u32,
    /// Capacity in bytes.
    pub size: u32,
    pub first_sector: u32,
    pub sector_count: u32,
}

impl SlotConfig {
    pub fn sectors(&self) -> Range<u32> {
        self.first_sector..self.first_sector + self.sector_count
    }

    pub fn contains(&self, address: u32) -> bool {
        (self.base..self.base + self.size).contains(&address)
    }
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LayoutError {
    NoSlots,
    TooManySlots,
    /// The default slot is not one of the configured slots.
    MissingDefault(Slot),
    /// The flag word is not 4-byte aligned.
    MisalignedFlag(u32),
    /// The flag word does not lie inside the configured flag sector.
    FlagOutsideSector { address: u32, sector: u32 },
    /// The flash controller does not know this sector.
    UnknownSector(u32),
    /// The slot base is not the start of its first sector.
    SlotNotSectorAligned(Slot),
    /// The slot capacity exceeds the sectors assigned to it.
    SlotExceedsSectors(Slot),
    /// Updating the slot would erase the selector.
    SlotContainsFlag(Slot),
    SlotsOverlap(Slot, Slot),
}

/// The complete flash layout of the bootloader.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Serialize)]
pub struct Layout<'a> {
    pub flag: FlagConfig,
    pub slots: &'a [SlotConfig],
    /// Slot booted, and written back as selector, when the stored selector is not recognized.
    pub default_slot: Slot,
}

const STM32F407_SLOTS: [SlotConfig; 2] = [
    SlotConfig {
        base: 0x0802_0000,
        size: 128 * 1024,
        first_sector: 5,
        sector_count: 1,
    },
    SlotConfig {
        base: 0x0804_0000,
        size: 128 * 1024,
        first_sector: 6,
        sector_count: 1,
    },
];

impl<'a> Layout<'a> {
    /// Two 128K images on STM32F407, selector in the 16K sector 2.
    pub const STM32F407: Layout<'static> = Layout {
        flag: FlagConfig {
            address: 0x0800_8000,
            sector: 2,
        },
        slots: &STM32F407_SLOTS,
        default_slot: Slot::ONE,
    };

    pub fn slot(&self, slot: Slot) -> Option<&'a SlotConfig> {
        self.slots.get(slot.index())
    }

    /// All configured slots, in layout order.
    pub fn iter(&self) -> impl Iterator<Item = (Slot, &'a SlotConfig)> + 'a {
        let slots = self.slots;
        slots.iter().enumerate().map(|(i, config)| (Slot(i as u8 + 1), config))
    }

    /// Slot named by a stored selector, if the selector is recognized.
    pub fn slot_for_selector(&self, selector: u32) -> Option<Slot> {
        if selector == 0 || selector > self.slots.len() as u32 {
            return None;
        }
        Some(Slot(selector as u8))
    }

    /// Slot whose image starts at `address`.
    pub fn slot_at(&self, address: u32) -> Option<Slot> {
        self.iter().find(|(_, config)| config.base == address).map(|(slot, _)| slot)
    }

    /// Check the layout against the sector geometry of `flash`.
    pub fn validate<C: FlashController>(&self, flash: &C) -> Result<(), LayoutError> {
        if self.slots.is_empty() {
            return Err(LayoutError::NoSlots);
        }
        if self.slots.len() > u8::MAX as usize {
            return Err(LayoutError::TooManySlots);
        }
        if self.slot(self.default_slot).is_none() {
            return Err(LayoutError::MissingDefault(self.default_slot));
        }

        let flag = self.flag;
        if flag.address % 4 != 0 {
            return Err(LayoutError::MisalignedFlag(flag.address));
        }
        let flag_range = flash
            .sector(flag.sector)
            .ok_or(LayoutError::UnknownSector(flag.sector))?;
        if !(flag_range.contains(&flag.address) && flag_range.contains(&(flag.address + 3))) {
            return Err(LayoutError::FlagOutsideSector {
                address: flag.address,
                sector: flag.sector,
            });
        }

        for (slot, config) in self.iter() {
            let mut span = 0u32;
            for sector in config.sectors() {
                let range = flash.sector(sector).ok_or(LayoutError::UnknownSector(sector))?;
                if sector == config.first_sector && range.start != config.base {
                    return Err(LayoutError::SlotNotSectorAligned(slot));
                }
                span += range.end - range.start;
            }
            if config.sector_count == 0 || config.size > span {
                return Err(LayoutError::SlotExceedsSectors(slot));
            }
            if config.sectors().contains(&flag.sector) || config.contains(flag.address) {
                return Err(LayoutError::SlotContainsFlag(slot));
            }

            for (other, other_config) in self.iter().skip(slot.index() + 1) {
                let sectors = config.sectors();
                let other_sectors = other_config.sectors();
                if sectors.start < other_sectors.end && other_sectors.start < sectors.end {
                    return Err(LayoutError::SlotsOverlap(slot, other));
                }
            }
        }

        Ok(())
    }
}
