//! The persisted selector word.
//!
//! The selector occupies one word in a sector of its own. An update erases that sector, programs
//! the word and reads it back. There is no journal: a power loss between erase and program leaves
//! the erased value behind, which the dispatcher treats like a cold start.

use crate::{
    ERASED_WORD, Slot,
    flash::{Fault, FlashController, FlashError, Programmer, Unlocked},
    layout::{FlagConfig, Layout},
    log,
};

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FlagError {
    Erase(FlashError),
    Unlock(Fault),
    Program(Fault),
    /// The sector does not hold the selector word.
    WrongSector(u32),
    /// Read-back after programming returned this value instead.
    VerifyMismatch(u32),
}

pub struct FlagStore<'a, C> {
    flash: &'a mut C,
    config: FlagConfig,
}

impl<'a, C: FlashController> FlagStore<'a, C> {
    pub fn new(flash: &'a mut C, config: FlagConfig) -> Self {
        Self { flash, config }
    }

    /// Current selector value, read directly from flash.
    ///
    /// A failed read is reported as erased flash.
    pub async fn read(&mut self) -> u32 {
        match self.flash.read_word(self.config.address).await {
            Ok(value) => value,
            Err(fault) => {
                log::warn!("flag read at {:#x} failed: {:?}", self.config.address, fault);
                ERASED_WORD
            }
        }
    }

    /// Slot named by the current selector, if it is recognized by `layout`.
    pub async fn selected(&mut self, layout: &Layout<'_>) -> Option<Slot> {
        let value = self.read().await;
        layout.slot_for_selector(value)
    }

    /// Replace the selector: erase `sector`, program `value` and verify it.
    ///
    /// `sector` must contain the selector word. Anything else stored in it is lost.
    pub async fn write(&mut self, sector: u32, value: u32) -> Result<(), FlagError> {
        let holds_flag = self
            .flash
            .sector(sector)
            .is_some_and(|range| range.contains(&self.config.address));
        if !holds_flag {
            log::error!("sector {} does not hold the flag at {:#x}", sector, self.config.address);
            return Err(FlagError::WrongSector(sector));
        }

        Programmer::new(&mut *self.flash)
            .erase(sector)
            .await
            .map_err(FlagError::Erase)?;

        {
            let mut flash = Unlocked::acquire(&mut *self.flash).map_err(|fault| {
                log::error!("flag unlock failed: {:?}", fault);
                FlagError::Unlock(fault)
            })?;

            if let Err(fault) = flash.program_word(self.config.address, value).await {
                log::error!("flag program failed at {:#x}: {:?}", self.config.address, fault);
                return Err(FlagError::Program(fault));
            }
        }

        let read_back = self.read().await;
        if read_back != value {
            log::error!("flag verify failed: wrote {}, read back {:#x}", value, read_back);
            return Err(FlagError::VerifyMismatch(read_back));
        }

        log::info!("flag updated to {}", value);
        Ok(())
    }
}
