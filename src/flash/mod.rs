//! Sector erase and byte programming on top of a raw flash controller.

use core::ops::{Deref, DerefMut, Range};

use crate::log;

pub mod nor;

/// Diagnostic code reported by a flash controller.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Fault {
    /// The controller was asked to modify flash while locked.
    Locked,
    Busy,
    Timeout,
    WriteProtected,
    Alignment,
    OutOfBounds,
    Other,
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FlashError {
    UnlockFailed(Fault),
    EraseFailed { sector: u32, fault: Fault },
    /// Programming stopped at `address`; everything before it has been written.
    ProgramFailed { address: u32, fault: Fault },
}

/// Raw flash controller of the device.
///
/// Implementations only need to drive the hardware; lock pairing, sequencing and verification are
/// done by [`Programmer`] and [`crate::FlagStore`].
#[allow(async_fn_in_trait)]
pub trait FlashController {
    /// Allow erase and program operations.
    fn unlock(&mut self) -> Result<(), Fault>;

    /// Forbid erase and program operations.
    fn lock(&mut self);

    /// Erase a single sector of the primary bank.
    async fn erase_sector(&mut self, sector: u32) -> Result<(), Fault>;

    async fn program_byte(&mut self, address: u32, value: u8) -> Result<(), Fault>;

    async fn program_word(&mut self, address: u32, value: u32) -> Result<(), Fault>;

    /// Read a word straight from flash, bypassing any cache.
    async fn read_word(&mut self, address: u32) -> Result<u32, Fault>;

    /// Address range of a sector, or `None` if the sector does not exist.
    fn sector(&self, index: u32) -> Option<Range<u32>>;
}

impl<C: FlashController> FlashController for &mut C {
    fn unlock(&mut self) -> Result<(), Fault> {
        (**self).unlock()
    }

    fn lock(&mut self) {
        (**self).lock()
    }

    async fn erase_sector(&mut self, sector: u32) -> Result<(), Fault> {
        (**self).erase_sector(sector).await
    }

    async fn program_byte(&mut self, address: u32, value: u8) -> Result<(), Fault> {
        (**self).program_byte(address, value).await
    }

    async fn program_word(&mut self, address: u32, value: u32) -> Result<(), Fault> {
        (**self).program_word(address, value).await
    }

    async fn read_word(&mut self, address: u32) -> Result<u32, Fault> {
        (**self).read_word(address).await
    }

    fn sector(&self, index: u32) -> Option<Range<u32>> {
        (**self).sector(index)
    }
}

/// An unlocked flash controller. The controller is locked again when this is dropped.
pub struct Unlocked<'a, C: FlashController> {
    flash: &'a mut C,
}

impl<'a, C: FlashController> Unlocked<'a, C> {
    pub fn acquire(flash: &'a mut C) -> Result<Self, Fault> {
        flash.unlock()?;
        Ok(Unlocked { flash })
    }
}

impl<C: FlashController> Deref for Unlocked<'_, C> {
    type Target = C;

    fn deref(&self) -> &C {
        self.flash
    }
}

impl<C: FlashController> DerefMut for Unlocked<'_, C> {
    fn deref_mut(&mut self) -> &mut C {
        self.flash
    }
}

impl<C: FlashController> Drop for Unlocked<'_, C> {
    fn drop(&mut self) {
        self.flash.lock();
    }
}

/// Erases sectors and programs byte sequences.
///
/// Neither operation checks that the target was erased beforehand.
pub struct Programmer<'a, C> {
    flash: &'a mut C,
}

impl<'a, C: FlashController> Programmer<'a, C> {
    pub fn new(flash: &'a mut C) -> Self {
        Self { flash }
    }

    fn unlocked(&mut self) -> Result<Unlocked<'_, C>, FlashError> {
        Unlocked::acquire(&mut *self.flash).map_err(|fault| {
            log::error!("flash unlock failed: {:?}", fault);
            FlashError::UnlockFailed(fault)
        })
    }

    /// Erase one sector. Erasing an erased sector is harmless.
    pub async fn erase(&mut self, sector: u32) -> Result<(), FlashError> {
        let mut flash = self.unlocked()?;

        flash.erase_sector(sector).await.map_err(|fault| {
            log::error!("flash erase failed, sector {}: {:?}", sector, fault);
            FlashError::EraseFailed { sector, fault }
        })
    }

    /// Erase consecutive sectors, stopping at the first failure.
    pub async fn erase_range(&mut self, sectors: Range<u32>) -> Result<(), FlashError> {
        for sector in sectors {
            self.erase(sector).await?;
        }
        Ok(())
    }

    /// Program `bytes` one at a time starting at `base`.
    ///
    /// The first failing byte aborts the write; bytes before it stay programmed. A write that
    /// runs past the end of the address space is refused before anything is programmed.
    pub async fn write(&mut self, base: u32, bytes: &[u8]) -> Result<(), FlashError> {
        if u64::from(base) + bytes.len() as u64 > 1 << 32 {
            log::error!("flash write of {} bytes at {:#x} overflows", bytes.len(), base);
            return Err(FlashError::ProgramFailed {
                address: base,
                fault: Fault::OutOfBounds,
            });
        }

        let mut flash = self.unlocked()?;

        for (offset, &byte) in bytes.iter().enumerate() {
            let address = base + offset as u32;
            if let Err(fault) = flash.program_byte(address, byte).await {
                log::error!("flash program failed at {:#x}: {:?}", address, fault);
                return Err(FlashError::ProgramFailed { address, fault });
            }
        }

        Ok(())
    }
}
