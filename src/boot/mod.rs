use core::ops::Range;

#[cfg(feature = "cortex_m")]
pub mod cortex_m;

use crate::{Slot, flash::{Fault, FlashController}, layout::SlotConfig};

/// Platform hooks: hardware setup, hand-off to an image slot and system reset.
pub trait Boot {
    /// One-time setup before dispatching, for example a fault indicator. Does nothing by default.
    fn init() {}

    /// Hand the processor over to the image whose vector table starts at `addr`.
    ///
    /// Interrupts are disabled, the vector table base is moved to `addr`, the stack pointer is
    /// loaded from `addr[0]` and execution branches to `addr[1]`, in that order.
    ///
    /// # Safety
    /// `addr` must point to the vector table of an executable image.
    unsafe fn boot(addr: *const u32) -> !;

    /// Reset the whole system.
    fn reset() -> !;
}

/// The first two words of a Cortex-M vector table.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct VectorTable {
    pub initial_sp: u32,
    pub reset_vector: u32,
}

impl VectorTable {
    pub async fn read<C: FlashController>(flash: &mut C, base: u32) -> Result<Self, Fault> {
        Ok(VectorTable {
            initial_sp: flash.read_word(base).await?,
            reset_vector: flash.read_word(base + 4).await?,
        })
    }
}

/// Gate consulted before handing off to a slot.
#[allow(async_fn_in_trait)]
pub trait ImageCheck {
    /// Whether the image in `slot` may be started.
    async fn accept<C: FlashController>(
        &mut self,
        flash: &mut C,
        slot: Slot,
        config: &SlotConfig,
    ) -> bool;
}

/// Starts whatever is in the slot.
pub struct AcceptAll;

impl ImageCheck for AcceptAll {
    async fn accept<C: FlashController>(
        &mut self,
        _flash: &mut C,
        _slot: Slot,
        _config: &SlotConfig,
    ) -> bool {
        true
    }
}

/// Accepts an image whose initial stack pointer lies in RAM and whose reset vector is a Thumb
/// address inside the slot.
///
/// Catches erased and half-written slots, not corrupted code.
pub struct VectorTableCheck {
    pub ram: Range<u32>,
}

impl VectorTableCheck {
    /// 128K of SRAM1 and SRAM2.
    pub const STM32F407: VectorTableCheck = VectorTableCheck {
        ram: 0x2000_0000..0x2002_0000,
    };

    pub fn plausible(&self, vectors: &VectorTable, config: &SlotConfig) -> bool {
        // The stack pointer may sit one past the end of RAM, it is decremented before use.
        let sp_ok = vectors.initial_sp > self.ram.start && vectors.initial_sp <= self.ram.end;
        let entry = vectors.reset_vector & !1;
        let entry_ok = vectors.reset_vector & 1 == 1 && config.contains(entry);
        sp_ok && entry_ok
    }
}

impl ImageCheck for VectorTableCheck {
    async fn accept<C: FlashController>(
        &mut self,
        flash: &mut C,
        _slot: Slot,
        config: &SlotConfig,
    ) -> bool {
        match VectorTable::read(flash, config.base).await {
            Ok(vectors) => self.plausible(&vectors, config),
            Err(_) => false,
        }
    }
}
