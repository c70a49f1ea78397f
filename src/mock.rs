use core::{cell::Cell, ops::Range};
use std::{
    collections::BTreeMap,
    panic::{AssertUnwindSafe, catch_unwind, panic_any},
    vec::Vec,
};

use crate::{
    boot::Boot,
    flash::{Fault, FlashController},
    layout::Geometry,
};

/// Erase count per sector.
#[derive(Debug, Default)]
pub struct WearTracker(BTreeMap<u32, usize>);

impl WearTracker {
    pub fn increase(&mut self, sector: u32) {
        *self.0.entry(sector).or_insert(0) += 1;
    }

    pub fn erases(&self, sector: u32) -> usize {
        self.0.get(&sector).copied().unwrap_or(0)
    }
}

/// Sparse NOR flash: unwritten bytes read as erased and programming only clears bits.
pub struct MockFlash {
    memory: BTreeMap<u32, u8>,
    geometry: Geometry<'static>,
    pub locked: bool,
    pub unlocks: usize,
    pub locks: usize,
    pub wear: WearTracker,
    /// Every unlock fails.
    pub fail_unlock: bool,
    /// Unlocks fail once this many have succeeded.
    pub fail_unlock_after: Option<usize>,
    pub fail_erase: Option<u32>,
    pub fail_program_at: Option<u32>,
    /// Programs covering this address report success without changing flash.
    pub drop_program_at: Option<u32>,
}

impl MockFlash {
    pub fn stm32f4() -> Self {
        MockFlash {
            memory: BTreeMap::new(),
            geometry: Geometry::STM32F4,
            locked: true,
            unlocks: 0,
            locks: 0,
            wear: WearTracker::default(),
            fail_unlock: false,
            fail_unlock_after: None,
            fail_erase: None,
            fail_program_at: None,
            drop_program_at: None,
        }
    }

    /// Store `bytes` at `address`, bypassing the controller.
    pub fn fill(&mut self, address: u32, bytes: &[u8]) {
        for (offset, &byte) in bytes.iter().enumerate() {
            self.memory.insert(address + offset as u32, byte);
        }
    }

    pub fn fill_word(&mut self, address: u32, value: u32) {
        self.fill(address, &value.to_le_bytes());
    }

    /// Write a vector table with the given initial stack pointer and reset vector.
    pub fn install_vectors(&mut self, base: u32, initial_sp: u32, reset_vector: u32) {
        self.fill_word(base, initial_sp);
        self.fill_word(base + 4, reset_vector);
    }

    pub fn byte(&self, address: u32) -> u8 {
        self.memory.get(&address).copied().unwrap_or(0xFF)
    }

    pub fn bytes(&self, address: u32, len: usize) -> Vec<u8> {
        (0..len).map(|offset| self.byte(address + offset as u32)).collect()
    }

    pub fn word(&self, address: u32) -> u32 {
        let bytes = self.bytes(address, 4);
        u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    pub fn is_erased(&self, range: Range<u32>) -> bool {
        self.memory.range(range).all(|(_, &b)| b == 0xFF)
    }

    fn program(&mut self, address: u32, bytes: &[u8]) -> Result<(), Fault> {
        if self.locked {
            return Err(Fault::Locked);
        }
        let covers = |a: u32| a >= address && ((a - address) as usize) < bytes.len();
        if self.fail_program_at.is_some_and(covers) {
            return Err(Fault::Other);
        }
        if self.drop_program_at.is_some_and(covers) {
            return Ok(());
        }

        for (offset, &byte) in bytes.iter().enumerate() {
            let address = address + offset as u32;
            let old = self.byte(address);
            self.memory.insert(address, old & byte);
        }
        Ok(())
    }
}

impl FlashController for MockFlash {
    fn unlock(&mut self) -> Result<(), Fault> {
        if self.fail_unlock || self.fail_unlock_after.is_some_and(|n| self.unlocks >= n) {
            return Err(Fault::WriteProtected);
        }
        self.unlocks += 1;
        self.locked = false;
        Ok(())
    }

    fn lock(&mut self) {
        self.locks += 1;
        self.locked = true;
    }

    async fn erase_sector(&mut self, sector: u32) -> Result<(), Fault> {
        if self.locked {
            return Err(Fault::Locked);
        }
        if self.fail_erase == Some(sector) {
            return Err(Fault::Other);
        }

        let range = self.geometry.sector(sector).ok_or(Fault::OutOfBounds)?;
        self.memory.retain(|address, _| !range.contains(address));
        self.wear.increase(sector);
        Ok(())
    }

    async fn program_byte(&mut self, address: u32, value: u8) -> Result<(), Fault> {
        self.program(address, &[value])
    }

    async fn program_word(&mut self, address: u32, value: u32) -> Result<(), Fault> {
        if address % 4 != 0 {
            return Err(Fault::Alignment);
        }
        self.program(address, &value.to_le_bytes())
    }

    async fn read_word(&mut self, address: u32) -> Result<u32, Fault> {
        Ok(self.word(address))
    }

    fn sector(&self, index: u32) -> Option<Range<u32>> {
        self.geometry.sector(index)
    }
}

/// How control left the bootloader.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Handoff {
    Boot(u32),
    Reset,
}

std::thread_local! {
    static INITIALIZED: Cell<bool> = const { Cell::new(false) };
}

/// Whether [`MockBoot::init`] ran on this thread.
pub fn initialized() -> bool {
    INITIALIZED.with(Cell::get)
}

/// Unwinds with a [`Handoff`] payload instead of leaving.
pub struct MockBoot;

impl Boot for MockBoot {
    fn init() {
        INITIALIZED.with(|i| i.set(true));
    }

    unsafe fn boot(addr: *const u32) -> ! {
        panic_any(Handoff::Boot(addr as u32))
    }

    fn reset() -> ! {
        panic_any(Handoff::Reset)
    }
}

/// Run `f` and return the hand-off it ended with.
pub fn expect_handoff(f: impl FnOnce()) -> Handoff {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(()) => panic!("bootloader returned instead of handing off"),
        Err(payload) => match payload.downcast::<Handoff>() {
            Ok(handoff) => *handoff,
            Err(_) => panic!("bootloader panicked"),
        },
    }
}

#[cfg(test)]
mod tests {
    use embassy_futures::block_on;

    use super::*;

    #[test]
    fn programming_only_clears_bits() {
        let mut flash = MockFlash::stm32f4();
        flash.fill(0x0802_0000, &[0b1010]);
        flash.unlock().unwrap();

        block_on(flash.program_byte(0x0802_0000, 0b0110)).unwrap();
        assert_eq!(flash.byte(0x0802_0000), 0b0010);

        block_on(flash.erase_sector(5)).unwrap();
        assert_eq!(flash.byte(0x0802_0000), 0xFF);
        assert_eq!(flash.wear.erases(5), 1);
    }
}
