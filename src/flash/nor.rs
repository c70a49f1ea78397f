//! [`FlashController`] on top of an `embedded-storage-async` NOR flash driver.
//!
//! HAL flash drivers (embassy-stm32 and friends) already unlock the peripheral around each
//! operation, so the lock state is tracked here in software: erase and program are refused unless
//! the controller has been unlocked.
//!
//! Programs narrower than the driver's `WRITE_SIZE` are padded with erased bytes, which leave
//! neighbouring bytes untouched on NOR flash.

use core::ops::Range;

use embedded_storage_async::nor_flash::{NorFlash, NorFlashError, NorFlashErrorKind};

use crate::{
    flash::{Fault, FlashController},
    layout::Geometry,
};

/// Largest driver `WRITE_SIZE` supported.
const MAX_WRITE_SIZE: usize = 32;

const ERASED_BYTE: u8 = 0xFF;

pub struct NorFlashController<'a, F> {
    flash: F,
    geometry: Geometry<'a>,
    unlocked: bool,
}

impl<'a, F: NorFlash> NorFlashController<'a, F> {
    /// Driver offset 0 is mapped at `geometry.base`.
    pub fn new(flash: F, geometry: Geometry<'a>) -> Self {
        Self {
            flash,
            geometry,
            unlocked: false,
        }
    }

    pub fn release(self) -> F {
        self.flash
    }

    fn offset(&self, address: u32, len: usize) -> Result<u32, Fault> {
        let offset = address.checked_sub(self.geometry.base).ok_or(Fault::OutOfBounds)?;
        match (offset as usize).checked_add(len) {
            Some(end) if end <= self.flash.capacity() => Ok(offset),
            _ => Err(Fault::OutOfBounds),
        }
    }

    fn check_unlocked(&self) -> Result<(), Fault> {
        if self.unlocked { Ok(()) } else { Err(Fault::Locked) }
    }

    async fn program(&mut self, address: u32, bytes: &[u8]) -> Result<(), Fault> {
        self.check_unlocked()?;

        let align = F::WRITE_SIZE;
        if align == 0 || align > MAX_WRITE_SIZE {
            return Err(Fault::Alignment);
        }

        let mut offset = self.offset(address, bytes.len())?;
        let mut rest = bytes;
        while !rest.is_empty() {
            let start = offset - offset % align as u32;
            let skip = (offset - start) as usize;
            let take = (align - skip).min(rest.len());

            let mut chunk = [ERASED_BYTE; MAX_WRITE_SIZE];
            chunk[skip..skip + take].copy_from_slice(&rest[..take]);
            self.flash.write(start, &chunk[..align]).await.map_err(fault)?;

            offset += take as u32;
            rest = &rest[take..];
        }

        Ok(())
    }
}

fn fault<E: NorFlashError>(e: E) -> Fault {
    match e.kind() {
        NorFlashErrorKind::NotAligned => Fault::Alignment,
        NorFlashErrorKind::OutOfBounds => Fault::OutOfBounds,
        _ => Fault::Other,
    }
}

impl<F: NorFlash> FlashController for NorFlashController<'_, F> {
    fn unlock(&mut self) -> Result<(), Fault> {
        self.unlocked = true;
        Ok(())
    }

    fn lock(&mut self) {
        self.unlocked = false;
    }

    async fn erase_sector(&mut self, sector: u32) -> Result<(), Fault> {
        self.check_unlocked()?;

        let range = self.geometry.sector(sector).ok_or(Fault::OutOfBounds)?;
        let from = self.offset(range.start, (range.end - range.start) as usize)?;
        let to = from + (range.end - range.start);
        self.flash.erase(from, to).await.map_err(fault)
    }

    async fn program_byte(&mut self, address: u32, value: u8) -> Result<(), Fault> {
        self.program(address, &[value]).await
    }

    async fn program_word(&mut self, address: u32, value: u32) -> Result<(), Fault> {
        self.program(address, &value.to_le_bytes()).await
    }

    async fn read_word(&mut self, address: u32) -> Result<u32, Fault> {
        let offset = self.offset(address, 4)?;
        let mut word = [0u8; 4];
        self.flash.read(offset, &mut word).await.map_err(fault)?;
        Ok(u32::from_le_bytes(word))
    }

    fn sector(&self, index: u32) -> Option<Range<u32>> {
        self.geometry.sector(index)
    }
}
