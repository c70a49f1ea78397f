//! Image selection on boot, and firmware installation.
//!
//! Every reset starts in [`State::Dispatch`]. The selector picks a slot, an unrecognized selector
//! is repaired first, and the last transition, [`State::HandOff`], leaves the bootloader for good.
//!
//! ```text
//!  Idle ──► Dispatch ──(selector names a slot)──────────────► HandOff(slot)
//!              │                                                 ▲
//!              └──(anything else)──► Recover ──(write default)───┘
//! ```

use core::{convert::Infallible, marker::PhantomData};

use crate::{
    Error, Slot,
    boot::{AcceptAll, Boot, ImageCheck, VectorTable},
    flag::{FlagError, FlagStore},
    flash::{FlashController, Programmer},
    layout::Layout,
    log,
};

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum State {
    /// Constructed, not yet dispatching.
    Idle,
    /// Reading the selector.
    Dispatch,
    /// Selector unrecognized; the default selector is written back.
    Recover,
    /// Control is about to leave for `Slot`. No transition leaves this state.
    HandOff(Slot),
}

pub struct Bootloader<'a, C, B, K = AcceptAll> {
    flash: C,
    layout: &'a Layout<'a>,
    check: K,
    state: State,
    _boot: PhantomData<B>,
}

impl<'a, C: FlashController, B: Boot> Bootloader<'a, C, B> {
    pub fn new(flash: C, layout: &'a Layout<'a>) -> Result<Self, Error> {
        layout.validate(&flash)?;

        Ok(Self {
            flash,
            layout,
            check: AcceptAll,
            state: State::Idle,
            _boot: PhantomData,
        })
    }
}

impl<'a, C: FlashController, B: Boot, K: ImageCheck> Bootloader<'a, C, B, K> {
    /// Replace the image check consulted before hand-off.
    pub fn with_check<K2: ImageCheck>(self, check: K2) -> Bootloader<'a, C, B, K2> {
        Bootloader {
            flash: self.flash,
            layout: self.layout,
            check,
            state: self.state,
            _boot: PhantomData,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn layout(&self) -> &'a Layout<'a> {
        self.layout
    }

    pub fn release(self) -> C {
        self.flash
    }

    fn flag(&mut self) -> FlagStore<'_, C> {
        FlagStore::new(&mut self.flash, self.layout.flag)
    }

    /// One-time hardware setup.
    pub fn init(&mut self) {
        B::init();
        log::debug!("bootloader initialized");
    }

    /// Perform a single transition of the dispatch state machine.
    pub async fn step(&mut self) -> State {
        self.state = match self.state {
            State::Idle => State::Dispatch,
            State::Dispatch => {
                let selector = self.flag().read().await;
                log::info!("bootloader flag = {:#x}", selector);

                match self.layout.slot_for_selector(selector) {
                    Some(slot) => State::HandOff(slot),
                    None => State::Recover,
                }
            }
            State::Recover => {
                let slot = self.layout.default_slot;
                log::warn!("unrecognized flag, defaulting to slot {}", slot.number());

                // Boot proceeds even if the selector could not be repaired.
                if let Err(e) = self.update_flag(self.layout.flag.sector, slot.selector()).await {
                    log::error!("flag repair failed: {:?}", e);
                }
                State::HandOff(slot)
            }
            state @ State::HandOff(_) => state,
        };

        self.state
    }

    /// Run the state machine from [`State::Dispatch`] and return the slot to hand off to.
    ///
    /// If the image check rejects that slot, the first accepted slot in layout order is used
    /// instead. When no slot is accepted the selected slot is used regardless.
    pub async fn dispatch(&mut self) -> Slot {
        self.state = State::Dispatch;
        let selected = loop {
            if let State::HandOff(slot) = self.step().await {
                break slot;
            }
        };

        let layout = self.layout;
        if let Some(config) = layout.slot(selected) {
            if self.check.accept(&mut self.flash, selected, config).await {
                return selected;
            }
        }
        log::warn!("image in slot {} rejected", selected.number());

        for (slot, config) in layout.iter().filter(|(slot, _)| *slot != selected) {
            if self.check.accept(&mut self.flash, slot, config).await {
                log::warn!("falling back to slot {}", slot.number());
                self.state = State::HandOff(slot);
                return slot;
            }
        }

        log::error!("no acceptable image, starting slot {} anyway", selected.number());
        selected
    }

    /// Select an image and start it. Never returns.
    pub async fn run(mut self) -> ! {
        let slot = self.dispatch().await;
        self.hand_off(slot).await
    }

    async fn hand_off(mut self, slot: Slot) -> ! {
        // A slot returned by dispatch always exists in the layout.
        let base = match self.layout.slot(slot) {
            Some(config) => config.base,
            None => self.layout.slots[0].base,
        };

        match VectorTable::read(&mut self.flash, base).await {
            Ok(vectors) => log::info!(
                "boot slot {} at {:#x}: sp {:#x}, reset {:#x}",
                slot.number(),
                base,
                vectors.initial_sp,
                vectors.reset_vector
            ),
            Err(fault) => log::warn!(
                "boot slot {} at {:#x}: vector table unreadable: {:?}",
                slot.number(),
                base,
                fault
            ),
        }

        unsafe { B::boot(base as *const u32) }
    }

    /// Replace the selector. Erases the whole `sector`, which must hold the selector word.
    pub async fn update_flag(&mut self, sector: u32, value: u32) -> Result<(), FlagError> {
        self.flag().write(sector, value).await
    }

    /// Write `payload` into the slot starting at `target` and select that slot for the next boot.
    ///
    /// The target and payload size are checked before anything is erased. A flash failure
    /// afterwards aborts the installation; the target slot may then be left unbootable while the
    /// selector still names the previous slot.
    pub async fn install(&mut self, target: u32, payload: &[u8]) -> Result<Slot, Error> {
        let slot = self.layout.slot_at(target).ok_or(Error::UnknownSlot(target))?;
        let config = self.layout.slot(slot).ok_or(Error::UnknownSlot(target))?;
        if payload.len() > config.size as usize {
            return Err(Error::PayloadTooLarge {
                len: payload.len(),
                capacity: config.size,
            });
        }

        log::info!("installing {} bytes into slot {}", payload.len(), slot.number());

        let mut programmer = Programmer::new(&mut self.flash);
        programmer.erase_range(config.sectors()).await?;
        programmer.write(config.base, payload).await?;

        self.update_flag(self.layout.flag.sector, slot.selector()).await?;

        Ok(slot)
    }

    /// Install `payload` into the slot at `target`, then reset the system.
    ///
    /// Only returns on failure.
    pub async fn update_firmware(
        &mut self,
        target: u32,
        payload: &[u8],
    ) -> Result<Infallible, Error> {
        let slot = self.install(target, payload).await?;
        log::info!("slot {} installed, resetting", slot.number());
        B::reset()
    }
}
