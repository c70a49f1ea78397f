use cortex_m::{asm, interrupt, peripheral::SCB};

use crate::boot::Boot;

/// Hand-off for Cortex-M cores without TrustZone.
///
/// Interrupts stay disabled when the image starts; the image enables them once its own vector
/// table and peripherals are set up.
pub struct CortexM;

impl Boot for CortexM {
    unsafe fn boot(addr: *const u32) -> ! {
        interrupt::disable();

        unsafe {
            (*SCB::PTR).vtor.write(addr as u32);
        }
        asm::dsb();
        asm::isb();

        // Loads MSP from addr[0] and branches to addr[1].
        unsafe { asm::bootload(addr) }
    }

    fn reset() -> ! {
        SCB::sys_reset()
    }
}
