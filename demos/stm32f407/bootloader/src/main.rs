#![no_std]
#![no_main]

use embassy_embedded_hal::adapter::BlockingAsync;
use embassy_executor::Spawner;
use embassy_stm32::{Config, flash::Flash};
use twinboot::{
    Bootloader, Layout,
    boot::{VectorTableCheck, cortex_m::CortexM},
    flash::nor::NorFlashController,
    layout::Geometry,
};

use {defmt_rtt as _, panic_halt as _};

#[embassy_executor::main]
async fn main(_spawner: Spawner) -> ! {
    defmt::info!("twinboot");

    let p = embassy_stm32::init(Config::default());

    // The embassy driver addresses flash from 0x0800_0000, which matches the geometry base.
    let flash = NorFlashController::new(
        BlockingAsync::new(Flash::new_blocking(p.FLASH)),
        Geometry::STM32F4,
    );

    let mut bootloader = match Bootloader::<_, CortexM>::new(flash, &Layout::STM32F407) {
        Ok(bootloader) => bootloader,
        Err(e) => defmt::panic!("invalid layout: {}", e),
    };
    bootloader.init();

    bootloader.with_check(VectorTableCheck::STM32F407).run().await
}
