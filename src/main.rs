//! md612-ble firmware entry point.
//!
//! Brings up the SoftDevice, loads the bond store, spawns the hardware
//! tasks from [`md612_ble::nrf`] and then runs the application main loop
//! on the executor thread.
//!
//! Pins (nRF52832 DK):
//!   - Button 1 (P0.13): disconnect / sleep
//!   - Button 2 (P0.14): whitelist off; held at reset erases bonds
//!   - LED 1 (P0.17): advertising, LED 2 (P0.18): connected

#![no_std]
#![no_main]

use defmt::{info, unwrap};
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_nrf::gpio::{Level, Output, OutputDrive, Pin};
use embassy_nrf::interrupt::Priority;
use nrf_softdevice::Flash;
use panic_probe as _;
use static_cell::StaticCell;

use md612_ble::nrf::bonder::bonder;
use md612_ble::nrf::flash::{self, flash_task};
use md612_ble::nrf::platform::Nrf52;
use md612_ble::nrf::radio::radio_task;
use md612_ble::nrf::sensor::SampleFeed;
use md612_ble::nrf::server::Server;
use md612_ble::nrf::softdevice::{self, softdevice_task};
use md612_ble::nrf::timers::timer_task;
use md612_ble::nrf::EVENTS;
use md612_ble::scheduler::TimerId;
use md612_ble::ui::buttons::{self, button_task};
use md612_ble::ui::leds::led_task;
use md612_ble::ui::Button;
use md612_ble::{Device, MainLoop};

static SERVER: StaticCell<Server> = StaticCell::new();

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("md612-ble starting");

    // Priorities 0, 1 and 4 belong to the SoftDevice.
    let mut config = embassy_nrf::config::Config::default();
    config.gpiote_interrupt_priority = Priority::P2;
    config.time_interrupt_priority = Priority::P2;
    let mut p = embassy_nrf::init(config);

    let erase_bonds = buttons::is_held(&mut p.P0_14);
    if erase_bonds {
        info!("button 2 held at reset");
    }

    let sd = softdevice::init();
    let server = SERVER.init(unwrap!(Server::new(sd)));
    softdevice::set_ppcp();
    let sd = &*sd;
    unwrap!(spawner.spawn(softdevice_task(sd)));

    // Bonds must be in memory before the first advertising decision.
    let mut store = Flash::take(sd);
    flash::load(&mut store).await;
    unwrap!(spawner.spawn(flash_task(store)));

    unwrap!(spawner.spawn(radio_task(sd, server, bonder())));
    unwrap!(spawner.spawn(timer_task(TimerId::ConnParams)));
    unwrap!(spawner.spawn(timer_task(TimerId::BatteryMeasurement)));

    unwrap!(spawner.spawn(button_task(p.P0_13.degrade(), Button::Primary)));
    unwrap!(spawner.spawn(button_task(p.P0_14.degrade(), Button::Secondary)));

    let led1 = Output::new(p.P0_17, Level::High, OutputDrive::Standard);
    let led2 = Output::new(p.P0_18, Level::High, OutputDrive::Standard);
    unwrap!(spawner.spawn(led_task(led1, led2)));

    let mut platform = Nrf52::new(server);
    let mut device = Device::new();
    device.boot(erase_bonds, &mut platform);

    info!("entering main loop");
    MainLoop::new(&EVENTS)
        .run(&mut device, &mut platform, &mut SampleFeed)
        .await
}
