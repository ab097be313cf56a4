//! Advertising and the live link.
//!
//! The radio task owns the SoftDevice advertising and GATT futures. The
//! main loop drives it through [`request`]; a newer request cancels the
//! advertising phase in progress. Connection lifecycle, GATT and
//! parameter changes come back as [`BleEvent`]s.

use core::cell::RefCell;

use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::signal::Signal;
use embassy_time::Timer;
use nrf_softdevice::ble::advertisement_builder::{
    ExtendedAdvertisementBuilder, ExtendedAdvertisementPayload, Flag, ServiceList,
};
use nrf_softdevice::ble::gatt_server;
use nrf_softdevice::ble::peripheral::{self, AdvertiseError, ConnectableAdvertisement, FilterPolicy};
use nrf_softdevice::ble::Connection;
use nrf_softdevice::{raw, Softdevice};

use super::bonder::{self, handle_of, Bonder};
use super::post;
use super::server::{self, Server};
use crate::ble::advertising::{AdvMode, AdvParams};
use crate::ble::gatt::SERVICE_UUID;
use crate::ble::{BleEvent, ConnHandle, ConnParams};
use crate::config::DEVICE_NAME;
use crate::scheduler::Event;

/// Disconnect reason reported when the runtime does not surface the
/// HCI code.
const REASON_UNKNOWN: u8 = 0x00;

/// Connection parameters are sampled this often to report updates.
const CONN_PARAMS_POLL_MS: u64 = 500;

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RadioRequest {
    Advertise(AdvParams),
    Stop,
}

static REQUESTS: Signal<CriticalSectionRawMutex, RadioRequest> = Signal::new();

/// The live link, for synchronous commands from the main loop.
pub(crate) static LINK: Mutex<CriticalSectionRawMutex, RefCell<Option<Connection>>> =
    Mutex::new(RefCell::new(None));

pub fn request(req: RadioRequest) {
    REQUESTS.signal(req);
}

/// Run `f` on the live link if `handle` names it.
pub(crate) fn with_link<R>(handle: ConnHandle, f: impl FnOnce(&Connection) -> R) -> Option<R> {
    LINK.lock(|l| {
        l.borrow()
            .as_ref()
            .filter(|c| handle_of(c) == handle)
            .map(f)
    })
}

static ADV_DATA: ExtendedAdvertisementPayload = ExtendedAdvertisementBuilder::new()
    .flags(&[Flag::GeneralDiscovery, Flag::LE_Only])
    .full_name(DEVICE_NAME)
    .build();

static SCAN_DATA: ExtendedAdvertisementPayload = ExtendedAdvertisementBuilder::new()
    .services_128(ServiceList::Complete, &[SERVICE_UUID])
    .build();

#[embassy_executor::task]
pub async fn radio_task(
    sd: &'static Softdevice,
    server: &'static Server,
    bonder: &'static Bonder,
) -> ! {
    let mut pending: Option<RadioRequest> = None;
    loop {
        let req = match pending.take() {
            Some(req) => req,
            None => REQUESTS.wait().await,
        };
        let params = match req {
            RadioRequest::Advertise(params) => params,
            RadioRequest::Stop => {
                debug!("radio: advertising stopped");
                continue;
            }
        };

        // Dropping the advertising future stops advertising.
        match select(advertise(sd, bonder, &params), REQUESTS.wait()).await {
            Either::First(Ok(conn)) => serve(server, conn).await,
            Either::First(Err(AdvertiseError::Timeout)) => {
                debug!("radio: {} timed out", params.mode);
                post(Event::Ble(BleEvent::AdvertisingTimeout));
            }
            Either::First(Err(e)) => {
                error!("radio: advertising failed: {}", e);
                post(Event::Ble(BleEvent::AdvertisingTimeout));
            }
            Either::Second(next) => pending = Some(next),
        }
    }
}

async fn advertise(
    sd: &Softdevice,
    bonder: &'static Bonder,
    params: &AdvParams,
) -> Result<Connection, AdvertiseError> {
    let timeout = Some((params.timeout_ms / 10) as u16);
    let config = peripheral::Config {
        interval: u32::from(params.interval),
        timeout,
        filter_policy: if params.mode.is_filtered() {
            FilterPolicy::Both
        } else {
            FilterPolicy::Any
        },
        ..Default::default()
    };

    let adv = match (params.mode, params.peer.as_ref()) {
        (AdvMode::Directed, Some(peer)) => ConnectableAdvertisement::NonscannableDirectedHighDuty {
            peer: bonder::address(peer),
        },
        _ => ConnectableAdvertisement::ScannableUndirected {
            adv_data: &ADV_DATA,
            scan_data: &SCAN_DATA,
        },
    };
    info!("radio: advertising {}", params.mode);
    peripheral::advertise_pairable(sd, adv, &config, bonder).await
}

/// Run the GATT server until the link drops.
async fn serve(server: &Server, conn: Connection) {
    let handle = handle_of(&conn);
    let params = conn_params(&conn);
    LINK.lock(|l| l.replace(Some(conn.clone())));
    post(Event::Ble(BleEvent::Connected { handle, params }));

    let gatt = gatt_server::run(&conn, server, |e| {
        if let Some(event) = server::to_ble_event(handle, e) {
            post(Event::Ble(event));
        }
    });
    let _ = select(gatt, watch_conn_params(&conn, handle, params)).await;

    LINK.lock(|l| l.replace(None));
    // Requests made against the dropped link are stale.
    REQUESTS.reset();
    post(Event::Ble(BleEvent::Disconnected {
        handle,
        reason: REASON_UNKNOWN,
    }));
}

async fn watch_conn_params(conn: &Connection, handle: ConnHandle, mut last: ConnParams) -> ! {
    loop {
        Timer::after_millis(CONN_PARAMS_POLL_MS).await;
        let now = conn_params(conn);
        if now != last {
            last = now;
            post(Event::Ble(BleEvent::ConnParamUpdate { handle, params: now }));
        }
    }
}

fn conn_params(conn: &Connection) -> ConnParams {
    let p: raw::ble_gap_conn_params_t = conn.conn_params();
    ConnParams {
        min_interval: p.min_conn_interval,
        max_interval: p.max_conn_interval,
        slave_latency: p.slave_latency,
        supervision_timeout: p.conn_sup_timeout,
    }
}
