//! SoftDevice S132 bring-up.

use core::mem;

use nrf_softdevice::{raw, Softdevice};

use crate::config::{ATT_MTU_DEFAULT, DEVICE_NAME};

/// Attribute table: GAP + GATT + orientation service + battery service.
const ATTR_TAB_SIZE: u32 = raw::BLE_GATTS_ATTR_TAB_SIZE_DEFAULT;

/// Enable the SoftDevice for a single peripheral link.
pub fn init() -> &'static mut Softdevice {
    let config = nrf_softdevice::Config {
        clock: Some(raw::nrf_clock_lf_cfg_t {
            source: raw::NRF_CLOCK_LF_SRC_XTAL as u8,
            rc_ctiv: 0,
            rc_temp_ctiv: 0,
            accuracy: raw::NRF_CLOCK_LF_ACCURACY_20_PPM as u8,
        }),
        conn_gap: Some(raw::ble_gap_conn_cfg_t {
            conn_count: 1,
            event_length: 6,
        }),
        conn_gatt: Some(raw::ble_gatt_conn_cfg_t {
            att_mtu: ATT_MTU_DEFAULT,
        }),
        gatts_attr_tab_size: Some(raw::ble_gatts_cfg_attr_tab_size_t {
            attr_tab_size: ATTR_TAB_SIZE,
        }),
        gap_role_count: Some(raw::ble_gap_cfg_role_count_t {
            adv_set_count: 1,
            periph_role_count: 1,
        }),
        gap_device_name: Some(raw::ble_gap_cfg_device_name_t {
            p_value: DEVICE_NAME.as_ptr() as _,
            current_len: DEVICE_NAME.len() as u16,
            max_len: DEVICE_NAME.len() as u16,
            write_perm: unsafe { mem::zeroed() },
            _bitfield_1: raw::ble_gap_cfg_device_name_t::new_bitfield_1(
                raw::BLE_GATTS_VLOC_STACK as u8,
            ),
        }),
        // Three axes notified per sample.
        conn_gatts: Some(raw::ble_gatts_conn_cfg_t { hvn_tx_queue_size: 3 }),
        ..Default::default()
    };

    Softdevice::enable(&config)
}

/// Publish the preferred connection parameters in the GAP service.
pub fn set_ppcp() {
    use crate::ble::conn_params::PREFERRED_CONN_PARAMS as P;

    let params = raw::ble_gap_conn_params_t {
        min_conn_interval: P.min_interval,
        max_conn_interval: P.max_interval,
        slave_latency: P.slave_latency,
        conn_sup_timeout: P.supervision_timeout,
    };
    let ret = unsafe { raw::sd_ble_gap_ppcp_set(&params) };
    if ret != raw::NRF_SUCCESS {
        warn!("softdevice: PPCP set failed: {=u32}", ret);
    }
}

#[embassy_executor::task]
pub async fn softdevice_task(sd: &'static Softdevice) -> ! {
    info!("softdevice: running");
    sd.run().await
}
