//! The device context.
//!
//! All mutable application state lives in one [`Device`] owned by the
//! main loop and handed to handlers by `&mut`. Collaborators are reached
//! through the [`Platform`] ports. [`Device::dispatch`] is the error
//! boundary: a handler that fails makes the device reset, nothing else
//! escapes.

use crate::ble::advertising::{AdvertisingController, SessionStart};
use crate::ble::conn_params::ConnParamsNegotiator;
use crate::ble::connection::{self, Connection};
use crate::ble::{BleEvent, Radio};
use crate::battery::BatteryService;
use crate::config::NOTIFY_GATE;
use crate::error::{Fatal, StorageError};
use crate::scheduler::{Event, TimerId, Timers};
use crate::security::handler::{BondingHandler, FollowUp};
use crate::security::whitelist::Whitelist;
use crate::security::{PeerManager, SecurityEvent, SecurityParams};
use crate::sensor::{NotificationPipeline, Sample};
use crate::storage::Storage;
use crate::ui::input_logic::BoardInput;
use crate::ui::{Board, BoardEvent, ButtonPress, Indication};

/// Every collaborator the device talks to.
pub trait Platform: Radio + PeerManager + Storage + Board + Timers {}

impl<T: Radio + PeerManager + Storage + Board + Timers + ?Sized> Platform for T {}

/// Handlers a radio event visits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Stage {
    ConnectionState,
    PeerManager,
    BoardInput,
    Application,
    Advertising,
    ConnParams,
    Battery,
}

/// Order in which every admitted radio event is handled.
pub const BLE_DISPATCH_CHAIN: [Stage; 7] = [
    Stage::ConnectionState,
    Stage::PeerManager,
    Stage::BoardInput,
    Stage::Application,
    Stage::Advertising,
    Stage::ConnParams,
    Stage::Battery,
];

pub struct Device {
    conn: Connection,
    whitelist: Whitelist,
    advertising: AdvertisingController,
    bonding: BondingHandler,
    input: BoardInput,
    conn_params: ConnParamsNegotiator,
    battery: BatteryService,
    pipeline: NotificationPipeline,
}

impl Device {
    pub const fn new() -> Self {
        Self {
            conn: Connection::new(),
            whitelist: Whitelist::new(),
            advertising: AdvertisingController::new(),
            bonding: BondingHandler::new(),
            input: BoardInput::new(),
            conn_params: ConnParamsNegotiator::new(),
            battery: BatteryService::new(),
            pipeline: NotificationPipeline::new(NOTIFY_GATE),
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn whitelist(&self) -> &Whitelist {
        &self.whitelist
    }

    pub fn advertising(&self) -> &AdvertisingController {
        &self.advertising
    }

    pub fn bonding(&self) -> &BondingHandler {
        &self.bonding
    }

    pub fn battery(&self) -> &BatteryService {
        &self.battery
    }

    pub fn pipeline(&self) -> &NotificationPipeline {
        &self.pipeline
    }

    /// Bring the application up: security parameters, optional bond
    /// erase, battery timer, first advertising session.
    pub fn boot<P: Platform>(&mut self, erase_bonds: bool, p: &mut P) {
        if let Err(cause) = self.try_boot(erase_bonds, p) {
            error!("device: boot failed: {}", cause);
            p.reset(cause);
        }
    }

    fn try_boot<P: Platform>(&mut self, erase_bonds: bool, p: &mut P) -> Result<(), Fatal> {
        p.configure_security(&SecurityParams::default_bonding())
            .map_err(Fatal::Security)?;
        if erase_bonds {
            info!("device: erasing bonds");
            // Advertising restarts again once the erase completes.
            p.delete_all_peers().map_err(Fatal::PeersDelete)?;
        }
        self.battery.start(p)?;
        self.start_session(SessionStart::Boot, p)
    }

    /// Handle one queued event. Never fails: errors reset the device.
    pub fn dispatch<P: Platform>(&mut self, event: Event, p: &mut P) {
        let result = match event {
            Event::Ble(ev) => self.on_ble_event(&ev, p),
            Event::Security(ev) => self.on_security_event(ev, p),
            Event::Timer(id) => self.on_timer(id, p),
            Event::Button(press) => self.on_button(press, p),
            Event::Board(request) => self.on_board_event(request, p),
            Event::Storage(e) => on_storage_error(e),
        };
        if let Err(cause) = result {
            error!("device: fatal {}", cause);
            p.reset(cause);
        }
    }

    /// Forward a sensor sample. Returns the number of notifications
    /// issued.
    pub fn on_sample<R: Radio>(&mut self, sample: &Sample, radio: &mut R) -> usize {
        self.pipeline.on_sample(sample, &self.conn, radio)
    }

    fn on_ble_event<P: Platform>(&mut self, event: &BleEvent, p: &mut P) -> Result<(), Fatal> {
        if !self.conn.admits(event) {
            return self.reject(event, p);
        }
        for stage in BLE_DISPATCH_CHAIN {
            self.run_stage(stage, event, p)?;
        }
        Ok(())
    }

    fn run_stage<P: Platform>(
        &mut self,
        stage: Stage,
        event: &BleEvent,
        p: &mut P,
    ) -> Result<(), Fatal> {
        match stage {
            Stage::ConnectionState => {
                self.conn.on_ble_event(event);
                if let BleEvent::Connected { .. } = event {
                    self.bonding.on_connected();
                }
            }
            Stage::PeerManager => PeerManager::on_ble_event(p, event),
            Stage::BoardInput => self.input.on_ble_event(event),
            Stage::Application => connection::on_ble_event(event, &mut self.whitelist, p)?,
            Stage::Advertising => self.advertising.on_ble_event(
                event,
                &self.whitelist,
                self.bonding.last_peer(),
                p,
            )?,
            Stage::ConnParams => self.conn_params.on_ble_event(event, p)?,
            Stage::Battery => self.battery.on_ble_event(event),
        }
        Ok(())
    }

    /// Events that do not belong to the tracked link. A second central
    /// is turned away; anything else is stale and dropped.
    fn reject<P: Platform>(&mut self, event: &BleEvent, p: &mut P) -> Result<(), Fatal> {
        match event {
            BleEvent::Connected { handle, .. } => {
                warn!("device: already connected, refusing handle {}", handle.0);
                connection::disconnect(*handle, p)
            }
            _ => {
                debug!("device: dropping event for stale link");
                Ok(())
            }
        }
    }

    fn on_security_event<P: Platform>(
        &mut self,
        event: SecurityEvent,
        p: &mut P,
    ) -> Result<(), Fatal> {
        match self
            .bonding
            .handle(event, &mut self.conn, &mut self.whitelist, p)?
        {
            FollowUp::None => Ok(()),
            FollowUp::RestartAdvertising => self.start_session(SessionStart::Boot, p),
        }
    }

    fn on_timer<P: Platform>(&mut self, id: TimerId, p: &mut P) -> Result<(), Fatal> {
        match id {
            TimerId::ConnParams => self.conn_params.on_timer(p),
            TimerId::BatteryMeasurement => self.battery.on_timer(p),
        }
    }

    fn on_button<P: Platform>(&mut self, press: ButtonPress, p: &mut P) -> Result<(), Fatal> {
        match self.input.translate(press) {
            Some(request) => self.on_board_event(request, p),
            None => {
                debug!("device: {} ignored", press);
                Ok(())
            }
        }
    }

    fn on_board_event<P: Platform>(&mut self, request: BoardEvent, p: &mut P) -> Result<(), Fatal> {
        info!("device: board request {}", request);
        match request {
            BoardEvent::Sleep => {
                self.advertising.stop(p)?;
                p.indicate(Indication::Idle);
                p.enter_sleep();
            }
            BoardEvent::Disconnect => {
                if self.conn.is_connected() {
                    connection::disconnect(self.conn.handle(), p)?;
                }
            }
            BoardEvent::WhitelistOff => {
                if !self.conn.is_connected() {
                    self.advertising
                        .restart_without_whitelist(&self.whitelist, p)?;
                }
            }
            BoardEvent::EraseBonds => {
                p.delete_all_peers().map_err(Fatal::PeersDelete)?;
            }
        }
        Ok(())
    }

    /// New advertising session against a freshly enumerated whitelist.
    fn start_session<P: Platform>(&mut self, from: SessionStart, p: &mut P) -> Result<(), Fatal> {
        self.whitelist.rebuild(p);
        self.whitelist.publish(p)?;
        self.advertising
            .start(from, &self.whitelist, self.bonding.last_peer(), p)
    }
}

/// Busy flash gets another go with the next write; anything else is
/// fatal.
fn on_storage_error(e: StorageError) -> Result<(), Fatal> {
    if e.is_transient() {
        debug!("device: flash busy ({}), retrying later", e);
        Ok(())
    } else {
        Err(Fatal::Storage(e))
    }
}

impl Default for Device {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::advertising::AdvMode;
    use crate::ble::conn_params::PREFERRED_CONN_PARAMS;
    use crate::ble::{ConnHandle, HCI_REMOTE_USER_TERMINATED_CONNECTION};
    use crate::error::{PeerManagerError, RadioError};
    use crate::security::{PeerId, SecProcedure};
    use crate::testing::{central_params, Command, MockPlatform};
    use crate::ui::Button;

    fn connected(h: u16) -> Event {
        Event::Ble(BleEvent::Connected {
            handle: ConnHandle(h),
            params: PREFERRED_CONN_PARAMS,
        })
    }

    fn disconnected(h: u16) -> Event {
        Event::Ble(BleEvent::Disconnected {
            handle: ConnHandle(h),
            reason: 0x08,
        })
    }

    fn booted(p: &mut MockPlatform) -> Device {
        let mut device = Device::new();
        device.boot(false, p);
        p.commands.clear();
        device
    }

    #[test]
    fn chain_order_is_fixed() {
        assert_eq!(BLE_DISPATCH_CHAIN[0], Stage::ConnectionState);
        assert_eq!(BLE_DISPATCH_CHAIN[1], Stage::PeerManager);
        assert_eq!(BLE_DISPATCH_CHAIN[6], Stage::Battery);
    }

    #[test]
    fn boot_configures_security_and_starts_fast() {
        let mut p = MockPlatform::new();
        let mut device = Device::new();
        device.boot(false, &mut p);
        assert_eq!(
            p.commands[0],
            Command::ConfigureSecurity(SecurityParams::default_bonding())
        );
        assert!(p.commands.contains(&Command::StartTimer(
            TimerId::BatteryMeasurement,
            crate::config::BATTERY_LEVEL_MEAS_INTERVAL_MS
        )));
        assert_eq!(device.advertising().mode(), AdvMode::FastOpen);
        assert!(!p.commands.contains(&Command::DeleteAllPeers));
    }

    #[test]
    fn boot_whitelist_comes_from_bonded_peers() {
        let mut p = MockPlatform::new();
        p.bonded = std::vec![PeerId(1), PeerId(4)];
        let mut device = Device::new();
        device.boot(false, &mut p);
        assert_eq!(
            device.whitelist().get(8),
            &[PeerId(1), PeerId(4)]
        );
        assert_eq!(device.advertising().mode(), AdvMode::FastFiltered);
        let set = p
            .commands
            .iter()
            .position(|c| *c == Command::SetWhitelist(std::vec![PeerId(1), PeerId(4)]));
        let adv = p
            .commands
            .iter()
            .position(|c| matches!(c, Command::StartAdvertising(_)));
        assert!(set < adv);
    }

    #[test]
    fn boot_with_erase_deletes_peers() {
        let mut p = MockPlatform::new();
        let mut device = Device::new();
        device.boot(true, &mut p);
        assert!(p.commands.contains(&Command::DeleteAllPeers));
    }

    #[test]
    fn boot_failure_resets() {
        let mut p = MockPlatform::new();
        p.start_advertising_result = Err(RadioError::Raw(4));
        let mut device = Device::new();
        device.boot(false, &mut p);
        assert_eq!(
            p.commands.last(),
            Some(&Command::Reset(Fatal::Radio(RadioError::Raw(4))))
        );
    }

    #[test]
    fn connect_runs_whole_chain() {
        let mut p = MockPlatform::new();
        let mut device = booted(&mut p);
        device.dispatch(connected(0), &mut p);
        assert!(device.connection().is_connected());
        assert_eq!(p.pm_events.len(), 1);
        assert_eq!(p.indications(), std::vec![Indication::Connected]);
        assert!(!device.advertising().is_advertising());
    }

    #[test]
    fn second_central_is_turned_away() {
        let mut p = MockPlatform::new();
        let mut device = booted(&mut p);
        device.dispatch(connected(0), &mut p);
        p.commands.clear();
        device.dispatch(connected(1), &mut p);
        assert_eq!(device.connection().handle(), ConnHandle(0));
        assert_eq!(
            p.commands,
            std::vec![Command::Disconnect(
                ConnHandle(1),
                HCI_REMOTE_USER_TERMINATED_CONNECTION
            )]
        );
        assert_eq!(p.pm_events.len(), 1);
    }

    #[test]
    fn stale_events_are_dropped() {
        let mut p = MockPlatform::new();
        let mut device = booted(&mut p);
        device.dispatch(disconnected(3), &mut p);
        assert!(p.commands.is_empty());
        assert!(p.pm_events.is_empty());
    }

    #[test]
    fn disconnect_publishes_whitelist_before_advertising() {
        let mut p = MockPlatform::new();
        let mut device = booted(&mut p);
        device.dispatch(connected(0), &mut p);
        device.dispatch(
            Event::Security(SecurityEvent::ConnSecSucceeded {
                handle: ConnHandle(0),
                peer: PeerId(2),
                procedure: SecProcedure::Bonding,
            }),
            &mut p,
        );
        p.commands.clear();
        device.dispatch(disconnected(0), &mut p);
        assert_eq!(p.commands[0], Command::Indicate(Indication::Idle));
        assert_eq!(p.commands[1], Command::SetWhitelist(std::vec![PeerId(2)]));
        assert_eq!(p.commands[2], Command::SetIdentityList(std::vec![PeerId(2)]));
        assert!(matches!(p.commands[3], Command::StartAdvertising(_)));
        assert!(!device.whitelist().is_dirty());
    }

    #[test]
    fn reconnect_session_tries_directed_first() {
        let mut p = MockPlatform::new();
        p.addresses.push((
            PeerId(2),
            crate::security::PeerAddress {
                kind: crate::security::AddressKind::Public,
                bytes: [6, 5, 4, 3, 2, 1],
            },
        ));
        let mut device = booted(&mut p);
        device.dispatch(connected(0), &mut p);
        device.dispatch(
            Event::Security(SecurityEvent::BondedPeerConnected {
                handle: ConnHandle(0),
                peer: PeerId(2),
            }),
            &mut p,
        );
        device.dispatch(disconnected(0), &mut p);
        assert_eq!(device.advertising().mode(), AdvMode::Directed);
    }

    #[test]
    fn handler_errors_reset_once() {
        let mut p = MockPlatform::new();
        let mut device = booted(&mut p);
        let e = PeerManagerError::Internal(2);
        device.dispatch(
            Event::Security(SecurityEvent::ErrorUnexpected { error: e }),
            &mut p,
        );
        assert_eq!(p.commands, std::vec![Command::Reset(Fatal::Security(e))]);
    }

    #[test]
    fn erase_while_advertising_restarts_session() {
        let mut p = MockPlatform::new();
        p.bonded = std::vec![PeerId(0)];
        let mut device = booted(&mut p);
        assert_eq!(device.advertising().mode(), AdvMode::FastFiltered);
        p.bonded.clear();
        device.dispatch(Event::Security(SecurityEvent::PeersDeleteSucceeded), &mut p);
        assert!(device.whitelist().is_empty());
        assert_eq!(device.advertising().mode(), AdvMode::FastOpen);
        assert!(p.commands.contains(&Command::SetWhitelist(std::vec![])));
    }

    #[test]
    fn timers_reach_their_handlers() {
        let mut p = MockPlatform::new();
        let mut device = booted(&mut p);
        device.dispatch(Event::Timer(TimerId::BatteryMeasurement), &mut p);
        assert_eq!(device.battery().level(), Some(99));

        device.dispatch(
            Event::Ble(BleEvent::Connected {
                handle: ConnHandle(0),
                params: central_params(),
            }),
            &mut p,
        );
        p.commands.clear();
        device.dispatch(Event::Timer(TimerId::ConnParams), &mut p);
        assert_eq!(
            p.commands,
            std::vec![Command::UpdateConnParams(ConnHandle(0), PREFERRED_CONN_PARAMS)]
        );
    }

    #[test]
    fn short_press_while_advertising_sleeps() {
        let mut p = MockPlatform::new();
        let mut device = booted(&mut p);
        device.dispatch(
            Event::Button(ButtonPress {
                button: Button::Primary,
                long: false,
            }),
            &mut p,
        );
        assert_eq!(
            p.commands,
            std::vec![
                Command::StopAdvertising,
                Command::Indicate(Indication::Idle),
                Command::Sleep
            ]
        );
        assert!(!device.advertising().is_advertising());
    }

    #[test]
    fn long_press_while_connected_disconnects() {
        let mut p = MockPlatform::new();
        let mut device = booted(&mut p);
        device.dispatch(connected(5), &mut p);
        p.commands.clear();
        p.disconnect_result = Err(RadioError::InvalidState);
        device.dispatch(
            Event::Button(ButtonPress {
                button: Button::Primary,
                long: true,
            }),
            &mut p,
        );
        assert_eq!(
            p.commands,
            std::vec![Command::Disconnect(
                ConnHandle(5),
                HCI_REMOTE_USER_TERMINATED_CONNECTION
            )]
        );
    }

    #[test]
    fn board_disconnect_without_link_does_nothing() {
        let mut p = MockPlatform::new();
        let mut device = booted(&mut p);
        device.dispatch(Event::Board(BoardEvent::Disconnect), &mut p);
        assert!(p.commands.is_empty());
    }

    #[test]
    fn whitelist_off_press_drops_the_filter() {
        let mut p = MockPlatform::new();
        p.bonded = std::vec![PeerId(0)];
        let mut device = booted(&mut p);
        device.dispatch(
            Event::Button(ButtonPress {
                button: Button::Secondary,
                long: true,
            }),
            &mut p,
        );
        assert_eq!(device.advertising().mode(), AdvMode::FastOpen);
        assert!(!device.advertising().whitelist_allowed());
    }

    #[test]
    fn flash_failures_reset_unless_busy() {
        let mut p = MockPlatform::new();
        let mut device = booted(&mut p);
        device.dispatch(Event::Storage(StorageError::Busy), &mut p);
        assert!(p.commands.is_empty());
        device.dispatch(Event::Storage(StorageError::Flash), &mut p);
        assert_eq!(
            p.commands,
            std::vec![Command::Reset(Fatal::Storage(StorageError::Flash))]
        );
    }

    #[test]
    fn runtime_erase_request_deletes_peers() {
        let mut p = MockPlatform::new();
        let mut device = booted(&mut p);
        p.delete_result = Err(PeerManagerError::Busy);
        device.dispatch(Event::Board(BoardEvent::EraseBonds), &mut p);
        assert_eq!(
            p.commands,
            std::vec![
                Command::DeleteAllPeers,
                Command::Reset(Fatal::PeersDelete(PeerManagerError::Busy))
            ]
        );
    }
}
