//! Recording test doubles for the platform ports.

use std::collections::VecDeque;
use std::vec::Vec;

use crate::ble::advertising::AdvParams;
use crate::ble::{Attribute, AuthorizeReply, BleEvent, ConnHandle, ConnParams, Radio};
use crate::error::{Fatal, NotifyError, PeerManagerError, RadioError, StorageError, TimerError};
use crate::power::Power;
use crate::scheduler::{TimerId, Timers};
use crate::security::{PeerAddress, PeerId, PeerManager, SecurityParams};
use crate::sensor::{MotionSensor, Sample};
use crate::storage::Storage;
use crate::ui::{Board, Indication};

/// Everything the code under test asked a collaborator to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    // Radio
    StartAdvertising(AdvParams),
    StopAdvertising,
    Disconnect(ConnHandle, u8),
    Notify(ConnHandle, Attribute, Vec<u8>),
    SetValue(Attribute, Vec<u8>),
    ReplyUserMem(ConnHandle),
    ReplyMtu(ConnHandle, u16),
    ReplyAuthorize(ConnHandle, AuthorizeReply),
    UpdateConnParams(ConnHandle, ConnParams),
    // Peer manager
    ConfigureSecurity(SecurityParams),
    PromoteRank(PeerId),
    SetWhitelist(Vec<PeerId>),
    SetIdentityList(Vec<PeerId>),
    DeleteAllPeers,
    SecureLink(ConnHandle, bool),
    ReplySecurityConfig(ConnHandle, bool),
    LocalDatabaseChanged,
    // Storage
    GarbageCollect,
    // Board
    Indicate(Indication),
    Sleep,
    Reset(Fatal),
    // Timers
    StartTimer(TimerId, u32),
    StopTimer(TimerId),
    // Power
    Wait,
}

pub struct MockPlatform {
    pub commands: Vec<Command>,
    /// Radio events seen by the peer-manager stage.
    pub pm_events: Vec<BleEvent>,

    pub bonded: Vec<PeerId>,
    pub addresses: Vec<(PeerId, PeerAddress)>,
    pub peer_address_error: Option<PeerManagerError>,
    pub promote_result: Result<(), PeerManagerError>,
    pub whitelist_result: Result<(), PeerManagerError>,
    pub identity_list_result: Result<(), PeerManagerError>,
    pub secure_link_result: Result<(), PeerManagerError>,
    pub delete_result: Result<(), PeerManagerError>,
    pub gc_result: Result<(), StorageError>,

    pub start_advertising_result: Result<(), RadioError>,
    pub stop_advertising_result: Result<(), RadioError>,
    pub disconnect_result: Result<(), RadioError>,
    /// Consumed front to back; `Ok` once empty.
    pub notify_results: VecDeque<Result<(), NotifyError>>,

    pub timer_result: Result<(), TimerError>,
    pub log_pending: bool,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self {
            commands: Vec::new(),
            pm_events: Vec::new(),
            bonded: Vec::new(),
            addresses: Vec::new(),
            peer_address_error: None,
            promote_result: Ok(()),
            whitelist_result: Ok(()),
            identity_list_result: Ok(()),
            secure_link_result: Ok(()),
            delete_result: Ok(()),
            gc_result: Ok(()),
            start_advertising_result: Ok(()),
            stop_advertising_result: Ok(()),
            disconnect_result: Ok(()),
            notify_results: VecDeque::new(),
            timer_result: Ok(()),
            log_pending: false,
        }
    }

    pub fn advertising_starts(&self) -> Vec<AdvParams> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                Command::StartAdvertising(params) => Some(params.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn indications(&self) -> Vec<Indication> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                Command::Indicate(i) => Some(*i),
                _ => None,
            })
            .collect()
    }

    pub fn slept(&self) -> bool {
        self.commands.contains(&Command::Sleep)
    }
}

impl Radio for MockPlatform {
    fn start_advertising(&mut self, params: &AdvParams) -> Result<(), RadioError> {
        self.commands.push(Command::StartAdvertising(params.clone()));
        self.start_advertising_result
    }

    fn stop_advertising(&mut self) -> Result<(), RadioError> {
        self.commands.push(Command::StopAdvertising);
        self.stop_advertising_result
    }

    fn disconnect(&mut self, handle: ConnHandle, reason: u8) -> Result<(), RadioError> {
        self.commands.push(Command::Disconnect(handle, reason));
        self.disconnect_result
    }

    fn notify(
        &mut self,
        handle: ConnHandle,
        attribute: Attribute,
        value: &[u8],
    ) -> Result<(), NotifyError> {
        self.commands
            .push(Command::Notify(handle, attribute, value.to_vec()));
        self.notify_results.pop_front().unwrap_or(Ok(()))
    }

    fn set_value(&mut self, attribute: Attribute, value: &[u8]) -> Result<(), RadioError> {
        self.commands.push(Command::SetValue(attribute, value.to_vec()));
        Ok(())
    }

    fn reply_user_mem(&mut self, handle: ConnHandle) -> Result<(), RadioError> {
        self.commands.push(Command::ReplyUserMem(handle));
        Ok(())
    }

    fn reply_mtu(&mut self, handle: ConnHandle, server_mtu: u16) -> Result<(), RadioError> {
        self.commands.push(Command::ReplyMtu(handle, server_mtu));
        Ok(())
    }

    fn reply_authorize(
        &mut self,
        handle: ConnHandle,
        reply: AuthorizeReply,
    ) -> Result<(), RadioError> {
        self.commands.push(Command::ReplyAuthorize(handle, reply));
        Ok(())
    }

    fn update_conn_params(
        &mut self,
        handle: ConnHandle,
        params: &ConnParams,
    ) -> Result<(), RadioError> {
        self.commands.push(Command::UpdateConnParams(handle, *params));
        Ok(())
    }
}

impl PeerManager for MockPlatform {
    fn configure_security(&mut self, params: &SecurityParams) -> Result<(), PeerManagerError> {
        self.commands.push(Command::ConfigureSecurity(*params));
        Ok(())
    }

    fn next_peer(&self, after: Option<PeerId>) -> Option<PeerId> {
        let start = match after {
            None => 0,
            Some(peer) => self.bonded.iter().position(|p| *p == peer)? + 1,
        };
        self.bonded.get(start).copied()
    }

    fn promote_rank(&mut self, peer: PeerId) -> Result<(), PeerManagerError> {
        self.commands.push(Command::PromoteRank(peer));
        self.promote_result
    }

    fn set_whitelist(&mut self, peers: &[PeerId]) -> Result<(), PeerManagerError> {
        self.commands.push(Command::SetWhitelist(peers.to_vec()));
        self.whitelist_result
    }

    fn set_identity_list(&mut self, peers: &[PeerId]) -> Result<(), PeerManagerError> {
        self.commands.push(Command::SetIdentityList(peers.to_vec()));
        self.identity_list_result
    }

    fn peer_address(&self, peer: PeerId) -> Result<PeerAddress, PeerManagerError> {
        if let Some(e) = self.peer_address_error {
            return Err(e);
        }
        self.addresses
            .iter()
            .find(|(id, _)| *id == peer)
            .map(|(_, addr)| *addr)
            .ok_or(PeerManagerError::NotFound)
    }

    fn delete_all_peers(&mut self) -> Result<(), PeerManagerError> {
        self.commands.push(Command::DeleteAllPeers);
        self.delete_result
    }

    fn secure_link(
        &mut self,
        handle: ConnHandle,
        force_repairing: bool,
    ) -> Result<(), PeerManagerError> {
        self.commands.push(Command::SecureLink(handle, force_repairing));
        self.secure_link_result
    }

    fn reply_security_config(
        &mut self,
        handle: ConnHandle,
        allow_repairing: bool,
    ) -> Result<(), PeerManagerError> {
        self.commands
            .push(Command::ReplySecurityConfig(handle, allow_repairing));
        Ok(())
    }

    fn local_database_changed(&mut self) {
        self.commands.push(Command::LocalDatabaseChanged);
    }

    fn on_ble_event(&mut self, event: &BleEvent) {
        self.pm_events.push(event.clone());
    }
}

impl Storage for MockPlatform {
    fn garbage_collect(&mut self) -> Result<(), StorageError> {
        self.commands.push(Command::GarbageCollect);
        self.gc_result
    }
}

impl Board for MockPlatform {
    fn indicate(&mut self, indication: Indication) {
        self.commands.push(Command::Indicate(indication));
    }

    fn enter_sleep(&mut self) {
        self.commands.push(Command::Sleep);
    }

    fn reset(&mut self, cause: Fatal) {
        self.commands.push(Command::Reset(cause));
    }
}

impl Timers for MockPlatform {
    fn start(&mut self, id: TimerId, delay_ms: u32) -> Result<(), TimerError> {
        self.commands.push(Command::StartTimer(id, delay_ms));
        self.timer_result
    }

    fn stop(&mut self, id: TimerId) {
        self.commands.push(Command::StopTimer(id));
    }
}

impl Power for MockPlatform {
    fn log_pending(&self) -> bool {
        self.log_pending
    }

    async fn wait_for_event(&mut self) {
        self.commands.push(Command::Wait);
    }
}

/// Motion driver double fed from a sample queue.
#[derive(Default)]
pub struct MockSensor {
    pub samples: VecDeque<Sample>,
    pub before_sleep_calls: usize,
    pub after_sleep_calls: usize,
}

impl MotionSensor for MockSensor {
    fn has_new_data(&self) -> bool {
        !self.samples.is_empty()
    }

    fn poll(&mut self) -> Option<Sample> {
        self.samples.pop_front()
    }

    fn before_sleep(&mut self) {
        self.before_sleep_calls += 1;
    }

    fn after_sleep(&mut self) {
        self.after_sleep_calls += 1;
    }
}

/// Parameters a typical central picks: outside the preferred window.
pub fn central_params() -> ConnParams {
    ConnParams {
        min_interval: 24,
        max_interval: 40,
        slave_latency: 0,
        supervision_timeout: 400,
    }
}
