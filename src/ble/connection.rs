//! Connection lifecycle.
//!
//! [`Connection`] is the single link slot (the connection-state tracker
//! stage). [`on_ble_event`] is the application stage: indications,
//! whitelist reconciliation on disconnect, timeouts and the replies the
//! stack expects for requests this server does not support.

use super::gatt::{is_orientation_uuid, GATT_STATUS_APP_FEATURE_NOT_SUPPORTED};
use super::{
    AuthorizeReply, AuthorizeRequest, BleEvent, ConnHandle, Radio,
    HCI_REMOTE_USER_TERMINATED_CONNECTION,
};
use crate::config::ATT_MTU_DEFAULT;
use crate::error::{Fatal, RadioError};
use crate::security::whitelist::Whitelist;
use crate::security::{PeerId, PeerManager, SecurityStatus};
use crate::ui::{Board, Indication};

/// The one link this peripheral supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Connection {
    handle: ConnHandle,
    security: SecurityStatus,
    peer: Option<PeerId>,
}

impl Connection {
    pub const fn new() -> Self {
        Self {
            handle: ConnHandle::INVALID,
            security: SecurityStatus::Unencrypted,
            peer: None,
        }
    }

    /// Current handle, or [`ConnHandle::INVALID`].
    pub fn handle(&self) -> ConnHandle {
        self.handle
    }

    pub fn is_connected(&self) -> bool {
        self.handle.is_valid()
    }

    pub fn security(&self) -> SecurityStatus {
        self.security
    }

    /// Bonded peer on the other end, once security has identified it.
    pub fn peer(&self) -> Option<PeerId> {
        self.peer
    }

    pub fn set_security(&mut self, status: SecurityStatus) {
        if self.is_connected() {
            self.security = status;
        }
    }

    pub fn set_peer(&mut self, peer: PeerId) {
        if self.is_connected() {
            self.peer = Some(peer);
        }
    }

    /// Whether `event` may enter the dispatch chain: events of the
    /// current link, link-less events, and a connect into a free slot.
    pub fn admits(&self, event: &BleEvent) -> bool {
        match (event, event.handle()) {
            (_, None) => true,
            (BleEvent::Connected { .. }, Some(_)) => !self.is_connected(),
            (_, Some(handle)) => self.is_connected() && handle == self.handle,
        }
    }

    /// Connection-state tracker stage.
    pub fn on_ble_event(&mut self, event: &BleEvent) {
        match event {
            BleEvent::Connected { handle, .. } if !self.is_connected() => {
                self.handle = *handle;
                self.security = SecurityStatus::Unencrypted;
                self.peer = None;
            }
            BleEvent::Disconnected { handle, .. } if *handle == self.handle => {
                *self = Self::new();
            }
            _ => {}
        }
    }
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

/// Application stage of the BLE dispatch chain.
pub fn on_ble_event<P>(event: &BleEvent, whitelist: &mut Whitelist, p: &mut P) -> Result<(), Fatal>
where
    P: Radio + PeerManager + Board,
{
    match event {
        BleEvent::Connected { handle, .. } => {
            info!("conn: connected, handle {}", handle.0);
            p.indicate(Indication::Connected);
        }
        BleEvent::Disconnected { handle, reason } => {
            info!("conn: disconnected, handle {} reason {=u8:#x}", handle.0, reason);
            p.indicate(Indication::Idle);
            // The radio must not advertise against a stale whitelist.
            if whitelist.is_dirty() {
                whitelist.publish(p)?;
            }
        }
        BleEvent::GattClientTimeout { handle } | BleEvent::GattServerTimeout { handle } => {
            warn!("conn: GATT timeout, disconnecting {}", handle.0);
            disconnect(*handle, p)?;
        }
        BleEvent::UserMemRequest { handle } => {
            p.reply_user_mem(*handle)?;
        }
        BleEvent::RwAuthorizeRequest { handle, request } => {
            if let Some(reply) = authorize_reply(*request) {
                debug!("conn: refusing authorization {}", request);
                p.reply_authorize(*handle, reply)?;
            }
        }
        BleEvent::ExchangeMtuRequest { handle, client_mtu } => {
            debug!("conn: client MTU {}, answering {}", client_mtu, ATT_MTU_DEFAULT);
            p.reply_mtu(*handle, ATT_MTU_DEFAULT)?;
        }
        BleEvent::Write { uuid, value, .. } => {
            if is_orientation_uuid(*uuid) {
                info!("conn: write to {=u16:#x}: {=[u8]:x}", uuid, value.as_slice());
            } else {
                debug!("conn: write to unknown {=u16:#x}", uuid);
            }
        }
        _ => {}
    }
    Ok(())
}

/// Drop `handle`; a link that is already going down is fine.
pub fn disconnect<R: Radio>(handle: ConnHandle, radio: &mut R) -> Result<(), Fatal> {
    match radio.disconnect(handle, HCI_REMOTE_USER_TERMINATED_CONNECTION) {
        Ok(()) | Err(RadioError::InvalidState) => Ok(()),
        Err(e) => Err(Fatal::Radio(e)),
    }
}

/// Reply for an authorization request, or `None` when the request is
/// one this server answers through the normal path. Only queued writes
/// are refused.
fn authorize_reply(request: AuthorizeRequest) -> Option<AuthorizeReply> {
    match request {
        AuthorizeRequest::Write(op) if op.is_queued() => Some(AuthorizeReply::Write {
            status: GATT_STATUS_APP_FEATURE_NOT_SUPPORTED,
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::WriteOp;
    use crate::security::PeerId;
    use crate::testing::{central_params, Command, MockPlatform};

    fn connected(h: u16) -> BleEvent {
        BleEvent::Connected {
            handle: ConnHandle(h),
            params: central_params(),
        }
    }

    fn disconnected(h: u16) -> BleEvent {
        BleEvent::Disconnected {
            handle: ConnHandle(h),
            reason: 0x13,
        }
    }

    #[test]
    fn handle_is_invalid_before_first_connect() {
        let conn = Connection::new();
        assert_eq!(conn.handle(), ConnHandle::INVALID);
        assert!(!conn.is_connected());
    }

    #[test]
    fn connect_records_handle_and_disconnect_clears_it() {
        let mut conn = Connection::new();
        conn.on_ble_event(&connected(4));
        assert_eq!(conn.handle(), ConnHandle(4));
        assert_eq!(conn.security(), SecurityStatus::Unencrypted);
        conn.set_security(SecurityStatus::Secured);
        conn.set_peer(PeerId(1));
        conn.on_ble_event(&disconnected(4));
        assert_eq!(conn, Connection::new());
    }

    #[test]
    fn second_connect_is_not_admitted() {
        let mut conn = Connection::new();
        conn.on_ble_event(&connected(0));
        assert!(!conn.admits(&connected(1)));
        conn.on_ble_event(&connected(1));
        assert_eq!(conn.handle(), ConnHandle(0));
    }

    #[test]
    fn events_for_other_handles_are_not_admitted() {
        let mut conn = Connection::new();
        assert!(!conn.admits(&disconnected(0)));
        conn.on_ble_event(&connected(0));
        assert!(conn.admits(&disconnected(0)));
        assert!(!conn.admits(&disconnected(7)));
        assert!(conn.admits(&BleEvent::AdvertisingTimeout));
    }

    #[test]
    fn security_is_not_recorded_without_link() {
        let mut conn = Connection::new();
        conn.set_security(SecurityStatus::Secured);
        conn.set_peer(PeerId(2));
        assert_eq!(conn.security(), SecurityStatus::Unencrypted);
        assert_eq!(conn.peer(), None);
    }

    #[test]
    fn timeouts_disconnect_with_remote_user_terminated() {
        let mut p = MockPlatform::new();
        let mut wl = Whitelist::new();
        on_ble_event(
            &BleEvent::GattServerTimeout { handle: ConnHandle(2) },
            &mut wl,
            &mut p,
        )
        .unwrap();
        on_ble_event(
            &BleEvent::GattClientTimeout { handle: ConnHandle(2) },
            &mut wl,
            &mut p,
        )
        .unwrap();
        assert_eq!(
            p.commands,
            std::vec![
                Command::Disconnect(ConnHandle(2), HCI_REMOTE_USER_TERMINATED_CONNECTION),
                Command::Disconnect(ConnHandle(2), HCI_REMOTE_USER_TERMINATED_CONNECTION),
            ]
        );
    }

    #[test]
    fn requests_get_default_replies() {
        let mut p = MockPlatform::new();
        let mut wl = Whitelist::new();
        let h = ConnHandle(0);
        on_ble_event(&BleEvent::UserMemRequest { handle: h }, &mut wl, &mut p).unwrap();
        on_ble_event(
            &BleEvent::ExchangeMtuRequest {
                handle: h,
                client_mtu: 247,
            },
            &mut wl,
            &mut p,
        )
        .unwrap();
        assert_eq!(
            p.commands,
            std::vec![Command::ReplyUserMem(h), Command::ReplyMtu(h, 23)]
        );
    }

    #[test]
    fn queued_write_authorization_is_refused_as_unsupported() {
        let mut p = MockPlatform::new();
        let mut wl = Whitelist::new();
        let h = ConnHandle(0);
        for op in [WriteOp::PrepareRequest, WriteOp::ExecuteNow, WriteOp::ExecuteCancel] {
            on_ble_event(
                &BleEvent::RwAuthorizeRequest {
                    handle: h,
                    request: AuthorizeRequest::Write(op),
                },
                &mut wl,
                &mut p,
            )
            .unwrap();
        }
        let status = GATT_STATUS_APP_FEATURE_NOT_SUPPORTED;
        assert_eq!(p.commands.len(), 3);
        assert!(p
            .commands
            .iter()
            .all(|c| *c == Command::ReplyAuthorize(h, AuthorizeReply::Write { status })));
    }

    #[test]
    fn plain_write_authorization_is_left_alone() {
        let mut p = MockPlatform::new();
        let mut wl = Whitelist::new();
        on_ble_event(
            &BleEvent::RwAuthorizeRequest {
                handle: ConnHandle(0),
                request: AuthorizeRequest::Write(WriteOp::Request),
            },
            &mut wl,
            &mut p,
        )
        .unwrap();
        on_ble_event(
            &BleEvent::RwAuthorizeRequest {
                handle: ConnHandle(0),
                request: AuthorizeRequest::Invalid,
            },
            &mut wl,
            &mut p,
        )
        .unwrap();
        assert!(p.commands.is_empty());
    }

    #[test]
    fn read_authorization_is_left_alone() {
        let mut p = MockPlatform::new();
        let mut wl = Whitelist::new();
        on_ble_event(
            &BleEvent::RwAuthorizeRequest {
                handle: ConnHandle(0),
                request: AuthorizeRequest::Read,
            },
            &mut wl,
            &mut p,
        )
        .unwrap();
        assert!(p.commands.is_empty());
        assert_eq!(authorize_reply(AuthorizeRequest::Read), None);
    }

    #[test]
    fn disconnect_publishes_dirty_whitelist() {
        let mut p = MockPlatform::new();
        let mut wl = Whitelist::new();
        wl.append(PeerId(6));
        on_ble_event(&disconnected(0), &mut wl, &mut p).unwrap();
        assert!(!wl.is_dirty());
        assert_eq!(
            p.commands,
            std::vec![
                Command::Indicate(Indication::Idle),
                Command::SetWhitelist(std::vec![PeerId(6)]),
                Command::SetIdentityList(std::vec![PeerId(6)]),
            ]
        );
    }

    #[test]
    fn disconnect_with_clean_whitelist_only_indicates() {
        let mut p = MockPlatform::new();
        let mut wl = Whitelist::new();
        on_ble_event(&disconnected(0), &mut wl, &mut p).unwrap();
        assert_eq!(p.commands, std::vec![Command::Indicate(Indication::Idle)]);
    }

    #[test]
    fn disconnect_on_dropped_link_is_tolerated() {
        let mut p = MockPlatform::new();
        p.disconnect_result = Err(RadioError::InvalidState);
        assert_eq!(disconnect(ConnHandle(0), &mut p), Ok(()));
        p.disconnect_result = Err(RadioError::Raw(8));
        assert_eq!(
            disconnect(ConnHandle(0), &mut p),
            Err(Fatal::Radio(RadioError::Raw(8)))
        );
    }
}
