//! Transport boundary
//!
//! The radio stack is an external collaborator. Every request made through
//! these traits is fire-and-forget: the return value only says whether the
//! request was accepted, and the outcome arrives later as a
//! [`TransportEvent`] on the link's [`LinkEvents`] sink.

use crate::domain::models::{CharacteristicUpdate, GattService};
use crate::error::SessionError;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Identifies one opened GATT link; events of replaced links are dropped
pub type LinkId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connected,
    Disconnected,
}

#[derive(Debug, Clone)]
pub enum TransportEvent {
    ConnectionStateChanged { state: LinkState },
    ServicesDiscovered { success: bool },
    CharacteristicRead { update: CharacteristicUpdate, success: bool },
    CharacteristicChanged(CharacteristicUpdate),
}

#[derive(Debug)]
pub struct LinkEvent {
    pub link: LinkId,
    pub event: TransportEvent,
}

/// Callback sink handed to the transport when a link is opened
#[derive(Debug, Clone)]
pub struct LinkEvents {
    link: LinkId,
    tx: mpsc::UnboundedSender<LinkEvent>,
}

impl LinkEvents {
    pub fn new(link: LinkId, tx: mpsc::UnboundedSender<LinkEvent>) -> Self {
        Self { link, tx }
    }

    pub fn link(&self) -> LinkId {
        self.link
    }

    /// Deliver an event; false once the session is gone
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx
            .send(LinkEvent {
                link: self.link,
                event,
            })
            .is_ok()
    }
}

/// Host radio stack
pub trait BluetoothStack: Send + Sync {
    /// Fails with `AdapterUnavailable` or `NoAdapter`
    fn default_adapter(&self) -> Result<Arc<dyn Adapter>, SessionError>;
}

pub trait Adapter: Send + Sync {
    /// Whether the radio is powered and usable
    fn is_available(&self) -> bool;

    /// Resolve a device handle for `address`; fails with `DeviceNotFound`
    fn resolve_device(&self, address: &str) -> Result<Arc<dyn RemoteDevice>, SessionError>;
}

pub trait RemoteDevice: Send + Sync {
    /// Open a GATT link. With `auto_connect` false the transport connects
    /// directly instead of waiting for the device to become available.
    fn connect_gatt(
        &self,
        auto_connect: bool,
        events: LinkEvents,
    ) -> Result<Box<dyn GattLink>, SessionError>;
}

/// An opened GATT link. Dropping it without [`GattLink::close`] leaks
/// whatever the transport holds for it.
pub trait GattLink: Send + Sync {
    fn reconnect(&self) -> bool;
    fn disconnect(&self);
    fn close(&mut self);
    fn discover_services(&self) -> bool;
    fn read_characteristic(&self, characteristic: Uuid) -> bool;
    fn set_notification(&self, characteristic: Uuid, enabled: bool) -> bool;
    fn write_descriptor(&self, characteristic: Uuid, descriptor: Uuid, value: &[u8]) -> bool;
    /// Current catalog snapshot (empty before discovery)
    fn services(&self) -> Vec<GattService>;
}
