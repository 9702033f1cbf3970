//! Scripted in-memory transport for tests.
//!
//! Every request made through the transport traits is journaled, and tests
//! inject [`TransportEvent`]s as if the radio stack had called back.

use crate::domain::models::{GattCharacteristic, GattService};
use crate::error::SessionError;
use crate::infrastructure::bluetooth::transport::{
    Adapter, BluetoothStack, GattLink, LinkEvents, LinkId, RemoteDevice, TransportEvent,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct MockJournal {
    /// (address, auto_connect) per opened link
    pub opened: Vec<(String, bool)>,
    pub reconnects: usize,
    pub disconnects: usize,
    pub closed: Vec<LinkId>,
    pub discoveries: usize,
    pub reads: Vec<Uuid>,
    pub notifications: Vec<(Uuid, bool)>,
    /// Attempted writes, accepted or not
    pub descriptor_writes: Vec<(Uuid, Uuid, Vec<u8>)>,
}

#[derive(Default)]
struct MockShared {
    journal: Mutex<MockJournal>,
    sinks: Mutex<Vec<LinkEvents>>,
    catalog: Mutex<Vec<GattService>>,
    reject_reconnect: AtomicBool,
    failing_descriptor: Mutex<Option<Uuid>>,
}

pub struct MockStack {
    adapter: Option<Arc<MockAdapter>>,
    reachable: bool,
}

impl MockStack {
    pub fn new(adapter: Arc<MockAdapter>) -> Self {
        Self {
            adapter: Some(adapter),
            reachable: true,
        }
    }

    pub fn without_adapter() -> Self {
        Self {
            adapter: None,
            reachable: true,
        }
    }

    pub fn unreachable() -> Self {
        Self {
            adapter: None,
            reachable: false,
        }
    }
}

impl BluetoothStack for MockStack {
    fn default_adapter(&self) -> Result<Arc<dyn Adapter>, SessionError> {
        if !self.reachable {
            return Err(SessionError::AdapterUnavailable("mock stack offline".into()));
        }
        match &self.adapter {
            Some(adapter) => Ok(adapter.clone() as Arc<dyn Adapter>),
            None => Err(SessionError::NoAdapter),
        }
    }
}

pub struct MockAdapter {
    shared: Arc<MockShared>,
    known: Vec<String>,
    powered: bool,
}

impl MockAdapter {
    pub fn new(known: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            shared: Arc::new(MockShared::default()),
            known: known.iter().map(|a| a.to_string()).collect(),
            powered: true,
        })
    }

    pub fn powered_off() -> Arc<Self> {
        Arc::new(Self {
            shared: Arc::new(MockShared::default()),
            known: Vec::new(),
            powered: false,
        })
    }

    pub fn journal(&self) -> MutexGuard<'_, MockJournal> {
        self.shared.journal.lock().unwrap()
    }

    pub fn set_catalog(&self, services: Vec<GattService>) {
        *self.shared.catalog.lock().unwrap() = services;
    }

    pub fn reject_reconnects(&self) {
        self.shared.reject_reconnect.store(true, Ordering::SeqCst);
    }

    pub fn fail_descriptor(&self, descriptor: Uuid) {
        *self.shared.failing_descriptor.lock().unwrap() = Some(descriptor);
    }

    /// Deliver an event on the most recently opened link
    pub fn emit(&self, event: TransportEvent) {
        let sinks = self.shared.sinks.lock().unwrap();
        sinks.last().expect("no link opened").emit(event);
    }

    /// Deliver an event on the `index`-th opened link
    pub fn emit_on(&self, index: usize, event: TransportEvent) {
        let sinks = self.shared.sinks.lock().unwrap();
        sinks[index].emit(event);
    }
}

impl Adapter for MockAdapter {
    fn is_available(&self) -> bool {
        self.powered
    }

    fn resolve_device(&self, address: &str) -> Result<Arc<dyn RemoteDevice>, SessionError> {
        if !self.known.iter().any(|a| a == address) {
            return Err(SessionError::DeviceNotFound(address.to_string()));
        }
        Ok(Arc::new(MockDevice {
            address: address.to_string(),
            shared: self.shared.clone(),
        }))
    }
}

struct MockDevice {
    address: String,
    shared: Arc<MockShared>,
}

impl RemoteDevice for MockDevice {
    fn connect_gatt(
        &self,
        auto_connect: bool,
        events: LinkEvents,
    ) -> Result<Box<dyn GattLink>, SessionError> {
        let id = events.link();
        self.shared
            .journal
            .lock()
            .unwrap()
            .opened
            .push((self.address.clone(), auto_connect));
        self.shared.sinks.lock().unwrap().push(events);
        Ok(Box::new(MockLink {
            id,
            shared: self.shared.clone(),
        }))
    }
}

struct MockLink {
    id: LinkId,
    shared: Arc<MockShared>,
}

impl MockLink {
    fn journal(&self) -> MutexGuard<'_, MockJournal> {
        self.shared.journal.lock().unwrap()
    }
}

impl GattLink for MockLink {
    fn reconnect(&self) -> bool {
        self.journal().reconnects += 1;
        !self.shared.reject_reconnect.load(Ordering::SeqCst)
    }

    fn disconnect(&self) {
        self.journal().disconnects += 1;
    }

    fn close(&mut self) {
        let id = self.id;
        self.journal().closed.push(id);
    }

    fn discover_services(&self) -> bool {
        self.journal().discoveries += 1;
        true
    }

    fn read_characteristic(&self, characteristic: Uuid) -> bool {
        self.journal().reads.push(characteristic);
        true
    }

    fn set_notification(&self, characteristic: Uuid, enabled: bool) -> bool {
        self.journal().notifications.push((characteristic, enabled));
        true
    }

    fn write_descriptor(&self, characteristic: Uuid, descriptor: Uuid, value: &[u8]) -> bool {
        self.journal()
            .descriptor_writes
            .push((characteristic, descriptor, value.to_vec()));
        *self.shared.failing_descriptor.lock().unwrap() != Some(descriptor)
    }

    fn services(&self) -> Vec<GattService> {
        self.shared.catalog.lock().unwrap().clone()
    }
}

/// Single-service catalog with the given characteristics and their descriptors
pub fn catalog(characteristics: &[(Uuid, &[Uuid])]) -> Vec<GattService> {
    vec![GattService {
        uuid: Uuid::from_u128(0x0000fff0_0000_1000_8000_00805f9b34fb),
        primary: true,
        characteristics: characteristics
            .iter()
            .map(|(uuid, descriptors)| GattCharacteristic {
                uuid: *uuid,
                properties: 0x10,
                descriptors: descriptors.to_vec(),
            })
            .collect(),
    }]
}
