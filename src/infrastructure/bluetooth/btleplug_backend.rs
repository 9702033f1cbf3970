//! Transport over `btleplug`
//!
//! btleplug exposes an async request/response API; the session expects
//! fire-and-forget requests with callbacks. Each request is spawned on the
//! runtime and its outcome is reported through the link's [`LinkEvents`].

use crate::domain::models::{CharacteristicUpdate, GattCharacteristic, GattService};
use crate::error::SessionError;
use crate::infrastructure::bluetooth::tasks::LinkTasks;
use crate::infrastructure::bluetooth::transport::{
    Adapter, BluetoothStack, GattLink, LinkEvents, LinkState, RemoteDevice, TransportEvent,
};
use btleplug::api::{
    BDAddr, Central, CentralEvent, CentralState, Characteristic, Manager as _,
    Peripheral as _, ScanFilter,
};
use btleplug::platform::{self, Manager, Peripheral};
use futures::StreamExt;
use std::future::Future;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(250);
const SCAN_TIMEOUT: Duration = Duration::from_secs(10);

pub struct BtleplugStack {
    // Dropping the manager tears down the platform session
    _manager: Manager,
    adapters: Vec<BtleplugAdapter>,
}

impl BtleplugStack {
    pub async fn new() -> Result<Self, SessionError> {
        let manager = Manager::new()
            .await
            .map_err(|e| SessionError::AdapterUnavailable(e.to_string()))?;
        let runtime = Handle::current();

        let mut adapters = Vec::new();
        for adapter in manager
            .adapters()
            .await
            .map_err(|e| SessionError::AdapterUnavailable(e.to_string()))?
        {
            let powered = match adapter.adapter_state().await {
                Ok(state) => matches!(state, CentralState::PoweredOn),
                Err(e) => {
                    warn!("Could not query adapter state: {}", e);
                    false
                }
            };
            let name = adapter.adapter_info().await.unwrap_or_default();
            debug!("Found adapter {} (powered: {})", name, powered);
            adapters.push(BtleplugAdapter {
                adapter,
                powered,
                runtime: runtime.clone(),
            });
        }

        Ok(Self {
            _manager: manager,
            adapters,
        })
    }
}

impl BluetoothStack for BtleplugStack {
    fn default_adapter(&self) -> Result<Arc<dyn Adapter>, SessionError> {
        let adapter = self.adapters.first().ok_or(SessionError::NoAdapter)?;
        Ok(Arc::new(adapter.clone()))
    }
}

#[derive(Clone)]
struct BtleplugAdapter {
    adapter: platform::Adapter,
    powered: bool,
    runtime: Handle,
}

impl Adapter for BtleplugAdapter {
    fn is_available(&self) -> bool {
        self.powered
    }

    fn resolve_device(&self, address: &str) -> Result<Arc<dyn RemoteDevice>, SessionError> {
        let parsed = BDAddr::from_str(address.trim())
            .map_err(|_| SessionError::DeviceNotFound(address.to_string()))?;
        Ok(Arc::new(BtleplugDevice {
            adapter: self.adapter.clone(),
            address: parsed,
            runtime: self.runtime.clone(),
        }))
    }
}

struct BtleplugDevice {
    adapter: platform::Adapter,
    address: BDAddr,
    runtime: Handle,
}

impl RemoteDevice for BtleplugDevice {
    fn connect_gatt(
        &self,
        auto_connect: bool,
        events: LinkEvents,
    ) -> Result<Box<dyn GattLink>, SessionError> {
        if auto_connect {
            debug!("auto_connect is not supported by btleplug, connecting directly");
        }
        let link = BtleplugLink {
            shared: Arc::new(LinkShared {
                adapter: self.adapter.clone(),
                address: self.address,
                events,
                peripheral: OnceLock::new(),
                services: Mutex::new(Vec::new()),
                characteristics: Mutex::new(Vec::new()),
                tasks: Mutex::new(LinkTasks::new()),
            }),
            runtime: self.runtime.clone(),
        };
        link.spawn_connect();
        Ok(Box::new(link))
    }
}

struct LinkShared {
    adapter: platform::Adapter,
    address: BDAddr,
    events: LinkEvents,
    peripheral: OnceLock<Peripheral>,
    services: Mutex<Vec<GattService>>,
    characteristics: Mutex<Vec<Characteristic>>,
    tasks: Mutex<LinkTasks>,
}

impl LinkShared {
    fn tasks(&self) -> MutexGuard<'_, LinkTasks> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn find_peripheral(&self) -> Option<Peripheral> {
        if let Some(peripheral) = self.peripheral.get() {
            return Some(peripheral.clone());
        }

        if let Err(e) = self.adapter.start_scan(ScanFilter::default()).await {
            warn!("Failed to start scan: {}", e);
        }
        let deadline = Instant::now() + SCAN_TIMEOUT;
        let found = loop {
            match self.adapter.peripherals().await {
                Ok(peripherals) => {
                    for peripheral in peripherals {
                        if let Ok(Some(props)) = peripheral.properties().await {
                            if props.address == self.address {
                                return self.adopt(peripheral).await;
                            }
                        }
                    }
                }
                Err(e) => warn!("Failed to list peripherals: {}", e),
            }
            if Instant::now() >= deadline {
                break None;
            }
            sleep(SCAN_POLL_INTERVAL).await;
        };
        if let Err(e) = self.adapter.stop_scan().await {
            debug!("Failed to stop scan cleanly: {}", e);
        }
        found
    }

    async fn adopt(&self, peripheral: Peripheral) -> Option<Peripheral> {
        if let Err(e) = self.adapter.stop_scan().await {
            debug!("Failed to stop scan cleanly: {}", e);
        }
        let _ = self.peripheral.set(peripheral);
        self.peripheral.get().cloned()
    }

    async fn connect(self: Arc<Self>) {
        let Some(peripheral) = self.find_peripheral().await else {
            warn!("Device {} not seen within {:?}", self.address, SCAN_TIMEOUT);
            self.events.emit(TransportEvent::ConnectionStateChanged {
                state: LinkState::Disconnected,
            });
            return;
        };

        let connected = match peripheral.is_connected().await {
            Ok(true) => true,
            _ => match peripheral.connect().await {
                Ok(()) => true,
                Err(e) => {
                    warn!("Connection to {} failed: {}", self.address, e);
                    false
                }
            },
        };
        if !connected {
            self.events.emit(TransportEvent::ConnectionStateChanged {
                state: LinkState::Disconnected,
            });
            return;
        }

        info!("Link to {} established", self.address);
        self.watch(peripheral);
        self.events.emit(TransportEvent::ConnectionStateChanged {
            state: LinkState::Connected,
        });
    }

    /// Start the notification pump and the disconnect watcher
    fn watch(self: &Arc<Self>, peripheral: Peripheral) {
        // Held while spawning so a concurrent close either sees the tasks or refuses them
        let mut tasks = self.tasks();
        if tasks.is_closed() || tasks.is_watching() {
            return;
        }

        let shared = Arc::clone(self);
        let notified = peripheral.clone();
        tasks.push_background(tokio::spawn(async move {
            let mut notifications = match notified.notifications().await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Could not open notification stream: {}", e);
                    return;
                }
            };
            while let Some(notification) = notifications.next().await {
                let update = CharacteristicUpdate::new(notification.uuid, notification.value);
                if !shared.events.emit(TransportEvent::CharacteristicChanged(update)) {
                    break;
                }
            }
        }));

        let shared = Arc::clone(self);
        let peripheral_id = peripheral.id();
        tasks.push_background(tokio::spawn(async move {
            let mut events = match shared.adapter.events().await {
                Ok(events) => events,
                Err(e) => {
                    warn!("Could not subscribe to adapter events: {}", e);
                    return;
                }
            };
            while let Some(event) = events.next().await {
                if let CentralEvent::DeviceDisconnected(id) = event {
                    if id == peripheral_id {
                        info!("Device {} disconnected", shared.address);
                        shared.events.emit(TransportEvent::ConnectionStateChanged {
                            state: LinkState::Disconnected,
                        });
                    }
                }
            }
        }));
    }

    fn characteristic(&self, uuid: Uuid) -> Option<Characteristic> {
        self.characteristics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|c| c.uuid == uuid)
            .cloned()
    }

    fn record_catalog(&self, peripheral: &Peripheral) {
        let discovered = peripheral.services();
        let catalog = discovered
            .iter()
            .map(|service| GattService {
                uuid: service.uuid,
                primary: service.primary,
                characteristics: service
                    .characteristics
                    .iter()
                    .map(|c| GattCharacteristic {
                        uuid: c.uuid,
                        properties: c.properties.bits(),
                        descriptors: c.descriptors.iter().map(|d| d.uuid).collect(),
                    })
                    .collect(),
            })
            .collect();
        *self.services.lock().unwrap_or_else(PoisonError::into_inner) = catalog;
        *self
            .characteristics
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = peripheral.characteristics().into_iter().collect();
    }
}

struct BtleplugLink {
    shared: Arc<LinkShared>,
    runtime: Handle,
}

impl BtleplugLink {
    fn spawn_connect(&self) {
        let attempt = self.runtime.spawn(Arc::clone(&self.shared).connect());
        self.shared.tasks().start_connect(attempt);
    }

    /// Run `op` against the resolved peripheral; false if none was resolved yet
    fn with_peripheral<F, Fut>(&self, op: F) -> bool
    where
        F: FnOnce(Arc<LinkShared>, Peripheral) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let Some(peripheral) = self.shared.peripheral.get().cloned() else {
            return false;
        };
        self.runtime.spawn(op(Arc::clone(&self.shared), peripheral));
        true
    }
}

impl GattLink for BtleplugLink {
    fn reconnect(&self) -> bool {
        self.spawn_connect();
        true
    }

    fn disconnect(&self) {
        let cancelled = self.shared.tasks().cancel_connect();
        if cancelled {
            debug!("Cancelled connect attempt to {}", self.shared.address);
        }
        let requested = self.with_peripheral(move |shared, peripheral| async move {
            match peripheral.disconnect().await {
                Ok(()) => {}
                Err(e) if cancelled => debug!("Disconnect after cancelled attempt: {}", e),
                Err(e) => {
                    warn!("Disconnect from {} failed: {}", shared.address, e);
                    return;
                }
            }
            shared.events.emit(TransportEvent::ConnectionStateChanged {
                state: LinkState::Disconnected,
            });
        });
        if !requested && cancelled {
            self.shared.events.emit(TransportEvent::ConnectionStateChanged {
                state: LinkState::Disconnected,
            });
        }
    }

    fn close(&mut self) {
        self.shared.tasks().close();
        self.with_peripheral(|_, peripheral| async move {
            let _ = peripheral.disconnect().await;
        });
    }

    fn discover_services(&self) -> bool {
        self.with_peripheral(|shared, peripheral| async move {
            let success = match peripheral.discover_services().await {
                Ok(()) => {
                    shared.record_catalog(&peripheral);
                    true
                }
                Err(e) => {
                    warn!("Service discovery failed: {}", e);
                    false
                }
            };
            shared
                .events
                .emit(TransportEvent::ServicesDiscovered { success });
        })
    }

    fn read_characteristic(&self, characteristic: Uuid) -> bool {
        let Some(target) = self.shared.characteristic(characteristic) else {
            return false;
        };
        self.with_peripheral(|shared, peripheral| async move {
            let (value, success) = match peripheral.read(&target).await {
                Ok(value) => (value, true),
                Err(e) => {
                    warn!("Read of {} failed: {}", target.uuid, e);
                    (Vec::new(), false)
                }
            };
            shared.events.emit(TransportEvent::CharacteristicRead {
                update: CharacteristicUpdate::new(target.uuid, value),
                success,
            });
        })
    }

    fn set_notification(&self, characteristic: Uuid, enabled: bool) -> bool {
        let Some(target) = self.shared.characteristic(characteristic) else {
            return false;
        };
        self.with_peripheral(|_, peripheral| async move {
            let result = if enabled {
                peripheral.subscribe(&target).await
            } else {
                peripheral.unsubscribe(&target).await
            };
            if let Err(e) = result {
                warn!("Notification toggle on {} failed: {}", target.uuid, e);
            }
        })
    }

    fn write_descriptor(&self, characteristic: Uuid, descriptor: Uuid, value: &[u8]) -> bool {
        let Some(target) = self.shared.characteristic(characteristic) else {
            return false;
        };
        let Some(descriptor) = target
            .descriptors
            .iter()
            .find(|d| d.uuid == descriptor)
            .cloned()
        else {
            return false;
        };
        let value = value.to_vec();
        self.with_peripheral(|_, peripheral| async move {
            if let Err(e) = peripheral.write_descriptor(&descriptor, &value).await {
                warn!("Descriptor write {} failed: {}", descriptor.uuid, e);
            }
        })
    }

    fn services(&self) -> Vec<GattService> {
        self.shared
            .services
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
