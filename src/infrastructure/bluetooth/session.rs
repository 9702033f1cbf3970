//! BLE Session
//!
//! Owns the lifecycle of one peripheral connection and the notification
//! pipeline behind it. All mutable state (connection bookkeeping, the
//! aggregation buffer) sits behind one mutex; transport callbacks are pumped
//! from a channel by a dedicated task, and batch flushes run on their own
//! timer tasks.

use crate::domain::aggregation::AggregationBuffer;
use crate::domain::decoder::{Decoded, NotificationDecoder};
use crate::domain::models::{
    CharacteristicUpdate, ConnectionState, GattService, SessionEvent,
};
use crate::domain::settings::SessionConfig;
use crate::error::SessionError;
use crate::infrastructure::bluetooth::observer::{dispatch, SessionObserver};
use crate::infrastructure::bluetooth::protocol::ENABLE_NOTIFICATION_VALUE;
use crate::infrastructure::bluetooth::transport::{
    Adapter, BluetoothStack, GattLink, LinkEvent, LinkEvents, LinkId, LinkState, TransportEvent,
};
use crate::infrastructure::recorder::{FlushReport, Recorder};
use crate::infrastructure::storage::ExternalStorage;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Session with a single remote peripheral
///
/// Must be created inside a Tokio runtime; background tasks are spawned on
/// that runtime.
pub struct BleSession {
    inner: Arc<SessionInner>,
    pump: JoinHandle<()>,
}

struct SessionInner {
    stack: Arc<dyn BluetoothStack>,
    config: SessionConfig,
    decoder: NotificationDecoder,
    recorder: Recorder,
    observer: Arc<dyn SessionObserver>,
    link_events: mpsc::UnboundedSender<LinkEvent>,
    runtime: Handle,
    core: Mutex<SessionCore>,
}

struct ActiveLink {
    id: LinkId,
    handle: Box<dyn GattLink>,
}

#[derive(Default)]
struct SessionCore {
    adapter: Option<Arc<dyn Adapter>>,
    address: Option<String>,
    state: ConnectionState,
    link: Option<ActiveLink>,
    next_link_id: LinkId,
    buffer: AggregationBuffer,
    connect_deadline: Option<JoinHandle<()>>,
}

impl SessionCore {
    fn live_link(&self) -> Option<&ActiveLink> {
        self.adapter.as_ref()?;
        self.link.as_ref()
    }

    fn cancel_connect_deadline(&mut self) {
        if let Some(deadline) = self.connect_deadline.take() {
            deadline.abort();
        }
    }
}

impl BleSession {
    pub fn new(
        stack: Arc<dyn BluetoothStack>,
        storage: Arc<dyn ExternalStorage>,
        config: SessionConfig,
        observer: Arc<dyn SessionObserver>,
    ) -> Self {
        let (link_events, event_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(SessionInner {
            stack,
            decoder: NotificationDecoder::new(config.heart_rate_uuid),
            recorder: Recorder::new(storage, &config),
            config,
            observer,
            link_events,
            runtime: Handle::current(),
            core: Mutex::new(SessionCore::default()),
        });
        let pump = inner.runtime.spawn(Arc::clone(&inner).run_event_pump(event_rx));
        Self { inner, pump }
    }

    /// Acquire the default adapter. Idempotent.
    pub fn initialize(&self) -> Result<(), SessionError> {
        self.inner.initialize()
    }

    /// Start connecting to `address`.
    ///
    /// Success only means the request was issued; the outcome is reported
    /// through `on_gatt_connected` / `on_gatt_disconnected`.
    pub fn connect(&self, address: &str) -> Result<(), SessionError> {
        self.inner.connect(address)
    }

    /// Ask the transport to tear the connection down. The state changes when
    /// the transport reports the disconnect.
    pub fn disconnect(&self) {
        self.inner.disconnect()
    }

    /// Release the transport handle
    pub fn close(&self) {
        self.inner.close()
    }

    pub fn read_characteristic(&self, characteristic: Uuid) {
        self.inner.read_characteristic(characteristic)
    }

    pub fn set_notification(&self, characteristic: Uuid, enabled: bool) {
        self.inner.set_notification(characteristic, enabled)
    }

    /// Catalog of the connected device, `None` without a live link
    pub fn list_services(&self) -> Option<Vec<GattService>> {
        let core = self.inner.core();
        core.live_link().map(|link| link.handle.services())
    }

    /// Push the pending batch through the pipeline without waiting for the
    /// quiet period. The record is written on the calling thread.
    pub fn flush_now(&self) -> Option<FlushReport> {
        let batch = self.inner.core().buffer.take();
        if batch.is_empty() {
            return None;
        }
        Some(self.inner.finish_flush(batch))
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.core().state
    }

    pub fn address(&self) -> Option<String> {
        self.inner.core().address.clone()
    }

    pub fn pending_payloads(&self) -> usize {
        self.inner.core().buffer.len()
    }
}

impl Drop for BleSession {
    fn drop(&mut self) {
        self.pump.abort();
        self.inner.close();
    }
}

impl SessionInner {
    fn core(&self) -> MutexGuard<'_, SessionCore> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, events: Vec<SessionEvent>) {
        for event in &events {
            dispatch(self.observer.as_ref(), event);
        }
    }

    fn initialize(&self) -> Result<(), SessionError> {
        let mut core = self.core();
        if core.adapter.is_some() {
            return Ok(());
        }

        let adapter = self.stack.default_adapter().map_err(|e| {
            error!("Unable to obtain a Bluetooth adapter: {}", e);
            e
        })?;
        if !adapter.is_available() {
            error!("Bluetooth adapter is not available");
            return Err(SessionError::AdapterUnavailable(
                "adapter is powered off".to_string(),
            ));
        }

        info!("Bluetooth adapter initialized");
        core.adapter = Some(adapter);
        Ok(())
    }

    fn connect(self: &Arc<Self>, address: &str) -> Result<(), SessionError> {
        let mut core = self.core();
        let Some(adapter) = core.adapter.clone() else {
            warn!("Bluetooth adapter not initialized");
            return Err(SessionError::NotInitialized);
        };
        if address.trim().is_empty() {
            warn!("Unspecified address");
            return Err(SessionError::InvalidAddress);
        }

        // Previously connected device, try to reconnect
        if core.address.as_deref() == Some(address) {
            if let Some(link) = &core.link {
                debug!("Trying to use an existing GATT link for connection");
                if !link.handle.reconnect() {
                    warn!("Transport rejected reconnect to {}", address);
                    return Err(SessionError::ConnectRejected(address.to_string()));
                }
                let id = link.id;
                core.state = ConnectionState::Connecting;
                self.arm_connect_deadline(&mut core, id);
                return Ok(());
            }
        }

        let device = adapter.resolve_device(address).map_err(|e| {
            warn!("Device not found. Unable to connect: {}", e);
            e
        })?;

        if let Some(mut previous) = core.link.take() {
            debug!("Releasing GATT link {}", previous.id);
            previous.handle.close();
        }
        core.cancel_connect_deadline();

        let id = core.next_link_id;
        core.next_link_id += 1;
        // Direct connect, no auto-connect
        let handle = match device.connect_gatt(false, LinkEvents::new(id, self.link_events.clone())) {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Failed to open GATT link to {}: {}", address, e);
                core.state = ConnectionState::Disconnected;
                return Err(e);
            }
        };

        info!("Trying to create a new connection to {}", address);
        core.link = Some(ActiveLink { id, handle });
        core.address = Some(address.to_string());
        core.state = ConnectionState::Connecting;
        self.arm_connect_deadline(&mut core, id);
        Ok(())
    }

    fn arm_connect_deadline(self: &Arc<Self>, core: &mut SessionCore, link: LinkId) {
        core.cancel_connect_deadline();
        let Some(timeout) = self.config.connect_timeout else {
            return;
        };
        let deadline = tokio::time::Instant::now() + timeout;
        let inner = Arc::clone(self);
        core.connect_deadline = Some(self.runtime.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            inner.connect_timed_out(link);
        }));
    }

    fn connect_timed_out(&self, link: LinkId) {
        let mut core = self.core();
        let current = core.link.as_ref().map(|l| l.id);
        if core.state != ConnectionState::Connecting || current != Some(link) {
            return;
        }
        core.connect_deadline = None;

        warn!(
            "Connection attempt timed out after {:?}",
            self.config.connect_timeout.unwrap_or_default()
        );
        if let Some(active) = &core.link {
            active.handle.disconnect();
        }
        core.state = ConnectionState::Disconnected;
        drop(core);
        self.emit(vec![SessionEvent::GattDisconnected]);
    }

    fn disconnect(&self) {
        let core = self.core();
        match core.live_link() {
            Some(link) => link.handle.disconnect(),
            None => warn!("Bluetooth adapter not initialized"),
        }
    }

    fn close(&self) {
        let mut core = self.core();
        core.cancel_connect_deadline();
        let Some(mut link) = core.link.take() else {
            return;
        };
        link.handle.close();
        core.state = ConnectionState::Disconnected;
        debug!("Closed GATT link {}", link.id);
    }

    fn read_characteristic(&self, characteristic: Uuid) {
        let core = self.core();
        let Some(link) = core.live_link() else {
            warn!("Bluetooth adapter not initialized");
            return;
        };
        if !link.handle.read_characteristic(characteristic) {
            warn!("Read request for {} rejected", characteristic);
        }
    }

    fn set_notification(&self, characteristic: Uuid, enabled: bool) {
        let core = self.core();
        let Some(link) = core.live_link() else {
            warn!("Bluetooth adapter not initialized");
            return;
        };

        if !link.handle.set_notification(characteristic, enabled) {
            error!("set notification failed! enabled={}", enabled);
        }
        if !enabled {
            return;
        }

        let Some(rule) = self
            .config
            .descriptor_rules
            .iter()
            .find(|rule| rule.characteristic == characteristic)
        else {
            return;
        };

        let services = link.handle.services();
        let Some(found) = services
            .iter()
            .flat_map(|service| service.characteristics.iter())
            .find(|c| c.uuid == characteristic)
        else {
            warn!("Characteristic {} not in the discovered catalog", characteristic);
            return;
        };

        for descriptor in found.descriptors.iter().filter(|d| rule.scope.matches(d)) {
            debug!("writeDescriptor notify, uuid={}", descriptor);
            if !link
                .handle
                .write_descriptor(characteristic, *descriptor, &ENABLE_NOTIFICATION_VALUE)
            {
                warn!("Descriptor write {} rejected", descriptor);
            }
        }
    }

    async fn run_event_pump(self: Arc<Self>, mut event_rx: mpsc::UnboundedReceiver<LinkEvent>) {
        while let Some(event) = event_rx.recv().await {
            self.handle_link_event(event);
        }
    }

    fn handle_link_event(self: &Arc<Self>, LinkEvent { link, event }: LinkEvent) {
        let mut core = self.core();
        if core.link.as_ref().map(|l| l.id) != Some(link) {
            debug!("Dropping event from stale link {}", link);
            return;
        }

        let mut outgoing = Vec::new();
        match event {
            TransportEvent::ConnectionStateChanged {
                state: LinkState::Connected,
            } => {
                core.cancel_connect_deadline();
                core.state = ConnectionState::Connected;
                info!("Connected to GATT server.");
                outgoing.push(SessionEvent::GattConnected);
                if let Some(active) = &core.link {
                    let started = active.handle.discover_services();
                    info!("Attempting to start service discovery: {}", started);
                }
            }
            TransportEvent::ConnectionStateChanged {
                state: LinkState::Disconnected,
            } => {
                core.cancel_connect_deadline();
                let previous = std::mem::replace(&mut core.state, ConnectionState::Disconnected);
                if previous == ConnectionState::Disconnected {
                    debug!("Duplicate disconnect from link {}", link);
                } else {
                    info!("Disconnected from GATT server.");
                    outgoing.push(SessionEvent::GattDisconnected);
                }
            }
            TransportEvent::ServicesDiscovered { success: true } => {
                outgoing.push(SessionEvent::GattServicesDiscovered);
            }
            TransportEvent::ServicesDiscovered { success: false } => {
                warn!("Service discovery failed");
            }
            TransportEvent::CharacteristicRead {
                update,
                success: true,
            } => {
                self.route_update(&mut core, update, &mut outgoing);
            }
            TransportEvent::CharacteristicRead { update, .. } => {
                warn!("Read of {} failed", update.uuid);
            }
            TransportEvent::CharacteristicChanged(update) => {
                self.route_update(&mut core, update, &mut outgoing);
            }
        }

        drop(core);
        self.emit(outgoing);
    }

    fn route_update(
        self: &Arc<Self>,
        core: &mut SessionCore,
        update: CharacteristicUpdate,
        outgoing: &mut Vec<SessionEvent>,
    ) {
        match self.decoder.decode(&update) {
            Decoded::Reading(value) => outgoing.push(SessionEvent::DataAvailable {
                data: value.to_string(),
                same: false,
            }),
            Decoded::Payload { display, bytes } => {
                outgoing.push(SessionEvent::DataAvailable {
                    data: display,
                    same: false,
                });
                self.enqueue(core, bytes, update.received_at);
            }
            Decoded::Empty => {}
        }
    }

    /// Queue a payload and restart the quiet-period timer
    fn enqueue(self: &Arc<Self>, core: &mut SessionCore, payload: Vec<u8>, arrived_at: Instant) {
        let generation = core.buffer.push(payload, arrived_at);
        let deadline = tokio::time::Instant::now() + self.config.debounce;
        let inner = Arc::clone(self);
        core.buffer.arm(self.runtime.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let Some(batch) = inner.take_due_batch(generation) else {
                return;
            };
            info!("Quiet period elapsed, flushing {} payloads", batch.len());
            // Record I/O runs on the blocking pool, never on a runtime worker
            let runtime = inner.runtime.clone();
            if let Err(e) = runtime.spawn_blocking(move || inner.finish_flush(batch)).await {
                error!("Flush task failed: {}", e);
            }
        }));
    }

    /// Batch owed to the timer armed at `generation`, if it is still current
    fn take_due_batch(&self, generation: u64) -> Option<Vec<Vec<u8>>> {
        let mut core = self.core();
        let quiet_for = core.buffer.last_arrival().map(|at| at.elapsed());
        let batch = core.buffer.take_if_current(generation)?;
        if batch.is_empty() {
            return None;
        }
        debug!("Last payload arrived {:?} ago", quiet_for);
        Some(batch)
    }

    fn finish_flush(&self, batch: Vec<Vec<u8>>) -> FlushReport {
        let report = self.recorder.flush(&batch);
        self.emit(vec![SessionEvent::DataAvailable {
            data: String::new(),
            same: report.same,
        }]);
        report
    }
}
