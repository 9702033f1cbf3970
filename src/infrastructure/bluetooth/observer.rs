use crate::domain::models::SessionEvent;
use tokio::sync::mpsc;

/// Receives the events a session broadcasts to its host.
///
/// Callbacks run on the session's event pump or flush task, never while the
/// session lock is held, so an observer may call back into the session.
pub trait SessionObserver: Send + Sync {
    fn on_gatt_connected(&self);
    fn on_gatt_disconnected(&self);
    fn on_services_discovered(&self);
    fn on_data_available(&self, data: &str, same: bool);
}

/// Forwards every callback as a [`SessionEvent`] over a channel
#[derive(Clone)]
pub struct ChannelObserver {
    event_sender: mpsc::UnboundedSender<SessionEvent>,
}

impl ChannelObserver {
    pub fn new(event_sender: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self { event_sender }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    fn send(&self, event: SessionEvent) {
        let _ = self.event_sender.send(event);
    }
}

impl SessionObserver for ChannelObserver {
    fn on_gatt_connected(&self) {
        self.send(SessionEvent::GattConnected);
    }

    fn on_gatt_disconnected(&self) {
        self.send(SessionEvent::GattDisconnected);
    }

    fn on_services_discovered(&self) {
        self.send(SessionEvent::GattServicesDiscovered);
    }

    fn on_data_available(&self, data: &str, same: bool) {
        self.send(SessionEvent::DataAvailable {
            data: data.to_string(),
            same,
        });
    }
}

/// Dispatch a buffered event to the matching observer callback
pub(crate) fn dispatch(observer: &dyn SessionObserver, event: &SessionEvent) {
    match event {
        SessionEvent::GattConnected => observer.on_gatt_connected(),
        SessionEvent::GattDisconnected => observer.on_gatt_disconnected(),
        SessionEvent::GattServicesDiscovered => observer.on_services_discovered(),
        SessionEvent::DataAvailable { data, same } => observer.on_data_available(data, *same),
    }
}
