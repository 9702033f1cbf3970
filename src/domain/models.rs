use serde::Serialize;
use std::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Events broadcast to the host observing a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionEvent {
    GattConnected,
    GattDisconnected,
    GattServicesDiscovered,
    /// `same` only carries meaning for batch flushes; per-notification
    /// events always report `false`.
    DataAvailable { data: String, same: bool },
}

impl SessionEvent {
    pub fn action(&self) -> &'static str {
        match self {
            Self::GattConnected => "GATT_CONNECTED",
            Self::GattDisconnected => "GATT_DISCONNECTED",
            Self::GattServicesDiscovered => "GATT_SERVICES_DISCOVERED",
            Self::DataAvailable { .. } => "DATA_AVAILABLE",
        }
    }
}

/// A characteristic value pushed by (or read from) the peripheral
#[derive(Debug, Clone)]
pub struct CharacteristicUpdate {
    pub uuid: Uuid,
    pub value: Vec<u8>,
    pub received_at: Instant,
}

impl CharacteristicUpdate {
    pub fn new(uuid: Uuid, value: impl Into<Vec<u8>>) -> Self {
        Self {
            uuid,
            value: value.into(),
            received_at: Instant::now(),
        }
    }
}

/// Verdict of comparing a flushed batch against the reference transcript
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonResult {
    Same,
    Different,
    NoReference,
}

impl ComparisonResult {
    /// Line appended to the record file after the batch's hex dump
    pub fn marker(&self, reference_name: &str) -> String {
        match self {
            Self::Same => format!("\nSAME AS {}\n", reference_name),
            Self::Different => format!("\nDIFF WITH {}\n", reference_name),
            Self::NoReference => format!("\nNO {}\n", reference_name),
        }
    }
}

/// Read-only snapshot of one discovered GATT service
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GattService {
    pub uuid: Uuid,
    pub primary: bool,
    pub characteristics: Vec<GattCharacteristic>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GattCharacteristic {
    pub uuid: Uuid,
    /// Raw property bits (read, write, notify, ...)
    pub properties: u8,
    pub descriptors: Vec<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_action_tag() {
        let event = SessionEvent::DataAvailable {
            data: "75".to_string(),
            same: false,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["action"], "DATA_AVAILABLE");
        assert_eq!(json["data"], "75");
        assert_eq!(event.action(), "DATA_AVAILABLE");
        assert_eq!(
            serde_json::to_value(SessionEvent::GattServicesDiscovered).unwrap()["action"],
            "GATT_SERVICES_DISCOVERED"
        );
    }

    #[test]
    fn test_verdict_markers() {
        assert_eq!(
            ComparisonResult::Same.marker("cardiochek_ble"),
            "\nSAME AS cardiochek_ble\n"
        );
        assert_eq!(
            ComparisonResult::Different.marker("cardiochek_ble"),
            "\nDIFF WITH cardiochek_ble\n"
        );
        assert_eq!(
            ComparisonResult::NoReference.marker("cardiochek_ble"),
            "\nNO cardiochek_ble\n"
        );
    }
}
