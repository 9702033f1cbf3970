//! GATT profile constants
//!
//! Identifiers and descriptor values for the characteristics the recorder
//! treats specially.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Heart Rate Measurement characteristic (0x2A37)
pub const HEART_RATE_MEASUREMENT_UUID: Uuid =
    Uuid::from_u128(0x00002a37_0000_1000_8000_00805f9b34fb);

/// Vendor data characteristic streaming the opaque transcript (0xFFF4)
pub const GENERIC_DATA_CHAR_UUID: Uuid = Uuid::from_u128(0x0000fff4_0000_1000_8000_00805f9b34fb);

/// Client Characteristic Configuration descriptor (0x2902)
pub const CLIENT_CHARACTERISTIC_CONFIG_UUID: Uuid =
    Uuid::from_u128(0x00002902_0000_1000_8000_00805f9b34fb);

/// CCCD value enabling notifications
pub const ENABLE_NOTIFICATION_VALUE: [u8; 2] = [0x01, 0x00];

/// Which descriptors of a characteristic get the enable-notification write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DescriptorScope {
    /// Every descriptor the characteristic exposes
    All,
    /// Only the Client Characteristic Configuration descriptor
    #[default]
    ClientConfig,
}

impl DescriptorScope {
    pub fn matches(&self, descriptor: &Uuid) -> bool {
        match self {
            Self::All => true,
            Self::ClientConfig => *descriptor == CLIENT_CHARACTERISTIC_CONFIG_UUID,
        }
    }
}

/// Characteristic needing explicit descriptor writes when notifications are enabled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorRule {
    pub characteristic: Uuid,
    pub scope: DescriptorScope,
}

pub fn default_descriptor_rules() -> Vec<DescriptorRule> {
    vec![
        DescriptorRule {
            characteristic: GENERIC_DATA_CHAR_UUID,
            scope: DescriptorScope::All,
        },
        DescriptorRule {
            characteristic: HEART_RATE_MEASUREMENT_UUID,
            scope: DescriptorScope::ClientConfig,
        },
    ]
}

/// Parse a UUID string, accepting 16-bit short forms ("2a37") as SIG UUIDs
pub fn parse_uuid(uuid_str: &str) -> Result<Uuid> {
    let trimmed = uuid_str.trim();
    if trimmed.len() == 4 {
        let short = u16::from_str_radix(trimmed, 16)?;
        return Ok(sig_uuid(short));
    }
    Ok(Uuid::parse_str(trimmed)?)
}

/// Expand a 16-bit assigned number onto the Bluetooth base UUID
pub const fn sig_uuid(short: u16) -> Uuid {
    Uuid::from_u128(((short as u128) << 96) | 0x0000_0000_0000_1000_8000_00805f9b34fb)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_uuid() {
        let uuid = parse_uuid("00002a37-0000-1000-8000-00805f9b34fb").unwrap();
        assert_eq!(uuid, HEART_RATE_MEASUREMENT_UUID);
        assert_eq!(parse_uuid("fff4").unwrap(), GENERIC_DATA_CHAR_UUID);
        assert_eq!(sig_uuid(0x2902), CLIENT_CHARACTERISTIC_CONFIG_UUID);
        assert!(parse_uuid("xyz").is_err());
    }

    #[test]
    fn test_descriptor_scope() {
        let other = sig_uuid(0x2901);
        assert!(DescriptorScope::All.matches(&other));
        assert!(!DescriptorScope::ClientConfig.matches(&other));
        assert!(DescriptorScope::ClientConfig.matches(&CLIENT_CHARACTERISTIC_CONFIG_UUID));
    }
}
