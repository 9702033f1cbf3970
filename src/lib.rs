//! GATT notification recorder
//!
//! Manages a session with one BLE peripheral, decodes characteristic
//! notifications, batches opaque payloads behind a trailing debounce and
//! compares every batch against a known-good reference transcript.

pub mod domain;
pub mod error;
pub mod infrastructure;

pub use domain::models::{ComparisonResult, ConnectionState, SessionEvent};
pub use domain::settings::{SessionConfig, Settings, SettingsService};
pub use error::{SessionError, StorageError};
pub use infrastructure::bluetooth::{BleSession, ChannelObserver, SessionObserver};
pub use infrastructure::storage::{ExternalStorage, FsStorage};
