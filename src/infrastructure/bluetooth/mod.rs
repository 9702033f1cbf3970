//! Bluetooth Module
//!
//! Runs the GATT session with one peripheral.
//!
//! ## Architecture
//!
//! ```text
//!        transport callbacks (any thread)
//!                    │  LinkEvent { link, event }
//!                    ▼
//! ┌──────────────────────────────────────────┐
//! │                BleSession                │
//! │  state machine ─ decoder ─ aggregation   │
//! └───────┬───────────────────────┬──────────┘
//!         │ quiet period elapsed  │ SessionEvent
//!         ▼                       ▼
//!  ┌────────────┐          ┌──────────────┐
//!  │  Recorder  │          │   Observer   │
//!  └────────────┘          └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - GATT identifiers and descriptor write rules
//! - [`transport`] - Boundary traits over the host radio stack
//! - [`session`] - Connection lifecycle and notification pipeline
//! - [`tasks`] - Connect attempt and watcher tasks of one link
//! - `btleplug_backend` - Transport over btleplug (feature `btleplug`)

mod observer;
pub mod protocol;
pub mod session;
pub mod tasks;
pub mod transport;

#[cfg(feature = "btleplug")]
pub mod btleplug_backend;

#[cfg(test)]
pub mod mock;

pub use observer::{ChannelObserver, SessionObserver};
pub use session::BleSession;
