//! State synchronization and stream configuration for a fleet of camera
//! devices managed by a remote backend.
//!
//! The [`sync::SyncEngine`] actor owns the [`registry::DeviceRegistry`] and
//! applies snapshots, push events and local operator edits in arrival order.
//! The [`api`] module is the HTTP seam; [`device`], [`stream`] and
//! [`pairing`] hold the data model and the cross-device invariants.

pub mod api;
pub mod device;
pub mod pairing;
pub mod registry;
pub mod stream;
pub mod sync;

pub use api::{ApiClient, Backend};
pub use registry::DeviceRegistry;
pub use sync::{Edit, EngineHandle, Event, Notice, SyncEngine};
