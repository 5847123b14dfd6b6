//! Domain layer: entity rows, commit payloads, change events and the store port.

pub mod models;
pub mod ports;
pub mod snapshot;

pub use models::*;
pub use ports::{FunctionFilter, RecordStore};
pub use snapshot::*;
