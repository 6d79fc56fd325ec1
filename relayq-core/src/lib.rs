/// Core types for the RelayQ offline request queue
///
/// Shared leaf types, the error taxonomy, and the payload integrity layer.
/// The queue store and synchronization engine live in `relayq-sync`.

pub mod error;
pub mod integrity;
pub mod types;

pub use error::{Error, Result};
pub use types::*;
