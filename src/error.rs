//! Crate error type for fallible public operations.
//!
//! Injected hook failures intentionally do NOT flow through this type:
//! they are caught at their call site, logged, and degraded to a
//! rejection/no-op for that one operation.

/// Errors surfaced by the library's own fallible operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The broker rejected or failed a publish.
    #[error("broker publish failed: {0}")]
    BrokerPublish(String),

    /// The broker subscription could not be established or was closed.
    #[error("broker subscription unavailable: {0}")]
    BrokerSubscribe(String),

    /// Key-exchange material was missing or malformed.
    #[error("invalid key material: {0}")]
    KeyMaterial(String),
}
