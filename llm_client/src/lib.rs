//! Provider wire formats and upstream streaming clients for the gateway.
//! The common request shape lives in `clients::types`, the per-provider
//! adapters in `format`, and the upstream callers in `clients`.

pub mod broker;
pub mod clients;
pub mod fim;
pub mod format;
pub mod provider;
