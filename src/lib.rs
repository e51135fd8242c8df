//! Label Relay — incremental CSV ingest, clean, and grouped export.

pub mod channels;
pub mod config;
pub mod error;
pub mod extract;
pub mod lock;
pub mod pipeline;
pub mod store;
pub mod table;
pub mod testing;
