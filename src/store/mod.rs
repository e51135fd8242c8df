//! Persistence layer: named tabular grids behind the `TableStore` trait.

pub mod dedup;
pub mod libsql_backend;
pub mod memory;
pub mod migrations;
pub mod traits;

pub use dedup::{DedupReport, remove_duplicates};
pub use libsql_backend::LibSqlTableStore;
pub use memory::MemoryTableStore;
pub use traits::{CellUpdate, TableStore};
