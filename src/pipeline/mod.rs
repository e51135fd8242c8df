//! The incremental ingest → clean → export pipeline.
//!
//! Data flows one way:
//! 1. `Ingestor`: source attachments into the raw table
//! 2. `Cleaner`: unprocessed raw rows, enriched and deduplicated, into the
//!    clean table
//! 3. `Exporter`: the clean table, grouped by sender, out through delivery
//!    and into the mail log
//!
//! `Pipeline` sequences the three under the run lock.

pub mod clean;
pub mod export;
pub mod ingest;
pub mod orchestrator;
pub mod types;

pub use clean::Cleaner;
pub use export::Exporter;
pub use ingest::Ingestor;
pub use orchestrator::Pipeline;
pub use types::{
    CheckReport, CleanReport, DispatchStatus, ExportReport, GroupOutcome, IngestReport, RunReport,
};
