pub mod core;
pub mod db;
pub mod features;
pub mod nlp;
pub mod scraping;
pub mod tools;

// --- Primary core exports ---
pub use core::types;
pub use core::types::*;
pub use core::AppState;

pub use db::Database;
pub use features::dedup_gate::{AdmitOutcome, DedupGate};
pub use nlp::task_extractor::TaskExtractor;
pub use scraping::selectors::{Resolution, Resolver, SelectorKey};
pub use tools::scan::{run_scan, ScanError, ScanReport, ScanRequest};
