pub mod dedup_gate;
pub mod demo_tasks;
pub mod export_import;
