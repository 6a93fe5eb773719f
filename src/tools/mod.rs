pub mod background_scanner;
pub mod diagnose;
pub mod scan;
