pub mod browser_manager;
pub mod browser_session;
pub mod cdp_driver;
pub mod driver;
pub mod message_extractor;
pub mod navigator;
pub mod selectors;
