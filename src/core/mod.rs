pub mod app_state;
pub mod chat_time;
pub mod config;
pub mod types;

pub use app_state::AppState;
