pub mod config;
pub mod credential_store;
pub mod error;
pub mod log_store;
pub mod plan_store;
pub mod session_store;
pub mod storage;
