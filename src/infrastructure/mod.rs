pub mod config;
pub mod entry_repository;
pub mod error;
pub mod logging;
pub mod mapping_cache;
pub mod remote_client;
pub mod remote_status;
pub mod session_store;
pub mod storage;
