//! Blocklift Server Library
//!
//! Resumable block uploads to S3-compatible object stores. The server
//! binary is in main.rs; benchmarks and integration tests use the
//! modules exported here.
//!
//! # Modules
//!
//! - `upload`: Upload engine, resume-state stores and progress registry
//! - `storage`: Block store trait and its S3, local and in-memory backends
//! - `routes`: HTTP endpoints

pub mod config;
pub mod db;
pub mod error;
pub mod routes;
pub mod state;
pub mod storage;
pub mod upload;

pub use routes::create_router;
pub use state::AppState;
