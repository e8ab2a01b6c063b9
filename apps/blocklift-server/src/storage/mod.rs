//! Storage module for block-structured objects
//!
//! Objects are written by staging blocks under opaque ids and then
//! committing an ordered block list. Backends:
//! - S3-compatible stores (MinIO, Cloudflare R2, Backblaze B2, AWS S3)
//! - Local filesystem
//! - In-memory (tests and benchmarks)

mod block_store;
mod local;
pub mod memory;
mod s3_client;
mod types;

pub use block_store::BlockStore;
pub use local::LocalBlockStore;
pub use memory::MemoryBlockStore;
pub use s3_client::S3Client;
pub use types::*;
