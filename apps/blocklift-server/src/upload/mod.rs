//! Resumable Block Upload Module
//!
//! Uploads large local files to a block store:
//! - Fixed-size chunks staged as individually addressable blocks
//! - Per-block retry with exponential backoff
//! - Durable resume records so an interrupted upload continues where it stopped
//! - A shared progress registry readable while uploads run
//!
//! Upload Flow:
//! 1. Check the file size against the configured ceiling
//! 2. Load any resume record and seek past the already staged bytes
//! 3. Stage each remaining chunk, persisting the record after every block
//! 4. Commit the ordered block list, then clear the record

pub mod engine;
pub mod progress;
pub mod resume;
pub mod types;

pub use engine::{UploadEngine, DEFAULT_BACKOFF_UNIT};
pub use progress::ProgressRegistry;
pub use resume::{
    FileResumeStore, ResumeError, ResumePhase, ResumeRecord, ResumeStore, ResumeUpdate,
    SqliteResumeStore,
};
pub use types::*;
