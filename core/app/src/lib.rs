//! Application wiring for VeilVault.
//!
//! - [`Services`]: the composition root owning the cipher engine, provider
//!   registry and task queue
//! - [`AppConfig`]: JSON configuration with defaults for every field
//! - Task builders that wrap vault file operations for the queue
//! - Tracing initialisation

pub mod config;
pub mod logging;
pub mod operations;
pub mod services;

pub use config::AppConfig;
pub use logging::init_tracing;
pub use operations::{
    create_folder_task, delete_task, download_task, upload_task, ByteSource, FileSource,
    MemorySource,
};
pub use services::{Account, Services};
