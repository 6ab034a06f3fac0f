//! Persistence Repository: a polymorphic store over `ServerConfig`,
//! `ServerInstance`, `LogEntry`, and `LlmModel`, with an in-memory backend
//! (always available) and a durable SQLite backend (`sqlite` feature).

pub mod error;
pub mod log_buffer;
pub mod memory;
pub mod repository;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod types;

pub use {
    error::{Context, Error, Result},
    log_buffer::{BufferedLogWriter, LogBufferStats},
    memory::InMemoryRepository,
    repository::Repository,
};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteRepository;
