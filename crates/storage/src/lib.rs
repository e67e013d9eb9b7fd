pub mod actors;
pub mod db;
pub mod repositories;

pub use actors::storage_writer::{StorageCommand, StorageSink, StorageWriter};
pub use db::StorageError;
