pub mod error;
pub mod remote;
pub mod services;
pub mod sources;
pub mod traits;

pub use error::SourceError;
pub use services::producer_pool::{ProducerPool, ScanReport};
pub use sources::{Producer, SourceConfig};
