//! Durable storage for service records

pub mod error;
pub mod service_repository;

pub use error::{StorageError, StorageResult};
pub use service_repository::{FileServiceRepository, ServiceRepository};
