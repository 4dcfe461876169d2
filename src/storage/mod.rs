//! Custody storage
//!
//! Repository traits plus two backends: an in-memory store for tests and
//! throwaway runs, and a sled store for a station server.

pub mod catalog;
pub mod memory;
pub mod persistence;
pub mod sled_store;

pub use catalog::{CatalogError, CatalogImport, CatalogImportStats, CatalogSeed, ToolSetRecord};
pub use memory::InMemoryStore;
pub use persistence::{
    entity, Repositories, RoleRepository, ScanDetailRepository, ScanRepository, StoreError,
    ToolSetRepository, TransactionRepository, TransactionResolutionRepository, UserRepository,
};
pub use sled_store::SledStore;
