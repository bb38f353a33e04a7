//! Storage layer - the disk-facing contract and page space management.
//!
//! - [`PageStore`] - The injected page store contract
//! - [`MemoryPageStore`] - Simulated disk backed by a map
//! - [`DiskManager`] - File-backed page store
//! - [`FreeList`] - Page id allocation and recycling
//! - [`page`] - Page types and layouts

mod disk_manager;
mod free_list;
pub mod page;
mod page_store;

pub use disk_manager::DiskManager;
pub use free_list::{FreeList, PageCompaction};
pub use page_store::{MemoryPageStore, PageStore};
