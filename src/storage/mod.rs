pub mod memory;
pub mod persistence;
pub mod table;

pub use crate::core::RowId;
pub use memory::InMemoryStorage;
pub use persistence::{FileStateStore, MemoryStateStore, PersistedState, StateStore};
pub use table::{Table, TableSchema};
