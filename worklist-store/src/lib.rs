pub mod error;
pub mod memory_store;
pub mod panel_store;
pub mod sqlite_store;

pub use error::{Result, StoreError};
pub use memory_store::MemoryStore;
pub use panel_store::PanelStore;
pub use sqlite_store::SqliteStore;
