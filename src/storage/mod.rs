pub mod engine;
pub mod memory;
pub mod persistence;
pub mod table;

pub use engine::CounterStore;
pub use memory::MemoryCounterStore;
pub use persistence::{DurabilityMode, PersistenceManager, WalEntry};
pub use table::CounterTable;
