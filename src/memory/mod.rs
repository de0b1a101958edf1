pub mod generator;
pub mod manager;
pub mod store;
pub mod types;

pub use generator::{FallbackKind, ModelNames, ResponseGenerator};
pub use manager::{MemoryManager, MemorySettings};
pub use store::{InMemoryStore, MemoryStore, SqliteStore};
pub use types::{MemoryRecord, ModelVariant, Turn};
