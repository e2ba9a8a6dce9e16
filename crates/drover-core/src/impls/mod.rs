//! Adapters for the ports.

pub mod fan_out;
pub mod memory;
pub mod sqlite;

pub use self::fan_out::{FanOutEngine, FanOutOptions};
pub use self::memory::InMemoryTaskStore;
pub use self::sqlite::{SqliteTaskStore, TaskDatabase};
