//! Ports - the seams between the scheduler and the outside world.
//!
//! - `TaskStore`: durable task state (source of truth)
//! - `ComputeEngine` / `BlockingEngine` / `ItemEngine`: the compute engine
//! - `ResultSink`: consumer of successful results
//! - `Clock`, `IdGenerator`: time and ids, swappable in tests

pub mod clock;
pub mod engine;
pub mod id_generator;
pub mod result_sink;
pub mod task_store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::engine::{BlockingEngine, ComputeEngine, Engine, ItemEngine};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::result_sink::{ResultDestination, ResultSink};
pub use self::task_store::TaskStore;
