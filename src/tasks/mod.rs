//! Conversion task lifecycle: store, runner, sweeper, and the operations surface.

pub mod model;
pub mod runner;
pub mod service;
pub mod store;
pub mod sweeper;

pub use model::{ProgressReport, Task, TaskId, TaskStatus, TaskUpdate};
pub use runner::ConversionRunner;
pub use service::TaskService;
pub use store::TaskStore;
pub use sweeper::Sweeper;
