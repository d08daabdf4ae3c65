//! Stage execution for a single project, optionally guarded by the project lock.

mod executor;
mod locking;
mod plan_path;

pub use executor::{ApplyResult, Executor, PlanResult, ProjectExecutor};
pub use locking::LockingExecutor;
pub use plan_path::PlanPathProvider;
