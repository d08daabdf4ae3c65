//! Run lifecycle: a persisted per-project queue of plan/approve/apply runs,
//! advanced by a periodic poller that triggers CI for each stage.

pub mod ci;
pub mod machine;
pub mod model;
pub mod poller;
pub mod store;

pub use ci::{CiBackend, GithubActionsCi};
pub use machine::{Effect, Transition, awaited_stage, transition};
pub use model::{BatchOutcome, NewRun, Run, RunQueueItem, RunStage, RunStatus, StageKind};
pub use poller::{RunQueue, RunQueuePoller};
pub use store::{QueueHead, RunListing, RunStore, SqliteRunStore};
