pub mod backend;
pub mod config;
pub mod credentials;
pub mod dispatch;
pub mod errors;
pub mod execution;
pub mod iac;
pub mod job;
pub mod locking;
pub mod logging;
pub mod policy;
pub mod reporting;
pub mod runs;
pub mod scheduler;
pub mod settings;
pub mod storage;
pub mod summary;
pub mod vcs;

#[cfg(test)]
pub(crate) mod testing;
