//! Session lifecycle and commit orchestration for vibe-git.
//!
//! A session moves between `Idle`, `Vibing` and `Dirty`. While vibing, a
//! file watcher debounces change bursts into auto-commits on an isolated
//! branch; `stop` squashes them into one commit, rebases onto the trunk,
//! pushes, and opens a pull request.

pub mod commit;
pub mod config;
pub mod engine;
pub mod error;
pub mod finalize;
pub mod gateway;
pub mod persistence;
pub mod probe;
pub mod session;
pub mod watcher;

pub use engine::{StopReport, VibeEngine};
pub use error::{Result, VibeError};
