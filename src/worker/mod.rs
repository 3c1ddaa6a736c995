//! The worker loop and shutdown plumbing

mod runner;
mod shutdown;

pub use runner::{backoff_delay, WorkerLoop};
pub use shutdown::ShutdownFlag;
