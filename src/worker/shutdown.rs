//! Cooperative shutdown signalling
//!
//! A shared flag tripped by Ctrl-C (or programmatically in tests). The
//! worker loop checks it between jobs and races in-flight jobs against it
//! plus a grace window.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Default)]
pub struct ShutdownFlag {
    flag: Arc<AtomicBool>,
}

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Spawns a task that trips the flag when Ctrl-C arrives
    pub fn listen_for_ctrl_c(&self) {
        let flag = self.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Shutdown signal received, finishing current job");
                flag.trigger();
            }
        });
    }

    /// Resolves once the flag is set
    pub async fn wait(&self) {
        while !self.is_set() {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Resolves once the flag is set and the grace window has elapsed.
    ///
    /// Raced against an in-flight job: if the job finishes first this
    /// future is dropped, otherwise the job gets force-requeued.
    pub async fn wait_past_grace(&self, grace: Duration) {
        self.wait().await;
        tokio::time::sleep(grace).await;
    }
}
