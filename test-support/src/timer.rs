//! Deterministic timer for driving the publish loop.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use workmgrd::publish_loop::Timer;

#[derive(Debug)]
struct Inner {
    sleeps: Mutex<Vec<Duration>>,
    cycles: usize,
    shutdown: watch::Sender<()>,
}

/// Timer whose waits finish instantly until a set number of cycles has run.
///
/// Each wait is recorded. The wait following the last permitted cycle fires
/// the shutdown signal and never completes, so the loop exits through its
/// cancellation path.
#[derive(Debug, Clone)]
pub struct ScriptedTimer {
    inner: Arc<Inner>,
}

impl ScriptedTimer {
    /// Allow `cycles` cycles, then shut down.
    ///
    /// Returns the timer and the shutdown receiver to hand to the loop.
    #[must_use]
    pub fn stop_after(cycles: usize) -> (Self, watch::Receiver<()>) {
        let (shutdown, rx) = watch::channel(());
        let timer = Self {
            inner: Arc::new(Inner {
                sleeps: Mutex::new(Vec::new()),
                cycles,
                shutdown,
            }),
        };
        (timer, rx)
    }

    /// Durations requested so far, one per finished cycle.
    #[must_use]
    pub fn sleeps(&self) -> Vec<Duration> {
        self.inner
            .sleeps
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl Timer for ScriptedTimer {
    fn sleep(&self, period: Duration) -> impl Future<Output = ()> + Send {
        let count = {
            let mut sleeps = self
                .inner
                .sleeps
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            sleeps.push(period);
            sleeps.len()
        };
        let inner = Arc::clone(&self.inner);
        async move {
            if count >= inner.cycles {
                let _ = inner.shutdown.send(());
                std::future::pending::<()>().await;
            }
        }
    }
}
