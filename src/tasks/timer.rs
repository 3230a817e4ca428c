//! Sweep Timer
//!
//! One-shot, re-armable timer that runs a bucket's leak check once the next
//! entry falls due.
//!
//! Timers run on a small tokio runtime owned by this crate, so buckets work the
//! same from plain threads and from inside a host's own runtime. The runtime is
//! started lazily on first use and lives for the rest of the process.

use std::sync::OnceLock;
use std::time::Duration;

use tokio::runtime::{Builder, Runtime};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::config::Config;

static TIMER_RUNTIME: OnceLock<Runtime> = OnceLock::new();

/// Sizes the shared timer runtime from `config`.
///
/// Only effective before any timer has been armed.
///
/// # Returns
/// `true` if the runtime was started with this configuration, `false` if it
/// was already running.
pub fn configure_timer_runtime(config: &Config) -> bool {
    let mut started = false;
    TIMER_RUNTIME.get_or_init(|| {
        started = true;
        build_runtime(config.timer_threads)
    });
    started
}

fn runtime() -> &'static Runtime {
    TIMER_RUNTIME.get_or_init(|| build_runtime(Config::default().timer_threads))
}

fn build_runtime(threads: usize) -> Runtime {
    debug!(threads, "Starting sweep timer runtime");
    Builder::new_multi_thread()
        .worker_threads(threads.max(1))
        .thread_name("slidecache-timer")
        .enable_time()
        .build()
        .expect("Failed to start sweep timer runtime")
}

// == Sweep Timer ==
/// Holds at most one pending timer.
///
/// Arming always replaces the previous timer, and dropping the `SweepTimer`
/// cancels whatever is pending.
#[derive(Debug, Default)]
pub struct SweepTimer {
    pending: Option<JoinHandle<()>>,
}

impl SweepTimer {
    pub fn new() -> Self {
        Self::default()
    }

    // == Arm ==
    /// Schedules `job` to run once after `delay`, cancelling any pending timer.
    ///
    /// The job runs on a blocking-pool thread, never on the thread that armed
    /// it, so it is free to take locks and call user code.
    pub fn arm<F>(&mut self, delay: Duration, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.cancel();
        trace!(?delay, "Arming sweep timer");

        let handle = runtime().spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(err) = tokio::task::spawn_blocking(job).await {
                if err.is_panic() {
                    warn!("Sweep job panicked: {}", err);
                }
            }
        });
        self.pending = Some(handle);
    }

    // == Cancel ==
    /// Cancels the pending timer, if any.
    ///
    /// A job that has already started keeps running to completion.
    pub fn cancel(&mut self) -> bool {
        match self.pending.take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Returns true while a timer is waiting to fire.
    pub fn is_armed(&self) -> bool {
        self.pending
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for SweepTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
