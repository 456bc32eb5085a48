//! Background maintenance for a writable log.
//!
//! One thread per log performs implicit commits once the flush interval has
//! elapsed and runs the retention sweep every retention check interval. The
//! thread holds only a weak reference to the log and exits when the log is
//! released or dropped.

use crate::disk_log::Shared;
use crate::error::{ThlError, ThlResult};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Upper bound on the idle tick so shutdown stays prompt.
const MAX_TICK: Duration = Duration::from_secs(1);

/// Handle to the running maintenance thread.
#[derive(Debug)]
pub(crate) struct MaintenanceTask {
    stop: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl MaintenanceTask {
    /// Spawns the maintenance thread.
    pub(crate) fn start(shared: &Arc<Shared>) -> ThlResult<Self> {
        let (stop, stop_rx) = mpsc::channel();
        let weak = Arc::downgrade(shared);
        let tick = tick_interval(shared);

        let handle = thread::Builder::new()
            .name("thl-maintenance".to_string())
            .spawn(move || run(&weak, &stop_rx, tick))?;

        debug!(tick_ms = tick.as_millis() as u64, "started log maintenance");
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Signals the thread and waits for it to finish.
    pub(crate) fn stop(mut self) {
        // A send error only means the thread already exited.
        let _ = self.stop.send(());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("log maintenance thread panicked");
            }
        }
    }
}

fn tick_interval(shared: &Shared) -> Duration {
    let config = &shared.config;
    let mut tick = MAX_TICK;
    if !config.flush_interval.is_zero() {
        tick = tick.min(config.flush_interval);
    }
    if !config.retention.is_zero() {
        tick = tick.min(config.retention_check_interval);
    }
    tick.max(Duration::from_millis(1))
}

fn run(shared: &Weak<Shared>, stop: &mpsc::Receiver<()>, tick: Duration) {
    let mut last_sweep = Instant::now();

    loop {
        match stop.recv_timeout(tick) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
        let Some(shared) = shared.upgrade() else {
            break;
        };
        let config = &shared.config;

        if !config.flush_interval.is_zero() {
            if let Err(e) = shared.flush_if_due() {
                warn!(error = %e, "implicit commit failed");
            }
        }

        if !config.retention.is_zero() && last_sweep.elapsed() >= config.retention_check_interval
        {
            last_sweep = Instant::now();
            match shared.purge_expired() {
                Ok(0) => {}
                Ok(deleted) => info!(deleted, "retention sweep finished"),
                Err(ThlError::Busy { message }) => debug!(%message, "retention deferred"),
                Err(e) => warn!(error = %e, "retention sweep failed"),
            }
        }
    }

    debug!("log maintenance stopped");
}
