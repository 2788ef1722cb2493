//! Background progress reporter for one active transfer.
//!
//! Publishes the shared [`Position`] to the store on a fixed interval while
//! the display is on; writes are skipped while the screen is off to avoid
//! needless store churn. Stopping is synchronous: the owner signals
//! cancellation, waits for the thread to exit, and only then performs its
//! own final exact-position update, so stale and fresh values can never be
//! written out of order.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::debug;
use uuid::Uuid;

use crate::platform::HostServices;
use crate::store::TransferStore;
use crate::types::Position;

pub struct ProgressReporter {
    handle: JoinHandle<()>,
    stop: Arc<(Mutex<bool>, Condvar)>,
}

impl ProgressReporter {
    /// Spawns the reporter thread for the transfer identified by `id`.
    pub fn start(
        store: Arc<dyn TransferStore>,
        host: Arc<dyn HostServices>,
        id: Uuid,
        position: Position,
        interval: Duration,
    ) -> Self {
        let stop = Arc::new((Mutex::new(false), Condvar::new()));
        let stop_flag = Arc::clone(&stop);

        let handle = thread::Builder::new()
            .name("obex-progress".into())
            .spawn(move || {
                debug!(id = %id, "progress reporter started");
                loop {
                    if host.is_display_on() {
                        store.update_progress(id, position.get());
                    }

                    // Check cancellation before sleeping so a stop request
                    // never costs one extra interval.
                    let (lock, cvar) = &*stop_flag;
                    let stopped = lock.lock().unwrap();
                    if *stopped {
                        debug!(id = %id, "progress reporter stopped before sleep");
                        return;
                    }
                    let (stopped, _) = cvar.wait_timeout(stopped, interval).unwrap();
                    if *stopped {
                        debug!(id = %id, "progress reporter stopped");
                        return;
                    }
                }
            })
            .expect("failed to spawn progress reporter thread");

        Self { handle, stop }
    }

    /// Signals cancellation and waits for the reporter thread to exit.
    pub fn stop_and_join(self) {
        {
            let (lock, cvar) = &*self.stop;
            *lock.lock().unwrap() = true;
            cvar.notify_all();
        }
        let _ = self.handle.join();
    }
}
