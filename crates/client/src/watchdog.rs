//! Connection-timeout watchdog for the first blocking chunk write.
//!
//! Armed immediately before the first chunk is written and disarmed right
//! after, regardless of outcome. If it fires, a
//! [`SessionEvent::ConnectTimeout`] is posted on the callback channel; the
//! engine itself takes no recovery action.

use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::types::{EventSender, SessionEvent};

pub(crate) struct Watchdog {
    events: EventSender,
    // Generation counter: arm bumps it and captures the value; disarm bumps
    // it again so a pending timer never fires late.
    state: Arc<(Mutex<u64>, Condvar)>,
}

impl Watchdog {
    pub(crate) fn new(events: EventSender) -> Self {
        Self {
            events,
            state: Arc::new((Mutex::new(0), Condvar::new())),
        }
    }

    /// Arms the watchdog. Any previously armed timer is superseded.
    pub(crate) fn arm(&self, timeout: Duration) {
        let generation = {
            let (lock, _) = &*self.state;
            let mut gen = lock.lock().unwrap();
            *gen += 1;
            *gen
        };

        let state = Arc::clone(&self.state);
        let events = self.events.clone();
        thread::Builder::new()
            .name("obex-watchdog".into())
            .spawn(move || {
                let (lock, cvar) = &*state;
                let deadline = Instant::now() + timeout;
                let mut gen = lock.lock().unwrap();
                while *gen == generation {
                    let now = Instant::now();
                    if now >= deadline {
                        drop(gen);
                        tracing::warn!("connection watchdog fired");
                        let _ = events.send(SessionEvent::ConnectTimeout);
                        return;
                    }
                    let (guard, _) = cvar.wait_timeout(gen, deadline - now).unwrap();
                    gen = guard;
                }
                // Disarmed or re-armed; nothing to do.
            })
            .expect("failed to spawn watchdog thread");
    }

    /// Disarms any pending timer. Safe to call when none is armed.
    pub(crate) fn disarm(&self) {
        let (lock, cvar) = &*self.state;
        let mut gen = lock.lock().unwrap();
        *gen += 1;
        cvar.notify_all();
    }
}
