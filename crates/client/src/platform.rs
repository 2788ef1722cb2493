//! Host platform services seam.
//!
//! The worker needs three things from the host: a wake lock spanning its
//! main loop, the display state (progress writes are skipped while the
//! screen is off), and whether an audio link is currently active (the OBEX
//! packet size is reduced to avoid starving it).

/// Platform probes and resources supplied by the embedder.
pub trait HostServices: Send + Sync {
    fn acquire_wake_lock(&self) {}
    fn release_wake_lock(&self) {}

    /// True if the display is on; gates periodic progress writes.
    fn is_display_on(&self) -> bool {
        true
    }

    /// True if an audio link shares the radio with this connection.
    fn is_audio_link_active(&self) -> bool {
        false
    }
}

/// Default implementation for hosts without power or audio concerns.
pub struct NullHostServices;

impl HostServices for NullHostServices {}

/// Scoped wake lock: acquired on construction, released on drop.
pub(crate) struct WakeLockGuard<'a> {
    host: &'a dyn HostServices,
}

impl<'a> WakeLockGuard<'a> {
    pub(crate) fn new(host: &'a dyn HostServices) -> Self {
        tracing::debug!("acquiring wake lock");
        host.acquire_wake_lock();
        Self { host }
    }
}

impl Drop for WakeLockGuard<'_> {
    fn drop(&mut self) {
        tracing::debug!("releasing wake lock");
        self.host.release_wake_lock();
    }
}
