//! Public types for the push client session.

use std::io::Read;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One queued file-push request.
///
/// The request is created by the embedder; the controller holds at most one
/// at a time and stamps `status` as the transfer progresses.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    /// Opaque identity, used as the key for store updates.
    pub id: Uuid,
    /// Locator for the file to send, resolved by a [`FileResolver`](crate::FileResolver).
    pub source: String,
    /// Address of the destination peer, e.g. "AA:BB:CC:DD:EE:FF".
    pub destination: String,
    /// Current status; terminal once the transfer finishes.
    pub status: TransferStatus,
}

impl TransferRequest {
    /// Creates a pending request with a fresh id.
    pub fn new(source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            source: source.into(),
            destination: destination.into(),
            status: TransferStatus::Pending,
        }
    }
}

/// A resolved, readable file: what the engine actually sends.
///
/// Exists for the duration of one engine invocation; the stream is closed
/// (dropped) on every exit path.
pub struct FileDescriptor {
    pub name: String,
    pub length: u64,
    pub mime_type: String,
    pub stream: Box<dyn Read + Send>,
}

impl std::fmt::Debug for FileDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileDescriptor")
            .field("name", &self.name)
            .field("length", &self.length)
            .field("mime_type", &self.mime_type)
            .finish_non_exhaustive()
    }
}

/// Terminal outcome of one transfer. Produced exactly once per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    Success,
    ConnectionError,
    ObexDataError,
    Forbidden,
    NotAcceptable,
    UnhandledProtocolCode,
    Canceled,
}

/// Transfer status as persisted to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferStatus {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "running")]
    Running,
    #[serde(rename = "success")]
    Success,
    #[serde(rename = "connection_error")]
    ConnectionError,
    #[serde(rename = "obex_data_error")]
    ObexDataError,
    #[serde(rename = "forbidden")]
    Forbidden,
    #[serde(rename = "not_acceptable")]
    NotAcceptable,
    #[serde(rename = "unhandled_obex_code")]
    UnhandledProtocolCode,
    #[serde(rename = "canceled")]
    Canceled,
}

impl From<TransferOutcome> for TransferStatus {
    fn from(outcome: TransferOutcome) -> Self {
        match outcome {
            TransferOutcome::Success => TransferStatus::Success,
            TransferOutcome::ConnectionError => TransferStatus::ConnectionError,
            TransferOutcome::ObexDataError => TransferStatus::ObexDataError,
            TransferOutcome::Forbidden => TransferStatus::Forbidden,
            TransferOutcome::NotAcceptable => TransferStatus::NotAcceptable,
            TransferOutcome::UnhandledProtocolCode => TransferStatus::UnhandledProtocolCode,
            TransferOutcome::Canceled => TransferStatus::Canceled,
        }
    }
}

/// Events delivered on the callback channel.
///
/// Exactly one of `ShareComplete`/`SessionError` is emitted per finished
/// transfer; `SessionComplete` is emitted exactly once, at worker shutdown.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A transfer finished successfully.
    ShareComplete(TransferRequest),
    /// A transfer finished with a terminal failure (status stamped).
    SessionError(TransferRequest),
    /// Cancellation interrupted a worker blocked on the remote.
    ShareInterrupted(Option<TransferRequest>),
    /// The first-packet watchdog fired; handled by the embedder.
    ConnectTimeout,
    /// The worker exited, carrying the last-processed request.
    SessionComplete(Option<TransferRequest>),
}

/// Sender half of the callback channel.
pub type EventSender = std::sync::mpsc::Sender<SessionEvent>;

/// Connection/transfer lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    Sending,
    Disconnecting,
    Stopped,
}

impl SessionState {
    /// True if `next` is a legal successor of `self`.
    pub fn can_transition(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Connecting)
                | (Idle, Disconnecting)
                | (Connecting, Connected)
                | (Connecting, Idle)
                | (Connecting, Disconnecting)
                | (Connected, Sending)
                | (Connected, Disconnecting)
                | (Sending, Connected)
                | (Sending, Disconnecting)
                | (Disconnecting, Stopped)
        )
    }

    /// Moves to `next`, logging any illegal edge instead of panicking.
    pub(crate) fn transition(&mut self, next: SessionState) {
        if !self.can_transition(next) {
            tracing::warn!(from = ?self, to = ?next, "illegal session state transition");
        }
        *self = next;
    }
}

/// Single Response Mode status negotiated for the current operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SrmState {
    /// SRM confirmed by both sides.
    pub enabled: bool,
    /// Peer asked us to wait for one response before continuing (SRMP).
    pub wait: bool,
}

/// Per-connection negotiated parameters.
///
/// Lives for the connection's lifetime; mutated only by the engine during
/// SRM negotiation.
#[derive(Debug, Clone, Copy)]
pub struct NegotiatedCapabilities {
    /// Maximum OBEX packet size, possibly reduced under audio-link
    /// contention.
    pub max_packet_size: usize,
    pub srm: SrmState,
}

/// Count of bytes acknowledged as sent for the current file.
///
/// Shared between the engine (writer) and the progress reporter (reader);
/// word-sized atomic so it is never read torn. Reset to zero at the start
/// of each file.
#[derive(Debug, Clone, Default)]
pub struct Position(Arc<AtomicU64>);

impl Position {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    pub fn set(&self, value: u64) {
        self.0.store(value, Ordering::Release);
    }

    pub fn advance(&self, bytes: u64) {
        self.0.fetch_add(bytes, Ordering::AcqRel);
    }
}

/// Tunable timings and sizes for a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Idle poll interval of the worker loop when no transfer is pending.
    pub poll_interval: Duration,
    /// Watchdog timeout armed around the first blocking chunk write.
    pub connect_timeout: Duration,
    /// Progress reporter publish interval.
    pub progress_interval: Duration,
    /// Packet size clamp applied while an audio link is active.
    pub reduced_audio_mtu: usize,
    /// Pause before retrying a transiently failed chunk write.
    pub write_retry_pause: Duration,
    /// Settle delay before the initial connect attempt.
    pub connect_settle: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            connect_timeout: Duration::from_secs(50),
            progress_interval: Duration::from_secs(1),
            reduced_audio_mtu: 8192,
            write_retry_pause: Duration::from_millis(10),
            connect_settle: Duration::from_millis(100),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_starts_pending_with_unique_ids() {
        let a = TransferRequest::new("content://1", "00:11:22:33:44:55");
        let b = TransferRequest::new("content://2", "00:11:22:33:44:55");
        assert_eq!(a.status, TransferStatus::Pending);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn outcome_maps_to_status() {
        assert_eq!(
            TransferStatus::from(TransferOutcome::Success),
            TransferStatus::Success
        );
        assert_eq!(
            TransferStatus::from(TransferOutcome::UnhandledProtocolCode),
            TransferStatus::UnhandledProtocolCode
        );
    }

    #[test]
    fn status_serialization() {
        assert_eq!(
            serde_json::to_string(&TransferStatus::ObexDataError).unwrap(),
            "\"obex_data_error\""
        );
        assert_eq!(
            serde_json::to_string(&TransferStatus::Running).unwrap(),
            "\"running\""
        );
    }

    #[test]
    fn state_machine_legal_edges() {
        use SessionState::*;
        assert!(Idle.can_transition(Connecting));
        assert!(Connecting.can_transition(Connected));
        assert!(Connecting.can_transition(Idle)); // handshake failed
        assert!(Connected.can_transition(Sending));
        assert!(Sending.can_transition(Connected));
        assert!(Sending.can_transition(Disconnecting));
        assert!(Disconnecting.can_transition(Stopped));
    }

    #[test]
    fn state_machine_illegal_edges() {
        use SessionState::*;
        assert!(!Idle.can_transition(Sending));
        assert!(!Stopped.can_transition(Connecting));
        assert!(!Connected.can_transition(Connecting));
        assert!(!Sending.can_transition(Idle));
    }

    #[test]
    fn position_is_shared() {
        let p = Position::new();
        let p2 = p.clone();
        p.advance(100);
        p.advance(50);
        assert_eq!(p2.get(), 150);
        p.set(0);
        assert_eq!(p2.get(), 0);
    }

    #[test]
    fn config_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert_eq!(config.connect_timeout, Duration::from_secs(50));
        assert_eq!(config.reduced_audio_mtu, 8192);
    }
}
