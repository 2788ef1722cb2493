//! OBEX object-push client session.
//!
//! This crate implements the **client side** of an OBEX file-push session:
//! it owns one connection to a remote peer, sends queued files one at a time
//! as chunked PUT operations with Single Response Mode negotiation, reports
//! progress to a durable store, and bridges results to an embedder-supplied
//! callback channel. It is a library crate with no socket or UI code — the
//! embedder provides [`ObexTransport`], [`TransferStore`], [`FileResolver`]
//! and [`HostServices`] implementations.
//!
//! # Lifecycle
//!
//! 1. **Start** — spawn the worker, connect once, announcing the share count
//! 2. **Enqueue** — hand over the next transfer (depth-1 slot)
//! 3. **Send** — chunked PUT with SRM negotiation and progress reporting
//! 4. **Stop** — cooperative cancellation; a blocked worker is unblocked by
//!    force-closing the transport

pub mod engine;
pub mod error;
pub mod platform;
pub mod progress;
pub mod quirks;
pub mod resolver;
pub mod session;
pub mod store;
pub mod transport;
pub mod types;

mod watchdog;

// Re-export primary types for convenience.
pub use engine::TransferEngine;
pub use error::SendError;
pub use platform::{HostServices, NullHostServices};
pub use progress::ProgressReporter;
pub use resolver::{FileResolver, PathResolver, ResolveError};
pub use session::{SessionController, SharedControl};
pub use store::{MemoryStore, ProgressRecord, TransferStore};
pub use transport::{ObexTransport, PutOperation};
pub use types::{
    FileDescriptor, NegotiatedCapabilities, Position, SessionConfig, SessionEvent, SessionState,
    SrmState, TransferOutcome, TransferRequest, TransferStatus,
};
