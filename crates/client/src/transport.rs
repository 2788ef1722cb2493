//! Transport trait seam.
//!
//! The embedder implements [`ObexTransport`] on top of the real socket
//! (RFCOMM or L2CAP) and its OBEX codec. Using a trait keeps the engine
//! decoupled from the transport and testable with mocks.

use std::io;

use bluepush_protocol::{HeaderSet, ResponseCode};

/// One OBEX client connection to a remote peer.
///
/// All methods except [`force_close`](Self::force_close) are called only
/// from the session worker thread. `force_close` is called from the
/// cancelling thread to unblock a worker stuck in a network call, so
/// implementations must tolerate concurrent closure.
pub trait ObexTransport: Send + Sync {
    /// Performs the OBEX CONNECT handshake with the given headers.
    fn connect(&self, headers: &HeaderSet) -> io::Result<()>;

    /// Opens a PUT operation with the given request headers.
    fn put(&self, headers: HeaderSet) -> io::Result<Box<dyn PutOperation>>;

    /// Maximum OBEX packet size for this connection.
    fn max_packet_size(&self) -> usize;

    /// Updates the transport's packet-size hint before a chunk write.
    ///
    /// Re-applied per write to account for protocol framing; failures are
    /// logged and otherwise ignored by the engine.
    fn set_put_mtu_hint(&self, bytes: usize) -> io::Result<()>;

    /// True if the link supports Single Response Mode (OBEX over L2CAP).
    fn is_srm_capable(&self) -> bool;

    /// Performs the OBEX DISCONNECT handshake and closes the link.
    fn disconnect(&self) -> io::Result<()>;

    /// Immediately closes the underlying socket, unblocking any pending
    /// call on the worker thread.
    fn force_close(&self) -> io::Result<()>;
}

/// An open PUT operation.
pub trait PutOperation: Send {
    /// Writes one chunk of the object body.
    ///
    /// The chunk is written in full or not at all; a transient
    /// [`io::ErrorKind::WouldBlock`] failure means nothing was sent and the
    /// same chunk may be retried.
    fn write(&mut self, chunk: &[u8]) -> io::Result<()>;

    /// Signals end-of-body and flushes the final packet. Blocks until the
    /// peer's final response arrives. Idempotent.
    fn close_output(&mut self) -> io::Result<()>;

    /// Reads the peer's response code for the most recent packet, blocking
    /// if it has not arrived yet.
    fn response_code(&mut self) -> io::Result<ResponseCode>;

    /// Last response code observed on this operation, or `None` if the
    /// operation never produced one (connection unusable).
    fn last_response_code(&self) -> Option<ResponseCode>;

    /// Headers carried in the peer's most recent reply.
    fn received_headers(&self) -> HeaderSet;

    /// Encoded size of this operation's request headers, used to size the
    /// first packet's transport hint.
    fn header_overhead(&self) -> usize;

    /// Sends an ABORT for this operation.
    fn abort(&mut self) -> io::Result<()>;

    /// Releases the operation. Must be called exactly once.
    fn close(&mut self) -> io::Result<()>;
}
