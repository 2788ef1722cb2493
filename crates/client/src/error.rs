//! Client error types.

/// Errors produced while sending one file.
///
/// These never escape the engine: every fatal variant is normalized to
/// [`TransferOutcome::ObexDataError`](crate::types::TransferOutcome) at the
/// per-file boundary.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("source stream ended at {got} bytes, declared length {expected}")]
    UnexpectedEof { expected: u64, got: u64 },
}
