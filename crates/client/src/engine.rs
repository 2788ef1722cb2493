//! Chunked PUT engine: sends one resolved file over an open connection.
//!
//! The engine owns the per-file protocol work: request headers, Single
//! Response Mode negotiation, chunked body writes sized to the negotiated
//! packet size, progress publication, and mapping of the peer's response
//! codes to a terminal [`TransferOutcome`]. It never touches the socket
//! directly; everything goes through the [`ObexTransport`] seam.

use std::io::{self, Read};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use bluepush_protocol::{srm, HeaderSet, ResponseCode};
use tracing::{debug, error, info, warn};

use crate::error::SendError;
use crate::platform::HostServices;
use crate::progress::ProgressReporter;
use crate::quirks::apply_destination_quirks;
use crate::session::SharedControl;
use crate::store::TransferStore;
use crate::transport::{ObexTransport, PutOperation};
use crate::types::{
    EventSender, FileDescriptor, NegotiatedCapabilities, Position, SessionConfig, SrmState,
    TransferOutcome, TransferRequest, TransferStatus,
};
use crate::watchdog::Watchdog;

/// Per-packet framing on top of the body payload: 3-byte packet preamble
/// plus the 3-byte body header.
const PACKET_FRAMING_BYTES: usize = 6;

/// Mutable per-file state threaded through the send and finalization steps.
struct SendContext {
    /// Set when the transfer failed in a way that makes the operation's
    /// final response code meaningless.
    error: bool,
    status: TransferOutcome,
}

/// Maps a terminal rejection code to a transfer outcome.
fn outcome_for_code(code: ResponseCode) -> TransferOutcome {
    match code {
        ResponseCode::FORBIDDEN => TransferOutcome::Forbidden,
        ResponseCode::NOT_ACCEPTABLE | ResponseCode::UNSUPPORTED_TYPE => {
            TransferOutcome::NotAcceptable
        }
        _ => TransferOutcome::UnhandledProtocolCode,
    }
}

/// Reads until `buf` is full or the stream ends; returns the bytes read.
fn read_fully(reader: &mut dyn Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}

/// Sends files over one connection, one at a time.
///
/// Lives for the lifetime of a connection; per-connection state (negotiated
/// capabilities, the zero-length-rejection flag) accumulates across files.
pub struct TransferEngine {
    transport: Arc<dyn ObexTransport>,
    store: Arc<dyn TransferStore>,
    host: Arc<dyn HostServices>,
    control: Arc<SharedControl>,
    position: Position,
    caps: NegotiatedCapabilities,
    config: SessionConfig,
    watchdog: Watchdog,
    zero_length_rejected: bool,
}

impl TransferEngine {
    pub fn new(
        transport: Arc<dyn ObexTransport>,
        store: Arc<dyn TransferStore>,
        host: Arc<dyn HostServices>,
        events: EventSender,
        control: Arc<SharedControl>,
        caps: NegotiatedCapabilities,
        config: SessionConfig,
    ) -> Self {
        Self {
            watchdog: Watchdog::new(events),
            position: Position::new(),
            zero_length_rejected: false,
            transport,
            store,
            host,
            control,
            caps,
            config,
        }
    }

    /// Capabilities as currently negotiated, including SRM state.
    pub fn capabilities(&self) -> NegotiatedCapabilities {
        self.caps
    }

    /// Shared byte counter for the file currently being sent.
    pub fn position(&self) -> Position {
        self.position.clone()
    }

    /// True once any zero-length file in this batch was rejected by the
    /// peer with LENGTH_REQUIRED.
    pub fn zero_length_rejected(&self) -> bool {
        self.zero_length_rejected
    }

    /// Sends one file and returns its terminal outcome.
    ///
    /// The store always ends up with a terminal status for `request.id`,
    /// and the operation is always released, whatever the outcome.
    pub fn send_file(&mut self, request: &TransferRequest, file: FileDescriptor) -> TransferOutcome {
        info!(
            id = %request.id,
            file = %file.name,
            bytes = file.length,
            "starting file send"
        );
        self.position.set(0);

        let mut headers = HeaderSet::new();
        headers.set_name(file.name.as_str());
        headers.set_mime_type(file.mime_type.as_str());
        apply_destination_quirks(&mut headers, &request.destination, &file.name);
        self.store.update_status(request.id, TransferStatus::Running);
        headers.set_length(file.length);

        if self.transport.is_srm_capable() {
            debug!("requesting single response mode");
            headers.set_single_response_mode(srm::ENABLE);
            self.caps.srm.enabled = true;
        } else {
            self.caps.srm.enabled = false;
        }
        self.caps.srm.wait = false;

        self.control.set_waiting(true);
        let put_result = self.transport.put(headers);
        self.control.set_waiting(false);
        let mut op = match put_result {
            Ok(op) => op,
            Err(err) => {
                error!(error = %err, "failed to open put operation");
                self.store
                    .update_status(request.id, TransferStatus::ObexDataError);
                return TransferOutcome::ObexDataError;
            }
        };

        let FileDescriptor {
            name,
            length,
            stream,
            ..
        } = file;
        let mut reader = stream;
        let mut ctx = SendContext {
            error: false,
            status: TransferOutcome::ObexDataError,
        };

        if let Err(err) = self.run_send(request, op.as_mut(), reader.as_mut(), length, &name, &mut ctx)
        {
            error!(error = %err, "file send failed");
            self.watchdog.disarm();
            self.control.set_waiting(false);
            ctx.error = true;
            ctx.status = TransferOutcome::ObexDataError;
        }

        // Close the source stream before settling the final status.
        drop(reader);
        self.finalize(request, op.as_mut(), length, &mut ctx);
        ctx.status
    }

    fn run_send(
        &mut self,
        request: &TransferRequest,
        op: &mut dyn PutOperation,
        reader: &mut dyn Read,
        length: u64,
        name: &str,
        ctx: &mut SendContext,
    ) -> Result<(), SendError> {
        let started_at = Instant::now();
        let mps = self.caps.max_packet_size;
        let mut buffer = vec![0u8; mps];
        let mut ok_to_proceed = false;

        self.store.update_progress(request.id, 0);

        if length > 0 {
            let chunk = length.min(mps as u64) as usize;
            let got = read_fully(reader, &mut buffer[..chunk])?;
            if got < chunk {
                return Err(SendError::UnexpectedEof {
                    expected: length,
                    got: got as u64,
                });
            }

            // The first write flushes the request headers and blocks until
            // the peer accepts the packet; the watchdog covers a peer that
            // never answers.
            self.watchdog.arm(self.config.connect_timeout);
            self.control.set_waiting(true);

            let hint = chunk + op.header_overhead() + PACKET_FRAMING_BYTES;
            if let Err(err) = self.transport.set_put_mtu_hint(hint) {
                warn!(error = %err, "failed to apply packet size hint");
            }
            let write_result = op.write(&buffer[..chunk]);
            let close_result = match &write_result {
                // Single-packet object: the EOF handshake happens while the
                // watchdog is still armed.
                Ok(()) if chunk as u64 == length => Some(op.close_output()),
                _ => None,
            };

            self.watchdog.disarm();
            self.control.set_waiting(false);
            write_result?;
            if let Some(res) = close_result {
                res?;
            }

            let code = op.response_code()?;
            if code.is_success() {
                self.position.advance(chunk as u64);
                self.adopt_srm(op.received_headers());
                ok_to_proceed = true;
                self.store.update_progress(request.id, self.position.get());
            } else {
                info!(code = %code, "peer rejected the first packet");
            }
        }

        let mut reporter: Option<ProgressReporter> = None;
        let accepted = ok_to_proceed;

        'chunks: while ok_to_proceed && !self.control.is_interrupted() && self.position.get() != length
        {
            let remaining = length - self.position.get();
            let chunk = remaining.min(mps as u64) as usize;
            let got = read_fully(reader, &mut buffer[..chunk])?;
            if got < chunk {
                return Err(SendError::UnexpectedEof {
                    expected: length,
                    got: self.position.get() + got as u64,
                });
            }

            loop {
                if let Err(err) = self.transport.set_put_mtu_hint(chunk + PACKET_FRAMING_BYTES) {
                    warn!(error = %err, "failed to apply packet size hint");
                }
                match op.write(&buffer[..chunk]) {
                    Ok(()) => break,
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                        debug!("chunk write would block, retrying");
                        thread::sleep(self.config.write_retry_pause);
                        if self.control.is_interrupted() {
                            ok_to_proceed = false;
                            continue 'chunks;
                        }
                    }
                    Err(err) => return Err(err.into()),
                }
            }

            let code = op.response_code()?;
            if code.is_success() {
                self.position.advance(chunk as u64);
                if reporter.is_none() {
                    reporter = Some(ProgressReporter::start(
                        Arc::clone(&self.store),
                        Arc::clone(&self.host),
                        request.id,
                        self.position.clone(),
                        self.config.progress_interval,
                    ));
                }
            } else {
                info!(
                    code = %code,
                    position = self.position.get(),
                    "peer stopped accepting chunks"
                );
                ok_to_proceed = false;
            }
        }

        if let Some(reporter) = reporter.take() {
            reporter.stop_and_join();
        }
        if accepted {
            self.store.update_progress(request.id, self.position.get());
        }

        match op.last_response_code() {
            Some(code)
                if matches!(
                    code,
                    ResponseCode::FORBIDDEN
                        | ResponseCode::NOT_ACCEPTABLE
                        | ResponseCode::UNSUPPORTED_TYPE
                ) =>
            {
                ctx.status = outcome_for_code(code);
                info!(code = %code, status = ?ctx.status, "transfer refused by peer");
            }
            _ => {
                if !self.control.is_interrupted() && self.position.get() == length {
                    ctx.status = TransferOutcome::Success;
                    let elapsed = started_at.elapsed();
                    info!(
                        file = %name,
                        bytes = length,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "file sent"
                    );
                    op.close_output()?;
                } else {
                    ctx.error = true;
                    ctx.status = TransferOutcome::Canceled;
                    info!(position = self.position.get(), "transfer interrupted, aborting");
                    op.abort()?;
                }
            }
        }

        Ok(())
    }

    /// Adopts the SRM state confirmed by the peer's first reply.
    fn adopt_srm(&mut self, reply: HeaderSet) {
        if reply.srm_enabled() {
            self.caps.srm.enabled = true;
            self.caps.srm.wait = reply.srm_wait_requested();
            debug!(wait = self.caps.srm.wait, "single response mode confirmed");
        } else {
            if self.caps.srm.enabled {
                debug!("peer declined single response mode");
            }
            self.caps.srm = SrmState::default();
        }
    }

    /// Settles the final status from the operation's last response code,
    /// persists it, and releases the operation.
    fn finalize(
        &mut self,
        request: &TransferRequest,
        op: &mut dyn PutOperation,
        length: u64,
        ctx: &mut SendContext,
    ) {
        if !ctx.error {
            match op.last_response_code() {
                Some(code) if !code.is_success() => {
                    if length == 0 && code == ResponseCode::LENGTH_REQUIRED {
                        info!("peer rejected a zero-length object, reporting the batch as sent");
                        self.zero_length_rejected = true;
                        ctx.status = TransferOutcome::Forbidden;
                    } else {
                        ctx.status = outcome_for_code(code);
                    }
                }
                Some(_) => {}
                None => {
                    warn!("operation produced no response, connection unusable");
                    ctx.status = TransferOutcome::ConnectionError;
                }
            }
        }

        self.store.update_status(request.id, ctx.status.into());

        // Once any zero-length file in the batch was rejected, the batch as
        // a whole reports success; the store keeps the real per-file status.
        if self.zero_length_rejected {
            ctx.status = TransferOutcome::Success;
        }

        if let Err(err) = op.close() {
            warn!(error = %err, "failed to release put operation");
            if self.position.get() != length {
                ctx.status = TransferOutcome::Forbidden;
                self.store.update_status(request.id, TransferStatus::Forbidden);
            }
        }
    }
}
