//! Session controller: one worker thread, one connection, one transfer at
//! a time.
//!
//! The controller is the embedder-facing surface. `start` spawns the worker
//! and connects, `enqueue` hands over the next transfer (a depth-1 slot,
//! resolved eagerly on the caller's thread), and `stop` cancels
//! cooperatively, force-closing the transport when the worker is blocked in
//! a network call. Results come back on the callback channel as
//! [`SessionEvent`]s.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use bluepush_protocol::HeaderSet;
use tracing::{debug, error, info, warn};

use crate::engine::TransferEngine;
use crate::platform::{HostServices, WakeLockGuard};
use crate::resolver::{FileResolver, ResolveError};
use crate::store::TransferStore;
use crate::transport::ObexTransport;
use crate::types::{
    EventSender, FileDescriptor, NegotiatedCapabilities, SessionConfig, SessionEvent, SessionState,
    SrmState, TransferOutcome, TransferRequest, TransferStatus,
};

/// Control flags shared between the controller and the worker thread.
#[derive(Default)]
pub struct SharedControl {
    interrupted: AtomicBool,
    waiting_for_remote: Mutex<bool>,
}

impl SharedControl {
    /// Requests cooperative cancellation. Irreversible for the session.
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    pub(crate) fn set_waiting(&self, waiting: bool) {
        *self.waiting_for_remote.lock().unwrap() = waiting;
    }

    /// True while the worker is blocked in a call on the remote.
    pub fn is_waiting_for_remote(&self) -> bool {
        *self.waiting_for_remote.lock().unwrap()
    }

    /// Runs `f` while holding the waiting flag's lock, but only if the
    /// worker is currently blocked on the remote. Returns whether `f` ran.
    pub(crate) fn if_waiting_for_remote(&self, f: impl FnOnce()) -> bool {
        let waiting = self.waiting_for_remote.lock().unwrap();
        if *waiting {
            f();
        }
        *waiting
    }
}

/// A queued transfer with its eagerly resolved descriptor.
struct PendingTransfer {
    request: TransferRequest,
    descriptor: Result<FileDescriptor, ResolveError>,
}

/// Depth-1 handover slot between the controller and the worker.
struct Queue {
    slot: Mutex<Option<PendingTransfer>>,
    available: Condvar,
}

/// Owns the worker thread for one push session.
pub struct SessionController {
    transport: Arc<dyn ObexTransport>,
    store: Arc<dyn TransferStore>,
    host: Arc<dyn HostServices>,
    resolver: Arc<dyn FileResolver>,
    events: EventSender,
    config: SessionConfig,
    control: Arc<SharedControl>,
    queue: Arc<Queue>,
    current: Arc<Mutex<Option<TransferRequest>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SessionController {
    pub fn new(
        transport: Arc<dyn ObexTransport>,
        store: Arc<dyn TransferStore>,
        host: Arc<dyn HostServices>,
        resolver: Arc<dyn FileResolver>,
        events: EventSender,
        config: SessionConfig,
    ) -> Self {
        Self {
            transport,
            store,
            host,
            resolver,
            events,
            config,
            control: Arc::new(SharedControl::default()),
            queue: Arc::new(Queue {
                slot: Mutex::new(None),
                available: Condvar::new(),
            }),
            current: Arc::new(Mutex::new(None)),
            worker: Mutex::new(None),
        }
    }

    /// Spawns the worker thread and connects, announcing `share_count`
    /// objects for this session. No-op if already started.
    pub fn start(&self, share_count: u32) {
        let mut worker = self.worker.lock().unwrap();
        if worker.is_some() {
            warn!("session already started");
            return;
        }
        info!(share_count, "starting push session");

        let run = Worker {
            transport: Arc::clone(&self.transport),
            store: Arc::clone(&self.store),
            host: Arc::clone(&self.host),
            events: self.events.clone(),
            config: self.config.clone(),
            control: Arc::clone(&self.control),
            queue: Arc::clone(&self.queue),
            current: Arc::clone(&self.current),
            announced: share_count,
        };
        match thread::Builder::new()
            .name("obex-client".into())
            .spawn(move || run.run())
        {
            Ok(handle) => *worker = Some(handle),
            Err(err) => error!(error = %err, "failed to spawn session worker"),
        }
    }

    /// Queues the next transfer, resolving its source immediately.
    ///
    /// The slot holds one transfer: queueing while a previous one has not
    /// been picked up replaces it.
    pub fn enqueue(&self, request: TransferRequest) {
        debug!(id = %request.id, source = %request.source, "queueing transfer");
        let descriptor = self.resolver.resolve(&request);
        match &descriptor {
            Ok(fd) => {
                self.store
                    .update_metadata(request.id, &fd.name, &fd.mime_type, fd.length);
            }
            Err(err) => {
                warn!(id = %request.id, error = %err, "failed to resolve transfer source");
                self.store
                    .update_status(request.id, TransferStatus::ObexDataError);
            }
        }

        let mut slot = self.queue.slot.lock().unwrap();
        if let Some(displaced) = slot.replace(PendingTransfer {
            request,
            descriptor,
        }) {
            warn!(id = %displaced.request.id, "replacing queued transfer that never started");
        }
        self.queue.available.notify_all();
    }

    /// Cancels the session and waits for the worker to exit.
    ///
    /// A worker blocked in a network call is unblocked by force-closing the
    /// transport; in that case a [`SessionEvent::ShareInterrupted`] carrying
    /// the in-flight transfer is emitted.
    pub fn stop(&self) {
        info!("stopping push session");
        self.control.interrupt();
        self.queue.available.notify_all();

        // The flag's lock is held across the forced closure so the worker
        // cannot leave its blocking call and reuse the transport in between.
        let forced = self.control.if_waiting_for_remote(|| {
            info!("worker blocked on remote, forcing transport closed");
            if let Err(err) = self.transport.force_close() {
                warn!(error = %err, "force close failed");
            }
        });
        if forced {
            let interrupted = self.current.lock().unwrap().clone();
            let _ = self.events.send(SessionEvent::ShareInterrupted(interrupted));
        }

        if let Some(handle) = self.worker.lock().unwrap().take() {
            if handle.join().is_err() {
                error!("session worker panicked");
            }
        }
    }
}

struct Worker {
    transport: Arc<dyn ObexTransport>,
    store: Arc<dyn TransferStore>,
    host: Arc<dyn HostServices>,
    events: EventSender,
    config: SessionConfig,
    control: Arc<SharedControl>,
    queue: Arc<Queue>,
    current: Arc<Mutex<Option<TransferRequest>>>,
    announced: u32,
}

impl Worker {
    fn run(self) {
        let wake = WakeLockGuard::new(self.host.as_ref());
        let mut state = SessionState::Idle;

        // Give the peer's acceptance flow a moment before connecting.
        if !self.control.is_interrupted() {
            thread::sleep(self.config.connect_settle);
        }

        state.transition(SessionState::Connecting);
        let mut engine = match self.connect() {
            Some(caps) => {
                state.transition(SessionState::Connected);
                Some(TransferEngine::new(
                    Arc::clone(&self.transport),
                    Arc::clone(&self.store),
                    Arc::clone(&self.host),
                    self.events.clone(),
                    Arc::clone(&self.control),
                    caps,
                    self.config.clone(),
                ))
            }
            None => {
                state.transition(SessionState::Idle);
                None
            }
        };

        while !self.control.is_interrupted() {
            let Some(pending) = self.take_pending() else {
                continue;
            };
            *self.current.lock().unwrap() = Some(pending.request.clone());
            let finished = self.process(pending, engine.as_mut(), &mut state);
            *self.current.lock().unwrap() = Some(finished);
        }

        state.transition(SessionState::Disconnecting);
        if engine.take().is_some() {
            if let Err(err) = self.transport.disconnect() {
                warn!(error = %err, "disconnect failed");
            }
        }
        drop(wake);
        state.transition(SessionState::Stopped);

        let last = self.current.lock().unwrap().clone();
        info!("push session finished");
        let _ = self.events.send(SessionEvent::SessionComplete(last));
    }

    /// Connects and derives the connection capabilities, or `None` on
    /// failure.
    fn connect(&self) -> Option<NegotiatedCapabilities> {
        let mut headers = HeaderSet::new();
        headers.set_count(self.announced);

        self.control.set_waiting(true);
        let result = self.transport.connect(&headers);
        self.control.set_waiting(false);

        match result {
            Ok(()) => {
                let mut max_packet_size = self.transport.max_packet_size();
                if self.host.is_audio_link_active()
                    && max_packet_size > self.config.reduced_audio_mtu
                {
                    info!(
                        max_packet_size,
                        reduced = self.config.reduced_audio_mtu,
                        "audio link active, reducing packet size"
                    );
                    max_packet_size = self.config.reduced_audio_mtu;
                }
                info!(max_packet_size, "connected to peer");
                Some(NegotiatedCapabilities {
                    max_packet_size,
                    srm: SrmState::default(),
                })
            }
            Err(err) => {
                error!(error = %err, "connect failed");
                None
            }
        }
    }

    /// Takes the queued transfer, waiting up to one poll interval for one
    /// to arrive.
    fn take_pending(&self) -> Option<PendingTransfer> {
        let mut slot = self.queue.slot.lock().unwrap();
        if slot.is_none() && !self.control.is_interrupted() {
            let (guard, _) = self
                .queue
                .available
                .wait_timeout(slot, self.config.poll_interval)
                .unwrap();
            slot = guard;
        }
        slot.take()
    }

    /// Runs one transfer to completion and emits its event. Returns the
    /// request stamped with its terminal status.
    fn process(
        &self,
        pending: PendingTransfer,
        engine: Option<&mut TransferEngine>,
        state: &mut SessionState,
    ) -> TransferRequest {
        let mut request = pending.request;
        match pending.descriptor {
            Err(err) => {
                warn!(id = %request.id, error = %err, "request has no readable source");
                request.status = TransferStatus::ObexDataError;
                let _ = self.events.send(SessionEvent::SessionError(request.clone()));
            }
            Ok(descriptor) => match engine {
                None => {
                    warn!(id = %request.id, "no connection, failing transfer");
                    self.store
                        .update_status(request.id, TransferStatus::ConnectionError);
                    request.status = TransferStatus::ConnectionError;
                    let _ = self.events.send(SessionEvent::SessionError(request.clone()));
                }
                Some(engine) => {
                    state.transition(SessionState::Sending);
                    let outcome = engine.send_file(&request, descriptor);
                    state.transition(SessionState::Connected);
                    request.status = outcome.into();
                    if outcome == TransferOutcome::Success {
                        let _ = self.events.send(SessionEvent::ShareComplete(request.clone()));
                    } else {
                        let _ = self.events.send(SessionEvent::SessionError(request.clone()));
                    }
                }
            },
        }
        request
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::NullHostServices;
    use crate::store::MemoryStore;
    use crate::transport::PutOperation;
    use bluepush_protocol::ResponseCode;
    use std::io::{self, Cursor};
    use std::sync::atomic::AtomicU32;
    use std::sync::mpsc;
    use std::time::Duration;

    fn fast_config() -> SessionConfig {
        SessionConfig {
            poll_interval: Duration::from_millis(10),
            connect_timeout: Duration::from_secs(5),
            progress_interval: Duration::from_millis(50),
            reduced_audio_mtu: 8192,
            write_retry_pause: Duration::from_millis(1),
            connect_settle: Duration::from_millis(1),
        }
    }

    /// Accepts every packet and finishes with SUCCESS.
    struct AcceptAllPut {
        last: Option<ResponseCode>,
    }

    impl PutOperation for AcceptAllPut {
        fn write(&mut self, _chunk: &[u8]) -> io::Result<()> {
            Ok(())
        }
        fn close_output(&mut self) -> io::Result<()> {
            self.last = Some(ResponseCode::SUCCESS);
            Ok(())
        }
        fn response_code(&mut self) -> io::Result<ResponseCode> {
            self.last = Some(ResponseCode::CONTINUE);
            Ok(ResponseCode::CONTINUE)
        }
        fn last_response_code(&self) -> Option<ResponseCode> {
            self.last
        }
        fn received_headers(&self) -> HeaderSet {
            HeaderSet::new()
        }
        fn header_overhead(&self) -> usize {
            40
        }
        fn abort(&mut self) -> io::Result<()> {
            Ok(())
        }
        fn close(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct StubTransport {
        connect_headers: Mutex<Option<HeaderSet>>,
        mtu_hints: Mutex<Vec<usize>>,
        put_count: AtomicU32,
        disconnected: AtomicBool,
        force_closed: AtomicBool,
        fail_connect: bool,
        max_packet_size: usize,
    }

    impl StubTransport {
        fn new() -> Self {
            Self {
                max_packet_size: 4096,
                ..Default::default()
            }
        }
    }

    impl ObexTransport for StubTransport {
        fn connect(&self, headers: &HeaderSet) -> io::Result<()> {
            *self.connect_headers.lock().unwrap() = Some(headers.clone());
            if self.fail_connect {
                return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
            }
            Ok(())
        }
        fn put(&self, _headers: HeaderSet) -> io::Result<Box<dyn PutOperation>> {
            self.put_count.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(AcceptAllPut { last: None }))
        }
        fn max_packet_size(&self) -> usize {
            self.max_packet_size
        }
        fn set_put_mtu_hint(&self, bytes: usize) -> io::Result<()> {
            self.mtu_hints.lock().unwrap().push(bytes);
            Ok(())
        }
        fn is_srm_capable(&self) -> bool {
            false
        }
        fn disconnect(&self) -> io::Result<()> {
            self.disconnected.store(true, Ordering::SeqCst);
            Ok(())
        }
        fn force_close(&self) -> io::Result<()> {
            self.force_closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct StubResolver {
        fail: bool,
        length: u64,
    }

    impl FileResolver for StubResolver {
        fn resolve(&self, request: &TransferRequest) -> Result<FileDescriptor, ResolveError> {
            if self.fail {
                return Err(ResolveError::NotFound(request.source.clone()));
            }
            Ok(FileDescriptor {
                name: "file.bin".into(),
                length: self.length,
                mime_type: "application/octet-stream".into(),
                stream: Box::new(Cursor::new(vec![0u8; self.length as usize])),
            })
        }
    }

    struct AudioHost;

    impl HostServices for AudioHost {
        fn is_audio_link_active(&self) -> bool {
            true
        }
    }

    fn controller(
        transport: Arc<StubTransport>,
        resolver: StubResolver,
    ) -> (
        SessionController,
        Arc<MemoryStore>,
        mpsc::Receiver<SessionEvent>,
    ) {
        let store = Arc::new(MemoryStore::new());
        let (tx, rx) = mpsc::channel();
        let controller = SessionController::new(
            transport,
            store.clone(),
            Arc::new(NullHostServices),
            Arc::new(resolver),
            tx,
            fast_config(),
        );
        (controller, store, rx)
    }

    #[test]
    fn queued_transfer_completes_and_session_shuts_down() {
        let transport = Arc::new(StubTransport::new());
        let (controller, store, rx) =
            controller(Arc::clone(&transport), StubResolver { fail: false, length: 6000 });
        let request = TransferRequest::new("content://media/7", "AA:BB:CC:DD:EE:FF");
        let id = request.id;

        controller.start(1);
        controller.enqueue(request);

        let event = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        match event {
            SessionEvent::ShareComplete(done) => {
                assert_eq!(done.id, id);
                assert_eq!(done.status, TransferStatus::Success);
            }
            other => panic!("expected ShareComplete, got {other:?}"),
        }

        controller.stop();
        let event = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        match event {
            SessionEvent::SessionComplete(Some(last)) => assert_eq!(last.id, id),
            other => panic!("expected SessionComplete, got {other:?}"),
        }

        let record = store.snapshot(id).unwrap();
        assert_eq!(record.status, TransferStatus::Success);
        assert_eq!(record.current_bytes, 6000);
        assert_eq!(record.total_bytes, 6000);
        assert_eq!(record.filename, "file.bin");

        assert!(transport.disconnected.load(Ordering::SeqCst));
        let connect = transport.connect_headers.lock().unwrap();
        assert_eq!(connect.as_ref().unwrap().count(), Some(1));
    }

    #[test]
    fn unresolvable_request_fails_without_touching_the_link() {
        let transport = Arc::new(StubTransport::new());
        let (controller, store, rx) =
            controller(Arc::clone(&transport), StubResolver { fail: true, length: 0 });
        let request = TransferRequest::new("content://media/gone", "AA:BB:CC:DD:EE:FF");
        let id = request.id;

        controller.start(1);
        controller.enqueue(request);

        let event = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        match event {
            SessionEvent::SessionError(failed) => {
                assert_eq!(failed.id, id);
                assert_eq!(failed.status, TransferStatus::ObexDataError);
            }
            other => panic!("expected SessionError, got {other:?}"),
        }
        controller.stop();

        assert_eq!(store.snapshot(id).unwrap().status, TransferStatus::ObexDataError);
        assert_eq!(transport.put_count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn connect_failure_fails_the_transfer() {
        let transport = Arc::new(StubTransport {
            fail_connect: true,
            max_packet_size: 4096,
            ..Default::default()
        });
        let (controller, store, rx) =
            controller(Arc::clone(&transport), StubResolver { fail: false, length: 100 });
        let request = TransferRequest::new("content://media/9", "AA:BB:CC:DD:EE:FF");
        let id = request.id;

        controller.start(1);
        controller.enqueue(request);

        let event = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        match event {
            SessionEvent::SessionError(failed) => {
                assert_eq!(failed.status, TransferStatus::ConnectionError);
            }
            other => panic!("expected SessionError, got {other:?}"),
        }
        controller.stop();

        assert_eq!(
            store.snapshot(id).unwrap().status,
            TransferStatus::ConnectionError
        );
        assert_eq!(transport.put_count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn queue_keeps_only_the_latest_transfer() {
        let transport = Arc::new(StubTransport::new());
        let (controller, _store, rx) =
            controller(Arc::clone(&transport), StubResolver { fail: false, length: 100 });
        let first = TransferRequest::new("content://media/1", "AA:BB:CC:DD:EE:FF");
        let second = TransferRequest::new("content://media/2", "AA:BB:CC:DD:EE:FF");
        let second_id = second.id;

        // Both queued before the worker exists; the slot keeps the latest.
        controller.enqueue(first);
        controller.enqueue(second);
        controller.start(2);

        let event = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        match event {
            SessionEvent::ShareComplete(done) => assert_eq!(done.id, second_id),
            other => panic!("expected ShareComplete, got {other:?}"),
        }
        controller.stop();

        assert!(matches!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            SessionEvent::SessionComplete(_)
        ));
        assert_eq!(transport.put_count.load(Ordering::SeqCst), 1);
    }

    /// Transport whose connect blocks until force-closed.
    struct BlockingTransport {
        gate: Arc<(Mutex<bool>, Condvar)>,
    }

    impl ObexTransport for BlockingTransport {
        fn connect(&self, _headers: &HeaderSet) -> io::Result<()> {
            let (lock, cvar) = &*self.gate;
            let mut closed = lock.lock().unwrap();
            while !*closed {
                closed = cvar.wait(closed).unwrap();
            }
            Err(io::Error::new(io::ErrorKind::ConnectionAborted, "closed"))
        }
        fn put(&self, _headers: HeaderSet) -> io::Result<Box<dyn PutOperation>> {
            Err(io::Error::new(io::ErrorKind::NotConnected, "not connected"))
        }
        fn max_packet_size(&self) -> usize {
            4096
        }
        fn set_put_mtu_hint(&self, _bytes: usize) -> io::Result<()> {
            Ok(())
        }
        fn is_srm_capable(&self) -> bool {
            false
        }
        fn disconnect(&self) -> io::Result<()> {
            Ok(())
        }
        fn force_close(&self) -> io::Result<()> {
            let (lock, cvar) = &*self.gate;
            *lock.lock().unwrap() = true;
            cvar.notify_all();
            Ok(())
        }
    }

    #[test]
    fn stop_unblocks_a_worker_stuck_in_connect() {
        let gate = Arc::new((Mutex::new(false), Condvar::new()));
        let transport = Arc::new(BlockingTransport {
            gate: Arc::clone(&gate),
        });
        let store = Arc::new(MemoryStore::new());
        let (tx, rx) = mpsc::channel();
        let controller = SessionController::new(
            transport,
            store,
            Arc::new(NullHostServices),
            Arc::new(StubResolver { fail: false, length: 10 }),
            tx,
            fast_config(),
        );

        controller.start(1);
        // Let the worker reach the blocking connect call.
        thread::sleep(Duration::from_millis(50));

        controller.stop();

        let mut saw_interrupted = false;
        let mut saw_complete = false;
        while let Ok(event) = rx.recv_timeout(Duration::from_secs(2)) {
            match event {
                SessionEvent::ShareInterrupted(_) => saw_interrupted = true,
                SessionEvent::SessionComplete(_) => {
                    saw_complete = true;
                    break;
                }
                _ => {}
            }
        }
        assert!(saw_interrupted, "expected a ShareInterrupted event");
        assert!(saw_complete, "expected a SessionComplete event");
        assert!(*gate.0.lock().unwrap(), "transport was never force-closed");
    }

    #[test]
    fn audio_link_reduces_packet_size() {
        let transport = Arc::new(StubTransport {
            max_packet_size: 65535,
            ..Default::default()
        });
        let store = Arc::new(MemoryStore::new());
        let (tx, rx) = mpsc::channel();
        let controller = SessionController::new(
            Arc::clone(&transport) as Arc<dyn ObexTransport>,
            store,
            Arc::new(AudioHost),
            Arc::new(StubResolver { fail: false, length: 20000 }),
            tx,
            fast_config(),
        );
        let request = TransferRequest::new("content://media/3", "AA:BB:CC:DD:EE:FF");

        controller.start(1);
        controller.enqueue(request);
        assert!(matches!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            SessionEvent::ShareComplete(_)
        ));
        controller.stop();

        // First chunk hint: clamped chunk plus headers plus framing.
        let hints = transport.mtu_hints.lock().unwrap();
        assert_eq!(hints[0], 8192 + 40 + 6);
    }

    #[test]
    fn stop_without_start_is_harmless() {
        let transport = Arc::new(StubTransport::new());
        let (controller, _store, _rx) =
            controller(transport, StubResolver { fail: false, length: 10 });
        controller.stop();
    }

    #[test]
    fn start_twice_keeps_the_first_worker() {
        let transport = Arc::new(StubTransport::new());
        let (controller, _store, rx) =
            controller(Arc::clone(&transport), StubResolver { fail: false, length: 10 });

        controller.start(1);
        controller.start(1);
        // Let the single worker get past its connect before stopping.
        thread::sleep(Duration::from_millis(50));
        controller.stop();

        // Exactly one worker means exactly one SessionComplete.
        assert!(matches!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            SessionEvent::SessionComplete(_)
        ));
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }
}
