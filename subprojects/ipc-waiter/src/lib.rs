//! Asynchronous waiting on top of a synchronous [`ipc_kernel::Kernel`].
//!
//! The kernel only offers a blocking `wait`/`wait_many`; everything that
//! wants to wait on many unrelated handles from many call sites (the
//! connector, application code) needs a way to register interest and move
//! on. `AsyncWaiter` runs one background thread that owns the actual
//! `wait_many` call and multiplexes every registered handle onto it,
//! waking itself through a dedicated message pipe whenever a new
//! registration or cancellation needs picking up.

mod worker;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver};
use std::sync::{Arc, OnceLock};
use std::thread;

use ipc_handle::Waitable;
use ipc_kernel::{Kernel, KernelResult, RawHandle, SignalState, Signals};

use worker::{WaitRequest, Worker};

pub use worker::WAIT_QUEUE_CAPACITY_HINT;

/// Identifies an outstanding [`AsyncWaiter::async_wait`] call so it can be
/// cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AsyncWaitId(u64);

/// What an async wait resolves with: the same information a direct
/// [`Kernel::wait`] call would have returned.
#[derive(Debug, Clone, Copy)]
pub struct WaitResponse {
    pub result: KernelResult,
    pub state: SignalState,
}

/// Multiplexes many asynchronous waits onto one background thread.
///
/// Cheap to clone-share via the `Arc` callers hold; internally it's just
/// two `mpsc::Sender`s, a shared notified flag, and the waking handle,
/// independent of the worker thread's own state (ground: the Go
/// implementation keeps `asyncWaiterImpl` and `asyncWaiterWorker` as two
/// separate objects connected only by channels and one atomic, not a
/// shared-ownership cycle).
pub struct AsyncWaiter {
    kernel: Arc<dyn Kernel>,
    waking_handle: RawHandle,
    notified: Arc<AtomicBool>,
    wait_tx: std::sync::mpsc::Sender<WaitRequest>,
    cancel_tx: std::sync::mpsc::Sender<AsyncWaitId>,
}

impl AsyncWaiter {
    /// Creates an `AsyncWaiter` backed by `kernel`, starting its worker
    /// thread immediately.
    pub fn new(kernel: Arc<dyn Kernel>) -> Self {
        let (waking_handle, worker_handle) = kernel.create_message_pipe();
        let notified = Arc::new(AtomicBool::new(false));
        let (wait_tx, wait_rx) = channel();
        let (cancel_tx, cancel_rx) = channel();

        let worker = Worker::new(kernel.clone(), worker_handle, notified.clone(), wait_rx, cancel_rx);
        thread::spawn(move || worker.run());

        Self { kernel, waking_handle, notified, wait_tx, cancel_tx }
    }

    fn wake_worker(&self) {
        if self.notified.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_ok() {
            let result = self.kernel.write_message(self.waking_handle, &[0u8], Vec::new());
            if result != KernelResult::Ok {
                tracing::error!(?result, "failed to wake async waiter worker");
            }
        }
    }

    /// Registers an asynchronous wait on `handle` for any signal in
    /// `signals`. The returned `Receiver` yields exactly one
    /// [`WaitResponse`]: when a signal is satisfied, when it becomes known
    /// none ever will be, or [`KernelResult::Aborted`] if
    /// [`Self::cancel_wait`] is called first.
    ///
    /// `handle` must not be closed until a response is received.
    pub fn async_wait<H: Waitable>(&self, handle: &H, signals: Signals) -> (AsyncWaitId, Receiver<WaitResponse>) {
        let (id_tx, id_rx) = channel();
        let (response_tx, response_rx) = channel();
        let _ = self.wait_tx.send(WaitRequest { handle: handle.raw_handle(), signals, id_tx, response_tx });
        self.wake_worker();
        let id = id_rx.recv().unwrap_or(AsyncWaitId(0));
        (id, response_rx)
    }

    /// Cancels an outstanding wait. A response with
    /// [`KernelResult::Aborted`] is sent to its channel if the wait hadn't
    /// already completed; otherwise this is a silent no-op.
    pub fn cancel_wait(&self, id: AsyncWaitId) {
        let _ = self.cancel_tx.send(id);
        self.wake_worker();
    }
}

impl Drop for AsyncWaiter {
    fn drop(&mut self) {
        let result = self.kernel.close(self.waking_handle);
        if result != KernelResult::Ok {
            tracing::warn!(?result, "async waiter's waking handle close on drop returned non-ok result");
        }
    }
}

static DEFAULT_WAITER: OnceLock<AsyncWaiter> = OnceLock::new();

/// Returns the process-wide default `AsyncWaiter`, creating it on first
/// call with `kernel`. Later calls ignore their `kernel` argument and
/// return the already-initialized instance (ground: Go's
/// `sync.Once`-guarded `defaultWaiter`).
pub fn get_async_waiter(kernel: &Arc<dyn Kernel>) -> &'static AsyncWaiter {
    DEFAULT_WAITER.get_or_init(|| AsyncWaiter::new(kernel.clone()))
}
