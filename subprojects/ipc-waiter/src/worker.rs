//! The background thread that multiplexes every outstanding async wait onto
//! a single [`Kernel::wait_many`] call.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;

use ipc_kernel::{Kernel, KernelResult, RawHandle, SignalState, Signals};

use crate::{AsyncWaitId, WaitResponse};

/// Expected steady-state number of concurrently outstanding waits, used as
/// a preallocation hint for the worker's parallel vectors. Ground: the Go
/// implementation's `make(chan waitRequest, 10)` buffered channel depth in
/// `newAsyncWaiter` — this core's channels are unbounded, so the number
/// survives only as a sizing hint rather than a hard queue depth.
pub const WAIT_QUEUE_CAPACITY_HINT: usize = 10;

pub(crate) struct WaitRequest {
    pub handle: RawHandle,
    pub signals: Signals,
    pub id_tx: Sender<AsyncWaitId>,
    pub response_tx: Sender<WaitResponse>,
}

pub(crate) struct Worker {
    kernel: Arc<dyn Kernel>,
    handles: Vec<RawHandle>,
    signals: Vec<Signals>,
    ids: Vec<AsyncWaitId>,
    responses: Vec<Sender<WaitResponse>>,
    notified: Arc<AtomicBool>,
    wait_rx: Receiver<WaitRequest>,
    cancel_rx: Receiver<AsyncWaitId>,
    next_id: u64,
}

impl Worker {
    pub(crate) fn new(
        kernel: Arc<dyn Kernel>,
        waking_side: RawHandle,
        notified: Arc<AtomicBool>,
        wait_rx: Receiver<WaitRequest>,
        cancel_rx: Receiver<AsyncWaitId>,
    ) -> Self {
        let (dummy_tx, _dummy_rx) = std::sync::mpsc::channel();
        let mut handles = Vec::with_capacity(WAIT_QUEUE_CAPACITY_HINT + 1);
        let mut signals = Vec::with_capacity(WAIT_QUEUE_CAPACITY_HINT + 1);
        let mut ids = Vec::with_capacity(WAIT_QUEUE_CAPACITY_HINT + 1);
        let mut responses = Vec::with_capacity(WAIT_QUEUE_CAPACITY_HINT + 1);
        handles.push(waking_side);
        signals.push(Signals::READABLE);
        ids.push(AsyncWaitId(0));
        responses.push(dummy_tx);
        Self {
            kernel,
            handles,
            signals,
            ids,
            responses,
            notified,
            wait_rx,
            cancel_rx,
            next_id: 0,
        }
    }

    /// Removes index-th waiting handle by swapping it with the last one,
    /// matching the Go worker's O(1) removal (order among pending waits is
    /// not meaningful).
    fn remove_handle(&mut self, index: usize) {
        let last = self.handles.len() - 1;
        self.handles.swap(index, last);
        self.handles.pop();
        self.signals.swap(index, last);
        self.signals.pop();
        self.ids.swap(index, last);
        self.ids.pop();
        self.responses.swap(index, last);
        self.responses.pop();
    }

    fn send_response_and_remove(&mut self, index: usize, result: KernelResult, state: SignalState) {
        let _ = self.responses[index].send(WaitResponse { result, state });
        self.remove_handle(index);
    }

    /// Responds to and removes every wait whose declared signals are
    /// satisfied, scanning back-to-front so swap-removal never skips an
    /// element. Index 0 (the waking handle) is never touched here.
    fn respond_to_satisfied_waits(&mut self, states: &[SignalState]) {
        let mut i = states.len();
        while i > 1 {
            i -= 1;
            if states[i].satisfied.intersects(self.signals[i]) {
                self.send_response_and_remove(i, KernelResult::Ok, states[i]);
            }
        }
    }

    fn process_incoming_requests(&mut self) {
        while let Ok(request) = self.wait_rx.try_recv() {
            self.handles.push(request.handle);
            self.signals.push(request.signals);
            self.responses.push(request.response_tx);
            self.next_id += 1;
            let id = AsyncWaitId(self.next_id);
            self.ids.push(id);
            let _ = request.id_tx.send(id);
        }
        while let Ok(cancel_id) = self.cancel_rx.try_recv() {
            let index = self.ids.iter().skip(1).position(|id| *id == cancel_id).map(|i| i + 1);
            if let Some(index) = index {
                self.send_response_and_remove(index, KernelResult::Aborted, SignalState::default());
            }
        }
    }

    pub(crate) fn run(mut self) {
        loop {
            let (result, index, states) = self.kernel.wait_many(&self.handles, &self.signals, None);
            self.notified.store(false, Ordering::SeqCst);
            let Some(index) = index else {
                tracing::error!(?result, "wait_many returned no attributable handle; stopping async waiter worker");
                self.kernel.close(self.handles[0]);
                return;
            };
            if index == 0 {
                if result != KernelResult::Ok {
                    tracing::error!(?result, "error waiting on the async waiter's waking handle");
                    self.kernel.close(self.handles[0]);
                    return;
                }
                let _ = self.kernel.read_message(self.handles[0]);
                self.process_incoming_requests();
            } else if result != KernelResult::Ok {
                self.send_response_and_remove(index, result, SignalState::default());
            } else {
                self.respond_to_satisfied_waits(&states);
            }
        }
    }
}
