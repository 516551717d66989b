//! An in-process [`Kernel`] implementation.
//!
//! There is no external kernel to bind to in this core (spec §1 explicitly
//! treats the kernel/transport ABI as an outside collaborator), so
//! `MockKernel` plays that role for tests and for driving the rest of the
//! stack (codec, async waiter, router, stub/proxy) end to end within one
//! process. Non-wait calls serialize behind a single [`Mutex`] (spec §4.A /
//! §9 "process-wide kernel mutex"); `wait`/`wait_many` block on a
//! [`Condvar`] instead and never take that mutex for longer than it takes
//! to snapshot state.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Instant;

use crate::result::KernelResult;
use crate::signals::{SignalState, Signals};
use crate::traits::{DataPipeOptions, Deadline, Kernel, RawHandle, INVALID_HANDLE};

struct MessagePipeEnd {
    peer: RawHandle,
    incoming: VecDeque<(Vec<u8>, Vec<RawHandle>)>,
}

struct DataPipeState {
    capacity: usize,
    buffer: VecDeque<u8>,
    staged_write: Vec<u8>,
    write_reserved: bool,
    read_reserved: Option<usize>,
    producer_alive: bool,
    consumer_alive: bool,
    producer_handle: RawHandle,
    consumer_handle: RawHandle,
}

enum Object {
    MessagePipe(MessagePipeEnd),
    DataProducer { pipe_id: u32 },
    DataConsumer { pipe_id: u32 },
    SharedBuffer { data: Arc<Mutex<Vec<u8>>> },
}

#[derive(Default)]
struct Inner {
    objects: HashMap<RawHandle, Object>,
    pipes: HashMap<u32, DataPipeState>,
    /// Handles whose peer has closed. Kept independent of `objects` so a
    /// handle can still observe `PeerClosed` after its peer is gone.
    peer_closed: HashSet<RawHandle>,
}

/// An in-process, single-kernel-instance mock used for tests and demos.
pub struct MockKernel {
    inner: Mutex<Inner>,
    cv: Condvar,
    next_handle: AtomicU32,
    next_pipe: AtomicU32,
    epoch: Instant,
}

impl Default for MockKernel {
    fn default() -> Self {
        Self::new()
    }
}

impl MockKernel {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            cv: Condvar::new(),
            next_handle: AtomicU32::new(1),
            next_pipe: AtomicU32::new(1),
            epoch: Instant::now(),
        }
    }

    fn alloc_handle(&self) -> RawHandle {
        self.next_handle.fetch_add(1, Ordering::Relaxed)
    }

    fn signal_state_of(inner: &Inner, handle: RawHandle) -> SignalState {
        match inner.objects.get(&handle) {
            Some(Object::MessagePipe(end)) => {
                let peer_closed = inner.peer_closed.contains(&handle);
                let mut satisfied = Signals::empty();
                if !end.incoming.is_empty() {
                    satisfied |= Signals::READABLE;
                }
                let mut satisfiable = Signals::READABLE | Signals::WRITABLE | Signals::PEER_CLOSED;
                if peer_closed {
                    satisfied |= Signals::PEER_CLOSED;
                    satisfiable = Signals::PEER_CLOSED;
                    if !end.incoming.is_empty() {
                        satisfiable |= Signals::READABLE;
                    }
                } else {
                    satisfied |= Signals::WRITABLE;
                }
                SignalState { satisfied, satisfiable }
            }
            Some(Object::DataProducer { pipe_id }) => match inner.pipes.get(pipe_id) {
                Some(pipe) => {
                    let room = pipe.capacity.saturating_sub(pipe.buffer.len() + pipe.staged_write.len());
                    let mut satisfied = Signals::empty();
                    if room > 0 && !pipe.write_reserved {
                        satisfied |= Signals::WRITABLE;
                    }
                    let mut satisfiable = Signals::WRITABLE | Signals::PEER_CLOSED;
                    if !pipe.consumer_alive {
                        satisfied |= Signals::PEER_CLOSED;
                        satisfiable = Signals::PEER_CLOSED;
                    }
                    SignalState { satisfied, satisfiable }
                }
                None => SignalState::default(),
            },
            Some(Object::DataConsumer { pipe_id }) => match inner.pipes.get(pipe_id) {
                Some(pipe) => {
                    let mut satisfied = Signals::empty();
                    if !pipe.buffer.is_empty() && pipe.read_reserved.is_none() {
                        satisfied |= Signals::READABLE;
                    }
                    let mut satisfiable = Signals::READABLE | Signals::PEER_CLOSED;
                    if !pipe.producer_alive {
                        satisfied |= Signals::PEER_CLOSED;
                        satisfiable = if pipe.buffer.is_empty() {
                            Signals::PEER_CLOSED
                        } else {
                            Signals::READABLE | Signals::PEER_CLOSED
                        };
                    }
                    SignalState { satisfied, satisfiable }
                }
                None => SignalState::default(),
            },
            Some(Object::SharedBuffer { .. }) | None => SignalState::default(),
        }
    }
}

impl Kernel for MockKernel {
    fn create_message_pipe(&self) -> (RawHandle, RawHandle) {
        let a = self.alloc_handle();
        let b = self.alloc_handle();
        let mut inner = self.inner.lock().unwrap();
        inner.objects.insert(
            a,
            Object::MessagePipe(MessagePipeEnd { peer: b, incoming: VecDeque::new() }),
        );
        inner.objects.insert(
            b,
            Object::MessagePipe(MessagePipeEnd { peer: a, incoming: VecDeque::new() }),
        );
        (a, b)
    }

    fn create_data_pipe(&self, opts: Option<DataPipeOptions>) -> Result<(RawHandle, RawHandle), KernelResult> {
        let opts = opts.unwrap_or_default();
        let producer = self.alloc_handle();
        let consumer = self.alloc_handle();
        let pipe_id = self.next_pipe.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock().unwrap();
        inner.pipes.insert(
            pipe_id,
            DataPipeState {
                capacity: opts.capacity_bytes as usize,
                buffer: VecDeque::new(),
                staged_write: Vec::new(),
                write_reserved: false,
                read_reserved: None,
                producer_alive: true,
                consumer_alive: true,
                producer_handle: producer,
                consumer_handle: consumer,
            },
        );
        inner.objects.insert(producer, Object::DataProducer { pipe_id });
        inner.objects.insert(consumer, Object::DataConsumer { pipe_id });
        Ok((producer, consumer))
    }

    fn create_shared_buffer(&self, num_bytes: u64) -> Result<RawHandle, KernelResult> {
        let handle = self.alloc_handle();
        let mut inner = self.inner.lock().unwrap();
        inner.objects.insert(
            handle,
            Object::SharedBuffer { data: Arc::new(Mutex::new(vec![0u8; num_bytes as usize])) },
        );
        Ok(handle)
    }

    fn duplicate_shared_buffer(&self, handle: RawHandle) -> Result<RawHandle, KernelResult> {
        let mut inner = self.inner.lock().unwrap();
        let data = match inner.objects.get(&handle) {
            Some(Object::SharedBuffer { data }) => data.clone(),
            _ => return Err(KernelResult::InvalidArgument),
        };
        let new_handle = self.alloc_handle();
        inner.objects.insert(new_handle, Object::SharedBuffer { data });
        Ok(new_handle)
    }

    fn map_buffer(&self, handle: RawHandle, offset: u64, num_bytes: usize) -> Result<Vec<u8>, KernelResult> {
        let inner = self.inner.lock().unwrap();
        let data = match inner.objects.get(&handle) {
            Some(Object::SharedBuffer { data }) => data.clone(),
            _ => return Err(KernelResult::InvalidArgument),
        };
        drop(inner);
        let buf = data.lock().unwrap();
        let start = offset as usize;
        let end = start.checked_add(num_bytes).ok_or(KernelResult::InvalidArgument)?;
        buf.get(start..end).map(|s| s.to_vec()).ok_or(KernelResult::OutOfRange)
    }

    fn unmap_buffer(&self, handle: RawHandle, offset: u64, data: &[u8]) -> Result<(), KernelResult> {
        let inner = self.inner.lock().unwrap();
        let shared = match inner.objects.get(&handle) {
            Some(Object::SharedBuffer { data }) => data.clone(),
            _ => return Err(KernelResult::InvalidArgument),
        };
        drop(inner);
        let mut buf = shared.lock().unwrap();
        let start = offset as usize;
        let end = start.checked_add(data.len()).ok_or(KernelResult::InvalidArgument)?;
        let dst = buf.get_mut(start..end).ok_or(KernelResult::OutOfRange)?;
        dst.copy_from_slice(data);
        Ok(())
    }

    fn read_message(&self, handle: RawHandle) -> Result<(Vec<u8>, Vec<RawHandle>), KernelResult> {
        let mut inner = self.inner.lock().unwrap();
        let popped = match inner.objects.get_mut(&handle) {
            Some(Object::MessagePipe(end)) => end.incoming.pop_front(),
            Some(_) => return Err(KernelResult::InvalidArgument),
            None => return Err(KernelResult::InvalidArgument),
        };
        if let Some(msg) = popped {
            return Ok(msg);
        }
        if inner.peer_closed.contains(&handle) {
            Err(KernelResult::FailedPrecondition)
        } else {
            Err(KernelResult::ShouldWait)
        }
    }

    fn write_message(&self, handle: RawHandle, bytes: &[u8], handles: Vec<RawHandle>) -> KernelResult {
        let mut inner = self.inner.lock().unwrap();
        let peer = match inner.objects.get(&handle) {
            Some(Object::MessagePipe(end)) => end.peer,
            Some(_) | None => return KernelResult::InvalidArgument,
        };
        if inner.peer_closed.contains(&handle) {
            return KernelResult::FailedPrecondition;
        }
        match inner.objects.get_mut(&peer) {
            Some(Object::MessagePipe(peer_end)) => peer_end.incoming.push_back((bytes.to_vec(), handles)),
            _ => return KernelResult::FailedPrecondition,
        }
        drop(inner);
        self.cv.notify_all();
        KernelResult::Ok
    }

    fn read_data(&self, handle: RawHandle, max_bytes: usize) -> Result<Vec<u8>, KernelResult> {
        let mut inner = self.inner.lock().unwrap();
        let pipe_id = match inner.objects.get(&handle) {
            Some(Object::DataConsumer { pipe_id }) => *pipe_id,
            _ => return Err(KernelResult::InvalidArgument),
        };
        let pipe = inner.pipes.get_mut(&pipe_id).ok_or(KernelResult::InvalidArgument)?;
        if pipe.read_reserved.is_some() {
            return Err(KernelResult::Busy);
        }
        if pipe.buffer.is_empty() {
            return Err(if pipe.producer_alive { KernelResult::ShouldWait } else { KernelResult::FailedPrecondition });
        }
        let n = max_bytes.min(pipe.buffer.len());
        let out: Vec<u8> = pipe.buffer.drain(..n).collect();
        drop(inner);
        self.cv.notify_all();
        Ok(out)
    }

    fn begin_read_data(&self, handle: RawHandle, num_bytes: usize) -> Result<Vec<u8>, KernelResult> {
        let mut inner = self.inner.lock().unwrap();
        let pipe_id = match inner.objects.get(&handle) {
            Some(Object::DataConsumer { pipe_id }) => *pipe_id,
            _ => return Err(KernelResult::InvalidArgument),
        };
        let pipe = inner.pipes.get_mut(&pipe_id).ok_or(KernelResult::InvalidArgument)?;
        if pipe.read_reserved.is_some() {
            return Err(KernelResult::Busy);
        }
        if pipe.buffer.is_empty() {
            return Err(if pipe.producer_alive { KernelResult::ShouldWait } else { KernelResult::FailedPrecondition });
        }
        let n = if num_bytes == 0 { pipe.buffer.len() } else { num_bytes.min(pipe.buffer.len()) };
        let peek: Vec<u8> = pipe.buffer.iter().take(n).copied().collect();
        pipe.read_reserved = Some(n);
        Ok(peek)
    }

    fn end_read_data(&self, handle: RawHandle, num_bytes_read: usize) -> KernelResult {
        let mut inner = self.inner.lock().unwrap();
        let pipe_id = match inner.objects.get(&handle) {
            Some(Object::DataConsumer { pipe_id }) => *pipe_id,
            _ => return KernelResult::InvalidArgument,
        };
        let pipe = match inner.pipes.get_mut(&pipe_id) {
            Some(p) => p,
            None => return KernelResult::InvalidArgument,
        };
        let reserved = match pipe.read_reserved.take() {
            Some(r) => r,
            None => return KernelResult::FailedPrecondition,
        };
        if num_bytes_read > reserved {
            pipe.read_reserved = Some(reserved);
            return KernelResult::InvalidArgument;
        }
        pipe.buffer.drain(..num_bytes_read);
        drop(inner);
        self.cv.notify_all();
        KernelResult::Ok
    }

    fn write_data(&self, handle: RawHandle, data: &[u8]) -> Result<usize, KernelResult> {
        let mut inner = self.inner.lock().unwrap();
        let pipe_id = match inner.objects.get(&handle) {
            Some(Object::DataProducer { pipe_id }) => *pipe_id,
            _ => return Err(KernelResult::InvalidArgument),
        };
        let pipe = inner.pipes.get_mut(&pipe_id).ok_or(KernelResult::InvalidArgument)?;
        if pipe.write_reserved {
            return Err(KernelResult::Busy);
        }
        if !pipe.consumer_alive {
            return Err(KernelResult::FailedPrecondition);
        }
        let room = pipe.capacity.saturating_sub(pipe.buffer.len());
        if room == 0 {
            return Err(KernelResult::ShouldWait);
        }
        let n = data.len().min(room);
        pipe.buffer.extend(&data[..n]);
        drop(inner);
        self.cv.notify_all();
        Ok(n)
    }

    fn begin_write_data(&self, handle: RawHandle, num_bytes: usize) -> KernelResult {
        let mut inner = self.inner.lock().unwrap();
        let pipe_id = match inner.objects.get(&handle) {
            Some(Object::DataProducer { pipe_id }) => *pipe_id,
            _ => return KernelResult::InvalidArgument,
        };
        let pipe = match inner.pipes.get_mut(&pipe_id) {
            Some(p) => p,
            None => return KernelResult::InvalidArgument,
        };
        if pipe.write_reserved {
            return KernelResult::Busy;
        }
        if num_bytes > pipe.capacity {
            return KernelResult::ResourceExhausted;
        }
        pipe.write_reserved = true;
        pipe.staged_write.clear();
        KernelResult::Ok
    }

    fn commit_write_data(&self, handle: RawHandle, data: &[u8]) -> Result<usize, KernelResult> {
        let mut inner = self.inner.lock().unwrap();
        let pipe_id = match inner.objects.get(&handle) {
            Some(Object::DataProducer { pipe_id }) => *pipe_id,
            _ => return Err(KernelResult::InvalidArgument),
        };
        let pipe = inner.pipes.get_mut(&pipe_id).ok_or(KernelResult::InvalidArgument)?;
        if !pipe.write_reserved {
            return Err(KernelResult::FailedPrecondition);
        }
        let room = pipe.capacity.saturating_sub(pipe.buffer.len() + pipe.staged_write.len());
        let n = data.len().min(room);
        pipe.staged_write.extend_from_slice(&data[..n]);
        Ok(n)
    }

    fn end_write_data(&self, handle: RawHandle, num_bytes_written: usize) -> KernelResult {
        let mut inner = self.inner.lock().unwrap();
        let pipe_id = match inner.objects.get(&handle) {
            Some(Object::DataProducer { pipe_id }) => *pipe_id,
            _ => return KernelResult::InvalidArgument,
        };
        let pipe = match inner.pipes.get_mut(&pipe_id) {
            Some(p) => p,
            None => return KernelResult::InvalidArgument,
        };
        if !pipe.write_reserved {
            return KernelResult::FailedPrecondition;
        }
        if num_bytes_written > pipe.staged_write.len() {
            return KernelResult::InvalidArgument;
        }
        let committed: Vec<u8> = pipe.staged_write.drain(..num_bytes_written).collect();
        pipe.buffer.extend(committed);
        pipe.staged_write.clear();
        pipe.write_reserved = false;
        drop(inner);
        self.cv.notify_all();
        KernelResult::Ok
    }

    fn wait(&self, handle: RawHandle, signals: Signals, deadline: Deadline) -> (KernelResult, SignalState) {
        let (result, _, mut states) = self.wait_many(&[handle], &[signals], deadline);
        (result, states.pop().unwrap_or_default())
    }

    fn wait_many(
        &self,
        handles: &[RawHandle],
        signals: &[Signals],
        deadline: Deadline,
    ) -> (KernelResult, Option<usize>, Vec<SignalState>) {
        let start = Instant::now();
        let mut guard = self.inner.lock().unwrap();
        loop {
            let states: Vec<SignalState> = handles.iter().map(|h| Self::signal_state_of(&guard, *h)).collect();
            for (i, (state, want)) in states.iter().zip(signals).enumerate() {
                if state.satisfied.intersects(*want) {
                    return (KernelResult::Ok, Some(i), states);
                }
            }
            for (i, (state, want)) in states.iter().zip(signals).enumerate() {
                if !state.satisfiable.intersects(*want) {
                    return (KernelResult::FailedPrecondition, Some(i), states);
                }
            }
            let remaining = match deadline {
                None => None,
                Some(budget) => {
                    let elapsed = start.elapsed();
                    if elapsed >= budget {
                        return (KernelResult::DeadlineExceeded, None, states);
                    }
                    Some(budget - elapsed)
                }
            };
            guard = match remaining {
                None => self.cv.wait(guard).unwrap(),
                Some(r) => self.cv.wait_timeout(guard, r).unwrap().0,
            };
        }
    }

    fn close(&self, handle: RawHandle) -> KernelResult {
        if handle == INVALID_HANDLE {
            return KernelResult::InvalidArgument;
        }
        let mut inner = self.inner.lock().unwrap();
        let obj = match inner.objects.remove(&handle) {
            Some(obj) => obj,
            None => return KernelResult::InvalidArgument,
        };
        match obj {
            Object::MessagePipe(end) => {
                inner.peer_closed.insert(end.peer);
            }
            Object::DataProducer { pipe_id } => {
                if let Some(pipe) = inner.pipes.get_mut(&pipe_id) {
                    pipe.producer_alive = false;
                    inner.peer_closed.insert(pipe.consumer_handle);
                }
            }
            Object::DataConsumer { pipe_id } => {
                if let Some(pipe) = inner.pipes.get_mut(&pipe_id) {
                    pipe.consumer_alive = false;
                    inner.peer_closed.insert(pipe.producer_handle);
                }
            }
            Object::SharedBuffer { .. } => {}
        }
        drop(inner);
        self.cv.notify_all();
        KernelResult::Ok
    }

    fn get_time_ticks_now(&self) -> i64 {
        self.epoch.elapsed().as_micros() as i64
    }
}
