// canal-bridge/src/worker.rs
//
// Background threads moving frames between a driver and its queues.
//
// This file is part of the Rust 'canal-bridge' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! Receive and write worker threads.
//!
//! The receive worker sits in the driver's blocking receive and moves each
//! frame into the inbound queue. The write worker takes frames from the
//! outbound queue and hands them to the driver's blocking send. Both need a
//! generation 2 driver.
//!
//! Cancellation is cooperative: the workers check a shared quit flag
//! between driver calls, so they stop within one poll interval of it
//! being set.

use crate::{
    driver::{CanalDriver, Handle},
    frame::CanalFrame,
    queue::FrameQueue,
};
use log::{debug, trace, warn};
use std::{
    fmt, io,
    sync::{
        atomic::{AtomicBool, AtomicI64, AtomicU8, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

/// How long a worker waits in the driver, or on a queue, before checking
/// the quit flag again.
pub const POLL_TIMEOUT: Duration = Duration::from_millis(500);

/// The timeout for each blocking send of the write worker.
pub const SEND_TIMEOUT: Duration = Duration::from_millis(300);

/// How long a thread sleeps between checks for the channel to be opened.
pub const OPEN_WAIT: Duration = Duration::from_millis(50);

// ===== Shared =====

/// The state of a channel shared by the interface and its threads.
pub(crate) struct Shared {
    pub(crate) driver: Arc<dyn CanalDriver>,
    handle: AtomicI64,
    quit: AtomicBool,
    pub(crate) inbound: FrameQueue,
    pub(crate) outbound: FrameQueue,
}

impl Shared {
    pub(crate) fn new(driver: Arc<dyn CanalDriver>) -> Self {
        Self {
            driver,
            handle: AtomicI64::new(0),
            quit: AtomicBool::new(false),
            inbound: FrameQueue::new(),
            outbound: FrameQueue::new(),
        }
    }

    /// The open handle, if the channel is open.
    pub(crate) fn handle(&self) -> Option<Handle> {
        match self.handle.load(Ordering::Acquire) {
            h if h > 0 => Some(h),
            _ => None,
        }
    }

    pub(crate) fn set_handle(&self, handle: Option<Handle>) {
        self.handle.store(handle.unwrap_or(0), Ordering::Release);
    }

    /// Tells every thread of the channel to stop.
    pub(crate) fn quit(&self) {
        self.quit.store(true, Ordering::Release);
    }

    pub(crate) fn should_quit(&self) -> bool {
        self.quit.load(Ordering::Acquire)
    }

    pub(crate) fn reset_quit(&self) {
        self.quit.store(false, Ordering::Release);
    }
}

impl fmt::Debug for Shared {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Shared")
            .field("handle", &self.handle())
            .field("quit", &self.should_quit())
            .field("inbound", &self.inbound.len())
            .field("outbound", &self.outbound.len())
            .finish()
    }
}

// ===== WorkerState =====

/// The lifecycle of a worker thread.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Not started
    Idle = 0,
    /// In the driver loop
    Running = 1,
    /// Quit was requested; leaving the loop
    Draining = 2,
    /// The thread has finished
    Stopped = 3,
}

impl From<u8> for WorkerState {
    fn from(val: u8) -> Self {
        match val {
            1 => Self::Running,
            2 => Self::Draining,
            3 => Self::Stopped,
            _ => Self::Idle,
        }
    }
}

/// Which workers are running on an interface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerSet {
    /// The receive worker is running
    pub receive: bool,
    /// The write worker is running
    pub write: bool,
}

impl WorkerSet {
    /// Determines if neither worker is running.
    pub fn is_empty(&self) -> bool {
        !self.receive && !self.write
    }
}

// ===== Worker =====

/// A running worker thread.
pub(crate) struct Worker {
    state: Arc<AtomicU8>,
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    fn spawn<F>(name: &str, shared: Arc<Shared>, body: F) -> io::Result<Self>
    where
        F: FnOnce(&Shared, &AtomicU8) + Send + 'static,
    {
        let state = Arc::new(AtomicU8::new(WorkerState::Idle as u8));
        let thr_state = Arc::clone(&state);

        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                thr_state.store(WorkerState::Running as u8, Ordering::Release);
                body(&shared, &thr_state);
                thr_state.store(WorkerState::Stopped as u8, Ordering::Release);
            })?;

        debug!("Started worker '{}'", name);
        Ok(Self {
            state,
            thread: Some(thread),
        })
    }

    /// Starts the receive worker.
    pub(crate) fn receive(shared: Arc<Shared>) -> io::Result<Self> {
        Self::spawn("canal-rx", shared, receive_loop)
    }

    /// Starts the write worker.
    pub(crate) fn write(shared: Arc<Shared>) -> io::Result<Self> {
        Self::spawn("canal-tx", shared, write_loop)
    }

    pub(crate) fn state(&self) -> WorkerState {
        WorkerState::from(self.state.load(Ordering::Acquire))
    }

    /// Waits for the thread to finish.
    ///
    /// The quit flag must already be set, or this won't return.
    pub(crate) fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            let name = thread.thread().name().unwrap_or("worker").to_string();
            if thread.join().is_err() {
                warn!("Worker '{}' panicked", name);
                self.state
                    .store(WorkerState::Stopped as u8, Ordering::Release);
            }
            debug!("Stopped worker '{}'", name);
        }
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Worker")
            .field("state", &self.state())
            .finish()
    }
}

/// Blocks in the driver's receive, queueing each frame for the
/// application. Frames that don't fit in the queue are dropped.
fn receive_loop(shared: &Shared, state: &AtomicU8) {
    while !shared.should_quit() {
        let Some(handle) = shared.handle() else {
            thread::sleep(OPEN_WAIT);
            continue;
        };

        match shared.driver.blocking_receive(handle, POLL_TIMEOUT) {
            Ok(frame) => {
                trace!("Received {}", frame);
                if let Err(frame) = shared.inbound.try_enqueue(frame) {
                    warn!("Inbound queue full. Dropping frame {}", frame);
                }
            }
            Err(err) if err.should_retry() => (),
            Err(err) => {
                trace!("Blocking receive failed: {}", err);
                thread::sleep(OPEN_WAIT);
            }
        }
    }
    state.store(WorkerState::Draining as u8, Ordering::Release);
}

/// Moves frames from the outbound queue to the driver's blocking send.
///
/// A frame that fails to send is kept and tried again before any newer
/// frame. There is no limit on the number of attempts. A frame still
/// unsent when the worker quits is put back at the front of the queue.
fn write_loop(shared: &Shared, state: &AtomicU8) {
    let mut pending: Option<CanalFrame> = None;

    while !shared.should_quit() {
        let frame = match pending
            .take()
            .or_else(|| shared.outbound.wait_and_dequeue(POLL_TIMEOUT))
        {
            Some(frame) => frame,
            None => continue,
        };

        let Some(handle) = shared.handle() else {
            pending = Some(frame);
            thread::sleep(OPEN_WAIT);
            continue;
        };

        match shared.driver.blocking_send(handle, &frame, SEND_TIMEOUT) {
            Ok(()) => trace!("Sent {}", frame),
            Err(err) => {
                trace!("Blocking send of {} failed: {}", frame, err);
                pending = Some(frame);
            }
        }
    }

    // An unsent frame goes back to the front of the queue for the next
    // write worker on this channel.
    state.store(WorkerState::Draining as u8, Ordering::Release);
    if let Some(frame) = pending {
        match shared.outbound.requeue(frame) {
            Ok(()) => debug!("Returned unsent frame {} to the outbound queue", frame),
            Err(frame) => warn!("Outbound queue full. Dropping unsent frame {}", frame),
        }
    }
}

/////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        driver::{Capabilities, ChannelStatus, Statistics},
        frame::FrameFlags,
        Error, Result, StatusCode,
    };
    use parking_lot::Mutex;
    use std::{
        ffi::CStr,
        sync::atomic::AtomicUsize,
        time::Instant,
    };

    // A driver whose blocking calls are scripted from the test.
    #[derive(Default)]
    struct Scripted {
        rx: FrameQueue,
        sent: Mutex<Vec<CanalFrame>>,
        send_failures: AtomicUsize,
    }

    impl CanalDriver for Scripted {
        fn capabilities(&self) -> Capabilities {
            Capabilities::BLOCKING_SEND | Capabilities::BLOCKING_RECEIVE
        }
        fn open(&self, _: &CStr, _: u32) -> Handle {
            1
        }
        fn close(&self, _: Handle) -> Result<()> {
            Ok(())
        }
        fn level(&self, _: Handle) -> u32 {
            1
        }
        fn send(&self, _: Handle, _: &CanalFrame) -> Result<()> {
            Ok(())
        }
        fn receive(&self, _: Handle) -> Result<CanalFrame> {
            Err(Error::Status(StatusCode::FifoEmpty))
        }
        fn data_available(&self, _: Handle) -> u32 {
            0
        }
        fn status(&self, _: Handle) -> Result<ChannelStatus> {
            Ok(ChannelStatus::default())
        }
        fn statistics(&self, _: Handle) -> Result<Statistics> {
            Ok(Statistics::default())
        }
        fn set_filter(&self, _: Handle, _: u32) -> Result<()> {
            Ok(())
        }
        fn set_mask(&self, _: Handle, _: u32) -> Result<()> {
            Ok(())
        }
        fn version(&self) -> u32 {
            0
        }
        fn dll_version(&self) -> u32 {
            0
        }
        fn vendor_string(&self) -> String {
            String::new()
        }
        fn blocking_send(&self, _: Handle, frame: &CanalFrame, _: Duration) -> Result<()> {
            let fails = self.send_failures.load(Ordering::SeqCst);
            if fails > 0 {
                self.send_failures.store(fails - 1, Ordering::SeqCst);
                return Err(Error::Status(StatusCode::TrmFull));
            }
            self.sent.lock().push(*frame);
            Ok(())
        }
        fn blocking_receive(&self, _: Handle, timeout: Duration) -> Result<CanalFrame> {
            self.rx
                .wait_and_dequeue(timeout)
                .ok_or(Error::Status(StatusCode::Timeout))
        }
    }

    fn frame(id: u32) -> CanalFrame {
        CanalFrame::init(id, &[0xAA], FrameFlags::empty()).unwrap()
    }

    fn setup() -> (Arc<Scripted>, Arc<Shared>) {
        let drv = Arc::new(Scripted::default());
        let shared = Arc::new(Shared::new(drv.clone()));
        shared.set_handle(Some(1));
        (drv, shared)
    }

    fn wait_for(cond: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "timed out");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_shared_handle() {
        let (_, shared) = setup();
        assert_eq!(shared.handle(), Some(1));
        shared.set_handle(None);
        assert_eq!(shared.handle(), None);

        assert!(!shared.should_quit());
        shared.quit();
        assert!(shared.should_quit());
        shared.reset_quit();
        assert!(!shared.should_quit());
    }

    #[test]
    fn test_receive_worker() {
        let (drv, shared) = setup();
        let mut worker = Worker::receive(shared.clone()).unwrap();
        wait_for(|| worker.state() == WorkerState::Running);

        for id in 0x100..0x103 {
            drv.rx.try_enqueue(frame(id)).unwrap();
        }
        wait_for(|| shared.inbound.len() == 3);

        let ids: Vec<u32> = std::iter::from_fn(|| shared.inbound.try_dequeue())
            .map(|f| f.raw_id())
            .collect();
        assert_eq!(ids, vec![0x100, 0x101, 0x102]);

        // Quit is seen within about one poll interval
        let start = Instant::now();
        shared.quit();
        worker.join();
        assert!(start.elapsed() < POLL_TIMEOUT * 3);
        assert_eq!(worker.state(), WorkerState::Stopped);
    }

    #[test]
    fn test_receive_worker_drops_when_full() {
        let (drv, shared) = setup();
        for id in 0..shared.inbound.capacity() as u32 {
            shared.inbound.try_enqueue(frame(id & 0x7FF)).unwrap();
        }

        let mut worker = Worker::receive(shared.clone()).unwrap();
        drv.rx.try_enqueue(frame(0x7FF)).unwrap();
        wait_for(|| drv.rx.is_empty() && shared.inbound.dropped() == 1);

        shared.quit();
        worker.join();
        assert_eq!(shared.inbound.len(), shared.inbound.capacity());
    }

    #[test]
    fn test_write_worker_retries() {
        let (drv, shared) = setup();
        drv.send_failures.store(2, Ordering::SeqCst);

        let mut worker = Worker::write(shared.clone()).unwrap();
        shared.outbound.try_enqueue(frame(0x200)).unwrap();
        shared.outbound.try_enqueue(frame(0x201)).unwrap();

        wait_for(|| drv.sent.lock().len() == 2);
        shared.quit();
        worker.join();

        // The failed frame went out first, and exactly once
        let ids: Vec<u32> = drv.sent.lock().iter().map(|f| f.raw_id()).collect();
        assert_eq!(ids, vec![0x200, 0x201]);
        assert!(shared.outbound.is_empty());
    }

    #[test]
    fn test_write_worker_requeues_on_quit() {
        let (drv, shared) = setup();
        drv.send_failures.store(usize::MAX, Ordering::SeqCst);

        let mut worker = Worker::write(shared.clone()).unwrap();
        shared.outbound.try_enqueue(frame(0x200)).unwrap();
        shared.outbound.try_enqueue(frame(0x201)).unwrap();

        // The first frame is out of the queue and failing
        wait_for(|| shared.outbound.len() == 1);
        shared.quit();
        worker.join();

        assert!(drv.sent.lock().is_empty());
        let ids: Vec<u32> = std::iter::from_fn(|| shared.outbound.try_dequeue())
            .map(|f| f.raw_id())
            .collect();
        assert_eq!(ids, vec![0x200, 0x201]);
    }

    #[test]
    fn test_worker_waits_for_open() {
        let (drv, shared) = setup();
        shared.set_handle(None);

        let mut worker = Worker::receive(shared.clone()).unwrap();
        drv.rx.try_enqueue(frame(0x10)).unwrap();
        thread::sleep(OPEN_WAIT * 3);
        assert!(shared.inbound.is_empty());

        shared.set_handle(Some(1));
        wait_for(|| shared.inbound.len() == 1);

        shared.quit();
        worker.join();
    }
}
