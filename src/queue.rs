// canal-bridge/src/queue.rs
//
// Bounded frame queues between the driver and the application.
//
// This file is part of the Rust 'canal-bridge' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! Bounded FIFO queues of frames.
//!
//! The queues decouple the timing of the driver from the timing of the
//! application. A producer never blocks: once a queue holds
//! [`MAX_QUEUED_FRAMES`] frames, new ones are handed back to the caller.
//! A consumer can wait, with a timeout, for the next frame.

use crate::frame::CanalFrame;
use parking_lot::{Condvar, Mutex};
use std::{
    collections::VecDeque,
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

/// The most frames a queue will hold.
pub const MAX_QUEUED_FRAMES: usize = 1000;

/// A bounded, thread-safe, FIFO queue of frames.
///
/// Each frame in the queue accounts for exactly one wakeup of a waiting
/// consumer, so a consumer never wakes to an empty queue without a
/// timeout having expired.
#[derive(Debug)]
pub struct FrameQueue {
    frames: Mutex<VecDeque<CanalFrame>>,
    avail: Condvar,
    cap: usize,
    dropped: AtomicU64,
}

impl FrameQueue {
    /// Creates a queue with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(MAX_QUEUED_FRAMES)
    }

    /// Creates a queue holding at most `cap` frames.
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            frames: Mutex::new(VecDeque::with_capacity(cap.min(64))),
            avail: Condvar::new(),
            cap,
            dropped: AtomicU64::new(0),
        }
    }

    /// Appends a frame to the back of the queue.
    ///
    /// If the queue is full the frame is returned as the error, and the
    /// queue is left unchanged.
    pub fn try_enqueue(&self, frame: CanalFrame) -> Result<(), CanalFrame> {
        let mut frames = self.frames.lock();
        if frames.len() >= self.cap {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return Err(frame);
        }
        frames.push_back(frame);
        self.avail.notify_one();
        Ok(())
    }

    /// Puts a frame back at the front of the queue, ahead of every frame
    /// already waiting.
    ///
    /// The capacity still applies: if the queue is full the frame is
    /// returned as the error.
    pub fn requeue(&self, frame: CanalFrame) -> Result<(), CanalFrame> {
        let mut frames = self.frames.lock();
        if frames.len() >= self.cap {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return Err(frame);
        }
        frames.push_front(frame);
        self.avail.notify_one();
        Ok(())
    }

    /// Takes the frame at the front of the queue, waiting up to `timeout`
    /// for one to arrive.
    ///
    /// A timeout too large to be a point in time waits indefinitely.
    pub fn wait_and_dequeue(&self, timeout: Duration) -> Option<CanalFrame> {
        let deadline = Instant::now().checked_add(timeout);
        let mut frames = self.frames.lock();
        while frames.is_empty() {
            match deadline {
                Some(deadline) => {
                    if self.avail.wait_until(&mut frames, deadline).timed_out() {
                        break;
                    }
                }
                None => self.avail.wait(&mut frames),
            }
        }
        frames.pop_front()
    }

    /// Takes the frame at the front of the queue, if there is one.
    pub fn try_dequeue(&self) -> Option<CanalFrame> {
        self.frames.lock().pop_front()
    }

    /// The number of frames in the queue.
    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    /// Determines if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.frames.lock().is_empty()
    }

    /// The most frames the queue will hold.
    pub fn capacity(&self) -> usize {
        self.cap
    }

    /// Discards every frame in the queue.
    pub fn clear(&self) {
        self.frames.lock().clear();
    }

    /// The number of frames rejected because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for FrameQueue {
    fn default() -> Self {
        Self::new()
    }
}

/////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameFlags;
    use proptest::prelude::*;
    use std::{sync::Arc, thread};

    fn frame(id: u32) -> CanalFrame {
        CanalFrame::init(id & 0x7FF, &[id as u8], FrameFlags::empty()).unwrap()
    }

    #[test]
    fn test_fifo() {
        let q = FrameQueue::new();
        assert!(q.is_empty());
        assert_eq!(q.capacity(), MAX_QUEUED_FRAMES);

        for id in 0x100..0x103 {
            q.try_enqueue(frame(id)).unwrap();
        }
        assert_eq!(q.len(), 3);

        for id in 0x100..0x103 {
            let f = q.wait_and_dequeue(Duration::ZERO).unwrap();
            assert_eq!(f.raw_id(), id);
        }
        assert!(q.try_dequeue().is_none());
    }

    #[test]
    fn test_full() {
        let q = FrameQueue::new();
        for id in 0..MAX_QUEUED_FRAMES as u32 {
            q.try_enqueue(frame(id)).unwrap();
        }

        let rejected = q.try_enqueue(frame(0x7FF)).unwrap_err();
        assert_eq!(rejected.raw_id(), 0x7FF);
        assert_eq!(q.len(), MAX_QUEUED_FRAMES);
        assert_eq!(q.dropped(), 1);

        q.clear();
        assert!(q.is_empty());
        assert!(q.try_enqueue(frame(1)).is_ok());
    }

    #[test]
    fn test_timeout() {
        let q = FrameQueue::new();
        let start = Instant::now();
        assert!(q.wait_and_dequeue(Duration::from_millis(50)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_wakeup() {
        let q = Arc::new(FrameQueue::new());

        let consumer = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.wait_and_dequeue(Duration::from_secs(5)))
        };

        thread::sleep(Duration::from_millis(20));
        q.try_enqueue(frame(0x42)).unwrap();

        let f = consumer.join().unwrap().unwrap();
        assert_eq!(f.raw_id(), 0x42);
    }

    #[test]
    fn test_requeue() {
        let q = FrameQueue::with_capacity(2);
        q.try_enqueue(frame(0x101)).unwrap();
        q.requeue(frame(0x100)).unwrap();

        let rejected = q.requeue(frame(0x0FF)).unwrap_err();
        assert_eq!(rejected.raw_id(), 0x0FF);
        assert_eq!(q.dropped(), 1);

        assert_eq!(q.try_dequeue().unwrap().raw_id(), 0x100);
        assert_eq!(q.try_dequeue().unwrap().raw_id(), 0x101);
    }

    #[test]
    fn test_unbounded_wait() {
        let q = Arc::new(FrameQueue::new());
        q.try_enqueue(frame(0x10)).unwrap();
        assert_eq!(q.wait_and_dequeue(Duration::MAX).unwrap().raw_id(), 0x10);

        // Nothing queued yet: waits until a frame shows up
        let consumer = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.wait_and_dequeue(Duration::MAX))
        };
        thread::sleep(Duration::from_millis(20));
        q.try_enqueue(frame(0x11)).unwrap();

        let f = consumer.join().unwrap().unwrap();
        assert_eq!(f.raw_id(), 0x11);
    }

    proptest! {
        #[test]
        fn prop_cap_and_order(cap in 1usize..64, ids in prop::collection::vec(0u32..0x800, 0..200)) {
            let q = FrameQueue::with_capacity(cap);
            let mut accepted = Vec::new();

            for &id in &ids {
                match q.try_enqueue(frame(id)) {
                    Ok(()) => accepted.push(id),
                    Err(f) => prop_assert_eq!(f.raw_id(), id),
                }
                prop_assert!(q.len() <= cap);
            }

            prop_assert_eq!(accepted.len(), ids.len().min(cap));
            prop_assert_eq!(q.dropped() as usize, ids.len() - accepted.len());
            prop_assert_eq!(&accepted[..], &ids[..accepted.len()]);

            let drained: Vec<u32> = std::iter::from_fn(|| q.try_dequeue())
                .map(|f| f.raw_id())
                .collect();
            prop_assert_eq!(drained, accepted);
        }
    }
}
