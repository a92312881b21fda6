// canal-bridge/src/bridge.rs
//
// Delivers received frames to an application callback.
//
// This file is part of the Rust 'canal-bridge' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! The asynchronous delivery bridge.
//!
//! The bridge runs the driver's blocking receive on a worker thread and
//! hands every frame to a callback running on a separate dispatcher thread.
//! The two are joined by a zero-capacity channel, so:
//!
//! - frames reach the callback in the order they were received;
//! - the callback never runs concurrently with itself;
//! - the worker waits for the callback to accept each frame before it
//!   reads the next one from the driver.
//!
//! ```text
//!   driver --blocking_receive--> [worker] --rendezvous--> [dispatcher] --> callback
//! ```

use crate::{
    frame::CanalFrame,
    worker::{Shared, OPEN_WAIT, POLL_TIMEOUT},
};
use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, error, trace, warn};
use std::{
    fmt, io,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
};

/// The lifecycle of the delivery bridge.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    /// No listener was registered
    Inactive = 0,
    /// Frames are being delivered to the listener
    Listening = 1,
    /// Shutting down; frames already submitted are still delivered
    Draining = 2,
    /// Both threads have finished
    Terminated = 3,
}

impl From<u8> for BridgeState {
    fn from(val: u8) -> Self {
        match val {
            1 => Self::Listening,
            2 => Self::Draining,
            3 => Self::Terminated,
            _ => Self::Inactive,
        }
    }
}

/// Delivers frames from a driver to a single callback.
pub struct DeliveryBridge {
    state: Arc<AtomicU8>,
    worker: Option<JoinHandle<()>>,
    dispatcher: Option<JoinHandle<()>>,
}

impl DeliveryBridge {
    /// Creates a bridge with no listener.
    pub fn new() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(BridgeState::Inactive as u8)),
            worker: None,
            dispatcher: None,
        }
    }

    /// The current state of the bridge.
    pub fn state(&self) -> BridgeState {
        BridgeState::from(self.state.load(Ordering::Acquire))
    }

    /// Determines if the bridge threads may still be running.
    pub(crate) fn is_active(&self) -> bool {
        matches!(self.state(), BridgeState::Listening | BridgeState::Draining)
    }

    /// Starts delivering frames from the channel to the callback.
    ///
    /// Only valid while the bridge is `Inactive`.
    pub(crate) fn listen<F>(&mut self, shared: Arc<Shared>, callback: F) -> io::Result<()>
    where
        F: FnMut(CanalFrame) + Send + 'static,
    {
        let (tx, rx) = bounded::<CanalFrame>(0);

        // The dispatcher is the last thread out; the worker has returned
        // by the time the channel disconnects.
        let state = Arc::clone(&self.state);
        let dispatcher = thread::Builder::new()
            .name("canal-dispatch".into())
            .spawn(move || {
                dispatch(rx, callback);
                state.store(BridgeState::Terminated as u8, Ordering::Release);
            })?;

        let worker_shared = Arc::clone(&shared);
        let worker = match thread::Builder::new()
            .name("canal-listen".into())
            .spawn(move || listen(&worker_shared, tx))
        {
            Ok(worker) => worker,
            Err(err) => {
                // The sender was dropped with the closure, so the
                // dispatcher is already on its way out.
                let _ = dispatcher.join();
                return Err(err);
            }
        };

        self.state
            .store(BridgeState::Listening as u8, Ordering::Release);
        self.worker = Some(worker);
        self.dispatcher = Some(dispatcher);
        debug!("Delivery bridge listening");
        Ok(())
    }

    /// Stops the bridge.
    ///
    /// The quit flag of the channel must already be set. This waits for the
    /// worker to leave the driver, then for the dispatcher to deliver
    /// whatever was already handed over, and only then reports
    /// `Terminated`.
    ///
    /// Called from the callback itself, this returns at once, leaving the
    /// bridge `Draining` until the dispatcher finishes on its own.
    pub(crate) fn shutdown(&mut self) {
        if self.worker.is_none() && self.dispatcher.is_none() {
            return;
        }
        self.state
            .store(BridgeState::Draining as u8, Ordering::Release);

        // The callback may shut down the interface from the dispatcher
        // itself. The worker could then be blocked handing a frame to this
        // very thread, so neither can be waited on. Both exit on their own.
        let on_dispatcher = self
            .dispatcher
            .as_ref()
            .is_some_and(|thr| thr.thread().id() == thread::current().id());

        let threads = [self.worker.take(), self.dispatcher.take()];
        if on_dispatcher {
            debug!("Delivery bridge stopping from its own callback");
            return;
        }

        for thread in threads.into_iter().flatten() {
            if thread.join().is_err() {
                warn!("Delivery bridge thread panicked");
            }
        }
        self.state
            .store(BridgeState::Terminated as u8, Ordering::Release);
        debug!("Delivery bridge terminated");
    }
}

impl Default for DeliveryBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DeliveryBridge {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("DeliveryBridge")
            .field("state", &self.state())
            .finish()
    }
}

/// The bridge worker: receives from the driver and submits to the
/// dispatcher until told to quit.
fn listen(shared: &Shared, tx: Sender<CanalFrame>) {
    while !shared.should_quit() {
        let Some(handle) = shared.handle() else {
            thread::sleep(OPEN_WAIT);
            continue;
        };

        match shared.driver.blocking_receive(handle, POLL_TIMEOUT) {
            Ok(frame) => {
                trace!("Delivering {}", frame);
                if let Err(err) = tx.send(frame) {
                    warn!("Listener is gone. Discarding frame {}", err.into_inner());
                }
            }
            Err(err) if err.should_retry() => (),
            Err(err) => {
                trace!("Blocking receive failed: {}", err);
                thread::sleep(OPEN_WAIT);
            }
        }
    }
    // Dropping the sender lets the dispatcher finish.
}

/// The dispatcher: runs the callback for each frame, until the worker
/// drops its end of the channel.
fn dispatch<F>(rx: Receiver<CanalFrame>, mut callback: F)
where
    F: FnMut(CanalFrame),
{
    for frame in rx.iter() {
        if panic::catch_unwind(AssertUnwindSafe(|| callback(frame))).is_err() {
            error!("Listener panicked while handling {}", frame);
        }
    }
}

/////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameFlags;

    fn frame(id: u32) -> CanalFrame {
        CanalFrame::init(id, &[], FrameFlags::empty()).unwrap()
    }

    #[test]
    fn test_state() {
        let mut bridge = DeliveryBridge::new();
        assert_eq!(bridge.state(), BridgeState::Inactive);

        // Nothing to stop
        bridge.shutdown();
        assert_eq!(bridge.state(), BridgeState::Inactive);
    }

    #[test]
    fn test_dispatch_order() {
        let (tx, rx) = bounded(0);
        let (out_tx, out_rx) = crossbeam_channel::unbounded();

        let thr = thread::spawn(move || {
            dispatch(rx, move |f: CanalFrame| {
                out_tx.send(f.raw_id()).unwrap();
            })
        });

        for id in 0x100..0x103 {
            tx.send(frame(id)).unwrap();
        }
        drop(tx);
        thr.join().unwrap();

        let ids: Vec<u32> = out_rx.iter().collect();
        assert_eq!(ids, vec![0x100, 0x101, 0x102]);
    }

    #[test]
    fn test_dispatch_survives_panic() {
        let (tx, rx) = bounded(0);
        let (out_tx, out_rx) = crossbeam_channel::unbounded();

        let thr = thread::spawn(move || {
            dispatch(rx, move |f: CanalFrame| {
                if f.raw_id() == 0x101 {
                    panic!("bad frame");
                }
                out_tx.send(f.raw_id()).unwrap();
            })
        });

        for id in 0x100..0x103 {
            tx.send(frame(id)).unwrap();
        }
        drop(tx);
        thr.join().unwrap();

        let ids: Vec<u32> = out_rx.iter().collect();
        assert_eq!(ids, vec![0x100, 0x102]);
    }
}
