// canal-bridge/src/interface.rs
//
// The application's handle to a CANAL driver.
//
// This file is part of the Rust 'canal-bridge' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! The CANAL driver interface.
//!
//! A [`CanalInterface`] owns one driver and, at most, one open channel on
//! it. It checks the preconditions of each CANAL operation before passing
//! it through to the driver, so that the driver never sees a call on a
//! channel that isn't open:
//!
//! ```text
//!   Unloaded --init--> Loaded --open--> Opened --close--> Closed
//!                        ^                                  |
//!                        +---------------open---------------+
//! ```
//!
//! Received frames can be handled in three ways: by polling the driver
//! with [`receive()`](CanalInterface::receive) and
//! [`blocking_receive()`](CanalInterface::blocking_receive), through the
//! queues filled by the background workers, or by registering a listener
//! callback with [`add_listener()`](CanalInterface::add_listener).

use crate::{
    bridge::{BridgeState, DeliveryBridge},
    config::DriverConfig,
    driver::{CanalDriver, Capabilities, ChannelStatus, Handle, Statistics},
    frame::CanalFrame,
    loader::{DynamicDriver, Symbol},
    worker::{Shared, Worker, WorkerSet, WorkerState},
    Error, Result, StatusCode,
};
use log::{debug, info, warn};
use std::{fmt, sync::Arc, time::Duration};

/// The lifecycle of an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceState {
    /// No driver loaded
    Unloaded,
    /// A driver is loaded, but no channel was opened
    Loaded,
    /// A channel is open
    Opened,
    /// The channel was closed
    Closed,
}

/// An application's interface to a CANAL driver.
pub struct CanalInterface {
    config: DriverConfig,
    state: InterfaceState,
    level: u32,
    shared: Option<Arc<Shared>>,
    rx_worker: Option<Worker>,
    tx_worker: Option<Worker>,
    bridge: DeliveryBridge,
}

impl CanalInterface {
    /// Creates an interface with no driver.
    pub fn new() -> Self {
        Self {
            config: DriverConfig::default(),
            state: InterfaceState::Unloaded,
            level: 0,
            shared: None,
            rx_worker: None,
            tx_worker: None,
            bridge: DeliveryBridge::new(),
        }
    }

    /// Creates an interface and loads the configured driver into it.
    pub fn load(config: DriverConfig) -> Result<Self> {
        let mut iface = Self::new();
        iface.init(config)?;
        Ok(iface)
    }

    /// Loads the driver library named by the configuration.
    ///
    /// A driver can only be loaded once into an interface.
    pub fn init(&mut self, config: DriverConfig) -> Result<()> {
        if self.shared.is_some() {
            return Err(Error::AlreadyInitialized);
        }
        let driver = DynamicDriver::load(&config.path)?;
        self.init_with_driver(Arc::new(driver), config)
    }

    /// Uses an already loaded driver.
    ///
    /// The path of the configuration is only informational here.
    pub fn init_with_driver(
        &mut self,
        driver: Arc<dyn CanalDriver>,
        config: DriverConfig,
    ) -> Result<()> {
        if self.shared.is_some() {
            return Err(Error::AlreadyInitialized);
        }
        info!(
            "Initialized CANAL interface for '{}' ({})",
            config.path.display(),
            driver.vendor_string()
        );
        self.shared = Some(Arc::new(Shared::new(driver)));
        self.config = config;
        self.state = InterfaceState::Loaded;
        Ok(())
    }

    /// The current lifecycle state.
    pub fn state(&self) -> InterfaceState {
        self.state
    }

    /// The configuration of the interface.
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Determines if the channel is open.
    pub fn is_open(&self) -> bool {
        self.state == InterfaceState::Opened
    }

    /// The optional entry points of the driver.
    pub fn capabilities(&self) -> Capabilities {
        self.shared
            .as_ref()
            .map(|shared| shared.driver.capabilities())
            .unwrap_or_else(Capabilities::empty)
    }

    fn shared(&self) -> Result<&Arc<Shared>> {
        self.shared.as_ref().ok_or(Error::NotInitialized)
    }

    /// Gets the driver and the handle of the open channel.
    fn channel(&self) -> Result<(&dyn CanalDriver, Handle)> {
        let shared = self.shared.as_ref().ok_or(Error::NotOpen)?;
        let handle = shared.handle().ok_or(Error::NotOpen)?;
        Ok((&*shared.driver, handle))
    }

    /// Gets the channel for a call to an optional entry point. A missing
    /// entry point is reported ahead of a closed channel.
    fn channel_with(&self, sym: Symbol) -> Result<(&dyn CanalDriver, Handle)> {
        if !self.capabilities().contains(Capabilities::of(sym)) {
            return Err(Error::NotSupported(sym));
        }
        self.channel()
    }

    // ----- Open and close -----

    /// Opens the channel with the configured parameters and flags.
    ///
    /// If the configuration asks for it, the workers are started as well.
    pub fn open(&mut self) -> Result<()> {
        let shared = Arc::clone(self.shared()?);
        if self.is_open() {
            return Err(Error::AlreadyOpen);
        }

        let params = self.config.c_parameters()?;
        let handle = shared.driver.open(&params, self.config.flags);
        if handle <= 0 {
            warn!(
                "Driver '{}' failed to open '{}'",
                self.config.path.display(),
                self.config.parameters
            );
            return Err(Error::NotOpen);
        }

        shared.reset_quit();
        shared.set_handle(Some(handle));
        self.level = shared.driver.level(handle);
        self.state = InterfaceState::Opened;
        info!(
            "Opened CANAL channel '{}' with handle {}, level {}",
            self.config.parameters, handle, self.level
        );

        if self.config.async_receive {
            self.start_workers()?;
        }
        Ok(())
    }

    /// Closes the channel.
    ///
    /// Any workers and the listener are stopped before the driver is told
    /// to close. The channel is considered closed afterwards, even if the
    /// driver reports an error.
    pub fn close(&mut self) -> Result<()> {
        let (shared, handle) = match (&self.shared, self.state) {
            (Some(shared), InterfaceState::Opened) => match shared.handle() {
                Some(handle) => (Arc::clone(shared), handle),
                None => return Err(Error::NotOpen),
            },
            _ => return Err(Error::NotOpen),
        };

        self.stop_threads();

        let res = shared.driver.close(handle);
        shared.set_handle(None);
        self.state = InterfaceState::Closed;
        match &res {
            Ok(()) => info!("Closed CANAL channel with handle {}", handle),
            Err(err) => warn!("Error closing CANAL channel {}: {}", handle, err),
        }
        res
    }

    // ----- Driver pass-through -----

    /// Sends a frame.
    pub fn send(&self, frame: &CanalFrame) -> Result<()> {
        let (drv, h) = self.channel()?;
        drv.send(h, frame)
    }

    /// Sends a frame, waiting up to `timeout` for the driver to take it.
    pub fn blocking_send(&self, frame: &CanalFrame, timeout: Duration) -> Result<()> {
        let (drv, h) = self.channel_with(Symbol::BlockingSend)?;
        drv.blocking_send(h, frame, timeout)
    }

    /// Receives a frame, if the driver has one.
    pub fn receive(&self) -> Result<CanalFrame> {
        let (drv, h) = self.channel()?;
        drv.receive(h)
    }

    /// Receives a frame, waiting up to `timeout` for one to arrive.
    pub fn blocking_receive(&self, timeout: Duration) -> Result<CanalFrame> {
        let (drv, h) = self.channel_with(Symbol::BlockingReceive)?;
        drv.blocking_receive(h, timeout)
    }

    /// The number of frames waiting in the driver.
    ///
    /// This is always passed to the driver, open or not. It is zero if no
    /// driver is loaded.
    pub fn data_available(&self) -> u32 {
        match &self.shared {
            Some(shared) => shared
                .driver
                .data_available(shared.handle().unwrap_or(0)),
            None => 0,
        }
    }

    /// Gets the status of the channel.
    pub fn status(&self) -> Result<ChannelStatus> {
        let (drv, h) = self.channel()?;
        drv.status(h)
    }

    /// Gets the statistics of the channel.
    pub fn statistics(&self) -> Result<Statistics> {
        let (drv, h) = self.channel()?;
        drv.statistics(h)
    }

    /// Sets the acceptance filter.
    pub fn set_filter(&self, filter: u32) -> Result<()> {
        let (drv, h) = self.channel()?;
        drv.set_filter(h, filter)
    }

    /// Sets the acceptance mask.
    pub fn set_mask(&self, mask: u32) -> Result<()> {
        let (drv, h) = self.channel()?;
        drv.set_mask(h, mask)
    }

    /// Sets the bus bit rate.
    pub fn set_baudrate(&self, baudrate: u32) -> Result<()> {
        let (drv, h) = self.channel_with(Symbol::SetBaudrate)?;
        drv.set_baudrate(h, baudrate)
    }

    /// The driver level, as read when the channel was opened.
    ///
    /// This is zero until the first successful open.
    pub fn level(&self) -> u32 {
        self.level
    }

    /// The CANAL version implemented by the driver.
    pub fn version(&self) -> Result<u32> {
        Ok(self.shared()?.driver.version())
    }

    /// The version of the driver.
    pub fn dll_version(&self) -> Result<u32> {
        Ok(self.shared()?.driver.dll_version())
    }

    /// The vendor string of the driver.
    pub fn vendor_string(&self) -> Result<String> {
        Ok(self.shared()?.driver.vendor_string())
    }

    /// The driver's description of itself, if it provides one.
    pub fn driver_info(&self) -> Option<String> {
        self.shared.as_ref()?.driver.driver_info()
    }

    // ----- Asynchronous paths -----

    /// Registers a callback for every frame received on the channel.
    ///
    /// Frames are delivered in order, one at a time, from a dedicated
    /// thread. The listener can be registered before the channel is opened;
    /// delivery starts once it is. Only one listener can ever be
    /// registered on an interface.
    ///
    /// The listener and the receive worker can't share a channel, so this
    /// fails with [`Error::ReceiverBusy`] while the receive worker runs.
    /// Register the listener before opening a channel configured for
    /// asynchronous receive.
    pub fn add_listener<F>(&mut self, callback: F) -> Result<()>
    where
        F: FnMut(CanalFrame) + Send + 'static,
    {
        let shared = Arc::clone(self.shared()?);
        if self.bridge.state() != BridgeState::Inactive {
            return Err(Error::ListenerActive);
        }
        if !shared
            .driver
            .capabilities()
            .contains(Capabilities::BLOCKING_RECEIVE)
        {
            return Err(Error::NotSupported(Symbol::BlockingReceive));
        }
        if self.rx_worker.is_some() {
            return Err(Error::ReceiverBusy);
        }
        if self.tx_worker.is_none() {
            shared.reset_quit();
        }
        self.bridge.listen(shared, callback)?;
        Ok(())
    }

    /// The state of the listener.
    pub fn listener_state(&self) -> BridgeState {
        self.bridge.state()
    }

    /// Starts the receive and write workers on the open channel.
    ///
    /// A worker is only started if the driver has the blocking call it
    /// needs. The receive worker doesn't start while a listener is
    /// delivering frames from the channel. The result tells which workers
    /// are running.
    pub fn start_workers(&mut self) -> Result<WorkerSet> {
        let shared = Arc::clone(self.shared.as_ref().ok_or(Error::NotOpen)?);
        if !self.is_open() {
            return Err(Error::NotOpen);
        }
        let caps = shared.driver.capabilities();

        // Threads stopped by a shutdown() left the flag raised
        if self.workers().is_empty() && !self.bridge.is_active() {
            shared.reset_quit();
        }

        if self.rx_worker.is_none() {
            if self.bridge.is_active() {
                warn!("A listener is reading the channel. The receive worker won't run.");
            } else if caps.contains(Capabilities::BLOCKING_RECEIVE) {
                self.rx_worker = Some(Worker::receive(Arc::clone(&shared))?);
            } else {
                warn!("Driver has no blocking receive. The receive worker won't run.");
            }
        }

        if self.tx_worker.is_none() {
            if caps.contains(Capabilities::BLOCKING_SEND) {
                self.tx_worker = Some(Worker::write(shared)?);
            } else {
                warn!("Driver has no blocking send. The write worker won't run.");
            }
        }

        Ok(self.workers())
    }

    /// The workers that are running.
    pub fn workers(&self) -> WorkerSet {
        WorkerSet {
            receive: self.rx_worker.is_some(),
            write: self.tx_worker.is_some(),
        }
    }

    /// The state of the receive worker.
    pub fn receive_worker_state(&self) -> WorkerState {
        self.rx_worker
            .as_ref()
            .map(Worker::state)
            .unwrap_or(WorkerState::Idle)
    }

    /// The state of the write worker.
    pub fn write_worker_state(&self) -> WorkerState {
        self.tx_worker
            .as_ref()
            .map(Worker::state)
            .unwrap_or(WorkerState::Idle)
    }

    /// Queues a frame for the write worker.
    ///
    /// Fails with `FIFO_FULL` if the outbound queue is full.
    pub fn queue_frame(&self, frame: CanalFrame) -> Result<()> {
        self.shared()?
            .outbound
            .try_enqueue(frame)
            .map_err(|_| Error::Status(StatusCode::FifoFull))
    }

    /// Takes the next frame queued by the receive worker, waiting up to
    /// `timeout` for one.
    pub fn next_frame(&self, timeout: Duration) -> Option<CanalFrame> {
        self.shared.as_ref()?.inbound.wait_and_dequeue(timeout)
    }

    /// The number of received frames dropped because the inbound queue
    /// was full.
    pub fn dropped_frames(&self) -> u64 {
        self.shared
            .as_ref()
            .map(|shared| shared.inbound.dropped())
            .unwrap_or(0)
    }

    /// Stops the workers and the listener, leaving the channel open.
    pub fn shutdown(&mut self) {
        self.stop_threads();
    }

    fn stop_threads(&mut self) {
        let Some(shared) = &self.shared else {
            return;
        };
        shared.quit();

        for mut worker in [self.rx_worker.take(), self.tx_worker.take()]
            .into_iter()
            .flatten()
        {
            worker.join();
        }
        self.bridge.shutdown();
        debug!("All CANAL threads stopped");
    }
}

impl Default for CanalInterface {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CanalInterface {
    fn drop(&mut self) {
        self.stop_threads();
        if self.is_open() {
            if let Err(err) = self.close() {
                warn!("Error closing CANAL channel on drop: {}", err);
            }
        }
        if self.shared.take().is_some() {
            debug!("Unloaded CANAL driver '{}'", self.config.path.display());
        }
    }
}

impl fmt::Debug for CanalInterface {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CanalInterface")
            .field("path", &self.config.path)
            .field("state", &self.state)
            .field("level", &self.level)
            .field("workers", &self.workers())
            .field("listener", &self.bridge.state())
            .finish()
    }
}
