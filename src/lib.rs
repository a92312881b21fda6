// canal-bridge/src/lib.rs
//
// The main lib file for the Rust CANAL driver bridge.
//
// This file is part of the Rust 'canal-bridge' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! CANAL driver support.
//!
//! CANAL, the CAN Abstraction Layer, is a small C interface that vendors of
//! CAN bus adapters implement as a shared library. An application loads the
//! library at runtime, opens a channel with a driver specific parameter
//! string, and then sends and receives CAN frames through a fixed table of
//! entry points.
//!
//! This crate loads such a driver, checks the table it exports, and puts a
//! thread-safe Rust interface on top of it.
//!
//! # The driver interface
//!
//! A [`CanalInterface`] is the application's handle to one driver and one
//! channel on it. It is created from a [`DriverConfig`] naming the library
//! and the parameters to open it with:
//!
//! ```no_run
//! use canal_bridge::{CanalFrame, CanalInterface, DriverConfig};
//!
//! let config = DriverConfig::new("/usr/lib/canal/libcanal-socketcan.so")
//!     .parameters("can0");
//!
//! let mut iface = CanalInterface::load(config)?;
//! iface.open()?;
//!
//! let frame: CanalFrame = "123#DEADBEEF".parse()?;
//! iface.send(&frame)?;
//! iface.close()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Generations
//!
//! The first generation of the CANAL interface only has non-blocking calls.
//! The second added blocking send and receive, and a few informational
//! calls. A driver only has to implement the first generation; the crate
//! checks which of the others it exports and reports them as
//! [`Capabilities`].
//!
//! # Receiving in the background
//!
//! With a generation 2 driver, received frames can be delivered to a
//! callback with [`CanalInterface::add_listener()`]. The callback runs on
//! its own thread, one frame at a time, in the order the frames were
//! received. Alternatively the queue workers can be started with
//! [`CanalInterface::start_workers()`] to buffer frames in both directions.
//!
//! # Logging
//!
//! The crate logs through the [`log`](https://docs.rs/log) facade. Loading
//! and opening are logged at `info`, missing optional entry points and
//! dropped frames at `warn`, and each frame at `trace`.

#![deny(
    missing_docs,
    missing_copy_implementations,
    missing_debug_implementations,
    unstable_features,
    unused_import_braces,
    unused_qualifications
)]

// Re-export the embedded_can crate so that applications can rely on
// finding the same version we use.
pub use embedded_can::{
    self, ExtendedId, Frame as EmbeddedFrame, Id, StandardId,
};

pub mod errors;
pub use errors::{ConstructionError, Error, StatusCode};

pub mod ffi;

pub mod id;
pub use id::{id_from_raw, id_to_raw};

pub mod frame;
pub use frame::{CanalFrame, FrameFlags, CANAL_MAX_DLEN};

pub mod driver;
pub use driver::{
    CanalDriver, Capabilities, ChannelStatus, ChannelStatusFlags, DriverLevel, Handle, Statistics,
};

pub mod loader;
pub use loader::{DynamicDriver, Symbol, SymbolSource, SymbolTable};

pub mod config;
pub use config::DriverConfig;

pub mod queue;
pub use queue::{FrameQueue, MAX_QUEUED_FRAMES};

pub mod worker;
pub use worker::{WorkerSet, WorkerState};

pub mod bridge;
pub use bridge::{BridgeState, DeliveryBridge};

pub mod interface;
pub use interface::{CanalInterface, InterfaceState};

/// A result type for the bridge.
pub type Result<T> = std::result::Result<T, Error>;
