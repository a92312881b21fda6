// canal-bridge/src/driver.rs
//
// The CANAL driver contract.
//
// This file is part of the Rust 'canal-bridge' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! The CANAL driver contract, as a trait.
//!
//! A CANAL driver exports a fixed table of C entry points. The first
//! generation of the interface is mandatory; a handful of entry points were
//! added later (generation 2) and any particular driver may or may not
//! export them.
//!
//! [`CanalDriver`] captures that table as a Rust trait. The mandatory entry
//! points are required methods, while the optional ones have default
//! implementations reporting [`Error::NotSupported`], so a call site never
//! has to deal with a missing function pointer. [`Capabilities`] tells which
//! optional entry points a driver actually provides.

use crate::{
    ffi::{canalStatistics, canalStatus},
    frame::CanalFrame,
    loader::Symbol,
    Error, Result,
};
use bitflags::bitflags;
use std::{ffi::CStr, fmt, time::Duration};

/// The driver's handle to an open channel.
///
/// Handles are always greater than zero; zero means the channel is not
/// open.
pub type Handle = i64;

bitflags! {
    /// The optional (generation 2) entry points supported by a driver.
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u32 {
        /// `CanalBlockingSend`
        const BLOCKING_SEND = 0x0001;
        /// `CanalBlockingReceive`
        const BLOCKING_RECEIVE = 0x0002;
        /// `CanalGetDriverInfo`
        const DRIVER_INFO = 0x0004;
        /// `CanalSetBaudrate`
        const SET_BAUDRATE = 0x0008;
    }
}

impl Capabilities {
    /// Gets the capability provided by an optional entry point.
    pub fn of(sym: Symbol) -> Self {
        match sym {
            Symbol::BlockingSend => Self::BLOCKING_SEND,
            Symbol::BlockingReceive => Self::BLOCKING_RECEIVE,
            Symbol::GetDriverInfo => Self::DRIVER_INFO,
            Symbol::SetBaudrate => Self::SET_BAUDRATE,
            _ => Self::empty(),
        }
    }
}

/// A CANAL driver.
///
/// Implementations must be safe to call from multiple threads at once, as
/// the workers call into the driver while the application keeps using it.
pub trait CanalDriver: Send + Sync {
    /// The optional entry points this driver supports.
    fn capabilities(&self) -> Capabilities;

    /// Opens a channel with the driver specific parameter string and
    /// flags, returning the raw handle. A value <= 0 means failure.
    fn open(&self, parameters: &CStr, flags: u32) -> Handle;

    /// Closes the channel.
    fn close(&self, handle: Handle) -> Result<()>;

    /// Gets the level of the driver.
    fn level(&self, handle: Handle) -> u32;

    /// Sends a frame without waiting.
    fn send(&self, handle: Handle, frame: &CanalFrame) -> Result<()>;

    /// Receives a frame without waiting.
    fn receive(&self, handle: Handle) -> Result<CanalFrame>;

    /// Gets the number of frames waiting in the driver's receive queue.
    fn data_available(&self, handle: Handle) -> u32;

    /// Gets the status of the channel.
    fn status(&self, handle: Handle) -> Result<ChannelStatus>;

    /// Gets the channel statistics.
    fn statistics(&self, handle: Handle) -> Result<Statistics>;

    /// Sets the acceptance filter.
    fn set_filter(&self, handle: Handle, filter: u32) -> Result<()>;

    /// Sets the acceptance mask.
    fn set_mask(&self, handle: Handle, mask: u32) -> Result<()>;

    /// The CANAL version the driver implements.
    fn version(&self) -> u32;

    /// The version of the driver itself.
    fn dll_version(&self) -> u32;

    /// The vendor string of the driver.
    fn vendor_string(&self) -> String;

    /// Sets the bus bit rate.
    fn set_baudrate(&self, _handle: Handle, _baudrate: u32) -> Result<()> {
        Err(Error::NotSupported(Symbol::SetBaudrate))
    }

    /// Sends a frame, waiting up to `timeout` for room in the driver.
    fn blocking_send(&self, _handle: Handle, _frame: &CanalFrame, _timeout: Duration) -> Result<()> {
        Err(Error::NotSupported(Symbol::BlockingSend))
    }

    /// Receives a frame, waiting up to `timeout` for one to arrive.
    fn blocking_receive(&self, _handle: Handle, _timeout: Duration) -> Result<CanalFrame> {
        Err(Error::NotSupported(Symbol::BlockingReceive))
    }

    /// Gets the driver's description of itself, if it has one.
    fn driver_info(&self) -> Option<String> {
        None
    }
}

/// Converts a timeout into the milliseconds argument of a blocking call.
pub(crate) fn timeout_ms(timeout: Duration) -> libc::c_ulong {
    timeout.as_millis().min(libc::c_ulong::MAX as u128) as libc::c_ulong
}

// ===== DriverLevel =====

/// The level of a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverLevel {
    /// A standard CANAL driver
    Standard,
    /// A driver that uses TCP/IP internally
    UsesTcpIp,
    /// A driver that must not be used over TCP/IP
    NoTcpIp,
    /// Any other value
    Other(u32),
}

impl From<u32> for DriverLevel {
    fn from(val: u32) -> Self {
        match val {
            1 => Self::Standard,
            2 => Self::UsesTcpIp,
            1000 => Self::NoTcpIp,
            n => Self::Other(n),
        }
    }
}

impl From<DriverLevel> for u32 {
    fn from(level: DriverLevel) -> Self {
        match level {
            DriverLevel::Standard => 1,
            DriverLevel::UsesTcpIp => 2,
            DriverLevel::NoTcpIp => 1000,
            DriverLevel::Other(n) => n,
        }
    }
}

// ===== ChannelStatus =====

bitflags! {
    /// Bits of the channel status word.
    ///
    /// The low bits of the word are driver specific and are kept as-is.
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ChannelStatusFlags: u32 {
        /// The controller is bus off
        const BUS_OFF = 0x8000_0000;
        /// The error counters passed the warning level
        const BUS_WARN = 0x4000_0000;
        /// The controller is error passive
        const PASSIVE = 0x2000_0000;
        /// The controller is error active
        const ACTIVE = 0x1000_0000;
        /// Physical layer fault
        const PHY_FAULT = 0x0800_0000;
        /// CAN-H fault
        const PHY_H = 0x0400_0000;
        /// CAN-L fault
        const PHY_L = 0x0200_0000;
        /// The controller is sleeping
        const SLEEPING = 0x0100_0000;
        /// The controller is stopped
        const STOPPED = 0x0080_0000;
        /// The driver's receive buffer is full
        const RECEIVE_BUFFER_FULL = 0x0040_0000;
        /// The driver's transmit buffer is full
        const TRANSMIT_BUFFER_FULL = 0x0020_0000;

        const _ = !0;
    }
}

/// The status of a channel, as reported by the driver.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelStatus {
    /// The raw status word
    pub channel_status: u32,
    /// The last error code
    pub last_error_code: u32,
    /// The last error sub code
    pub last_error_sub_code: u32,
    /// The description of the last error
    pub last_error_string: String,
}

impl ChannelStatus {
    /// Gets the status word as flags.
    pub fn flags(&self) -> ChannelStatusFlags {
        ChannelStatusFlags::from_bits_retain(self.channel_status)
    }

    /// Determines if the controller is bus off.
    pub fn is_bus_off(&self) -> bool {
        self.flags().contains(ChannelStatusFlags::BUS_OFF)
    }
}

impl From<&canalStatus> for ChannelStatus {
    fn from(st: &canalStatus) -> Self {
        let bytes: Vec<u8> = st
            .lasterrorstr
            .iter()
            .take_while(|&&c| c != 0)
            .map(|&c| c as u8)
            .collect();

        Self {
            channel_status: st.channel_status as u32,
            last_error_code: st.lasterrorcode as u32,
            last_error_sub_code: st.lasterrorsubcode as u32,
            last_error_string: String::from_utf8_lossy(&bytes).into_owned(),
        }
    }
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "status: {:#010X}, error: {}/{}",
            self.channel_status, self.last_error_code, self.last_error_sub_code
        )?;
        if !self.last_error_string.is_empty() {
            write!(f, " ({})", self.last_error_string)?;
        }
        Ok(())
    }
}

// ===== Statistics =====

/// Channel statistics, as counted by the driver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Statistics {
    /// Number of received frames
    pub rx_frames: u32,
    /// Number of transmitted frames
    pub tx_frames: u32,
    /// Number of received data bytes
    pub rx_bytes: u32,
    /// Number of transmitted data bytes
    pub tx_bytes: u32,
    /// Number of overruns
    pub overruns: u32,
    /// Number of bus warnings
    pub bus_warnings: u32,
    /// Number of times the bus went off
    pub bus_off: u32,
}

impl From<&canalStatistics> for Statistics {
    fn from(st: &canalStatistics) -> Self {
        Self {
            rx_frames: st.cntReceiveFrames as u32,
            tx_frames: st.cntTransmitFrames as u32,
            rx_bytes: st.cntReceiveData as u32,
            tx_bytes: st.cntTransmitData as u32,
            overruns: st.cntOverruns as u32,
            bus_warnings: st.cntBusWarnings as u32,
            bus_off: st.cntBusOff as u32,
        }
    }
}

/////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ffi::canal_status_default;

    #[test]
    fn test_level() {
        assert_eq!(DriverLevel::from(1), DriverLevel::Standard);
        assert_eq!(DriverLevel::from(2), DriverLevel::UsesTcpIp);
        assert_eq!(DriverLevel::from(1000), DriverLevel::NoTcpIp);
        assert_eq!(DriverLevel::from(7), DriverLevel::Other(7));
        assert_eq!(u32::from(DriverLevel::NoTcpIp), 1000);
    }

    #[test]
    fn test_capabilities() {
        assert_eq!(
            Capabilities::of(Symbol::BlockingReceive),
            Capabilities::BLOCKING_RECEIVE
        );
        assert!(Capabilities::of(Symbol::Open).is_empty());
    }

    #[test]
    fn test_channel_status() {
        let mut st = canal_status_default();
        st.channel_status = 0xC000_0012;
        st.lasterrorcode = 5;
        for (i, b) in b"oops".iter().enumerate() {
            st.lasterrorstr[i] = *b as libc::c_char;
        }

        let status = ChannelStatus::from(&st);
        assert!(status.is_bus_off());
        assert!(status.flags().contains(ChannelStatusFlags::BUS_WARN));
        assert!(!status.flags().contains(ChannelStatusFlags::PASSIVE));
        assert_eq!(status.flags().bits(), 0xC000_0012);
        assert_eq!(status.last_error_code, 5);
        assert_eq!(status.last_error_string, "oops");
        assert_eq!(
            status.to_string(),
            "status: 0xC0000012, error: 5/0 (oops)"
        );
    }

    #[test]
    fn test_timeout_ms() {
        assert_eq!(timeout_ms(Duration::from_millis(500)), 500);
        assert_eq!(timeout_ms(Duration::from_micros(1500)), 1);
    }
}
