// canal-bridge/src/frame.rs
//
// Implements the CANAL message frame.
//
// This file is part of the Rust 'canal-bridge' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! CANAL frames.
//!
//! A CANAL driver exchanges CAN bus messages as a `canalMsg` C structure.
//! [`CanalFrame`] is the owned Rust form of that message:
//!
//! ```text
//! { flags: u32, id: u32, obid: u32, timestamp: u32, data: [u8; 0..=8] }
//! ```
//!
//! The `flags` word determines how the identifier is interpreted (11-bit
//! standard or 29-bit extended), if the frame is a remote request, and if it
//! is a status indication from the driver rather than bus traffic. Bits that
//! are not known to this crate are carried through untouched, since drivers
//! are free to use them.
//!
//! Frames can also be written and parsed in the compact text form used by
//! the `can-utils` tools, like `123#DEADBEEF`, `1F334455#0102` or `123#R4`.

use crate::{
    id::{id_from_canal, id_from_raw, id_is_extended, id_to_raw, EFF_MASK, SFF_MASK},
    ConstructionError,
};
use bitflags::bitflags;
use embedded_can::{Frame as EmbeddedFrame, Id};
use hex::FromHex;
use itertools::Itertools;
use std::{fmt, str::FromStr};

/// The maximum payload of a CANAL message.
pub const CANAL_MAX_DLEN: usize = 8;

/// Frame uses the standard, 11-bit, identifier
pub const CANAL_IDFLAG_STANDARD: u32 = 0x0000_0000;

/// Frame uses the extended, 29-bit, identifier
pub const CANAL_IDFLAG_EXTENDED: u32 = 0x0000_0001;

/// Remote transmission request
pub const CANAL_IDFLAG_RTR: u32 = 0x0000_0002;

/// The frame is a status indication from the driver
pub const CANAL_IDFLAG_STATUS: u32 = 0x0000_0004;

/// Reserved for use by the application to mark frames it sent
pub const CANAL_IDFLAG_SEND: u32 = 0x8000_0000;

bitflags! {
    /// Bit flags in the CANAL message flags word.
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FrameFlags: u32 {
        /// Indicates frame uses a 29-bit extended ID
        const EXTENDED = CANAL_IDFLAG_EXTENDED;
        /// Indicates a remote request frame.
        const RTR = CANAL_IDFLAG_RTR;
        /// Indicates a status message from the driver.
        const STATUS = CANAL_IDFLAG_STATUS;
        /// Application send marker.
        const SEND = CANAL_IDFLAG_SEND;
    }
}

impl Default for FrameFlags {
    fn default() -> Self {
        Self::empty()
    }
}

// ===== CanalFrame =====

/// A CAN frame as exchanged with a CANAL driver.
///
/// The payload is always held inline and is never more than 8 bytes.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CanalFrame {
    flags: FrameFlags,
    obid: u32,
    id: u32,
    len: u8,
    data: [u8; CANAL_MAX_DLEN],
    timestamp: u32,
}

impl CanalFrame {
    /// Initializes a frame from raw parts.
    ///
    /// The identifier must fit the width selected by the `EXTENDED` flag,
    /// and the payload can't be more than 8 bytes.
    pub fn init(id: u32, data: &[u8], flags: FrameFlags) -> Result<Self, ConstructionError> {
        let mask = if flags.contains(FrameFlags::EXTENDED) {
            EFF_MASK
        } else {
            SFF_MASK
        };
        if id & !mask != 0 {
            return Err(ConstructionError::IDTooLarge);
        }

        let mut frame = Self {
            flags,
            id,
            ..Self::default()
        };
        frame.set_data(data)?;
        Ok(frame)
    }

    /// Builds a frame from all the fields of a CANAL message, as read from
    /// a driver.
    ///
    /// Drivers are trusted for the identifier, but a reported length over
    /// 8 bytes is clamped to the size of the payload buffer.
    pub fn from_parts(
        flags: u32,
        obid: u32,
        id: u32,
        data: &[u8],
        timestamp: u32,
    ) -> Self {
        let n = data.len().min(CANAL_MAX_DLEN);
        let mut frame = Self {
            flags: FrameFlags::from_bits_retain(flags),
            obid,
            id,
            len: n as u8,
            timestamp,
            ..Self::default()
        };
        frame.data[..n].copy_from_slice(&data[..n]);
        frame
    }

    /// Gets the flags of the frame.
    pub fn flags(&self) -> FrameFlags {
        self.flags
    }

    /// Sets the flags of the frame.
    ///
    /// Note that this can change how the identifier is interpreted.
    pub fn set_flags(&mut self, flags: FrameFlags) {
        self.flags = flags;
    }

    /// The raw identifier, without any format information.
    pub fn raw_id(&self) -> u32 {
        self.id
    }

    /// The object id, identifying the originator of the frame.
    pub fn obid(&self) -> u32 {
        self.obid
    }

    /// Sets the object id.
    pub fn set_obid(&mut self, obid: u32) {
        self.obid = obid;
    }

    /// The time stamp of the frame, in device time.
    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    /// Sets the time stamp.
    pub fn set_timestamp(&mut self, timestamp: u32) {
        self.timestamp = timestamp;
    }

    /// Gets the number of bytes in the payload
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// Determines if the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Check if the frame is a status message from the driver
    pub fn is_status(&self) -> bool {
        self.flags.contains(FrameFlags::STATUS)
    }

    /// Sets the data payload of the frame.
    pub fn set_data(&mut self, data: &[u8]) -> Result<(), ConstructionError> {
        match data.len() {
            n if n <= CANAL_MAX_DLEN => {
                self.len = n as u8;
                self.data = [0; CANAL_MAX_DLEN];
                self.data[..n].copy_from_slice(data);
                Ok(())
            }
            _ => Err(ConstructionError::TooMuchData),
        }
    }

    /// The complete payload buffer, including any unused bytes.
    pub(crate) fn raw_data(&self) -> &[u8; CANAL_MAX_DLEN] {
        &self.data
    }
}

impl EmbeddedFrame for CanalFrame {
    /// Create a new data frame
    fn new(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        let id = id.into();
        let flags = if id_is_extended(&id) {
            FrameFlags::EXTENDED
        } else {
            FrameFlags::empty()
        };
        Self::init(id_to_raw(id), data, flags).ok()
    }

    /// Create a new remote transmission request frame.
    fn new_remote(id: impl Into<Id>, dlc: usize) -> Option<Self> {
        if dlc > CANAL_MAX_DLEN {
            return None;
        }
        let mut frame = Self::new(id, &[])?;
        frame.flags |= FrameFlags::RTR;
        frame.len = dlc as u8;
        Some(frame)
    }

    /// Check if frame uses 29-bit extended ID format.
    fn is_extended(&self) -> bool {
        self.flags.contains(FrameFlags::EXTENDED)
    }

    /// Check if frame is a remote transmission request.
    fn is_remote_frame(&self) -> bool {
        self.flags.contains(FrameFlags::RTR)
    }

    /// Return the frame identifier.
    fn id(&self) -> Id {
        id_from_canal(self.id, self.is_extended())
    }

    /// Data length
    fn dlc(&self) -> usize {
        self.len as usize
    }

    /// A slice into the actual data. Slice will always be <= 8 bytes in length
    fn data(&self) -> &[u8] {
        &self.data[..(self.len as usize)]
    }
}

impl fmt::Debug for CanalFrame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "CanalFrame {{ ")?;
        fmt::UpperHex::fmt(self, f)?;
        write!(
            f,
            " flags: {:#010X}, obid: {}, timestamp: {} }}",
            self.flags.bits(),
            self.obid,
            self.timestamp
        )
    }
}

impl fmt::UpperHex for CanalFrame {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        if self.is_extended() {
            write!(f, "{:08X}#", self.id)?;
        } else {
            write!(f, "{:03X}#", self.id)?;
        }
        if self.is_remote_frame() {
            return write!(f, "R{}", self.len);
        }
        let mut parts = self.data().iter().map(|v| format!("{:02X}", v));
        write!(f, "{}", parts.join(" "))
    }
}

impl fmt::Display for CanalFrame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::UpperHex::fmt(self, f)
    }
}

impl FromStr for CanalFrame {
    type Err = ConstructionError;

    /// Parses the `can-utils` text form of a frame.
    ///
    /// ```text
    /// <id>#[data]      Data frame, data as hex bytes
    /// <id>#R[len]      Remote frame
    /// ```
    ///
    /// An identifier with more than three hex digits, or a value over
    /// 0x7FF, is taken as extended.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id_str, data) = s
            .trim()
            .split_once('#')
            .ok_or(ConstructionError::InvalidFormat)?;

        let raw = u32::from_str_radix(id_str, 16).map_err(|_| ConstructionError::InvalidFormat)?;
        let id = if id_str.len() > 3 {
            Id::from(embedded_can::ExtendedId::new(raw).ok_or(ConstructionError::IDTooLarge)?)
        } else {
            id_from_raw(raw).ok_or(ConstructionError::IDTooLarge)?
        };

        if let Some(rlen) = data.strip_prefix('R') {
            let dlc = match rlen {
                "" => 0,
                n => n.parse::<usize>().map_err(|_| ConstructionError::InvalidFormat)?,
            };
            return Self::new_remote(id, dlc).ok_or(ConstructionError::TooMuchData);
        }

        let data: String = data.chars().filter(|c| !matches!(c, ' ' | '.')).collect();
        let data = Vec::from_hex(data).map_err(|_| ConstructionError::InvalidFormat)?;
        Self::new(id, &data).ok_or(ConstructionError::TooMuchData)
    }
}

/////////////////////////////////////////////////////////////////////////////
