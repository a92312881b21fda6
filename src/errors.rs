// canal-bridge/src/errors.rs
//
// Implements errors for the Rust CANAL driver bridge.
//
// This file is part of the Rust 'canal-bridge' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! CANAL status codes and bridge errors.
//!
//! Every CANAL entry point reports its outcome as a plain integer status
//! code. The numeric values are a binary contract shared by all drivers in
//! the ecosystem, so they are reproduced here exactly, as [`StatusCode`].
//!
//! The bridge itself reports failures through [`Error`]. Each error maps
//! back to the CANAL status code a host layer would expect to see with
//! [`Error::status()`], and codes returned by a driver are passed through
//! unmodified:
//!
//! ```text
//! Load failure           => PARAMETER
//! Missing symbol         => LIBRARY
//! Not open / re-open     => NOT_OPEN
//! Absent gen-2 symbol    => LIBRARY
//! Driver code            => (as returned)
//! Thread spawn failure   => INTERNAL
//! ```

use crate::loader::Symbol;
use std::{convert::TryFrom, error, fmt, io, path::PathBuf};
use thiserror::Error;

// ===== StatusCode =====

/// The CANAL status codes.
///
/// The values must match the `CANAL_ERROR_xxx` definitions used by the
/// drivers.
#[repr(u32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum StatusCode {
    /// All is OK
    Success = 0,
    /// Baudrate error
    Baudrate = 1,
    /// Bus off error
    BusOff = 2,
    /// Bus passive error
    BusPassive = 3,
    /// Bus warning error
    BusWarning = 4,
    /// Invalid CAN ID
    CanId = 5,
    /// Invalid CAN message
    CanMessage = 6,
    /// Invalid channel
    Channel = 7,
    /// FIFO is empty
    FifoEmpty = 8,
    /// FIFO is full
    FifoFull = 9,
    /// FIFO size error
    FifoSize = 10,
    /// FIFO wait failed
    FifoWait = 11,
    /// Generic error
    Generic = 12,
    /// Hardware error
    Hardware = 13,
    /// Initialization failed
    InitFail = 14,
    /// Initialization missing
    InitMissing = 15,
    /// Initialization already done
    InitReady = 16,
    /// Not supported
    NotSupported = 17,
    /// Overrun
    Overrun = 18,
    /// Receive buffer empty
    RcvEmpty = 19,
    /// Register value error
    Register = 20,
    /// Transmit buffer full
    TrmFull = 21,
    /// Error frame: stuff error detected
    ErrfrmStuff = 22,
    /// Error frame: form error detected
    ErrfrmForm = 23,
    /// Error frame: acknowledge error
    ErrfrmAck = 24,
    /// Error frame: bit 1 error
    ErrfrmBit1 = 25,
    /// Error frame: bit 0 error
    ErrfrmBit0 = 26,
    /// Error frame: CRC error
    ErrfrmCrc = 27,
    /// Unable to load library
    Library = 28,
    /// Unable to get library proc address
    ProcAddress = 29,
    /// Only one instance allowed
    OnlyOneInstance = 30,
    /// Problem with sub driver call
    SubDriver = 31,
    /// Blocking call timed out
    Timeout = 32,
    /// The device is not open
    NotOpen = 33,
    /// A parameter is invalid
    Parameter = 34,
    /// Memory exhausted
    Memory = 35,
    /// Some kind of internal program error
    Internal = 36,
    /// Some kind of communication error
    Communication = 37,
    /// Login error
    User = 38,
}

impl StatusCode {
    /// Gets the numeric value of the code, as seen by the driver.
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Determines if this is the success code.
    pub fn is_success(self) -> bool {
        self == StatusCode::Success
    }

    /// The `CANAL_ERROR_xxx` name of the code, without the prefix.
    pub fn name(self) -> &'static str {
        use StatusCode::*;
        match self {
            Success => "SUCCESS",
            Baudrate => "BAUDRATE",
            BusOff => "BUS_OFF",
            BusPassive => "BUS_PASSIVE",
            BusWarning => "BUS_WARNING",
            CanId => "CAN_ID",
            CanMessage => "CAN_MESSAGE",
            Channel => "CHANNEL",
            FifoEmpty => "FIFO_EMPTY",
            FifoFull => "FIFO_FULL",
            FifoSize => "FIFO_SIZE",
            FifoWait => "FIFO_WAIT",
            Generic => "GENERIC",
            Hardware => "HARDWARE",
            InitFail => "INIT_FAIL",
            InitMissing => "INIT_MISSING",
            InitReady => "INIT_READY",
            NotSupported => "NOT_SUPPORTED",
            Overrun => "OVERRUN",
            RcvEmpty => "RCV_EMPTY",
            Register => "REGISTER",
            TrmFull => "TRM_FULL",
            ErrfrmStuff => "ERRFRM_STUFF",
            ErrfrmForm => "ERRFRM_FORM",
            ErrfrmAck => "ERRFRM_ACK",
            ErrfrmBit1 => "ERRFRM_BIT1",
            ErrfrmBit0 => "ERRFRM_BIT0",
            ErrfrmCrc => "ERRFRM_CRC",
            Library => "LIBRARY",
            ProcAddress => "PROCADDRESS",
            OnlyOneInstance => "ONLY_ONE_INSTANCE",
            SubDriver => "SUB_DRIVER",
            Timeout => "TIMEOUT",
            NotOpen => "NOT_OPEN",
            Parameter => "PARAMETER",
            Memory => "MEMORY",
            Internal => "INTERNAL",
            Communication => "COMMUNICATION",
            User => "USER",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "CANAL_ERROR_{} ({})", self.name(), self.code())
    }
}

impl TryFrom<u32> for StatusCode {
    type Error = u32;

    /// Converts a raw driver code, handing back the value if it's unknown.
    fn try_from(val: u32) -> Result<Self, Self::Error> {
        use StatusCode::*;
        Ok(match val {
            0 => Success,
            1 => Baudrate,
            2 => BusOff,
            3 => BusPassive,
            4 => BusWarning,
            5 => CanId,
            6 => CanMessage,
            7 => Channel,
            8 => FifoEmpty,
            9 => FifoFull,
            10 => FifoSize,
            11 => FifoWait,
            12 => Generic,
            13 => Hardware,
            14 => InitFail,
            15 => InitMissing,
            16 => InitReady,
            17 => NotSupported,
            18 => Overrun,
            19 => RcvEmpty,
            20 => Register,
            21 => TrmFull,
            22 => ErrfrmStuff,
            23 => ErrfrmForm,
            24 => ErrfrmAck,
            25 => ErrfrmBit1,
            26 => ErrfrmBit0,
            27 => ErrfrmCrc,
            28 => Library,
            29 => ProcAddress,
            30 => OnlyOneInstance,
            31 => SubDriver,
            32 => Timeout,
            33 => NotOpen,
            34 => Parameter,
            35 => Memory,
            36 => Internal,
            37 => Communication,
            38 => User,
            n => return Err(n),
        })
    }
}

// ===== ConstructionError =====

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
/// Error that occurs when creating CAN frames or driver arguments
pub enum ConstructionError {
    /// CAN ID was outside the range of valid IDs
    IDTooLarge,
    /// More than 8 bytes of payload data were passed in
    TooMuchData,
    /// A string argument contained an interior NUL byte
    InteriorNul,
    /// The textual form of a frame could not be parsed
    InvalidFormat,
}

impl error::Error for ConstructionError {}

impl fmt::Display for ConstructionError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use ConstructionError::*;
        match *self {
            IDTooLarge => write!(f, "CAN ID too large"),
            TooMuchData => write!(f, "Payload is larger than CAN maximum of 8 bytes"),
            InteriorNul => write!(f, "String contains an interior NUL byte"),
            InvalidFormat => write!(f, "Invalid CAN frame format"),
        }
    }
}

// ===== Error =====

/// Errors reported by the CANAL bridge.
#[derive(Error, Debug)]
pub enum Error {
    /// The driver module could not be loaded from the path.
    #[error("Unable to load driver library '{}': {source}", .path.display())]
    Load {
        /// The path of the module
        path: PathBuf,
        /// The loader failure
        #[source]
        source: libloading::Error,
    },
    /// A mandatory (generation 1) entry point is not exported by the driver.
    #[error("Driver is missing mandatory entry point {0}")]
    MissingSymbol(Symbol),
    /// An optional (generation 2) entry point was not resolved.
    #[error("Driver does not support {0}")]
    NotSupported(Symbol),
    /// The interface has no driver loaded yet.
    #[error("No driver has been loaded")]
    NotInitialized,
    /// A driver has already been loaded into the interface.
    #[error("A driver is already loaded")]
    AlreadyInitialized,
    /// The channel is not open.
    #[error("The channel is not open")]
    NotOpen,
    /// The channel is already open.
    #[error("The channel is already open")]
    AlreadyOpen,
    /// An asynchronous listener was already registered.
    #[error("A listener is already registered on this interface")]
    ListenerActive,
    /// The receive worker is already taking frames from the channel.
    #[error("The receive worker is already reading this channel")]
    ReceiverBusy,
    /// A known status code reported by the driver.
    #[error("Driver error: {0}")]
    Status(StatusCode),
    /// A status code reported by the driver that is not a CANAL code.
    #[error("Unknown driver error code {0}")]
    Driver(i32),
    /// A frame or argument could not be built.
    #[error(transparent)]
    Construction(#[from] ConstructionError),
    /// A thread could not be started.
    #[error(transparent)]
    Io(#[from] io::Error),
    /// The JSON form of a configuration could not be read.
    #[cfg(feature = "json")]
    #[error("Invalid configuration: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Builds the error for a raw, non-success, driver return value.
    pub fn from_code(code: i32) -> Self {
        match u32::try_from(code).map(StatusCode::try_from) {
            Ok(Ok(status)) => Error::Status(status),
            _ => Error::Driver(code),
        }
    }

    /// Gets the CANAL status code that represents this error.
    ///
    /// Unknown driver codes have no representation and report as
    /// `GENERIC`; use [`Error::code()`] to get the raw value.
    pub fn status(&self) -> StatusCode {
        use Error::*;
        match *self {
            Load { .. } => StatusCode::Parameter,
            MissingSymbol(_) | NotSupported(_) => StatusCode::Library,
            NotInitialized => StatusCode::InitMissing,
            AlreadyInitialized => StatusCode::InitReady,
            NotOpen | AlreadyOpen => StatusCode::NotOpen,
            ListenerActive | ReceiverBusy => StatusCode::OnlyOneInstance,
            Status(code) => code,
            Driver(_) => StatusCode::Generic,
            Construction(_) => StatusCode::Parameter,
            Io(_) => StatusCode::Internal,
            #[cfg(feature = "json")]
            Json(_) => StatusCode::Parameter,
        }
    }

    /// Gets the raw numeric code, as a host layer would return it.
    pub fn code(&self) -> i32 {
        match *self {
            Error::Driver(code) => code,
            _ => self.status().code() as i32,
        }
    }

    /// Determines if the error is a transient driver condition.
    ///
    /// Timeouts and empty/full FIFOs are expected while polling a driver,
    /// and a caller can simply try again.
    pub fn should_retry(&self) -> bool {
        use StatusCode::*;
        matches!(
            self,
            Error::Status(Timeout | FifoEmpty | FifoFull | RcvEmpty | TrmFull)
        )
    }
}

/// Converts a raw driver return value into a result.
pub(crate) fn check(code: i32) -> crate::Result<()> {
    match code {
        0 => Ok(()),
        n => Err(Error::from_code(n)),
    }
}

/////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_values() {
        assert_eq!(StatusCode::Success.code(), 0);
        assert_eq!(StatusCode::FifoEmpty.code(), 8);
        assert_eq!(StatusCode::Library.code(), 28);
        assert_eq!(StatusCode::Timeout.code(), 32);
        assert_eq!(StatusCode::NotOpen.code(), 33);
        assert_eq!(StatusCode::Communication.code(), 37);

        for n in 0..=38 {
            let code = StatusCode::try_from(n).unwrap();
            assert_eq!(code.code(), n);
        }
        assert_eq!(StatusCode::try_from(39), Err(39));
    }

    #[test]
    fn test_from_code() {
        assert!(matches!(
            Error::from_code(33),
            Error::Status(StatusCode::NotOpen)
        ));
        assert!(matches!(Error::from_code(-1), Error::Driver(-1)));
        assert!(matches!(Error::from_code(1234), Error::Driver(1234)));

        assert_eq!(Error::from_code(-1).code(), -1);
        assert_eq!(Error::from_code(32).code(), 32);
        assert!(check(0).is_ok());
        assert!(check(8).is_err());
    }

    #[test]
    fn test_error_status() {
        assert_eq!(Error::NotOpen.status(), StatusCode::NotOpen);
        assert_eq!(Error::AlreadyOpen.code(), 33);
        assert_eq!(
            Error::NotSupported(Symbol::BlockingSend).status(),
            StatusCode::Library
        );
        assert_eq!(
            Error::MissingSymbol(Symbol::Open).status(),
            StatusCode::Library
        );
        assert_eq!(Error::ListenerActive.status(), StatusCode::OnlyOneInstance);
        assert_eq!(Error::ReceiverBusy.status(), StatusCode::OnlyOneInstance);
        assert_eq!(
            Error::from(ConstructionError::TooMuchData).status(),
            StatusCode::Parameter
        );
    }

    #[test]
    fn test_should_retry() {
        assert!(Error::Status(StatusCode::Timeout).should_retry());
        assert!(Error::Status(StatusCode::FifoEmpty).should_retry());
        assert!(!Error::NotOpen.should_retry());
        assert!(!Error::Driver(-5).should_retry());
    }
}
