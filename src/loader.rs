// canal-bridge/src/loader.rs
//
// Loads CANAL driver modules and resolves their entry points.
//
// This file is part of the Rust 'canal-bridge' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! Dynamic loading of CANAL drivers.
//!
//! A CANAL driver is a shared library exporting a fixed set of C functions.
//! [`DynamicDriver::load()`] opens such a library, resolves every entry
//! point by its exported name, and wraps the resulting table in the
//! [`CanalDriver`] trait.
//!
//! The 13 generation 1 entry points are mandatory: if any of them is
//! missing the load fails with [`Error::MissingSymbol`] and the library is
//! released again. The generation 2 entry points are optional, and each one
//! that is missing simply leaves its capability out of the driver's
//! [`Capabilities`].
//!
//! Symbol lookup goes through the [`SymbolSource`] trait, which is
//! implemented for [`libloading::Library`]. Any other provider of C function
//! addresses can be used with [`DynamicDriver::from_source()`].

use crate::{
    driver::{timeout_ms, Capabilities, CanalDriver, ChannelStatus, Handle, Statistics},
    errors::check,
    ffi::*,
    frame::CanalFrame,
    Error, Result,
};
use libc::{c_char, c_long, c_ulong, c_void};
use libloading::Library;
use log::{debug, info, warn};
use std::{
    ffi::{CStr, CString},
    fmt,
    mem::{self, size_of},
    path::Path,
    time::Duration,
};

// ===== Symbol =====

/// The entry points of a CANAL driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Symbol {
    /// `CanalOpen`
    Open,
    /// `CanalClose`
    Close,
    /// `CanalGetLevel`
    GetLevel,
    /// `CanalSend`
    Send,
    /// `CanalReceive`
    Receive,
    /// `CanalDataAvailable`
    DataAvailable,
    /// `CanalGetStatus`
    GetStatus,
    /// `CanalGetStatistics`
    GetStatistics,
    /// `CanalSetFilter`
    SetFilter,
    /// `CanalSetMask`
    SetMask,
    /// `CanalGetVersion`
    GetVersion,
    /// `CanalGetDllVersion`
    GetDllVersion,
    /// `CanalGetVendorString`
    GetVendorString,
    /// `CanalSetBaudrate`
    SetBaudrate,
    /// `CanalBlockingSend`
    BlockingSend,
    /// `CanalBlockingReceive`
    BlockingReceive,
    /// `CanalGetDriverInfo`
    GetDriverInfo,
}

impl Symbol {
    /// The entry points every driver must export.
    pub const MANDATORY: [Symbol; 13] = [
        Symbol::Open,
        Symbol::Close,
        Symbol::GetLevel,
        Symbol::Send,
        Symbol::Receive,
        Symbol::DataAvailable,
        Symbol::GetStatus,
        Symbol::GetStatistics,
        Symbol::SetFilter,
        Symbol::SetMask,
        Symbol::GetVersion,
        Symbol::GetDllVersion,
        Symbol::GetVendorString,
    ];

    /// The entry points a driver may export.
    pub const OPTIONAL: [Symbol; 4] = [
        Symbol::SetBaudrate,
        Symbol::BlockingSend,
        Symbol::BlockingReceive,
        Symbol::GetDriverInfo,
    ];

    /// The exported name of the entry point.
    pub fn name(self) -> &'static str {
        use Symbol::*;
        match self {
            Open => "CanalOpen",
            Close => "CanalClose",
            GetLevel => "CanalGetLevel",
            Send => "CanalSend",
            Receive => "CanalReceive",
            DataAvailable => "CanalDataAvailable",
            GetStatus => "CanalGetStatus",
            GetStatistics => "CanalGetStatistics",
            SetFilter => "CanalSetFilter",
            SetMask => "CanalSetMask",
            GetVersion => "CanalGetVersion",
            GetDllVersion => "CanalGetDllVersion",
            GetVendorString => "CanalGetVendorString",
            SetBaudrate => "CanalSetBaudrate",
            BlockingSend => "CanalBlockingSend",
            BlockingReceive => "CanalBlockingReceive",
            GetDriverInfo => "CanalGetDriverInfo",
        }
    }

    /// Determines if a driver must export this entry point.
    pub fn is_mandatory(self) -> bool {
        Self::MANDATORY.contains(&self)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ===== SymbolSource =====

/// A provider of the addresses of exported C functions.
pub trait SymbolSource: Send + Sync + 'static {
    /// Looks up an exported symbol by name.
    ///
    /// Returns `None` if the symbol is not exported.
    fn address(&self, name: &str) -> Option<*const c_void>;
}

impl SymbolSource for Library {
    fn address(&self, name: &str) -> Option<*const c_void> {
        let name = CString::new(name).ok()?;
        // SAFETY: The symbol is only read as an address here. It gets its
        // real type when the table is resolved.
        let sym = unsafe { self.get::<*const c_void>(name.as_bytes_with_nul()) }.ok()?;
        Some(*sym)
    }
}

/// Casts the address of a symbol to its function type.
///
/// # Safety
///
/// The address must be that of a function with the signature `F`.
unsafe fn resolve<F: Copy>(source: &impl SymbolSource, sym: Symbol) -> Option<F> {
    debug_assert_eq!(size_of::<F>(), size_of::<*const c_void>());
    match source.address(sym.name()) {
        Some(addr) if !addr.is_null() => Some(mem::transmute_copy::<*const c_void, F>(&addr)),
        _ => None,
    }
}

// ===== SymbolTable =====

/// The resolved entry points of a driver.
#[derive(Clone, Copy)]
pub struct SymbolTable {
    open: CanalOpenFn,
    close: CanalCloseFn,
    get_level: CanalGetLevelFn,
    send: CanalSendFn,
    receive: CanalReceiveFn,
    data_available: CanalDataAvailableFn,
    get_status: CanalGetStatusFn,
    get_statistics: CanalGetStatisticsFn,
    set_filter: CanalSetFilterFn,
    set_mask: CanalSetMaskFn,
    get_version: CanalGetVersionFn,
    get_dll_version: CanalGetDllVersionFn,
    get_vendor_string: CanalGetVendorStringFn,
    // Generation 2
    set_baudrate: Option<CanalSetBaudrateFn>,
    blocking_send: Option<CanalBlockingSendFn>,
    blocking_receive: Option<CanalBlockingReceiveFn>,
    get_driver_info: Option<CanalGetDriverInfoFn>,
}

impl SymbolTable {
    /// Resolves the table from a symbol source.
    ///
    /// # Safety
    ///
    /// Every symbol the source exports under a CANAL name must have the
    /// signature that the CANAL interface defines for that name.
    pub unsafe fn resolve(source: &impl SymbolSource) -> Result<Self> {
        macro_rules! mandatory {
            ($sym:expr) => {
                resolve(source, $sym).ok_or(Error::MissingSymbol($sym))?
            };
        }

        let tbl = Self {
            open: mandatory!(Symbol::Open),
            close: mandatory!(Symbol::Close),
            get_level: mandatory!(Symbol::GetLevel),
            send: mandatory!(Symbol::Send),
            receive: mandatory!(Symbol::Receive),
            data_available: mandatory!(Symbol::DataAvailable),
            get_status: mandatory!(Symbol::GetStatus),
            get_statistics: mandatory!(Symbol::GetStatistics),
            set_filter: mandatory!(Symbol::SetFilter),
            set_mask: mandatory!(Symbol::SetMask),
            get_version: mandatory!(Symbol::GetVersion),
            get_dll_version: mandatory!(Symbol::GetDllVersion),
            get_vendor_string: mandatory!(Symbol::GetVendorString),
            set_baudrate: resolve(source, Symbol::SetBaudrate),
            blocking_send: resolve(source, Symbol::BlockingSend),
            blocking_receive: resolve(source, Symbol::BlockingReceive),
            get_driver_info: resolve(source, Symbol::GetDriverInfo),
        };

        for sym in Symbol::OPTIONAL {
            if !tbl.capabilities().contains(Capabilities::of(sym)) {
                warn!("Driver does not export optional entry point {}", sym);
            }
        }
        Ok(tbl)
    }

    /// The optional entry points that were resolved.
    pub fn capabilities(&self) -> Capabilities {
        let mut caps = Capabilities::empty();
        caps.set(Capabilities::SET_BAUDRATE, self.set_baudrate.is_some());
        caps.set(Capabilities::BLOCKING_SEND, self.blocking_send.is_some());
        caps.set(Capabilities::BLOCKING_RECEIVE, self.blocking_receive.is_some());
        caps.set(Capabilities::DRIVER_INFO, self.get_driver_info.is_some());
        caps
    }
}

impl fmt::Debug for SymbolTable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SymbolTable")
            .field("capabilities", &self.capabilities())
            .finish()
    }
}

/// Copies a string returned by the driver.
///
/// # Safety
///
/// The pointer must be null or point to a NUL terminated string.
unsafe fn driver_string(s: *const c_char) -> Option<String> {
    if s.is_null() {
        None
    } else {
        Some(CStr::from_ptr(s).to_string_lossy().into_owned())
    }
}

// ===== DynamicDriver =====

/// A CANAL driver bound at runtime.
///
/// The symbol source, normally the loaded library, is kept alive for as
/// long as the driver, so the resolved entry points stay valid.
pub struct DynamicDriver<S: SymbolSource = Library> {
    tbl: SymbolTable,
    label: String,
    // Must outlive the table
    _source: S,
}

impl DynamicDriver<Library> {
    /// Loads a driver library from the path and resolves its entry points.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading CANAL driver '{}'", path.display());

        // SAFETY: Loading a library runs its initialisers. A CANAL driver
        // is trusted to be a well behaved shared object.
        let lib = unsafe { Library::new(path) }.map_err(|source| Error::Load {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_source(lib, path.display().to_string())
    }
}

impl<S: SymbolSource> DynamicDriver<S> {
    /// Resolves a driver from any source of symbols.
    ///
    /// On failure the source is dropped, which for a library unloads it.
    pub fn from_source(source: S, label: impl Into<String>) -> Result<Self> {
        let label = label.into();

        // SAFETY: Exports with CANAL names are taken to be CANAL entry
        // points; there is no way to check a C signature.
        let tbl = match unsafe { SymbolTable::resolve(&source) } {
            Ok(tbl) => tbl,
            Err(err) => {
                warn!("Rejecting CANAL driver '{}': {}", label, err);
                return Err(err);
            }
        };

        info!(
            "Loaded CANAL driver '{}' with capabilities {:?}",
            label,
            tbl.capabilities()
        );
        Ok(Self {
            tbl,
            label,
            _source: source,
        })
    }

    /// The name the driver was loaded under, normally its path.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// The resolved entry point table.
    pub fn symbols(&self) -> &SymbolTable {
        &self.tbl
    }
}

impl<S: SymbolSource> fmt::Debug for DynamicDriver<S> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("DynamicDriver")
            .field("label", &self.label)
            .field("symbols", &self.tbl)
            .finish()
    }
}

// All calls below go through function pointers resolved from the source,
// which lives as long as `self`. Buffers passed to the driver are owned
// locals of the CANAL layout.
impl<S: SymbolSource> CanalDriver for DynamicDriver<S> {
    fn capabilities(&self) -> Capabilities {
        self.tbl.capabilities()
    }

    fn open(&self, parameters: &CStr, flags: u32) -> Handle {
        unsafe { (self.tbl.open)(parameters.as_ptr(), flags as c_ulong) as Handle }
    }

    fn close(&self, handle: Handle) -> Result<()> {
        check(unsafe { (self.tbl.close)(handle as c_long) })
    }

    fn level(&self, handle: Handle) -> u32 {
        unsafe { (self.tbl.get_level)(handle as c_long) as u32 }
    }

    fn send(&self, handle: Handle, frame: &CanalFrame) -> Result<()> {
        let msg = canalMsg::from(frame);
        check(unsafe { (self.tbl.send)(handle as c_long, &msg) })
    }

    fn receive(&self, handle: Handle) -> Result<CanalFrame> {
        let mut msg = canal_msg_default();
        check(unsafe { (self.tbl.receive)(handle as c_long, &mut msg) })?;
        Ok(CanalFrame::from(&msg))
    }

    fn data_available(&self, handle: Handle) -> u32 {
        let n = unsafe { (self.tbl.data_available)(handle as c_long) };
        n.max(0) as u32
    }

    fn status(&self, handle: Handle) -> Result<ChannelStatus> {
        let mut st = canal_status_default();
        check(unsafe { (self.tbl.get_status)(handle as c_long, &mut st) })?;
        Ok(ChannelStatus::from(&st))
    }

    fn statistics(&self, handle: Handle) -> Result<Statistics> {
        let mut st = canalStatistics::default();
        check(unsafe { (self.tbl.get_statistics)(handle as c_long, &mut st) })?;
        Ok(Statistics::from(&st))
    }

    fn set_filter(&self, handle: Handle, filter: u32) -> Result<()> {
        check(unsafe { (self.tbl.set_filter)(handle as c_long, filter as c_ulong) })
    }

    fn set_mask(&self, handle: Handle, mask: u32) -> Result<()> {
        check(unsafe { (self.tbl.set_mask)(handle as c_long, mask as c_ulong) })
    }

    fn version(&self) -> u32 {
        unsafe { (self.tbl.get_version)() as u32 }
    }

    fn dll_version(&self) -> u32 {
        unsafe { (self.tbl.get_dll_version)() as u32 }
    }

    fn vendor_string(&self) -> String {
        unsafe { driver_string((self.tbl.get_vendor_string)()) }.unwrap_or_default()
    }

    fn set_baudrate(&self, handle: Handle, baudrate: u32) -> Result<()> {
        let f = self
            .tbl
            .set_baudrate
            .ok_or(Error::NotSupported(Symbol::SetBaudrate))?;
        check(unsafe { f(handle as c_long, baudrate as c_ulong) })
    }

    fn blocking_send(&self, handle: Handle, frame: &CanalFrame, timeout: Duration) -> Result<()> {
        let f = self
            .tbl
            .blocking_send
            .ok_or(Error::NotSupported(Symbol::BlockingSend))?;
        let mut msg = canalMsg::from(frame);
        check(unsafe { f(handle as c_long, &mut msg, timeout_ms(timeout)) })
    }

    fn blocking_receive(&self, handle: Handle, timeout: Duration) -> Result<CanalFrame> {
        let f = self
            .tbl
            .blocking_receive
            .ok_or(Error::NotSupported(Symbol::BlockingReceive))?;
        let mut msg = canal_msg_default();
        check(unsafe { f(handle as c_long, &mut msg, timeout_ms(timeout)) })?;
        Ok(CanalFrame::from(&msg))
    }

    fn driver_info(&self) -> Option<String> {
        let f = self.tbl.get_driver_info?;
        unsafe { driver_string(f()) }
    }
}

/////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StatusCode;
    use std::collections::HashMap;

    // A minimal in-process driver. It echoes each sent frame back on
    // receive, one deep.

    static VENDOR: &[u8] = b"Loopback\0";

    unsafe extern "C" fn open(_dev: *const c_char, _flags: c_ulong) -> c_long {
        7
    }
    unsafe extern "C" fn close(_h: c_long) -> libc::c_int {
        0
    }
    unsafe extern "C" fn get_level(_h: c_long) -> c_ulong {
        1
    }
    unsafe extern "C" fn send(_h: c_long, _msg: *const canalMsg) -> libc::c_int {
        0
    }
    unsafe extern "C" fn receive(_h: c_long, _msg: *mut canalMsg) -> libc::c_int {
        StatusCode::FifoEmpty.code() as libc::c_int
    }
    unsafe extern "C" fn data_available(_h: c_long) -> libc::c_int {
        -3
    }
    unsafe extern "C" fn get_status(_h: c_long, st: *mut canalStatus) -> libc::c_int {
        (*st).channel_status = 0x1000_0000;
        0
    }
    unsafe extern "C" fn get_statistics(_h: c_long, st: *mut canalStatistics) -> libc::c_int {
        (*st).cntReceiveFrames = 12;
        0
    }
    unsafe extern "C" fn set_filter(_h: c_long, _v: c_ulong) -> libc::c_int {
        0
    }
    unsafe extern "C" fn set_mask(_h: c_long, _v: c_ulong) -> libc::c_int {
        StatusCode::Parameter.code() as libc::c_int
    }
    unsafe extern "C" fn get_version() -> c_ulong {
        0x0100_0000
    }
    unsafe extern "C" fn get_dll_version() -> c_ulong {
        42
    }
    unsafe extern "C" fn get_vendor_string() -> *const c_char {
        VENDOR.as_ptr() as *const c_char
    }
    unsafe extern "C" fn blocking_receive(
        _h: c_long,
        msg: *mut canalMsg,
        timeout: c_ulong,
    ) -> libc::c_int {
        (*msg).id = 0x100;
        (*msg).sizeData = 1;
        (*msg).data[0] = timeout as u8;
        0
    }

    #[derive(Default)]
    struct Exports(HashMap<&'static str, usize>);

    impl Exports {
        fn gen1() -> Self {
            let mut map = HashMap::new();
            map.insert("CanalOpen", open as usize);
            map.insert("CanalClose", close as usize);
            map.insert("CanalGetLevel", get_level as usize);
            map.insert("CanalSend", send as usize);
            map.insert("CanalReceive", receive as usize);
            map.insert("CanalDataAvailable", data_available as usize);
            map.insert("CanalGetStatus", get_status as usize);
            map.insert("CanalGetStatistics", get_statistics as usize);
            map.insert("CanalSetFilter", set_filter as usize);
            map.insert("CanalSetMask", set_mask as usize);
            map.insert("CanalGetVersion", get_version as usize);
            map.insert("CanalGetDllVersion", get_dll_version as usize);
            map.insert("CanalGetVendorString", get_vendor_string as usize);
            Self(map)
        }
    }

    impl SymbolSource for Exports {
        fn address(&self, name: &str) -> Option<*const c_void> {
            self.0.get(name).map(|&addr| addr as *const c_void)
        }
    }

    #[test]
    fn test_symbol_names() {
        assert_eq!(Symbol::Open.name(), "CanalOpen");
        assert_eq!(Symbol::BlockingReceive.to_string(), "CanalBlockingReceive");
        assert!(Symbol::GetVendorString.is_mandatory());
        assert!(!Symbol::GetDriverInfo.is_mandatory());
        assert!(Symbol::OPTIONAL.iter().all(|s| !s.is_mandatory()));
    }

    #[test]
    fn test_gen1_driver() {
        let drv = DynamicDriver::from_source(Exports::gen1(), "gen1").unwrap();
        assert!(drv.capabilities().is_empty());
        assert_eq!(drv.label(), "gen1");

        let params = CString::new("").unwrap();
        let h = drv.open(&params, 0);
        assert_eq!(h, 7);
        assert_eq!(drv.level(h), 1);
        assert_eq!(drv.version(), 0x0100_0000);
        assert_eq!(drv.dll_version(), 42);
        assert_eq!(drv.vendor_string(), "Loopback");
        assert_eq!(drv.data_available(h), 0);
        assert_eq!(drv.status(h).unwrap().channel_status, 0x1000_0000);
        assert_eq!(drv.statistics(h).unwrap().rx_frames, 12);
        assert!(drv.set_filter(h, 0).is_ok());

        assert!(matches!(
            drv.set_mask(h, 0),
            Err(Error::Status(StatusCode::Parameter))
        ));
        assert!(matches!(
            drv.receive(h),
            Err(Error::Status(StatusCode::FifoEmpty))
        ));
        assert!(matches!(
            drv.blocking_receive(h, Duration::from_millis(5)),
            Err(Error::NotSupported(Symbol::BlockingReceive))
        ));
        assert!(matches!(
            drv.set_baudrate(h, 125_000),
            Err(Error::NotSupported(Symbol::SetBaudrate))
        ));
        assert!(drv.driver_info().is_none());
        assert!(drv.close(h).is_ok());
    }

    #[test]
    fn test_optional_symbol() {
        let mut exports = Exports::gen1();
        exports
            .0
            .insert("CanalBlockingReceive", blocking_receive as usize);

        let drv = DynamicDriver::from_source(exports, "gen2").unwrap();
        assert_eq!(drv.capabilities(), Capabilities::BLOCKING_RECEIVE);

        let frame = drv.blocking_receive(1, Duration::from_millis(25)).unwrap();
        assert_eq!(frame.raw_id(), 0x100);
        assert_eq!(frame.len(), 1);
        assert_eq!(frame.raw_data()[0], 25);
    }

    #[test]
    fn test_missing_symbol() {
        for sym in Symbol::MANDATORY {
            let mut exports = Exports::gen1();
            exports.0.remove(sym.name());

            match DynamicDriver::from_source(exports, "broken") {
                Err(Error::MissingSymbol(missing)) => assert_eq!(missing, sym),
                other => panic!("Unexpected result for {}: {:?}", sym, other),
            }
        }
    }

    #[test]
    fn test_load_failure() {
        let err = DynamicDriver::load("/nonexistent/libcanal-nothing.so").unwrap_err();
        assert!(matches!(err, Error::Load { .. }));
        assert_eq!(err.status(), StatusCode::Parameter);
    }
}
