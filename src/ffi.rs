// canal-bridge/src/ffi.rs
//
// C declarations of the CANAL driver interface.
//
// This file is part of the Rust 'canal-bridge' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! Low-level, C compatible, declarations of the CANAL driver interface.
//!
//! These mirror `canal.h` and `canaldlldef.h`. Note that CANAL uses the C
//! `long` and `unsigned long` types throughout, so the size of the
//! structures differs between 32 and 64-bit targets.

#![allow(non_camel_case_types, non_snake_case, missing_docs)]

use crate::frame::{CanalFrame, CANAL_MAX_DLEN};
use libc::{c_char, c_int, c_long, c_uchar, c_ulong};
use std::mem;

/// Length of the error string in a `canalStatus`
pub const CANAL_STATUS_STR_LEN: usize = 80;

/// The C `canalMsg` structure.
#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct canalMsg {
    pub flags: c_ulong,
    pub obid: c_ulong,
    pub id: c_ulong,
    pub sizeData: c_uchar,
    pub data: [c_uchar; CANAL_MAX_DLEN],
    pub timestamp: c_ulong,
}

/// The C `canalStatistics` structure.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct canalStatistics {
    pub cntReceiveFrames: c_ulong,
    pub cntTransmitFrames: c_ulong,
    pub cntReceiveData: c_ulong,
    pub cntTransmitData: c_ulong,
    pub cntOverruns: c_ulong,
    pub cntBusWarnings: c_ulong,
    pub cntBusOff: c_ulong,
}

/// The C `canalStatus` structure.
#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct canalStatus {
    pub channel_status: c_ulong,
    pub lasterrorcode: c_ulong,
    pub lasterrorsubcode: c_ulong,
    pub lasterrorstr: [c_char; CANAL_STATUS_STR_LEN],
}

/// Creates a default C `canalMsg`.
/// This initializes the entire structure to zeros.
#[inline(always)]
pub fn canal_msg_default() -> canalMsg {
    unsafe { mem::zeroed() }
}

/// Creates a default C `canalStatus`.
/// This initializes the entire structure to zeros.
#[inline(always)]
pub fn canal_status_default() -> canalStatus {
    unsafe { mem::zeroed() }
}

impl From<&CanalFrame> for canalMsg {
    fn from(frame: &CanalFrame) -> Self {
        let mut msg = canal_msg_default();
        msg.flags = frame.flags().bits() as c_ulong;
        msg.obid = frame.obid() as c_ulong;
        msg.id = frame.raw_id() as c_ulong;
        msg.sizeData = frame.len() as c_uchar;
        msg.data = *frame.raw_data();
        msg.timestamp = frame.timestamp() as c_ulong;
        msg
    }
}

impl From<&canalMsg> for CanalFrame {
    fn from(msg: &canalMsg) -> Self {
        let n = (msg.sizeData as usize).min(CANAL_MAX_DLEN);
        CanalFrame::from_parts(
            msg.flags as u32,
            msg.obid as u32,
            msg.id as u32,
            &msg.data[..n],
            msg.timestamp as u32,
        )
    }
}

// ===== Entry points =====

pub type CanalOpenFn = unsafe extern "C" fn(pDevice: *const c_char, flags: c_ulong) -> c_long;
pub type CanalCloseFn = unsafe extern "C" fn(handle: c_long) -> c_int;
pub type CanalGetLevelFn = unsafe extern "C" fn(handle: c_long) -> c_ulong;
pub type CanalSendFn = unsafe extern "C" fn(handle: c_long, pCanalMsg: *const canalMsg) -> c_int;
pub type CanalReceiveFn = unsafe extern "C" fn(handle: c_long, pCanalMsg: *mut canalMsg) -> c_int;
pub type CanalDataAvailableFn = unsafe extern "C" fn(handle: c_long) -> c_int;
pub type CanalGetStatusFn =
    unsafe extern "C" fn(handle: c_long, pCanalStatus: *mut canalStatus) -> c_int;
pub type CanalGetStatisticsFn =
    unsafe extern "C" fn(handle: c_long, pCanalStatistics: *mut canalStatistics) -> c_int;
pub type CanalSetFilterFn = unsafe extern "C" fn(handle: c_long, filter: c_ulong) -> c_int;
pub type CanalSetMaskFn = unsafe extern "C" fn(handle: c_long, mask: c_ulong) -> c_int;
pub type CanalSetBaudrateFn = unsafe extern "C" fn(handle: c_long, baudrate: c_ulong) -> c_int;
pub type CanalGetVersionFn = unsafe extern "C" fn() -> c_ulong;
pub type CanalGetDllVersionFn = unsafe extern "C" fn() -> c_ulong;
pub type CanalGetVendorStringFn = unsafe extern "C" fn() -> *const c_char;

// Generation 2
pub type CanalBlockingSendFn =
    unsafe extern "C" fn(handle: c_long, pCanalMsg: *mut canalMsg, timeout: c_ulong) -> c_int;
pub type CanalBlockingReceiveFn =
    unsafe extern "C" fn(handle: c_long, pCanalMsg: *mut canalMsg, timeout: c_ulong) -> c_int;
pub type CanalGetDriverInfoFn = unsafe extern "C" fn() -> *const c_char;

/////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameFlags;

    #[test]
    fn test_msg_conv() {
        let mut frame = CanalFrame::init(0x123, &[1, 2, 3], FrameFlags::SEND).unwrap();
        frame.set_obid(42);
        frame.set_timestamp(1000);

        let msg = canalMsg::from(&frame);
        assert_eq!(msg.flags, 0x8000_0000);
        assert_eq!(msg.id, 0x123);
        assert_eq!(msg.obid, 42);
        assert_eq!(msg.sizeData, 3);
        assert_eq!(&msg.data[..3], &[1, 2, 3]);
        assert_eq!(msg.timestamp, 1000);

        assert_eq!(frame, CanalFrame::from(&msg));
    }

    #[test]
    fn test_msg_bad_size() {
        let mut msg = canal_msg_default();
        msg.sizeData = 200;
        msg.data = [7; CANAL_MAX_DLEN];

        let frame = CanalFrame::from(&msg);
        assert_eq!(frame.len(), CANAL_MAX_DLEN);
    }
}
