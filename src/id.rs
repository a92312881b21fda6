// canal-bridge/src/id.rs
//
// Implements CANbus Identifiers for CANAL frames.
//
// This file is part of the Rust 'canal-bridge' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! CANbus standard and extended identifiers.
//!
//! Unlike SocketCAN, a CANAL message keeps the identifier and the frame
//! format apart: the `id` field holds only the 11 or 29 identifier bits and
//! the extended format is a bit in the separate `flags` word.

use embedded_can::{ExtendedId, Id, StandardId};

/// Valid bits in a standard (11-bit) frame ID
pub const SFF_MASK: u32 = 0x0000_07ff;

/// Valid bits in an extended (29-bit) frame ID
pub const EFF_MASK: u32 = 0x1fff_ffff;

/// Gets the raw numeric value of an Id, without any format information.
pub fn id_to_raw(id: impl Into<Id>) -> u32 {
    use Id::*;
    match id.into() {
        Standard(id) => id.as_raw() as u32,
        Extended(id) => id.as_raw(),
    }
}

/// Determines if the ID is an extended, 29-bit, ID.
#[inline]
pub fn id_is_extended(id: &Id) -> bool {
    matches!(id, Id::Extended(_))
}

/// Creates a CAN ID from a raw integer value.
///
/// If the `id` is <= 0x7FF, it's assumed to be a standard ID, otherwise
/// it is created as an Extended ID. If you require an Extended ID <= 0x7FF,
/// create it explicitly.
pub fn id_from_raw(id: u32) -> Option<Id> {
    let id = match id {
        n if n <= SFF_MASK => StandardId::new(n as u16)?.into(),
        n => ExtendedId::new(n)?.into(),
    };
    Some(id)
}

/// Creates a CAN ID from the raw value and format of a CANAL message.
///
/// The value is masked to the width selected by `extended`, the same way
/// a driver would put it on the bus.
pub fn id_from_canal(id: u32, extended: bool) -> Id {
    // Masked values are always in range, so construction can't fail.
    if extended {
        ExtendedId::new(id & EFF_MASK)
            .map(Id::from)
            .unwrap_or(Id::Extended(ExtendedId::ZERO))
    } else {
        StandardId::new((id & SFF_MASK) as u16)
            .map(Id::from)
            .unwrap_or(Id::Standard(StandardId::ZERO))
    }
}

/////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    // A standard ID
    const ID: u32 = 0x100;

    #[test]
    fn test_id_raw() {
        let id = id_from_raw(ID).unwrap();
        assert!(matches!(id, Id::Standard(_)));
        assert_eq!(id_to_raw(id), ID);

        let id = id_from_raw(0x800).unwrap();
        assert!(id_is_extended(&id));
        assert_eq!(id_to_raw(id), 0x800);

        assert!(id_from_raw(EFF_MASK + 1).is_none());
    }

    #[test]
    fn test_id_from_canal() {
        let id = id_from_canal(0x123, false);
        assert_eq!(id, Id::Standard(StandardId::new(0x123).unwrap()));

        // Keeps the extended format, even in the standard range
        let id = id_from_canal(0x123, true);
        assert_eq!(id, Id::Extended(ExtendedId::new(0x123).unwrap()));

        // Out of range bits are masked off
        let id = id_from_canal(0xFFFF, false);
        assert_eq!(id_to_raw(id), 0x7FF);
    }
}
