// canal-bridge/src/config.rs
//
// Configuration of a CANAL driver interface.
//
// This file is part of the Rust 'canal-bridge' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! Driver configuration.
//!
//! A [`DriverConfig`] names the driver library to load, and the parameter
//! string and flags it is opened with. Its meaning beyond that is up to
//! the driver.
//!
//! With the `json` feature the configuration can also be read from the
//! JSON object used by host applications:
//!
//! ```json
//! {
//!     "path": "/usr/lib/canal/libcanal-socketcan.so",
//!     "config": "can0",
//!     "flags": 0,
//!     "bAsync": true
//! }
//! ```

use crate::{ConstructionError, Error, Result};
use std::{
    ffi::CString,
    path::{Path, PathBuf},
};

#[cfg(feature = "json")]
use serde::Deserialize;

/// The configuration of a CANAL driver interface.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "json", derive(Deserialize))]
pub struct DriverConfig {
    /// Path of the driver library
    pub path: PathBuf,
    /// The driver specific parameter string passed to `CanalOpen`
    #[cfg_attr(feature = "json", serde(rename = "config", default))]
    pub parameters: String,
    /// The driver specific flags passed to `CanalOpen`
    #[cfg_attr(feature = "json", serde(default))]
    pub flags: u32,
    /// Start the receive and write workers when the channel is opened
    #[cfg_attr(feature = "json", serde(rename = "bAsync", default))]
    pub async_receive: bool,
}

impl DriverConfig {
    /// Creates a configuration for the driver at the path, with an empty
    /// parameter string and no flags.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    /// Sets the parameter string.
    pub fn parameters<S: Into<String>>(mut self, parameters: S) -> Self {
        self.parameters = parameters.into();
        self
    }

    /// Sets the open flags.
    pub fn flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    /// Sets whether the workers start automatically when the channel is
    /// opened.
    pub fn async_receive(mut self, on: bool) -> Self {
        self.async_receive = on;
        self
    }

    /// Reads a configuration from its JSON form.
    #[cfg(feature = "json")]
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// The parameter string as a C string.
    pub(crate) fn c_parameters(&self) -> Result<CString> {
        CString::new(self.parameters.as_bytes())
            .map_err(|_| Error::from(ConstructionError::InteriorNul))
    }
}

/////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let cfg = DriverConfig::new("/usr/lib/libcanal.so")
            .parameters("can0;500")
            .flags(3)
            .async_receive(true);

        assert_eq!(cfg.path, Path::new("/usr/lib/libcanal.so"));
        assert_eq!(cfg.parameters, "can0;500");
        assert_eq!(cfg.flags, 3);
        assert!(cfg.async_receive);
        assert_eq!(cfg.c_parameters().unwrap().as_bytes(), b"can0;500");
    }

    #[test]
    fn test_interior_nul() {
        let cfg = DriverConfig::new("x.so").parameters("can\00");
        assert!(matches!(
            cfg.c_parameters(),
            Err(Error::Construction(ConstructionError::InteriorNul))
        ));
    }

    #[cfg(feature = "json")]
    #[test]
    fn test_json() {
        let cfg = DriverConfig::from_json(
            r#"{"path": "/opt/canal/drv.so", "config": "vcan0", "flags": 1, "bAsync": true}"#,
        )
        .unwrap();
        assert_eq!(
            cfg,
            DriverConfig::new("/opt/canal/drv.so")
                .parameters("vcan0")
                .flags(1)
                .async_receive(true)
        );

        let cfg = DriverConfig::from_json(r#"{"path": "drv.so"}"#).unwrap();
        assert_eq!(cfg.parameters, "");
        assert!(!cfg.async_receive);

        assert!(DriverConfig::from_json(r#"{"config": "vcan0"}"#).is_err());
    }
}
