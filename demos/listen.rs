// canal-bridge/demos/listen.rs
//
// Prints the frames received by a CANAL driver, using a listener callback.
//
// This file is part of the Rust 'canal-bridge' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

use anyhow::Context;
use canal_bridge::{CanalInterface, DriverConfig};
use clap::{arg, Command};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let opts = Command::new("listen")
        .about("Print the frames received by a CANAL driver")
        .arg(arg!(<driver> "Path to the CANAL driver library"))
        .arg(arg!([params] "The driver parameter string"))
        .get_matches();

    let driver = opts.get_one::<String>("driver").context("No driver")?;
    let params = opts.get_one::<String>("params").cloned().unwrap_or_default();

    let quit = Arc::new(AtomicBool::new(false));
    let q = quit.clone();
    ctrlc::set_handler(move || q.store(true, Ordering::SeqCst))
        .context("Error setting Ctrl-C handler")?;

    let config = DriverConfig::new(driver).parameters(params);
    let mut iface = CanalInterface::load(config)
        .with_context(|| format!("Failed to load driver {}", driver))?;

    println!(
        "Driver: {} (v{:#X})",
        iface.vendor_string()?,
        iface.dll_version()?
    );

    iface.add_listener(|frame| println!("  {}", frame))?;
    iface.open().context("Opening the channel")?;

    while !quit.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(100));
    }

    iface.close()?;
    Ok(())
}
