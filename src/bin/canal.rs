// canal-bridge/src/bin/canal.rs

//! Simple CLI tool to load a CANAL driver and exercise it from the
//! command line, similar to 'can-utils'.

use anyhow::{anyhow, Result};
use canal_bridge::{CanalFrame, CanalInterface, Capabilities, DriverConfig};
use clap::{arg, value_parser, ArgAction, ArgMatches, Command};
use std::{
    process,
    sync::mpsc,
    thread,
    time::{Duration, Instant},
};

// Make the app version the same as the package.
const VERSION: &str = env!("CARGO_PKG_VERSION");

// --------------------------------------------------------------------------

/// Process the 'info' subcommand.
///
/// Opens the channel and prints what the driver reports about itself.
fn info_cmd(mut iface: CanalInterface) -> Result<()> {
    println!("Vendor:       {}", iface.vendor_string()?);
    println!("CANAL:        {:#010X}", iface.version()?);
    println!("Driver:       {:#010X}", iface.dll_version()?);
    println!("Capabilities: {:?}", iface.capabilities());
    if let Some(info) = iface.driver_info() {
        println!("Info:\n{}", info);
    }

    iface.open()?;
    println!("Level:        {}", iface.level());
    println!("Status:       {}", iface.status()?);
    println!("Statistics:   {:?}", iface.statistics()?);
    iface.close()?;
    Ok(())
}

/// Process the 'dump' subcommand.
///
/// Prints received frames until the count is reached or the timeout
/// expires.
fn dump_cmd(mut iface: CanalInterface, opts: &ArgMatches) -> Result<()> {
    let count = opts.get_one::<usize>("count").copied();
    let timeout = opts
        .get_one::<u64>("timeout")
        .map(|ms| Duration::from_millis(*ms));
    let deadline = timeout.map(|t| Instant::now() + t);

    let expired = |n: usize| {
        count.map_or(false, |c| n >= c) || deadline.map_or(false, |d| Instant::now() >= d)
    };
    let mut n = 0;

    if iface.capabilities().contains(Capabilities::BLOCKING_RECEIVE) {
        let (tx, rx) = mpsc::channel::<CanalFrame>();
        iface.add_listener(move |frame| {
            let _ = tx.send(frame);
        })?;
        iface.open()?;

        while !expired(n) {
            if let Ok(frame) = rx.recv_timeout(Duration::from_millis(100)) {
                println!("{}", frame);
                n += 1;
            }
        }
    } else {
        iface.open()?;
        while !expired(n) {
            match iface.receive() {
                Ok(frame) => {
                    println!("{}", frame);
                    n += 1;
                }
                Err(err) if err.should_retry() => thread::sleep(Duration::from_millis(10)),
                Err(err) => return Err(err.into()),
            }
        }
    }

    iface.close()?;
    Ok(())
}

/// Process the 'send' subcommand.
fn send_cmd(mut iface: CanalInterface, opts: &ArgMatches) -> Result<()> {
    let text = opts
        .get_one::<String>("frame")
        .ok_or_else(|| anyhow!("Need a frame to send"))?;
    let frame: CanalFrame = text.parse()?;

    iface.open()?;
    if iface.capabilities().contains(Capabilities::BLOCKING_SEND) {
        iface.blocking_send(&frame, Duration::from_millis(500))?;
    } else {
        iface.send(&frame)?;
    }
    iface.close()?;
    Ok(())
}

// --------------------------------------------------------------------------

fn main() {
    env_logger::init();

    let opts = Command::new("canal")
        .version(VERSION)
        .about("Command line tool to load and use a CANAL driver")
        .disable_help_flag(true)
        .arg(
            arg!(--help "Print help information")
                .short('?')
                .action(ArgAction::Help)
                .global(true),
        )
        .arg(
            arg!(<driver> "Path to the CANAL driver library")
                .required(true)
                .index(1),
        )
        .arg(arg!(-c --config [PARAMS] "The driver parameter string"))
        .arg(
            arg!(-f --flags [FLAGS] "The driver open flags")
                .default_value("0")
                .value_parser(value_parser!(u32)),
        )
        .subcommand(Command::new("info").about("Print information about the driver"))
        .subcommand(
            Command::new("dump")
                .about("Print received frames")
                .arg(
                    arg!(-n --count [COUNT] "Stop after this many frames")
                        .value_parser(value_parser!(usize)),
                )
                .arg(
                    arg!(-t --timeout [MS] "Stop after this many milliseconds")
                        .value_parser(value_parser!(u64)),
                ),
        )
        .subcommand(
            Command::new("send")
                .about("Send a frame, like '123#DEADBEEF' or '1F334455#R'")
                .arg(arg!(<frame> "The frame to send").required(true)),
        )
        .get_matches();

    let res = (|| -> Result<()> {
        let driver = opts
            .get_one::<String>("driver")
            .ok_or_else(|| anyhow!("Need a driver path"))?;
        let params = opts.get_one::<String>("config").cloned().unwrap_or_default();
        let flags = opts.get_one::<u32>("flags").copied().unwrap_or(0);

        let config = DriverConfig::new(driver).parameters(params).flags(flags);

        if opts.subcommand_matches("info").is_some() {
            info_cmd(CanalInterface::load(config)?)
        } else if let Some(sub_opts) = opts.subcommand_matches("dump") {
            dump_cmd(CanalInterface::load(config)?, sub_opts)
        } else if let Some(sub_opts) = opts.subcommand_matches("send") {
            send_cmd(CanalInterface::load(config)?, sub_opts)
        } else {
            Err(anyhow!("Need to specify a subcommand (-? for help)."))
        }
    })();

    if let Err(err) = res {
        eprintln!("{}", err);
        process::exit(1);
    }
}
