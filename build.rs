fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=build.rs");
    match std::env::var("CARGO_CFG_TARGET_FAMILY") {
        Ok(val) if val.split(',').any(|f| f == "unix") => Ok(()),
        _ => Err("canal-bridge loads CANAL drivers with the C calling convention of unix targets only".into()),
    }
}
