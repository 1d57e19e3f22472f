//! Stand-in servo controller for bench testing without hardware.

use anyhow::Result;
use clap::Parser;
use servolink::emulator::RigEmulator;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0:8080")]
    bind: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let args = Args::parse();
    let emulator = RigEmulator::spawn(args.bind.as_str())?;
    println!("Emulated controller listening on {}", emulator.addr());

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    let mut last_seen = 0;
    while running.load(Ordering::SeqCst) {
        let lines = emulator.received();
        if lines.len() != last_seen {
            last_seen = lines.len();
            println!("angles={:?} expression={:?} mode={:?}",
                     emulator.angles(), emulator.expression(), emulator.mode());
        }
        thread::sleep(Duration::from_millis(100));
    }
    emulator.shutdown();
    Ok(())
}
