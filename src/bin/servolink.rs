//! Command-line front end for the servo rig.

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use servolink::config_loader::load_rig_settings;
use servolink::{DisplayMode, Expression, SequencerState, ServoRig};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Drive the servo rig over its line protocol
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file (defaults to servolink.yaml next to Cargo.toml)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Controller address, overrides config and SERVOLINK_HOST
    #[arg(long)]
    host: Option<String>,
    /// Controller port, overrides config and SERVOLINK_PORT
    #[arg(long)]
    port: Option<u16>,
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Set one logical channel
    Set { channel: usize, angle: i32 },
    /// Set every logical channel, one angle each
    All {
        #[arg(required = true, allow_negative_numbers = true)]
        angles: Vec<i32>,
    },
    /// Soft reset (servos to 90°, status page)
    Reset,
    /// Apply a named preset
    Preset { name: String },
    /// Show an expression: SMILEY, CRYING, SLEEPY
    Expression { name: String },
    /// Switch display mode: CLOCK, WEATHER, STATUS
    Mode { name: String },
    /// Run the gait until Ctrl-C or for a fixed time
    Walk {
        #[arg(long)]
        seconds: Option<u64>,
    },
    /// List presets and the gait
    Presets,
}

fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let args = Args::parse();
    let settings = load_rig_settings(args.config.as_deref())?;

    if let Cmd::Presets = args.command {
        let table = &settings.presets;
        for name in table.names() {
            if let Some(p) = table.get(name) {
                let angles: Vec<String> = p.angles.iter().map(|a| a.to_string()).collect();
                println!("{:<10} {}", name, angles.join(", "));
            }
        }
        println!("gait: {}", table.gait().join(" -> "));
        return Ok(());
    }

    let host = args.host.clone().or_else(|| settings.host.clone())
        .ok_or_else(|| anyhow!("No controller host; pass --host or set connection.host / SERVOLINK_HOST"))?;
    let port = args.port.or(settings.port)
        .ok_or_else(|| anyhow!("No controller port; pass --port or set connection.port / SERVOLINK_PORT"))?;

    let mut rig = ServoRig::new(settings);
    rig.connect(&host, port)
        .map_err(|e| anyhow!("Connection to {}:{} failed: {}", host, port, e))?;
    println!("Connected to {}:{}", host, port);

    match args.command {
        Cmd::Set { channel, angle } => {
            rig.set_channel(channel, angle)?;
            println!("Channel {} set to {}°", channel, angle);
        }
        Cmd::All { angles } => {
            rig.set_all(&angles)?;
            let text: Vec<String> = angles.iter().enumerate().map(|(i, a)| format!("ch{}:{}°", i, a)).collect();
            println!("All set: {}", text.join(", "));
        }
        Cmd::Reset => {
            rig.reset()?;
            println!("Reset complete");
        }
        Cmd::Preset { name } => {
            rig.apply_preset(&name)?;
            println!("Preset '{}' applied", name);
        }
        Cmd::Expression { name } => {
            let expression: Expression = name.parse()?;
            rig.set_expression(expression)?;
            println!("Showing expression {}", expression.as_str());
        }
        Cmd::Mode { name } => {
            let mode: DisplayMode = name.parse()?;
            rig.set_mode(mode)?;
            println!("Switched to {} mode", mode.as_str());
        }
        Cmd::Walk { seconds } => walk(&mut rig, seconds.map(Duration::from_secs))?,
        Cmd::Presets => {}
    }

    rig.disconnect();
    Ok(())
}

fn walk(rig: &mut ServoRig, limit: Option<Duration>) -> Result<()> {
    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    rig.start_sequence()?;
    println!("Walking (Ctrl-C to stop)");
    let started = Instant::now();
    while running.load(Ordering::SeqCst) {
        if limit.map(|l| started.elapsed() >= l).unwrap_or(false) {
            break;
        }
        if rig.sequencer_state() == SequencerState::Idle {
            // Sequencer halted itself
            let err = rig.last_sequence_error()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".to_string());
            return Err(anyhow!("Gait halted: {}", err));
        }
        thread::sleep(Duration::from_millis(50));
    }
    rig.stop_sequence();
    println!("Stopped");
    Ok(())
}
