//! Command-line control for connected Helios DACs.
//!
//! Run with: `cargo run --example helios_ctl -- list`

use clap::{Parser, Subcommand};
use helios_dac::{
    DeviceRegistry, DeviceStatus, Frame, Point, Result, UsbTransport, WriteFrameFlags,
};
use std::f32::consts::TAU;

#[derive(Parser)]
#[command(about = "Inspect and control Helios laser DACs")]
struct Args {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// List devices with name, firmware and status
    List,
    /// Project a circle until the given number of frames has been sent
    Circle {
        /// Device index
        #[arg(short, long, default_value_t = 0)]
        device: usize,
        /// Points per frame
        #[arg(short, long, default_value_t = 500)]
        points: usize,
        /// Output rate in points per second
        #[arg(long, default_value_t = 30_000)]
        pps: u32,
        /// Number of frames to send
        #[arg(short, long, default_value_t = 300)]
        frames: usize,
    },
    /// Stop output
    Stop {
        #[arg(short, long, default_value_t = 0)]
        device: usize,
    },
    /// Open or close the shutter
    Shutter {
        #[arg(short, long, default_value_t = 0)]
        device: usize,
        /// "open" or "close"
        #[arg(value_parser = ["open", "close"])]
        state: String,
    },
    /// Store a new device name
    Rename {
        #[arg(short, long, default_value_t = 0)]
        device: usize,
        name: String,
    },
}

fn circle(n_points: usize) -> Vec<Point> {
    (0..n_points)
        .map(|i| {
            let angle = i as f32 / n_points as f32 * TAU;
            let x = 2047.0 + angle.cos() * 1500.0;
            let y = 2047.0 + angle.sin() * 1500.0;
            Point::new(x as u16, y as u16, 0, 255, 0, 255)
        })
        .collect()
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let registry = DeviceRegistry::new(UsbTransport::new());
    println!("Scanning for DACs...\n");
    let count = registry.open()?;
    if count == 0 {
        println!("No DACs found.");
        return Ok(());
    }

    match args.command {
        Cmd::List => {
            for dac in registry.devices() {
                let status = match dac.status() {
                    Ok(DeviceStatus::Ready) => "ready".to_string(),
                    Ok(DeviceStatus::Busy) => "busy".to_string(),
                    Err(e) => format!("error: {e}"),
                };
                let firmware = dac
                    .firmware_version()
                    .map_or_else(|e| format!("? ({e})"), |v| v.to_string());
                println!(
                    "  [{}] {} (firmware {}, {})",
                    dac.index(),
                    dac.name()?,
                    firmware,
                    status
                );
            }
        }
        Cmd::Circle {
            device,
            points,
            pps,
            frames,
        } => {
            let dac = registry.device(device)?;
            let frame = Frame::with_flags(pps, circle(points), WriteFrameFlags::SINGLE_MODE);
            println!("Projecting circle on {}...", dac.name()?);
            let mut sent = 0;
            while sent < frames {
                if dac.status()? == DeviceStatus::Ready {
                    dac.write_frame(&frame)?;
                    sent += 1;
                }
            }
            dac.stop()?;
        }
        Cmd::Stop { device } => registry.device(device)?.stop()?,
        Cmd::Shutter { device, state } => registry.device(device)?.set_shutter(state == "open")?,
        Cmd::Rename { device, name } => {
            let dac = registry.device(device)?;
            dac.set_name(&name)?;
            println!("Device {} is now {}", device, dac.name()?);
        }
    }

    registry.close()
}
