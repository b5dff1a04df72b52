use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;

use anyhow::Result;
use clap::Parser;

use common::{EmulationCore, UpdateMessage};
use nitro::{NitroConfig, NitroCore};

#[derive(Parser)]
#[command(name = "nitro-mu", about = "Dual-ARM handheld console emulator")]
struct Args {
    /// Program binary loaded into main RAM
    rom: Option<PathBuf>,

    /// Main-processor boot ROM image
    #[arg(long)]
    bios9: Option<PathBuf>,

    /// Coprocessor boot ROM image
    #[arg(long)]
    bios7: Option<PathBuf>,

    /// Stop after this many frames
    #[arg(long)]
    frames: Option<u64>,

    /// Disable the recompiler and run fully interpreted
    #[arg(long)]
    interpret: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let core = NitroCore {
        config: NitroConfig {
            rom: args.rom,
            bios9: args.bios9,
            bios7: args.bios7,
            frame_limit: args.frames,
            interpret_only: args.interpret,
        },
    };
    log::info!("starting {} core", core.name());

    let (control_tx, control_rx) = mpsc::channel();
    let (update_tx, update_rx) = mpsc::sync_channel(4);

    // Headless frontend: drain vsync updates off-thread so the core never
    // stalls on the sync channel.
    let reporter = thread::spawn(move || {
        let mut frames = 0u64;
        while let Ok(UpdateMessage::Vsync) = update_rx.recv() {
            frames += 1;
            if frames % 600 == 0 {
                log::debug!("{} frames", frames);
            }
        }
        frames
    });

    let mut instance = core.new()?;
    instance.run(&control_rx, update_tx)?;

    drop(control_tx);
    match reporter.join() {
        Ok(frames) => log::info!("ran {} frames", frames),
        Err(_) => log::warn!("frame reporter panicked"),
    }
    Ok(())
}
