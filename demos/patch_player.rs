//! Play a small patch on an output device
//!
//! Run with: cargo run --example patch_player --features cpal_sink
//!
//! Lists available devices and lets you pick one, then plays a block-rate
//! square wave built from a `z~` feedback loop (`1 - previous block`), with
//! its level swept from the main thread through the control queue.

use std::io::{self, Write};
use std::thread::sleep;
use std::time::{Duration, Instant};

use klingt_pd::{atoms, CpalDevice, Engine, EngineConfig, PatchDescription};

/// A z~ loop alternating between 1 and 0 every block, scaled by `level`
fn patch() -> PatchDescription {
    PatchDescription::new()
        .node(0, "sig~", atoms![1])
        .node(1, "*~", atoms![-1])
        .node(2, "z~", atoms![])
        .node(3, "+~", atoms![])
        .node(4, "*~", atoms![0.1f32])
        .node(5, "receive", atoms!["level"])
        .node(6, "outlet~", atoms![])
        .node(7, "outlet~", atoms![])
        .node(8, "print", atoms!["level"])
        // out = 1 - delayed out
        .connect(2, 0, 1, 0)
        .connect(1, 0, 3, 0)
        .connect(0, 0, 3, 1)
        .connect(3, 0, 4, 0)
        .connect(5, 0, 4, 1)
        .connect(5, 0, 8, 0)
        .connect(4, 0, 6, 0)
        .connect(4, 0, 7, 0)
        .connect(3, 0, 2, 0)
}

fn main() {
    tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();

    let devices = CpalDevice::list_outputs();
    if devices.is_empty() {
        eprintln!("No audio output devices found!");
        return;
    }

    println!("Available audio output devices:");
    for (i, device) in devices.iter().enumerate() {
        println!(
            "  [{}] {} ({}Hz, {} ch)",
            i,
            device.name(),
            device.sample_rate(),
            device.channels()
        );
    }

    print!("\nSelect device [0]: ");
    io::stdout().flush().unwrap();
    let mut input = String::new();
    io::stdin().read_line(&mut input).unwrap();
    let choice: usize = input.trim().parse().unwrap_or(0);

    let device = devices.into_iter().nth(choice).unwrap_or_else(|| {
        println!("Invalid choice, using default device");
        CpalDevice::default_output().expect("No default device")
    });
    println!("\nUsing: {} @ {}Hz", device.name(), device.sample_rate());

    let config = EngineConfig::default()
        .with_sample_rate(device.sample_rate())
        .with_channels(device.channels() as usize);
    let mut engine = Engine::new(config).with_backend(device.create_backend());
    engine.load_patch(&patch()).expect("patch should build");
    let mut control = engine.control_sender().expect("fresh engine");
    engine.start();

    println!("Playing... Press Ctrl+C to stop\n");

    let sample_rate = engine.sample_rate() as f64;
    let block = engine.block_size() as u64;

    // Pre-fill buffer
    for _ in 0..8 {
        engine.process().unwrap();
    }
    let mut frames_generated: u64 = 8 * block;
    let start = Instant::now();
    let mut last_level = Instant::now();

    loop {
        let elapsed = start.elapsed().as_secs_f64();
        let frames_should_have_played = (elapsed * sample_rate) as u64;

        if frames_generated < frames_should_have_played + 440 {
            engine.process().unwrap();
            frames_generated += block;
        } else {
            sleep(Duration::from_micros(500));
        }

        if last_level.elapsed() > Duration::from_millis(250) {
            let level = 0.05 + 0.05 * (elapsed as f32 * 0.5 * std::f32::consts::PI).sin();
            let _ = control.send("level", atoms![level]);
            last_level = Instant::now();
        }
    }
}
