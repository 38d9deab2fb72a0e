//! IR Console Example
//!
//! Opens the USB-UIRT, prints its version, listens for received codes,
//! learns one code with progress output and transmits it back.
//!
//! Run with: cargo run --example `ir_console`
//!
//! Set `RUST_LOG=uirt=debug` to see the operation lifecycle.

use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use uirt::{
    Channel, Emitter, LearnRequest, Learner, LearnerConfig, Receiver, TransmitRequest,
    Transmitter, TransmitterConfig,
};

fn main() -> Result<(), uirt::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║                UIRT - Infrared Console                     ║");
    println!("╚════════════════════════════════════════════════════════════╝");
    println!();
    println!("uirt Version: {}", uirt::VERSION);
    println!();

    if !uirt::is_driver_available() {
        println!("❌ USB-UIRT driver library not found.");
        println!("   Requires: uuirtdrv installed on the library search path");
        return Ok(());
    }

    let channel = match Channel::open_system() {
        Ok(channel) => Arc::new(channel),
        Err(err) => {
            println!("❌ Could not open the device: {err}");
            return Ok(());
        }
    };

    println!("┌─────────────────────────────────────────────────────────────┐");
    println!("│ Device                                                      │");
    println!("├─────────────────────────────────────────────────────────────┤");
    for line in channel.version()?.to_string().lines() {
        println!("│ {line:<59} │");
    }
    println!("└─────────────────────────────────────────────────────────────┘");
    println!();

    // Listen for anything the device sees while we work
    let receiver = Receiver::with_channel(&channel)?;
    let listening = receiver.subscribe(|event| println!("  ← received {}", event.code))?;

    // Learn one code
    let learner = Learner::with_channel(&channel, LearnerConfig::default())?;
    learner.on_progress(|event| {
        let p = &event.progress;
        println!(
            "  … {:>3}%  quality {:>3}  carrier {} Hz",
            p.percent, p.signal_quality, p.carrier_frequency
        );
    });

    println!("Point a remote at the receiver and hold a button (15s)...");
    let Some(code) = learner.learn(LearnRequest::new(), Duration::from_secs(15))? else {
        println!("✗ Nothing learned before the timeout.");
        receiver.unsubscribe(listening)?;
        return Ok(());
    };
    println!("✓ Learned: {code}");
    println!();

    // Send it back out of every emitter
    let transmitter = Transmitter::with_channel(
        &channel,
        TransmitterConfig::default().with_emitter(Emitter::All),
    )?;
    println!("Transmitting learned code...");
    let request = TransmitRequest::new(code).with_repeat_count(2);
    if transmitter.transmit(&request, Duration::from_secs(5))? {
        println!("✓ Transmitted");
    } else {
        println!("✗ Transmit did not finish within 5s");
    }

    receiver.unsubscribe(listening)?;
    learner.close();
    transmitter.close();
    receiver.close();
    channel.close();

    println!();
    println!("Done.");
    Ok(())
}
