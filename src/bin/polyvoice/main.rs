//! polyvoice - plays a short chord progression against the offline backend
//! and prints the resulting amplitude automation per voice.
//!
//! Run with: cargo run -- [polyphony]
//! Set RUST_LOG=polyvoice=debug to watch allocation decisions.

use std::{thread, time::Duration};

use polyvoice::{
    backend::ParamRef, AudioBackend, EngineConfig, OfflineBackend, SynthEngine, SynthMessage,
    SynthParameters,
};
use rtrb::RingBuffer;
use tracing_subscriber::EnvFilter;

const SAMPLE_RATE: f32 = 48_000.0;
const BLOCK_SECONDS: f64 = 0.01;
const PLOT_STEP: f64 = 0.05;
const PLOT_WIDTH: usize = 40;

/// (delay before sending in ms, message)
fn script() -> Vec<(u64, SynthMessage)> {
    let chord = |notes: &[u8], delay: u64| {
        notes
            .iter()
            .enumerate()
            .map(|(i, &note)| {
                (
                    if i == 0 { delay } else { 0 },
                    SynthMessage::NoteOn {
                        note,
                        velocity: 100,
                    },
                )
            })
            .collect::<Vec<_>>()
    };
    let release = |notes: &[u8], delay: u64| {
        notes
            .iter()
            .enumerate()
            .map(|(i, &note)| (if i == 0 { delay } else { 0 }, SynthMessage::NoteOff { note }))
            .collect::<Vec<_>>()
    };

    let mut events = Vec::new();
    events.extend(chord(&[48, 55, 60, 64], 0));
    events.extend(release(&[48, 55, 60, 64], 400));
    events.extend(chord(&[53, 57, 60, 65], 50));
    events.push((100, SynthMessage::PitchBend { value: 0.5 }));
    events.push((100, SynthMessage::PitchBend { value: 0.0 }));
    events.extend(chord(&[67, 71, 74], 100));
    events.push((300, SynthMessage::AllNotesOff));
    events
}

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let polyphony = std::env::args()
        .nth(1)
        .map(|arg| arg.parse::<usize>())
        .transpose()?
        .unwrap_or(8);

    let config = EngineConfig::default().polyphony(polyphony);
    let mut params = SynthParameters::default();
    params.lfo.enabled = true;
    params.lfo.filter_depth = 0.2;

    let mut synth = SynthEngine::new(OfflineBackend::new(SAMPLE_RATE), config, params)?;

    let (mut tx, mut rx) = RingBuffer::<SynthMessage>::new(64);
    let producer = thread::spawn(move || {
        for (delay, message) in script() {
            thread::sleep(Duration::from_millis(delay));
            let mut pending = message;
            // Spin until the control loop has made room.
            while let Err(rtrb::PushError::Full(back)) = tx.push(pending) {
                pending = back;
                thread::sleep(Duration::from_millis(1));
            }
        }
    });

    let mut sounding_history: Vec<(f64, usize)> = Vec::new();
    loop {
        synth.drain(&mut rx);
        let now = synth.backend().now();
        let sounding = synth.voices().iter().filter(|v| !v.is_free()).count();
        sounding_history.push((now, sounding));

        if rx.is_abandoned() && rx.is_empty() && sounding == 0 {
            break;
        }
        synth.backend_mut().advance(BLOCK_SECONDS);
        thread::sleep(Duration::from_secs_f64(BLOCK_SECONDS));
    }
    producer
        .join()
        .map_err(|_| color_eyre::eyre::eyre!("message producer panicked"))?;

    let end = synth.backend().now();
    println!("rendered {end:.2}s of automation with {polyphony} voices\n");

    for voice in synth.voices() {
        let gain = ParamRef::gain(voice.amp());
        println!("voice {}", voice.index());
        let mut t = 0.0;
        while t <= end {
            let level = synth.backend().value_at(gain, t).unwrap_or(0.0);
            let bar = "#".repeat((level.clamp(0.0, 1.0) * PLOT_WIDTH as f32).round() as usize);
            println!("  {t:>5.2}s {level:>5.3} {bar}");
            t += PLOT_STEP;
        }
    }

    let peak = sounding_history.iter().map(|&(_, n)| n).max().unwrap_or(0);
    println!("\npeak sounding voices: {peak}");

    synth.dispose();
    Ok(())
}
