//! Benchmarks for the control-rate paths of the engine.
//!
//! Run with: cargo bench
//!
//! Nothing here renders audio. What matters is how long a note event takes
//! to turn into backend automation, since that work happens on the thread
//! that receives MIDI.

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use polyvoice::{EngineConfig, OfflineBackend, SynthEngine, SynthParameters};

const POLYPHONIES: &[usize] = &[4, 8, 16, 32];

fn engine(polyphony: usize, params: SynthParameters) -> SynthEngine<OfflineBackend> {
    SynthEngine::new(
        OfflineBackend::new(48_000.0),
        EngineConfig::default().polyphony(polyphony).noise_seconds(0.25),
        params,
    )
    .expect("offline backend never fails construction")
}

fn bench_note_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine/note_churn");

    for &polyphony in POLYPHONIES {
        // Twice as many notes as slots, so every other note-on steals.
        let mut synth = engine(polyphony, SynthParameters::default());
        let span = (polyphony * 2) as u8;
        let mut note = 0u8;

        group.bench_with_input(BenchmarkId::new("steal", polyphony), &polyphony, |b, _| {
            b.iter(|| {
                let n = 36 + note % span;
                synth.note_on(black_box(n), 100);
                synth.backend_mut().advance(0.001);
                note = note.wrapping_add(1);
            })
        });

        // Paired on/off with cleanup, the common case for a player.
        let mut synth = engine(polyphony, SynthParameters::default());
        group.bench_with_input(BenchmarkId::new("on_off", polyphony), &polyphony, |b, _| {
            b.iter(|| {
                synth.note_on(black_box(60), 100);
                synth.note_off(black_box(60));
                synth.backend_mut().advance(1.0);
                synth.tick();
            })
        });
    }

    group.finish();
}

fn bench_modulation(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine/modulation");

    for &polyphony in POLYPHONIES {
        let mut params = SynthParameters::default();
        params.lfo.enabled = true;
        params.lfo.pitch_depth = 0.3;
        params.lfo.filter_depth = 0.5;
        let mut synth = engine(polyphony, params);
        for i in 0..polyphony {
            synth.note_on(48 + i as u8, 100);
        }

        let mut value = 0.0f32;
        group.bench_with_input(BenchmarkId::new("pitch_bend", polyphony), &polyphony, |b, _| {
            b.iter(|| {
                value = if value > 0.9 { -1.0 } else { value + 0.05 };
                synth.set_pitch_bend(black_box(value));
            })
        });

        let base = synth.params().clone();
        let mut flip = false;
        group.bench_with_input(
            BenchmarkId::new("update_params", polyphony),
            &polyphony,
            |b, _| {
                b.iter(|| {
                    let mut next = base.clone();
                    flip = !flip;
                    next.lfo.rate_hz = if flip { 3.0 } else { 5.0 };
                    next.filter.resonance = if flip { 4.0 } else { 1.0 };
                    synth.update_params(black_box(next));
                })
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_note_churn, bench_modulation);
criterion_main!(benches);
